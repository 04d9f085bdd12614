//! Trajectory overlay plot.
//!
//! Draws every vehicle trajectory of every run into one SVG so that
//! diverging runs are visible at a glance:
//!
//! - One polyline per vehicle per run, colored by run index
//! - A marker at the first sample of each trajectory
//! - Equal aspect ratio (one world unit is the same length on both axes)

use repro_env::Trajectory;
use std::path::Path;
use thiserror::Error;

#[cfg(feature = "plot")]
use plotters::prelude::*;

/// Run colors, cycled by run index: blue, green, red, orange.
pub const RUN_PALETTE: [(u8, u8, u8); 4] = [
    (0, 0, 255),
    (0, 128, 0),
    (255, 0, 0),
    (255, 165, 0),
];

/// Errors raised while rendering a plot.
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Nothing to plot: no trajectory has samples")]
    NoData,

    #[error("Drawing backend error: {0}")]
    Backend(String),

    #[error("Plotting not available (compile with --features plot)")]
    Unavailable,
}

/// Rendering parameters.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    /// Width and height of the square canvas in pixels
    pub size: u32,

    /// Line opacity
    pub alpha: f64,

    /// Line width in pixels
    pub line_width: u32,

    /// Start marker radius in pixels
    pub marker_radius: u32,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            size: 1600,
            alpha: 0.3,
            line_width: 2,
            marker_radius: 3,
        }
    }
}

/// Color of run `run_index`.
pub fn run_color(run_index: usize) -> (u8, u8, u8) {
    RUN_PALETTE[run_index % RUN_PALETTE.len()]
}

/// Axis-aligned x/y bounds of a set of runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl PlotBounds {
    /// Bounds over every sample of every trajectory; `None` without samples.
    pub fn of(runs: &[&[Trajectory]]) -> Option<Self> {
        let mut points = runs
            .iter()
            .flat_map(|run| run.iter())
            .flat_map(|traj| traj.iter());

        let first = points.next()?;
        let init = Self {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };

        Some(points.fold(init, |b, p| Self {
            min_x: b.min_x.min(p.x),
            max_x: b.max_x.max(p.x),
            min_y: b.min_y.min(p.y),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Square ranges sharing the larger span, centered on the data, with 5% padding.
    pub fn equal_aspect(&self) -> (std::ops::Range<f32>, std::ops::Range<f32>) {
        let span = (self.max_x - self.min_x).max(self.max_y - self.min_y);
        let half = if span > 0.0 { span * 0.525 } else { 1.0 };
        let cx = (self.min_x + self.max_x) / 2.0;
        let cy = (self.min_y + self.max_y) / 2.0;
        ((cx - half)..(cx + half), (cy - half)..(cy + half))
    }
}

/// Renders the overlay of all runs into an SVG file at `path`.
#[cfg(feature = "plot")]
pub fn render_overlay(
    path: &Path,
    runs: &[&[Trajectory]],
    options: &PlotOptions,
) -> Result<(), PlotError> {
    let bounds = PlotBounds::of(runs).ok_or(PlotError::NoData)?;
    let (x_range, y_range) = bounds.equal_aspect();

    let root = SVGBackend::new(path, (options.size, options.size)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| PlotError::Backend(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| PlotError::Backend(e.to_string()))?;

    for (run_index, run) in runs.iter().enumerate() {
        let (r, g, b) = run_color(run_index);
        let color = RGBColor(r, g, b).mix(options.alpha);

        for traj in run.iter() {
            let Some(start) = traj.first() else {
                continue;
            };

            chart
                .draw_series(LineSeries::new(
                    traj.iter().map(|p| (p.x, p.y)),
                    color.stroke_width(options.line_width),
                ))
                .map_err(|e| PlotError::Backend(e.to_string()))?;

            chart
                .draw_series(std::iter::once(Circle::new(
                    (start.x, start.y),
                    options.marker_radius,
                    color.filled(),
                )))
                .map_err(|e| PlotError::Backend(e.to_string()))?;
        }
    }

    root.present()
        .map_err(|e| PlotError::Backend(e.to_string()))?;

    tracing::info!("Trajectory overlay written to {}", path.display());
    Ok(())
}

#[cfg(not(feature = "plot"))]
pub fn render_overlay(
    _path: &Path,
    _runs: &[&[Trajectory]],
    _options: &PlotOptions,
) -> Result<(), PlotError> {
    Err(PlotError::Unavailable)
}
