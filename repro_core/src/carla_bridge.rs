//! CARLA Bridge Client - Request/Response Simulator Access
//!
//! Blocking JSON request/response client for a CARLA bridge process that
//! forwards each request to the simulator's native client API.
//!
//! - One request in flight at a time (ZMQ REQ socket)
//! - Every request carries `method` and `params`; every reply carries either
//!   `result` or `error`
//! - A timed-out socket is never reused: the REQ state machine is broken
//!   after a missing reply, so the connection is marked closed

use repro_env::{
    ActorHandle, ActorId, Blueprint, EnvError, Location, Simulator, SpawnCommand, SpawnResponse,
    TrafficLightInfo, TrafficManager, Transform, WorldSettings,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Request sent to the bridge.
///
/// Encoded as `{"method": "<snake_case name>", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum BridgeRequest {
    GetServerVersion,
    GetSettings,
    ApplySettings { settings: WorldSettings },
    GetBlueprints { pattern: String },
    GetSpawnPoints,
    ApplyBatchSync { commands: Vec<SpawnCommand>, do_tick: bool },
    GetActor { actor_id: ActorId },
    GetLocation { actor_id: ActorId },
    DestroyActor { actor_id: ActorId },
    GetTrafficLights,
    ResetTrafficLightGroup { actor_id: ActorId },
    Tick,
    TrafficManager { port: u16, command: TrafficManagerCommand },
}

impl BridgeRequest {
    /// Method name as it appears on the wire (for logging).
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetServerVersion => "get_server_version",
            Self::GetSettings => "get_settings",
            Self::ApplySettings { .. } => "apply_settings",
            Self::GetBlueprints { .. } => "get_blueprints",
            Self::GetSpawnPoints => "get_spawn_points",
            Self::ApplyBatchSync { .. } => "apply_batch_sync",
            Self::GetActor { .. } => "get_actor",
            Self::GetLocation { .. } => "get_location",
            Self::DestroyActor { .. } => "destroy_actor",
            Self::GetTrafficLights => "get_traffic_lights",
            Self::ResetTrafficLightGroup { .. } => "reset_traffic_light_group",
            Self::Tick => "tick",
            Self::TrafficManager { .. } => "traffic_manager",
        }
    }
}

/// Traffic manager call, nested in [`BridgeRequest::TrafficManager`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TrafficManagerCommand {
    SetGlobalDistanceToLeadingVehicle { meters: f32 },
    GlobalPercentageSpeedDifference { percentage: f32 },
    SetHybridPhysicsMode { enabled: bool },
    SetSynchronousMode { enabled: bool },
    SetRandomDeviceSeed { seed: u64 },
    IgnoreLightsPercentage { actor_id: ActorId, percentage: f32 },
    ResetTrafficLights,
}

/// Reply received from the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeReply {
    #[serde(default)]
    pub result: serde_json::Value,

    #[serde(default)]
    pub error: Option<String>,
}

impl BridgeReply {
    /// Parse reply from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(data).map_err(|e| BridgeError::Parse(e.to_string()))
    }

    /// Returns the typed result, or the remote error message.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, BridgeError> {
        if let Some(message) = self.error {
            return Err(BridgeError::Remote(message));
        }
        serde_json::from_value(self.result).map_err(|e| BridgeError::Parse(e.to_string()))
    }
}

/// One entry of an `apply_batch_sync` result list.
#[derive(Debug, Clone, Deserialize)]
struct BatchItem {
    #[serde(default)]
    actor_id: Option<ActorId>,

    #[serde(default)]
    error: Option<String>,
}

impl From<BatchItem> for SpawnResponse {
    fn from(item: BatchItem) -> Self {
        match (item.error, item.actor_id) {
            (Some(message), _) if !message.is_empty() => Err(message),
            (_, Some(id)) => Ok(id),
            _ => Err("response carries neither actor id nor error".to_string()),
        }
    }
}

/// Errors for the bridge client
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("ZMQ error: {0}")]
    Zmq(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No reply within {0}ms")]
    Timeout(u64),

    #[error("Bridge reported: {0}")]
    Remote(String),

    #[error("Connection closed")]
    Closed,
}

impl From<BridgeError> for EnvError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Zmq(msg) => EnvError::ConnectionError(msg),
            BridgeError::Parse(msg) => EnvError::ProtocolError(msg),
            BridgeError::Timeout(ms) => EnvError::Timeout(ms),
            BridgeError::Remote(msg) => EnvError::RpcError(msg),
            BridgeError::Closed => EnvError::Disconnected,
        }
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Moves one encoded request to the bridge and returns the encoded reply.
pub trait Transport {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, BridgeError>;
}

/// Shared request channel used by the world, its actors and the traffic manager.
pub struct BridgeConnection<T: Transport> {
    transport: T,
}

impl<T: Transport> BridgeConnection<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Sends a request and decodes the typed result.
    pub fn call<R: DeserializeOwned>(&self, request: &BridgeRequest) -> Result<R, EnvError> {
        let payload = serde_json::to_vec(request).map_err(EnvError::protocol)?;
        debug!(method = request.method(), bytes = payload.len(), "bridge request");

        let reply = self.transport.round_trip(&payload)?;
        Ok(BridgeReply::from_bytes(&reply)?.into_result()?)
    }
}

/// ZMQ REQ transport to the bridge process.
#[cfg(feature = "carla")]
pub struct ZmqTransport {
    socket: zmq::Socket,
    _context: zmq::Context,
    timeout_ms: u64,
    broken: std::cell::Cell<bool>,
}

#[cfg(feature = "carla")]
impl ZmqTransport {
    /// Connects a REQ socket to `tcp://host:port` with send/receive timeouts.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, BridgeError> {
        let context = zmq::Context::new();
        let timeout_ms = timeout.as_millis() as u64;
        let zmq_timeout = i32::try_from(timeout_ms).unwrap_or(i32::MAX);

        let socket = context.socket(zmq::REQ)
            .map_err(|e| BridgeError::Zmq(e.to_string()))?;
        socket.set_rcvtimeo(zmq_timeout)
            .map_err(|e| BridgeError::Zmq(e.to_string()))?;
        socket.set_sndtimeo(zmq_timeout)
            .map_err(|e| BridgeError::Zmq(e.to_string()))?;
        socket.set_linger(0)  // Never block process exit on unsent requests
            .map_err(|e| BridgeError::Zmq(e.to_string()))?;
        socket.connect(&format!("tcp://{}:{}", host, port))
            .map_err(|e| BridgeError::Zmq(e.to_string()))?;

        Ok(Self {
            socket,
            _context: context,
            timeout_ms,
            broken: std::cell::Cell::new(false),
        })
    }
}

#[cfg(feature = "carla")]
impl Transport for ZmqTransport {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, BridgeError> {
        if self.broken.get() {
            return Err(BridgeError::Closed);
        }

        let result = self.socket.send(request, 0)
            .and_then(|_| self.socket.recv_bytes(0));

        match result {
            Ok(reply) => Ok(reply),
            Err(zmq::Error::EAGAIN) => {
                self.broken.set(true);
                Err(BridgeError::Timeout(self.timeout_ms))
            }
            Err(e) => {
                self.broken.set(true);
                Err(BridgeError::Zmq(e.to_string()))
            }
        }
    }
}

// ============================================================================
// NON-ZMQ FALLBACK (when carla feature is disabled)
// ============================================================================

/// Placeholder transport: connecting always fails.
#[cfg(not(feature = "carla"))]
pub struct ZmqTransport {
    _private: (),
}

#[cfg(not(feature = "carla"))]
impl ZmqTransport {
    pub fn connect(_host: &str, _port: u16, _timeout: Duration) -> Result<Self, BridgeError> {
        Err(BridgeError::Zmq(
            "built without the `carla` feature (rebuild with --features carla)".into(),
        ))
    }
}

#[cfg(not(feature = "carla"))]
impl Transport for ZmqTransport {
    fn round_trip(&self, _request: &[u8]) -> Result<Vec<u8>, BridgeError> {
        Err(BridgeError::Closed)
    }
}

// ============================================================================
// SIMULATOR ADAPTER
// ============================================================================

/// Live simulator reached through the bridge.
pub struct CarlaBridge<T: Transport> {
    conn: Rc<BridgeConnection<T>>,
    server_version: String,
}

impl CarlaBridge<ZmqTransport> {
    /// Connects to the bridge at `host:port` and performs the version handshake.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, EnvError> {
        let transport = ZmqTransport::connect(host, port, timeout)?;
        let bridge = Self::with_transport(transport)?;
        info!("✓ Connected to CARLA {} at {}:{}", bridge.server_version(), host, port);
        Ok(bridge)
    }
}

impl<T: Transport> CarlaBridge<T> {
    /// Wraps an already connected transport.
    pub fn with_transport(transport: T) -> Result<Self, EnvError> {
        let conn = Rc::new(BridgeConnection::new(transport));
        let server_version: String = conn.call(&BridgeRequest::GetServerVersion)?;
        Ok(Self { conn, server_version })
    }

    /// Version string reported by the simulator during the handshake.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

impl<T: Transport> Simulator for CarlaBridge<T> {
    type Actor = BridgeActor<T>;
    type TrafficManager = BridgeTrafficManager<T>;

    fn settings(&self) -> Result<WorldSettings, EnvError> {
        self.conn.call(&BridgeRequest::GetSettings)
    }

    fn apply_settings(&self, settings: &WorldSettings) -> Result<(), EnvError> {
        self.conn.call(&BridgeRequest::ApplySettings { settings: *settings })
    }

    fn blueprints(&self, pattern: &str) -> Result<Vec<Blueprint>, EnvError> {
        self.conn.call(&BridgeRequest::GetBlueprints { pattern: pattern.to_string() })
    }

    fn spawn_points(&self) -> Result<Vec<Transform>, EnvError> {
        self.conn.call(&BridgeRequest::GetSpawnPoints)
    }

    fn apply_batch_sync(
        &self,
        batch: Vec<SpawnCommand>,
        do_tick: bool,
    ) -> Result<Vec<SpawnResponse>, EnvError> {
        let expected = batch.len();
        let items: Vec<BatchItem> = self.conn.call(&BridgeRequest::ApplyBatchSync {
            commands: batch,
            do_tick,
        })?;

        if items.len() != expected {
            return Err(EnvError::protocol(format!(
                "batch of {} commands answered with {} responses",
                expected,
                items.len()
            )));
        }

        Ok(items.into_iter().map(SpawnResponse::from).collect())
    }

    fn actor(&self, id: ActorId) -> Result<Option<Self::Actor>, EnvError> {
        let found: Option<ActorId> = self.conn.call(&BridgeRequest::GetActor { actor_id: id })?;
        Ok(found.map(|id| BridgeActor {
            id,
            conn: Rc::clone(&self.conn),
        }))
    }

    fn traffic_manager(&self, port: u16) -> Result<Self::TrafficManager, EnvError> {
        Ok(BridgeTrafficManager {
            port,
            conn: Rc::clone(&self.conn),
        })
    }

    fn traffic_lights(&self) -> Result<Vec<TrafficLightInfo>, EnvError> {
        self.conn.call(&BridgeRequest::GetTrafficLights)
    }

    fn reset_traffic_light_group(&self, light: ActorId) -> Result<(), EnvError> {
        self.conn.call(&BridgeRequest::ResetTrafficLightGroup { actor_id: light })
    }

    fn tick(&self) -> Result<u64, EnvError> {
        self.conn.call(&BridgeRequest::Tick)
    }
}

/// Actor handle backed by the bridge connection.
pub struct BridgeActor<T: Transport> {
    id: ActorId,
    conn: Rc<BridgeConnection<T>>,
}

impl<T: Transport> ActorHandle for BridgeActor<T> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn location(&self) -> Result<Location, EnvError> {
        self.conn.call(&BridgeRequest::GetLocation { actor_id: self.id })
    }

    fn destroy(&self) -> Result<bool, EnvError> {
        self.conn.call(&BridgeRequest::DestroyActor { actor_id: self.id })
    }
}

/// Traffic manager handle backed by the bridge connection.
pub struct BridgeTrafficManager<T: Transport> {
    port: u16,
    conn: Rc<BridgeConnection<T>>,
}

impl<T: Transport> BridgeTrafficManager<T> {
    fn send(&self, command: TrafficManagerCommand) -> Result<(), EnvError> {
        self.conn.call(&BridgeRequest::TrafficManager { port: self.port, command })
    }
}

impl<T: Transport> TrafficManager for BridgeTrafficManager<T> {
    fn port(&self) -> u16 {
        self.port
    }

    fn set_global_distance_to_leading_vehicle(&self, meters: f32) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::SetGlobalDistanceToLeadingVehicle { meters })
    }

    fn global_percentage_speed_difference(&self, percentage: f32) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::GlobalPercentageSpeedDifference { percentage })
    }

    fn set_hybrid_physics_mode(&self, enabled: bool) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::SetHybridPhysicsMode { enabled })
    }

    fn set_synchronous_mode(&self, enabled: bool) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::SetSynchronousMode { enabled })
    }

    fn set_random_device_seed(&self, seed: u64) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::SetRandomDeviceSeed { seed })
    }

    fn ignore_lights_percentage(&self, actor: ActorId, percentage: f32) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::IgnoreLightsPercentage {
            actor_id: actor,
            percentage,
        })
    }

    fn reset_traffic_lights(&self) -> Result<(), EnvError> {
        self.send(TrafficManagerCommand::ResetTrafficLights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repro_env::BlueprintAttribute;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned replies and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: RefCell<VecDeque<Value>>,
        requests: RefCell<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn with_replies(replies: Vec<Value>) -> Rc<Self> {
            let transport = Self::default();
            transport.replies.borrow_mut().push_back(json!({"result": "0.9.15"}));
            transport.replies.borrow_mut().extend(replies);
            Rc::new(transport)
        }
    }

    impl Transport for Rc<ScriptedTransport> {
        fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, BridgeError> {
            self.requests.borrow_mut().push(serde_json::from_slice(request).unwrap());
            let reply = self.replies.borrow_mut().pop_front().ok_or(BridgeError::Closed)?;
            Ok(serde_json::to_vec(&reply).unwrap())
        }
    }

    #[test]
    fn test_request_encoding() {
        let tick = serde_json::to_value(BridgeRequest::Tick).unwrap();
        assert_eq!(tick, json!({"method": "tick"}));

        let destroy = serde_json::to_value(BridgeRequest::DestroyActor {
            actor_id: ActorId(42),
        })
        .unwrap();
        assert_eq!(destroy, json!({"method": "destroy_actor", "params": {"actor_id": 42}}));

        let tm = serde_json::to_value(BridgeRequest::TrafficManager {
            port: 8000,
            command: TrafficManagerCommand::SetHybridPhysicsMode { enabled: true },
        })
        .unwrap();
        assert_eq!(
            tm,
            json!({
                "method": "traffic_manager",
                "params": {"port": 8000, "command": {"name": "set_hybrid_physics_mode", "enabled": true}}
            })
        );
    }

    #[test]
    fn test_method_names_match_wire_tags() {
        let requests = [
            BridgeRequest::GetSettings,
            BridgeRequest::GetSpawnPoints,
            BridgeRequest::GetTrafficLights,
            BridgeRequest::GetLocation { actor_id: ActorId(1) },
            BridgeRequest::GetBlueprints { pattern: "vehicle.*".into() },
        ];
        for request in requests {
            let encoded = serde_json::to_value(&request).unwrap();
            assert_eq!(encoded["method"], request.method());
        }
    }

    #[test]
    fn test_handshake_reads_version() {
        let transport = ScriptedTransport::with_replies(vec![]);
        let bridge = CarlaBridge::with_transport(Rc::clone(&transport)).unwrap();

        assert_eq!(bridge.server_version(), "0.9.15");
        assert_eq!(transport.requests.borrow()[0]["method"], "get_server_version");
    }

    #[test]
    fn test_remote_error_maps_to_rpc_error() {
        let transport = ScriptedTransport::with_replies(vec![json!({"error": "world not ready"})]);
        let bridge = CarlaBridge::with_transport(transport).unwrap();

        match bridge.tick() {
            Err(EnvError::RpcError(msg)) => assert_eq!(msg, "world not ready"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_batch_partial_failures() {
        let transport = ScriptedTransport::with_replies(vec![json!({
            "result": [
                {"actor_id": 17},
                {"error": "Spawn failed because of collision at spawn position"},
                {"actor_id": 12, "error": ""}
            ]
        })]);
        let bridge = CarlaBridge::with_transport(Rc::clone(&transport)).unwrap();

        let command = SpawnCommand {
            blueprint: Blueprint::new("vehicle.audi.tt")
                .with_attribute("number_of_wheels", BlueprintAttribute::new("4")),
            transform: Transform::default(),
            autopilot_port: 8000,
        };
        let responses = bridge
            .apply_batch_sync(vec![command.clone(), command.clone(), command], true)
            .unwrap();

        assert_eq!(responses[0], Ok(ActorId(17)));
        assert!(responses[1].as_ref().unwrap_err().contains("collision"));
        assert_eq!(responses[2], Ok(ActorId(12)));

        let sent = &transport.requests.borrow()[1];
        assert_eq!(sent["params"]["do_tick"], true);
        assert_eq!(sent["params"]["commands"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_batch_length_mismatch_is_protocol_error() {
        let transport = ScriptedTransport::with_replies(vec![json!({"result": []})]);
        let bridge = CarlaBridge::with_transport(transport).unwrap();

        let command = SpawnCommand {
            blueprint: Blueprint::new("vehicle.audi.tt"),
            transform: Transform::default(),
            autopilot_port: 8000,
        };
        assert!(matches!(
            bridge.apply_batch_sync(vec![command], false),
            Err(EnvError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_actor_lookup_and_location() {
        let transport = ScriptedTransport::with_replies(vec![
            json!({"result": 7}),
            json!({"result": {"x": 1.0, "y": 2.5, "z": 0.0}}),
            json!({"result": null}),
        ]);
        let bridge = CarlaBridge::with_transport(transport).unwrap();

        let actor = bridge.actor(ActorId(7)).unwrap().unwrap();
        assert_eq!(actor.id(), ActorId(7));

        let loc = actor.location().unwrap();
        approx::assert_relative_eq!(loc.y, 2.5);

        assert!(bridge.actor(ActorId(8)).unwrap().is_none());
    }

    #[test]
    fn test_traffic_manager_commands_carry_port() {
        let transport = ScriptedTransport::with_replies(vec![json!({}), json!({})]);
        let bridge = CarlaBridge::with_transport(Rc::clone(&transport)).unwrap();

        let tm = bridge.traffic_manager(8123).unwrap();
        assert_eq!(tm.port(), 8123);
        tm.ignore_lights_percentage(ActorId(3), 25.0).unwrap();
        tm.reset_traffic_lights().unwrap();

        let requests = transport.requests.borrow();
        assert_eq!(requests[1]["params"]["port"], 8123);
        assert_eq!(requests[1]["params"]["command"]["name"], "ignore_lights_percentage");
        assert_eq!(requests[1]["params"]["command"]["actor_id"], 3);
        assert_eq!(requests[2]["params"]["command"]["name"], "reset_traffic_lights");
    }

    #[test]
    fn test_garbage_reply_is_protocol_error() {
        assert!(matches!(
            BridgeReply::from_bytes(b"not json"),
            Err(BridgeError::Parse(_))
        ));

        let err: EnvError = BridgeError::Timeout(250).into();
        assert!(matches!(err, EnvError::Timeout(250)));
    }

    #[cfg(not(feature = "carla"))]
    #[test]
    fn test_connect_without_carla_feature_fails() {
        let result = CarlaBridge::connect("127.0.0.1", 2000, Duration::from_secs(1));
        assert!(matches!(result, Err(EnvError::ConnectionError(_))));
    }
}
