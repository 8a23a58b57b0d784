//! Typed views of the simulation entries kept in the store.
//!
//! The store holds plain JSON; these types describe the fields the
//! orchestrator and the control plane agree on. Writers only ever touch
//! the fields they own, so a simulation entry may carry extra fields
//! (simulator data under `store`) that these types ignore.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use simulacrum_env::ServiceAddress;
use std::collections::BTreeMap;

/// Lifecycle of a simulation.
///
/// ```text
/// creating ──► running ──► destroying ──► halted
///     │
///     └──────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    /// Services are being started
    Creating,

    /// Services are up and scenarios are accepted
    Running,

    /// Startup or a running listener failed (terminal)
    Failed,

    /// Teardown requested by the control plane
    Destroying,

    /// Teardown complete (terminal)
    Halted,
}

impl SimulationStatus {
    /// Returns the status as stored in the tree.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Creating => "creating",
            SimulationStatus::Running => "running",
            SimulationStatus::Failed => "failed",
            SimulationStatus::Destroying => "destroying",
            SimulationStatus::Halted => "halted",
        }
    }

    /// Returns true for statuses no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationStatus::Failed | SimulationStatus::Halted)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: SimulationStatus) -> bool {
        use SimulationStatus::*;
        matches!(
            (self, next),
            (Creating, Running)
                | (Creating, Failed)
                | (Creating, Destroying)
                | (Running, Destroying)
                | (Running, Failed)
                | (Destroying, Halted)
        )
    }

    /// Reads a status out of a JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SimulationStatus> for Value {
    fn from(status: SimulationStatus) -> Self {
        Value::String(status.as_str().to_string())
    }
}

/// Classification of errors published into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// No simulator registered under the requested name
    UnknownSimulator,

    /// The simulator definition raised an error
    SimulatorError,

    /// A service could not be acquired during startup
    ServiceStartFailure,

    /// A running listener failed
    ListenerError,

    /// The background effects unit failed
    EffectsFailure,

    /// No scenario registered under the requested name
    UnknownScenario,

    /// A scenario raised an error
    ScenarioFailure,

    /// A request handler raised an error (only ever logged)
    HandlerFault,

    /// The simulation entry could not be read
    InvalidState,
}

/// Serializable error attached to a failed simulation or scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Error classification
    pub kind: ErrorKind,

    /// Human readable message
    pub message: String,
}

impl ErrorDescriptor {
    /// Creates a new descriptor.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A started service as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    /// Declared service name
    pub name: String,

    /// `<protocol>://localhost:<port>`
    pub url: String,
}

impl ServiceHandle {
    /// Creates a handle from a resolved address.
    pub fn new(name: impl Into<String>, address: &ServiceAddress) -> Self {
        Self {
            name: name.into(),
            url: address.url(),
        }
    }
}

/// Per-service runtime options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Requested port, ephemeral when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Anything else the service understands
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceOptions {
    /// Options requesting a fixed port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port: Some(port),
            extra: Map::new(),
        }
    }
}

/// Configuration fixed when a simulation is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Simulator specific options
    #[serde(default = "empty_object")]
    pub options: Value,

    /// Per-service options keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceOptions>,
}

impl SimulationOptions {
    /// Creates options with the given simulator options.
    pub fn new(options: Value) -> Self {
        Self {
            options,
            services: BTreeMap::new(),
        }
    }

    /// Adds options for one service.
    pub fn with_service(mut self, name: impl Into<String>, options: ServiceOptions) -> Self {
        self.services.insert(name.into(), options);
        self
    }
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self::new(empty_object())
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Lifecycle of a scenario entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Written by the control plane, not yet picked up
    #[default]
    New,

    /// Picked up, scenario function in progress
    Running,

    /// Finished, `data` holds the result
    Completed,

    /// Finished, `error` holds the reason
    Failed,
}

impl ScenarioStatus {
    /// Returns true once the scenario has a result.
    pub fn is_settled(&self) -> bool {
        matches!(self, ScenarioStatus::Completed | ScenarioStatus::Failed)
    }
}

/// A scenario request and, once settled, its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioState {
    /// Scenario name; the entry key is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Parameters passed to the scenario function
    #[serde(default)]
    pub params: Value,

    /// Progress of the request
    #[serde(default)]
    pub status: ScenarioStatus,

    /// Result of a completed scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Reason of a failed scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl ScenarioState {
    /// Creates a new request for the named scenario.
    pub fn request(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: Some(name.into()),
            params,
            status: ScenarioStatus::New,
            data: None,
            error: None,
        }
    }

    /// Returns the scenario name, falling back to the entry key.
    pub fn scenario_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}

/// Snapshot of one simulation as published in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Simulation id
    pub id: String,

    /// Name of the registered simulator
    pub simulator: String,

    /// Creation-time configuration
    #[serde(default)]
    pub options: SimulationOptions,

    /// Lifecycle status
    pub status: SimulationStatus,

    /// Started services, populated once on `running`
    #[serde(default)]
    pub services: Vec<ServiceHandle>,

    /// Scenario entries keyed by request key
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioState>,

    /// Set when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl SimulationState {
    /// Creates the initial entry for a new simulation.
    pub fn creating(
        id: impl Into<String>,
        simulator: impl Into<String>,
        options: SimulationOptions,
    ) -> Self {
        Self {
            id: id.into(),
            simulator: simulator.into(),
            options,
            status: SimulationStatus::Creating,
            services: Vec::new(),
            scenarios: BTreeMap::new(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        use SimulationStatus::*;

        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Destroying));
        assert!(Destroying.can_transition_to(Halted));

        assert!(!Running.can_transition_to(Creating));
        assert!(!Failed.can_transition_to(Destroying));
        assert!(!Halted.can_transition_to(Running));
        assert!(Failed.is_terminal() && Halted.is_terminal());
    }

    #[test]
    fn test_state_wire_format() {
        let state = SimulationState::creating("abc", "echo", SimulationOptions::default());
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["status"], json!("creating"));
        assert_eq!(value["services"], json!([]));
        assert!(value.get("error").is_none());

        let err = ErrorDescriptor::new(ErrorKind::ServiceStartFailure, "port in use");
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            json!({ "kind": "service-start-failure", "message": "port in use" })
        );
    }

    #[test]
    fn test_scenario_request_defaults() {
        // The control plane may write nothing but params.
        let state: ScenarioState = serde_json::from_value(json!({ "params": {} })).unwrap();

        assert_eq!(state.status, ScenarioStatus::New);
        assert_eq!(state.scenario_name("person"), "person");
        assert!(!state.status.is_settled());
    }

    #[test]
    fn test_service_options_keep_extra_fields() {
        let options: ServiceOptions =
            serde_json::from_value(json!({ "port": 4400, "debug": true })).unwrap();

        assert_eq!(options.port, Some(4400));
        assert_eq!(options.extra.get("debug"), Some(&json!(true)));
    }
}
