//! Error types for the simulation orchestrator.

use simulacrum_env::EnvError;
use thiserror::Error;

use crate::state::{ErrorDescriptor, ErrorKind};

/// Errors reading typed values out of the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The value at a path does not have the expected shape
    #[error("Invalid value at `{path}`: {source}")]
    Invalid {
        /// Dotted path of the offending value
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A typed value could not be serialized into the store
    #[error("Cannot serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors starting a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The environment could not provide a listener
    #[error(transparent)]
    Env(#[from] EnvError),

    /// A resource function failed for its own reasons
    #[error("{0}")]
    Custom(String),
}

impl ServiceError {
    /// Creates a custom service error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Errors raised by request handlers and middleware.
///
/// Any handler error ends the request with a generic `500` response.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request body or params were not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Store access failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

/// Errors raised while applying a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// No scenario with that name in the simulator's table
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Params did not match what the scenario expects
    #[error("Invalid scenario params: {0}")]
    InvalidParams(#[from] serde_json::Error),

    /// Store access failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The scenario failed for its own reasons
    #[error("{0}")]
    Failed(String),
}

impl ScenarioError {
    /// Creates a scenario failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Converts into the descriptor written back to the scenario entry.
    pub fn descriptor(&self) -> ErrorDescriptor {
        let kind = match self {
            ScenarioError::UnknownScenario(_) => ErrorKind::UnknownScenario,
            _ => ErrorKind::ScenarioFailure,
        };
        ErrorDescriptor::new(kind, self.to_string())
    }
}

/// Errors that fail a whole simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// No simulator registered under that name
    #[error("Unknown simulator: {0}")]
    UnknownSimulator(String),

    /// The simulator definition itself failed
    #[error("Simulator `{name}` failed: {message}")]
    Simulator {
        /// Simulator name
        name: String,
        /// Rendered error
        message: String,
    },

    /// A declared service could not be acquired
    #[error("Service `{name}` failed to start: {source}")]
    ServiceStart {
        /// Service name
        name: String,
        #[source]
        source: ServiceError,
    },

    /// A running listener failed
    #[error("Listener failed: {0}")]
    Listener(String),

    /// The background effects unit failed
    #[error("Effects failed: {0}")]
    Effects(String),

    /// The simulation entry in the store is malformed
    #[error(transparent)]
    InvalidState(#[from] StoreError),

    /// Environment failure while wiring up the simulation
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl SimulationError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimulationError::UnknownSimulator(_) => ErrorKind::UnknownSimulator,
            SimulationError::Simulator { .. } => ErrorKind::SimulatorError,
            SimulationError::ServiceStart { .. } => ErrorKind::ServiceStartFailure,
            SimulationError::Listener(_) => ErrorKind::ListenerError,
            SimulationError::Effects(_) => ErrorKind::EffectsFailure,
            SimulationError::InvalidState(_) | SimulationError::Env(_) => ErrorKind::InvalidState,
        }
    }

    /// Converts into the descriptor published with a `failed` status.
    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor::new(self.kind(), self.to_string())
    }
}

/// Errors returned by the [`Orchestrator`](crate::Orchestrator) API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A live simulation already uses that id
    #[error("Simulation already exists: {0}")]
    SimulationExists(String),

    /// No simulation with that id
    #[error("Unknown simulation: {0}")]
    UnknownSimulation(String),

    /// The simulation is not in a state that allows the operation
    #[error("Simulation {id} is {status}")]
    NotRunning {
        /// Simulation id
        id: String,
        /// Current status
        status: String,
    },

    /// The store was dropped while waiting
    #[error("Store closed while waiting for simulation {0}")]
    StoreClosed(String),

    /// Store access failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The simulation task could not be started
    #[error(transparent)]
    Env(#[from] EnvError),
}
