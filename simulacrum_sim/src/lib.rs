//! Simulacrum built-in simulators and runner
//!
//! Ready-made simulators for the orchestrator in `simulacrum_core`:
//!
//! - **echo**: one `http` service whose `POST /` reflects the request body
//! - **person**: the `person` scenario, creating fake people with stable
//!   names, emails and passwords for a given scenario seed
//!
//! # Usage
//!
//! ```ignore
//! use simulacrum_core::{Orchestrator, OrchestratorConfig, SimulationOptions, Store};
//! use simulacrum_sim::builtin;
//!
//! let orchestrator = Orchestrator::new(Store::new(), builtin(), OrchestratorConfig::default());
//! let sim = orchestrator.create_simulation("echo", SimulationOptions::default()).await?;
//! ```

pub mod scenarios;
pub mod simulators;

pub use scenarios::{person, Person, PersonParams, ScenarioId};
pub use simulators::{builtin, echo, EchoOptions};
