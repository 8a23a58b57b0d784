//! Simulacrum Core - Simulation Orchestrator
//!
//! Spins up short-lived mock services behind real listeners, seeds them
//! with deterministic fake data and tears them down cleanly:
//! 1. **Reactive Store**: one JSON tree shared by the control plane and
//!    every simulation, observed through path-addressed slices
//! 2. **Deterministic Data Generator**: seeded fake names, emails and ids
//! 3. **Simulation Task**: starts declared services, runs scenarios and
//!    releases everything in reverse order on teardown or failure
//!
//! # Usage
//!
//! ```ignore
//! use simulacrum_core::{Behaviors, HttpApp, Orchestrator, OrchestratorConfig,
//!     Response, ServiceDescriptor, SimulationOptions, Simulators, Store};
//!
//! let simulators = Simulators::new().register("hello", |_store, _options| {
//!     let app = HttpApp::new().get("/", |_req| async { Ok(Response::text("hi")) });
//!     Ok(Behaviors::new().service("web", ServiceDescriptor::http(app)))
//! });
//!
//! let orchestrator = Orchestrator::new(Store::new(), simulators, OrchestratorConfig::default());
//! let sim = orchestrator.create_simulation("hello", SimulationOptions::default()).await?;
//! println!("{}", sim.services[0].url);
//! orchestrator.destroy_simulation(&sim.id).await?;
//! ```

pub mod error;
pub mod faker;
pub mod http;
pub mod orchestrator;
pub mod service;
pub mod simulation;
pub mod simulator;
pub mod state;
pub mod store;

// Re-export key types for convenience
pub use error::{
    HandlerError, OrchestratorError, ScenarioError, ServiceError, SimulationError, StoreError,
};
pub use faker::{derive_seed, Faker, IdGenerator};
pub use http::{HttpApp, Next, Request, Response};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use service::{normalize, ResourceFn, ServiceContext, ServiceDescriptor};
pub use simulation::Simulation;
pub use simulator::{scenario, Behaviors, ScenarioFn, Simulators};
pub use state::{
    ErrorDescriptor, ErrorKind, ScenarioState, ScenarioStatus, ServiceHandle, ServiceOptions,
    SimulationOptions, SimulationState, SimulationStatus,
};
pub use store::{Slice, Store, Updates};

pub use simulacrum_env::{Protocol, ServiceAddress, TaskScope, TlsConfig};

pub use hyper::{header, Method, StatusCode};
