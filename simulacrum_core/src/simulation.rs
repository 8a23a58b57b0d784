//! Simulation task - runs one simulation inside its own task scope.
//!
//! Scope layout of a simulation:
//!
//! ```text
//! simulation:<id>                 (root, owned by the orchestrator)
//! ├── resources
//! │   ├── service:<first>         listener + connections + requests
//! │   ├── service:<second>
//! │   ├── effects                 (linked task)
//! │   ├── scenarios               (watch loop)
//! │   └── scenario:<key>          one task per invocation
//! └── simulation                  (this task)
//! ```
//!
//! Halting the root stops this task first, then releases the resources in
//! reverse order of acquisition.

use serde_json::{Map, Value};
use simulacrum_env::{EnvError, Fault, FaultReceiver, TaskScope, TlsConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::error::{ScenarioError, SimulationError, StoreError};
use crate::faker::{Faker, IdGenerator};
use crate::service::{normalize, ServiceContext};
use crate::simulator::{ScenarioFn, Simulators};
use crate::state::{
    ErrorDescriptor, ScenarioState, ScenarioStatus, ServiceHandle, SimulationState,
    SimulationStatus,
};
use crate::store::Slice;

/// Name of the linked task running the background effects unit.
const EFFECTS_TASK: &str = "effects";

/// Everything one simulation task needs.
pub struct Simulation {
    /// Simulation id
    id: String,

    /// Entry of this simulation (`simulations.<id>`)
    slice: Slice,

    /// Registered simulators
    simulators: Simulators,

    /// Id stream for records and scenario keys
    ids: IdGenerator,

    /// Content seed of every scenario faker
    scenario_seed: u64,

    /// TLS configuration handed to `https` services
    tls: Option<TlsConfig>,
}

impl Simulation {
    /// Creates a simulation task bound to `slice`.
    ///
    /// The entry must already hold a `creating` [`SimulationState`].
    pub fn new(id: impl Into<String>, slice: Slice, simulators: Simulators) -> Self {
        Self {
            id: id.into(),
            slice,
            simulators,
            ids: IdGenerator::new(None),
            scenario_seed: 2,
            tls: None,
        }
    }

    /// Sets the id stream.
    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Sets the scenario content seed.
    pub fn with_scenario_seed(mut self, seed: u64) -> Self {
        self.scenario_seed = seed;
        self
    }

    /// Sets the TLS configuration for `https` services.
    pub fn with_tls(mut self, tls: Option<TlsConfig>) -> Self {
        self.tls = tls;
        self
    }

    /// Starts the simulation inside `root`.
    ///
    /// `root` must be a fresh root scope; its fault channel is taken over by
    /// the simulation task.
    pub fn spawn(self, root: &TaskScope) -> Result<(), EnvError> {
        let span = info_span!("simulation", id = %self.id, simulator = tracing::field::Empty);
        let _enter = span.enter();

        let faults = root.take_faults();
        let resources = root.child("resources");
        root.spawn("simulation", self.run(resources, faults))
    }

    async fn run(self, resources: Arc<TaskScope>, mut faults: Option<FaultReceiver>) {
        let handles = match self.start(&resources).await {
            Ok(handles) => handles,
            Err(err) => return self.fail(&resources, err).await,
        };

        // A listener may already have died while later services started.
        if let Some(rx) = faults.as_mut() {
            if let Ok(fault) = rx.try_recv() {
                return self.fail(&resources, classify(fault)).await;
            }
        }

        if !self.publish_running(&handles) {
            debug!("simulation left creating before startup finished");
            return;
        }
        info!(services = handles.len(), "simulation running");

        if let Some(fault) = next_fault(&mut faults).await {
            self.fail(&resources, classify(fault)).await;
        }
    }

    /// Steps 1 to 4 of startup: resolve, acquire services, start background work.
    async fn start(&self, resources: &Arc<TaskScope>) -> Result<Vec<ServiceHandle>, SimulationError> {
        let state: SimulationState = serde_json::from_value(self.slice.get().unwrap_or(Value::Null))
            .map_err(|source| StoreError::Invalid {
                path: self.slice.to_string(),
                source,
            })?;
        Span::current().record("simulator", state.simulator.as_str());

        let simulator = self
            .simulators
            .get(&state.simulator)
            .ok_or_else(|| SimulationError::UnknownSimulator(state.simulator.clone()))?;

        let store = self.slice.slice("store");
        let behaviors =
            simulator(&store, &state.options.options).map_err(|message| SimulationError::Simulator {
                name: state.simulator.clone(),
                message,
            })?;

        let mut handles = Vec::with_capacity(behaviors.services.len());
        for (name, descriptor) in behaviors.services {
            let ctx = ServiceContext {
                scope: resources.child(format!("service:{}", name)),
                slice: store.clone(),
                options: state.options.services.get(&name).cloned().unwrap_or_default(),
                tls: self.tls.clone(),
            };

            let create = normalize(descriptor);
            let address = create(ctx)
                .await
                .map_err(|source| SimulationError::ServiceStart {
                    name: name.clone(),
                    source,
                })?;

            info!(service = %name, url = %address.url(), "service started");
            handles.push(ServiceHandle::new(name, &address));
        }

        if let Some(effects) = behaviors.effects {
            resources.spawn_linked(EFFECTS_TASK, effects())?;
        }

        let watcher = ScenarioWatcher {
            scenarios: self.slice.slice("scenarios"),
            store,
            table: Arc::new(behaviors.scenarios),
            ids: self.ids.clone(),
            seed: self.scenario_seed,
            scope: Arc::clone(resources),
        };
        resources.spawn("scenarios", watcher.run())?;

        Ok(handles)
    }

    /// Publishes the handles together with `running` in one store update.
    ///
    /// Returns false if the entry is no longer `creating`.
    fn publish_running(&self, handles: &[ServiceHandle]) -> bool {
        let services = match serde_json::to_value(handles) {
            Ok(services) => services,
            Err(err) => {
                error!(%err, "cannot serialize service handles");
                return false;
            }
        };

        self.slice.update(|entry| {
            let Some(map) = entry.as_object_mut() else {
                return false;
            };
            if status_of(map) != Some(SimulationStatus::Creating) {
                return false;
            }
            map.insert("services".into(), services);
            map.insert("status".into(), SimulationStatus::Running.into());
            true
        })
    }

    /// Releases everything and records the failure.
    async fn fail(&self, resources: &TaskScope, err: SimulationError) {
        error!(%err, kind = ?err.kind(), "simulation failed");
        resources.halt().await;

        let descriptor = err.descriptor();
        let recorded = self.slice.update(|entry| {
            let Some(map) = entry.as_object_mut() else {
                return false;
            };
            let allowed = status_of(map)
                .map(|status| status.can_transition_to(SimulationStatus::Failed))
                .unwrap_or(false);
            if !allowed {
                return false;
            }
            map.insert("status".into(), SimulationStatus::Failed.into());
            map.insert("services".into(), Value::Array(Vec::new()));
            map.insert("error".into(), descriptor_value(&descriptor));
            true
        });

        if !recorded {
            debug!("failure not recorded, simulation already tearing down");
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("id", &self.id)
            .field("slice", &self.slice)
            .field("scenario_seed", &self.scenario_seed)
            .finish_non_exhaustive()
    }
}

fn status_of(map: &Map<String, Value>) -> Option<SimulationStatus> {
    map.get("status").and_then(SimulationStatus::from_value)
}

fn descriptor_value(descriptor: &ErrorDescriptor) -> Value {
    serde_json::to_value(descriptor).unwrap_or_else(|_| Value::String(descriptor.message.clone()))
}

fn classify(fault: Fault) -> SimulationError {
    if fault.task == EFFECTS_TASK {
        SimulationError::Effects(fault.message)
    } else {
        SimulationError::Listener(fault.to_string())
    }
}

async fn next_fault(faults: &mut Option<FaultReceiver>) -> Option<Fault> {
    match faults {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Watches `scenarios` and runs every new entry.
struct ScenarioWatcher {
    scenarios: Slice,
    store: Slice,
    table: Arc<HashMap<String, ScenarioFn>>,
    ids: IdGenerator,
    seed: u64,
    scope: Arc<TaskScope>,
}

impl ScenarioWatcher {
    async fn run(self) {
        // Subscribe before the first read so no write falls in between.
        let mut updates = self.scenarios.updates();
        let mut current = self.scenarios.get().unwrap_or(Value::Null);

        loop {
            if let Value::Object(entries) = &current {
                for key in entries.keys() {
                    self.claim(key);
                }
            }

            match updates.next().await {
                Some(value) => current = value,
                None => return,
            }
        }
    }

    /// Marks a `new` entry as `running` and starts its invocation.
    fn claim(&self, key: &str) {
        let entry = self.scenarios.slice(key);
        let claimed = entry.update(|value| {
            let Some(map) = value.as_object_mut() else {
                return None;
            };
            match map.get("status") {
                None | Some(Value::Null) => {}
                Some(status) if *status == "new" => {}
                Some(_) => return None,
            }
            map.insert("status".into(), Value::String("running".into()));
            map.remove("data");
            map.remove("error");
            Some(Value::Object(map.clone()))
        });
        let Some(request) = claimed else {
            return;
        };

        let request: ScenarioState = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(err) => {
                warn!(scenario = key, %err, "malformed scenario entry");
                settle(&entry, Err(ScenarioError::InvalidParams(err)));
                return;
            }
        };

        let name = request.scenario_name(key).to_string();
        let invocation = Invocation {
            entry: entry.clone(),
            scenario: self.table.get(&name).cloned(),
            name,
            store: self.store.clone(),
            faker: Faker::with_ids(self.seed, self.ids.clone()),
            params: request.params,
            scope: Arc::clone(&self.scope),
        };

        if let Err(err) = self.scope.spawn(format!("scenario:{}", key), invocation.run()) {
            debug!(scenario = key, %err, "scenario dropped during teardown");
        }
    }
}

struct Invocation {
    entry: Slice,
    scenario: Option<ScenarioFn>,
    name: String,
    store: Slice,
    faker: Faker,
    params: Value,
    scope: Arc<TaskScope>,
}

impl Invocation {
    async fn run(self) {
        let Invocation {
            entry,
            scenario,
            name,
            store,
            faker,
            params,
            scope,
        } = self;

        let outcome = match scenario {
            None => Err(ScenarioError::UnknownScenario(name.clone())),
            Some(scenario) => {
                debug!(scenario = %name, "applying scenario");
                match scope.run(format!("scenario-fn:{}", name), scenario(store, faker, params)).await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(ScenarioError::failed(err.to_string())),
                }
            }
        };

        match &outcome {
            Ok(_) => info!(scenario = %name, "scenario completed"),
            Err(err) => warn!(scenario = %name, %err, "scenario failed"),
        }
        settle(&entry, outcome);
    }
}

/// Writes the result of an invocation back into its entry.
fn settle(entry: &Slice, outcome: Result<Value, ScenarioError>) {
    entry.update(|value| {
        let Some(map) = value.as_object_mut() else {
            return;
        };
        match outcome {
            Ok(data) => {
                map.insert("status".into(), status_value(ScenarioStatus::Completed));
                map.insert("data".into(), data);
                map.remove("error");
            }
            Err(err) => {
                map.insert("status".into(), status_value(ScenarioStatus::Failed));
                map.insert("error".into(), descriptor_value(&err.descriptor()));
                map.remove("data");
            }
        }
    });
}

fn status_value(status: ScenarioStatus) -> Value {
    serde_json::to_value(status).unwrap_or(Value::Null)
}
