//! Orchestrator - binds simulation entries in the store to simulation tasks.
//!
//! The orchestrator owns the mapping from simulation id to task scope. For
//! every simulation it also runs a small supervisor that watches the
//! entry's `status` and halts the scope once the control plane writes
//! `destroying` (then publishes `halted`) or the simulation has `failed`.

use serde_json::{Map, Value};
use simulacrum_env::{TaskScope, TlsConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{OrchestratorError, StoreError};
use crate::faker::IdGenerator;
use crate::simulation::Simulation;
use crate::simulator::Simulators;
use crate::state::{ScenarioState, SimulationOptions, SimulationState, SimulationStatus};
use crate::store::{Slice, Store};

/// Store key under which simulations live.
pub const SIMULATIONS: &str = "simulations";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Seed of the id stream, `None` for OS entropy
    pub seed: Option<u64>,

    /// Content seed of every scenario faker
    pub scenario_seed: u64,

    /// Certificate and key for `https` services
    pub tls: Option<TlsConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            scenario_seed: 2,
            tls: None,
        }
    }
}

impl OrchestratorConfig {
    /// Sets the id seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the scenario content seed.
    pub fn with_scenario_seed(mut self, seed: u64) -> Self {
        self.scenario_seed = seed;
        self
    }

    /// Sets the TLS configuration for `https` services.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

type LiveTable = Arc<Mutex<HashMap<String, Arc<TaskScope>>>>;

/// Entry point: creates, tracks and destroys simulations.
pub struct Orchestrator {
    store: Store,
    simulators: Simulators,
    config: OrchestratorConfig,

    /// Simulation ids and fork seeds, in call order
    ids: IdGenerator,

    /// Counter for scenario entry keys
    requests: AtomicU64,

    /// Scopes of simulations that have not been halted yet
    live: LiveTable,
}

impl Orchestrator {
    /// Creates an orchestrator over `store`.
    pub fn new(store: Store, simulators: Simulators, config: OrchestratorConfig) -> Self {
        Self {
            ids: IdGenerator::new(config.seed),
            store,
            simulators,
            config,
            requests: AtomicU64::new(0),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the registered simulators.
    pub fn simulators(&self) -> &Simulators {
        &self.simulators
    }

    /// Returns the entry of simulation `id`.
    pub fn entry(&self, id: &str) -> Slice {
        self.store.slice([SIMULATIONS, id])
    }

    /// Creates a simulation with a generated id and returns immediately.
    pub fn spawn_simulation(
        &self,
        simulator: &str,
        options: SimulationOptions,
    ) -> Result<String, OrchestratorError> {
        let id = self.ids.next_uuid().to_string();
        self.spawn_simulation_with_id(&id, simulator, options)?;
        Ok(id)
    }

    /// Creates a simulation under a caller-chosen id and returns immediately.
    pub fn spawn_simulation_with_id(
        &self,
        id: &str,
        simulator: &str,
        options: SimulationOptions,
    ) -> Result<(), OrchestratorError> {
        let mut live = self.lock_live();
        if live.contains_key(id) {
            return Err(OrchestratorError::SimulationExists(id.to_string()));
        }

        let slice = self.entry(id);
        slice.set_as(&SimulationState::creating(id, simulator, options))?;

        let root = TaskScope::new(format!("simulation:{}", id));
        Simulation::new(id, slice.clone(), self.simulators.clone())
            .with_ids(self.ids.fork())
            .with_scenario_seed(self.config.scenario_seed)
            .with_tls(self.config.tls.clone())
            .spawn(&root)?;
        live.insert(id.to_string(), Arc::clone(&root));
        drop(live);

        info!(id, simulator, "simulation created");
        let supervisor = supervise(id.to_string(), slice, root, Arc::clone(&self.live));
        tokio::spawn(supervisor.instrument(info_span!("supervisor", id)));
        Ok(())
    }

    /// Creates a simulation and waits until it is `running` or `failed`.
    pub async fn create_simulation(
        &self,
        simulator: &str,
        options: SimulationOptions,
    ) -> Result<SimulationState, OrchestratorError> {
        let id = self.spawn_simulation(simulator, options)?;
        self.started(&id).await
    }

    /// Like [`create_simulation`](Self::create_simulation) with a fixed id.
    pub async fn create_simulation_with_id(
        &self,
        id: &str,
        simulator: &str,
        options: SimulationOptions,
    ) -> Result<SimulationState, OrchestratorError> {
        self.spawn_simulation_with_id(id, simulator, options)?;
        self.started(id).await
    }

    /// Returns a snapshot of simulation `id`.
    pub fn simulation(&self, id: &str) -> Result<Option<SimulationState>, OrchestratorError> {
        Ok(self.entry(id).get_as()?)
    }

    /// Returns snapshots of every simulation in the store, ordered by id.
    pub fn simulations(&self) -> Result<Vec<SimulationState>, OrchestratorError> {
        let slice = self.store.slice([SIMULATIONS]);
        let entries: Map<String, Value> = slice.get_as()?.unwrap_or_default();

        entries
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(id, value)| {
                serde_json::from_value(value).map_err(|source| {
                    OrchestratorError::Store(StoreError::Invalid {
                        path: format!("{}.{}", SIMULATIONS, id),
                        source,
                    })
                })
            })
            .collect()
    }

    /// Requests teardown of simulation `id` and waits for `halted`.
    ///
    /// Returns false if the simulation had already failed or halted.
    pub async fn destroy_simulation(&self, id: &str) -> Result<bool, OrchestratorError> {
        let slice = self.entry(id);
        if slice.get().is_none() {
            return Err(OrchestratorError::UnknownSimulation(id.to_string()));
        }
        match request_destroy(&slice) {
            None => Err(OrchestratorError::UnknownSimulation(id.to_string())),
            Some(SimulationStatus::Failed | SimulationStatus::Halted) => Ok(false),
            Some(_) => {
                info!(id, "destroying simulation");
                slice
                    .slice("status")
                    .wait_for(|status| *status == SimulationStatus::Halted.as_str())
                    .await
                    .ok_or_else(|| OrchestratorError::StoreClosed(id.to_string()))?;
                Ok(true)
            }
        }
    }

    /// Applies a scenario to a running simulation and waits for its result.
    ///
    /// The request is written under a fresh key, so the same scenario can
    /// be applied any number of times. Fails with
    /// [`OrchestratorError::NotRunning`] if the simulation stops running
    /// before the scenario settles.
    pub async fn apply_scenario(
        &self,
        id: &str,
        name: &str,
        params: Value,
    ) -> Result<ScenarioState, OrchestratorError> {
        let state = self
            .simulation(id)?
            .ok_or_else(|| OrchestratorError::UnknownSimulation(id.to_string()))?;
        if state.status != SimulationStatus::Running {
            return Err(OrchestratorError::NotRunning {
                id: id.to_string(),
                status: state.status.to_string(),
            });
        }

        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        let key = format!("{}-{}", name, n);
        let entry = self.entry(id).slice("scenarios").slice(&key);
        entry.set_as(&ScenarioState::request(name, params))?;
        debug!(id, scenario = name, key = %key, "scenario requested");

        // The entry is never settled once the simulation stops running.
        let simulation = self
            .entry(id)
            .wait_for(|sim| {
                is_settled(&sim["scenarios"][key.as_str()])
                    || sim["status"] != SimulationStatus::Running.as_str()
            })
            .await
            .ok_or_else(|| OrchestratorError::StoreClosed(id.to_string()))?;

        let settled = &simulation["scenarios"][key.as_str()];
        if !is_settled(settled) {
            let status = simulation["status"].as_str().unwrap_or("removed");
            debug!(id, key = %key, status, "simulation stopped before scenario settled");
            return Err(OrchestratorError::NotRunning {
                id: id.to_string(),
                status: status.to_string(),
            });
        }

        serde_json::from_value(settled.clone()).map_err(|source| {
            OrchestratorError::Store(StoreError::Invalid {
                path: entry.to_string(),
                source,
            })
        })
    }

    /// Destroys every live simulation.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.lock_live().keys().cloned().collect();
        for id in ids {
            match self.destroy_simulation(&id).await {
                Ok(_) => {}
                Err(err) => warn!(id = %id, %err, "failed to destroy simulation"),
            }
        }

        // Failed simulations are halted by their supervisors.
        let scopes: Vec<Arc<TaskScope>> = self.lock_live().values().cloned().collect();
        for scope in scopes {
            scope.halted().await;
        }
        info!("orchestrator shut down");
    }

    async fn started(&self, id: &str) -> Result<SimulationState, OrchestratorError> {
        self.entry(id)
            .slice("status")
            .wait_for(|status| *status != SimulationStatus::Creating.as_str())
            .await
            .ok_or_else(|| OrchestratorError::StoreClosed(id.to_string()))?;

        self.simulation(id)?
            .ok_or_else(|| OrchestratorError::UnknownSimulation(id.to_string()))
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<String, Arc<TaskScope>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dropping the orchestrator requests teardown of every live simulation.
///
/// The supervisors finish the teardown in the background, so prefer
/// [`Orchestrator::shutdown`] when the caller can wait.
impl Drop for Orchestrator {
    fn drop(&mut self) {
        let ids: Vec<String> = self.lock_live().keys().cloned().collect();
        for id in ids {
            if let Some(status) = request_destroy(&self.entry(&id)) {
                debug!(id = %id, %status, "teardown requested on drop");
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("simulators", &self.simulators)
            .field("config", &self.config)
            .field("live", &self.lock_live().len())
            .finish()
    }
}

/// Moves a simulation to `destroying` if its status allows it.
///
/// Returns the status found, `None` if there is no simulation entry.
fn request_destroy(slice: &Slice) -> Option<SimulationStatus> {
    slice.update(|entry| {
        let map = entry.as_object_mut()?;
        let status = map.get("status").and_then(SimulationStatus::from_value)?;
        if status.can_transition_to(SimulationStatus::Destroying) {
            map.insert("status".into(), SimulationStatus::Destroying.into());
        }
        Some(status)
    })
}

fn is_settled(entry: &Value) -> bool {
    matches!(entry["status"].as_str(), Some("completed" | "failed"))
}

/// Halts a simulation once it is destroyed, failed or removed.
async fn supervise(id: String, slice: Slice, root: Arc<TaskScope>, live: LiveTable) {
    let seen = slice
        .slice("status")
        .wait_for(|status| {
            status.is_null()
                || *status == SimulationStatus::Destroying.as_str()
                || *status == SimulationStatus::Failed.as_str()
        })
        .await;

    root.halt().await;

    let destroyed = seen
        .as_ref()
        .and_then(SimulationStatus::from_value)
        .map(|status| status == SimulationStatus::Destroying)
        .unwrap_or(false);
    if destroyed {
        slice.update(|entry| {
            if let Some(map) = entry.as_object_mut() {
                map.insert("status".into(), SimulationStatus::Halted.into());
            }
        });
        info!("simulation halted");
    } else {
        debug!("simulation released");
    }

    let mut live = live.lock().unwrap_or_else(PoisonError::into_inner);
    if live.get(&id).map(|scope| Arc::ptr_eq(scope, &root)).unwrap_or(false) {
        live.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::http::{HttpApp, Request, Response};
    use crate::service::{ServiceContext, ServiceDescriptor};
    use crate::simulator::{scenario, Behaviors};
    use crate::state::{ErrorKind, ScenarioStatus, ServiceOptions};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn echo_app() -> HttpApp {
        HttpApp::new().post("/", |req: Request| async move { Ok(Response::ok().with_body(req.body)) })
    }

    fn simulators() -> Simulators {
        Simulators::new()
            .register("empty", |_store, _options| Ok(Behaviors::new()))
            .register("multi", |_store, options| {
                let n = options["services"].as_u64().unwrap_or(1);
                let mut behaviors = Behaviors::new();
                for i in 0..n {
                    behaviors = behaviors.service(format!("svc{}", i), ServiceDescriptor::http(echo_app()));
                }
                Ok(behaviors)
            })
            .register("slow", |_store, _options| {
                Ok(Behaviors::new().service(
                    "slow",
                    ServiceDescriptor::resource(|_ctx: ServiceContext| async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Err(ServiceError::custom("too slow"))
                    }),
                ))
            })
            .register("sleepy", |store, _options| {
                let started = store.slice("started");
                let app = HttpApp::new().get("/slow", move |_req: Request| {
                    let started = started.clone();
                    async move {
                        started.set(true);
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(Response::text("too late"))
                    }
                });
                Ok(Behaviors::new().service("api", ServiceDescriptor::http(app)))
            })
            .register("counter", |_store, _options| {
                Ok(Behaviors::new().scenario(
                    "tick",
                    scenario(|store, mut faker, _params| async move {
                        let id = faker.id();
                        store.slice("ticks").slice(&id).set(json!(true));
                        Ok(json!({ "id": id, "name": faker.name() }))
                    }),
                ))
            })
    }

    fn orchestrator(seed: u64) -> Orchestrator {
        Orchestrator::new(
            Store::new(),
            simulators(),
            OrchestratorConfig::default().with_seed(seed),
        )
    }

    async fn refused(url: &str) -> bool {
        let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();
        TcpStream::connect(("127.0.0.1", port)).await.is_err()
    }

    #[tokio::test]
    async fn test_n_services_n_handles() {
        let orchestrator = orchestrator(1);
        let state = orchestrator
            .create_simulation("multi", SimulationOptions::new(json!({ "services": 3 })))
            .await
            .unwrap();

        assert_eq!(state.status, SimulationStatus::Running);
        assert_eq!(state.services.len(), 3);
        let names: Vec<&str> = state.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["svc0", "svc1", "svc2"]);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_running_is_never_partial() {
        let orchestrator = orchestrator(1);
        let id = orchestrator
            .spawn_simulation("multi", SimulationOptions::new(json!({ "services": 4 })))
            .unwrap();

        let entry = orchestrator.entry(&id);
        let observed = tokio::time::timeout(
            Duration::from_secs(5),
            entry.wait_for(|value| {
                let status = &value["status"];
                // Any observation of running must carry every service.
                if *status == "running" {
                    assert_eq!(value["services"].as_array().map(Vec::len), Some(4));
                }
                *status != "creating"
            }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(observed["status"], json!("running"));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_seed_same_ids() {
        let one = orchestrator(42);
        let two = orchestrator(42);

        let mut ids_one = Vec::new();
        let mut ids_two = Vec::new();
        for _ in 0..3 {
            ids_one.push(one.create_simulation("empty", SimulationOptions::default()).await.unwrap().id);
            ids_two.push(two.create_simulation("empty", SimulationOptions::default()).await.unwrap().id);
        }
        assert_eq!(ids_one, ids_two);
        assert_ne!(ids_one[0], ids_one[1]);

        let other = orchestrator(43);
        let id = other.create_simulation("empty", SimulationOptions::default()).await.unwrap().id;
        assert_ne!(id, ids_one[0]);

        one.shutdown().await;
        two.shutdown().await;
        other.shutdown().await;
    }

    #[tokio::test]
    async fn test_scenario_data_replays() {
        let one = orchestrator(7);
        let two = orchestrator(7);
        let a = one.create_simulation("counter", SimulationOptions::default()).await.unwrap();
        let b = two.create_simulation("counter", SimulationOptions::default()).await.unwrap();

        let first = one.apply_scenario(&a.id, "tick", json!({})).await.unwrap();
        let second = one.apply_scenario(&a.id, "tick", json!({})).await.unwrap();
        let replayed = two.apply_scenario(&b.id, "tick", json!({})).await.unwrap();

        assert_eq!(first.status, ScenarioStatus::Completed);
        let (first, second, replayed) = (first.data.unwrap(), second.data.unwrap(), replayed.data.unwrap());
        assert_eq!(first["name"], second["name"]);
        assert_ne!(first["id"], second["id"]);
        assert_eq!(first, replayed);

        one.shutdown().await;
        two.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_scenario_keeps_running() {
        let orchestrator = orchestrator(1);
        let state = orchestrator.create_simulation("counter", SimulationOptions::default()).await.unwrap();

        let result = orchestrator.apply_scenario(&state.id, "nope", json!({})).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::UnknownScenario);

        let after = orchestrator.simulation(&state.id).unwrap().unwrap();
        assert_eq!(after.status, SimulationStatus::Running);
        assert!(after.error.is_none());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_destroy_releases_ports() {
        let orchestrator = orchestrator(1);
        let state = orchestrator
            .create_simulation("multi", SimulationOptions::new(json!({ "services": 1 })))
            .await
            .unwrap();
        let url = state.services[0].url.clone();

        let client = reqwest::Client::new();
        let response = client.post(&url).body("hello").send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "hello");

        assert!(orchestrator.destroy_simulation(&state.id).await.unwrap());
        let after = orchestrator.simulation(&state.id).unwrap().unwrap();
        assert_eq!(after.status, SimulationStatus::Halted);
        assert!(refused(&url).await);

        // Already halted.
        assert!(!orchestrator.destroy_simulation(&state.id).await.unwrap());
        assert!(matches!(
            orchestrator.destroy_simulation("missing").await,
            Err(OrchestratorError::UnknownSimulation(_))
        ));
        assert_eq!(orchestrator.simulations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_request_fails_cleanly_on_destroy() {
        let orchestrator = orchestrator(1);
        let state = orchestrator
            .create_simulation("sleepy", SimulationOptions::default())
            .await
            .unwrap();
        let url = state.services[0].url.clone();

        let request = tokio::spawn({
            let url = format!("{}/slow", url);
            async move {
                reqwest::Client::new()
                    .get(url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
            }
        });

        // Wait until the handler is running.
        let started = orchestrator.entry(&state.id).slice("store").slice("started");
        tokio::time::timeout(Duration::from_secs(5), started.wait_for(|v| *v == json!(true)))
            .await
            .unwrap();

        assert!(orchestrator.destroy_simulation(&state.id).await.unwrap());

        let outcome = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .expect("in-flight request hung after destroy")
            .unwrap();
        let err = outcome.expect_err("request answered after destroy");
        assert!(!err.is_timeout());

        let after = orchestrator.simulation(&state.id).unwrap().unwrap();
        assert_eq!(after.status, SimulationStatus::Halted);
        assert!(refused(&url).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_apply_scenario_racing_destroy() {
        let orchestrator = orchestrator(1);

        for _ in 0..50 {
            let state = orchestrator
                .create_simulation("counter", SimulationOptions::default())
                .await
                .unwrap();

            let (applied, destroyed) = tokio::time::timeout(Duration::from_secs(5), async {
                tokio::join!(
                    orchestrator.apply_scenario(&state.id, "tick", json!({})),
                    orchestrator.destroy_simulation(&state.id),
                )
            })
            .await
            .expect("scenario or destroy never returned");

            assert!(destroyed.unwrap());
            match applied {
                Ok(result) => assert!(result.status.is_settled()),
                Err(OrchestratorError::NotRunning { status, .. }) => assert_ne!(status, "running"),
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
    }

    #[tokio::test]
    async fn test_drop_tears_down_live_simulations() {
        let orchestrator = orchestrator(1);
        let store = orchestrator.store().clone();
        let state = orchestrator
            .create_simulation("multi", SimulationOptions::new(json!({ "services": 1 })))
            .await
            .unwrap();

        drop(orchestrator);

        let status = store.slice([SIMULATIONS, state.id.as_str()]).slice("status");
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == "halted"))
            .await
            .unwrap()
            .unwrap();
        assert!(refused(&state.services[0].url).await);
    }

    #[tokio::test]
    async fn test_destroy_by_writing_status() {
        let orchestrator = orchestrator(1);
        let state = orchestrator
            .create_simulation("multi", SimulationOptions::new(json!({ "services": 1 })))
            .await
            .unwrap();

        let status = orchestrator.entry(&state.id).slice("status");
        status.set(json!("destroying"));
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == "halted"))
            .await
            .unwrap();
        assert!(refused(&state.services[0].url).await);
    }

    #[tokio::test]
    async fn test_destroy_while_creating() {
        let orchestrator = orchestrator(1);
        let id = orchestrator.spawn_simulation("slow", SimulationOptions::default()).unwrap();

        assert!(orchestrator.destroy_simulation(&id).await.unwrap());
        let state = orchestrator.simulation(&id).unwrap().unwrap();
        assert_eq!(state.status, SimulationStatus::Halted);
        assert!(state.services.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_simulator_fails() {
        let orchestrator = orchestrator(1);
        let state = orchestrator
            .create_simulation("nope", SimulationOptions::default())
            .await
            .unwrap();

        assert_eq!(state.status, SimulationStatus::Failed);
        assert!(state.services.is_empty());
        assert_eq!(state.error.unwrap().kind, ErrorKind::UnknownSimulator);

        assert!(!orchestrator.destroy_simulation(&state.id).await.unwrap());
        assert!(matches!(
            orchestrator.apply_scenario(&state.id, "tick", json!({})).await,
            Err(OrchestratorError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let orchestrator = orchestrator(1);
        orchestrator
            .create_simulation_with_id("fixed", "empty", SimulationOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            orchestrator.spawn_simulation_with_id("fixed", "empty", SimulationOptions::default()),
            Err(OrchestratorError::SimulationExists(_))
        ));

        // Reusable once halted.
        orchestrator.destroy_simulation("fixed").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while orchestrator.spawn_simulation_with_id("fixed", "empty", SimulationOptions::default()).is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_service_port_option() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let orchestrator = orchestrator(1);
        let options = SimulationOptions::new(json!({ "services": 1 }))
            .with_service("svc0", ServiceOptions::with_port(port));
        let state = orchestrator.create_simulation("multi", options).await.unwrap();

        assert_eq!(state.services[0].url, format!("http://localhost:{}", port));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_simulations_listing_and_shutdown() {
        let orchestrator = orchestrator(1);
        let a = orchestrator.create_simulation("empty", SimulationOptions::default()).await.unwrap();
        let b = orchestrator
            .create_simulation("multi", SimulationOptions::new(json!({ "services": 1 })))
            .await
            .unwrap();

        let listed = orchestrator.simulations().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|s| s.id == a.id));

        orchestrator.shutdown().await;
        for state in orchestrator.simulations().unwrap() {
            assert_eq!(state.status, SimulationStatus::Halted);
        }
        assert!(refused(&b.services[0].url).await);
    }
}
