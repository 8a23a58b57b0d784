//! Simulator registration.
//!
//! A simulator is a factory invoked once per simulation with the
//! simulation's store slice and options. It returns the [`Behaviors`] of
//! that simulation: named services, a scenario table and an optional
//! background effects unit.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::ScenarioError;
use crate::faker::Faker;
use crate::service::ServiceDescriptor;
use crate::store::Slice;

/// Boxed scenario function: `(store, faker, params) -> data`.
pub type ScenarioFn =
    Arc<dyn Fn(Slice, Faker, Value) -> BoxFuture<'static, Result<Value, ScenarioError>> + Send + Sync>;

/// Boxed background effects unit.
pub type EffectsFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Boxed simulator factory.
pub type SimulatorFn = Arc<dyn Fn(&Slice, &Value) -> Result<Behaviors, String> + Send + Sync>;

/// Wraps an async closure into a [`ScenarioFn`].
pub fn scenario<F, Fut>(f: F) -> ScenarioFn
where
    F: Fn(Slice, Faker, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ScenarioError>> + Send + 'static,
{
    Arc::new(move |store, faker, params| f(store, faker, params).boxed())
}

/// What one simulation runs.
#[derive(Default)]
pub struct Behaviors {
    /// Services in declaration order
    pub services: Vec<(String, ServiceDescriptor)>,

    /// Scenario table
    pub scenarios: HashMap<String, ScenarioFn>,

    /// Optional background unit, failing it fails the simulation
    pub effects: Option<EffectsFn>,
}

impl Behaviors {
    /// Creates empty behaviors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a service. Declaration order is start order.
    pub fn service(mut self, name: impl Into<String>, descriptor: ServiceDescriptor) -> Self {
        let name = name.into();
        self.services.retain(|(existing, _)| *existing != name);
        self.services.push((name, descriptor));
        self
    }

    /// Registers a scenario.
    pub fn scenario(mut self, name: impl Into<String>, scenario: ScenarioFn) -> Self {
        self.scenarios.insert(name.into(), scenario);
        self
    }

    /// Sets the background effects unit.
    pub fn effects<F, Fut>(mut self, effects: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.effects = Some(Box::new(move || effects().boxed()));
        self
    }
}

impl std::fmt::Debug for Behaviors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services: Vec<&str> = self.services.iter().map(|(n, _)| n.as_str()).collect();
        let mut scenarios: Vec<&str> = self.scenarios.keys().map(String::as_str).collect();
        scenarios.sort_unstable();
        f.debug_struct("Behaviors")
            .field("services", &services)
            .field("scenarios", &scenarios)
            .field("effects", &self.effects.is_some())
            .finish()
    }
}

/// Table of registered simulators.
#[derive(Clone, Default)]
pub struct Simulators {
    table: HashMap<String, SimulatorFn>,
}

impl Simulators {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a simulator under `name`, replacing any previous one.
    pub fn register<F>(mut self, name: impl Into<String>, simulator: F) -> Self
    where
        F: Fn(&Slice, &Value) -> Result<Behaviors, String> + Send + Sync + 'static,
    {
        self.table.insert(name.into(), Arc::new(simulator));
        self
    }

    /// Adds every simulator of `other`.
    pub fn merge(mut self, other: Simulators) -> Self {
        self.table.extend(other.table);
        self
    }

    /// Looks up a simulator.
    pub fn get(&self, name: &str) -> Option<SimulatorFn> {
        self.table.get(name).cloned()
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.table.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Simulators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Simulators").field(&self.names()).finish()
    }
}
