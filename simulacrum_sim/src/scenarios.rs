//! Built-in scenarios.
//!
//! Scenarios are reusable: any simulator can put [`person`] into its own
//! scenario table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simulacrum_core::{scenario, Faker, ScenarioError, ScenarioFn, Slice};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Creates one person record
    Person,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Person]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Person => "person",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Person => "Person record with generated name, email and password",
        }
    }

    /// Returns the scenario function.
    pub fn function(&self) -> ScenarioFn {
        match self {
            ScenarioId::Person => scenario(|store, mut faker, params| async move {
                let params = PersonParams::from_value(params)?;
                let person = person(&store, &mut faker, params)?;
                Ok(serde_json::to_value(person)?)
            }),
        }
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" | "people" => Ok(ScenarioId::Person),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// A person record as stored under `people.<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<Value>,
}

/// Fields a caller may fix; everything else is generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonParams {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub picture: Option<String>,
    pub user_metadata: Option<Value>,
}

impl PersonParams {
    /// Reads params, treating `null` as "no params".
    pub fn from_value(value: Value) -> Result<Self, ScenarioError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Creates a person under `people.<id>` in `store` and returns it.
pub fn person(store: &Slice, faker: &mut Faker, params: PersonParams) -> Result<Person, ScenarioError> {
    let id = params.id.unwrap_or_else(|| faker.id());
    let name = params.name.unwrap_or_else(|| faker.name());
    let email = match params.email {
        Some(email) => email,
        None => faker.email(&name),
    };

    let person = Person {
        email,
        password: params.password.unwrap_or_else(|| faker.password()),
        picture: params.picture,
        user_metadata: params.user_metadata,
        id,
        name,
    };

    store.slice("people").slice(&person.id).set_as(&person)?;
    Ok(person)
}
