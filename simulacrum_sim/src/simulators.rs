//! Built-in simulators.
//!
//! - `echo`: one `http` service reflecting `POST /` bodies
//! - `person`: no services, only the `person` scenario

use serde::Deserialize;
use serde_json::Value;
use simulacrum_core::header::CONTENT_TYPE;
use simulacrum_core::{
    Behaviors, HandlerError, HttpApp, Next, Request, Response, ServiceDescriptor, Simulators, Slice,
};

use crate::scenarios::ScenarioId;

/// Options understood by the `echo` simulator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EchoOptions {
    /// Repeat every body twice
    pub double: bool,
}

/// Returns a table with every built-in simulator.
pub fn builtin() -> Simulators {
    Simulators::new()
        .register("echo", echo)
        .register("person", person)
}

/// `echo` simulator: `POST /` answers with the request body.
///
/// Every request is counted under `echo.requests` in the simulation store.
pub fn echo(store: &Slice, options: &Value) -> Result<Behaviors, String> {
    let options: EchoOptions = if options.is_null() {
        EchoOptions::default()
    } else {
        serde_json::from_value(options.clone()).map_err(|e| format!("invalid echo options: {}", e))?
    };

    let double = options.double;
    let requests = store.slice("echo").slice("requests");
    let app = HttpApp::new()
        .middleware(move |req: Request| {
            requests.update(|count| *count = Value::from(count.as_u64().unwrap_or(0) + 1));
            async move { Ok::<_, HandlerError>(Next::Continue(req)) }
        })
        .post("/", move |req: Request| async move {
            let mut body = req.body.to_vec();
            if double {
                body.extend_from_slice(&req.body);
            }

            let mut response = Response::ok().with_body(body);
            if let Some(content_type) = req.headers.get(CONTENT_TYPE) {
                response = response.with_header(CONTENT_TYPE, content_type.clone());
            }
            Ok(response)
        });

    Ok(Behaviors::new().service("echo", ServiceDescriptor::http(app)))
}

/// `person` simulator: scenarios only.
pub fn person(_store: &Slice, _options: &Value) -> Result<Behaviors, String> {
    let mut behaviors = Behaviors::new();
    for id in ScenarioId::all() {
        behaviors = behaviors.scenario(id.name(), id.function());
    }
    Ok(behaviors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simulacrum_core::{Method, Store};

    #[tokio::test]
    async fn test_echo_reflects_body_and_type() {
        let store = Store::new();
        let behaviors = echo(&store.root(), &json!({})).unwrap();
        let (name, descriptor) = &behaviors.services[0];
        assert_eq!(name, "echo");

        let ServiceDescriptor::App { app, .. } = descriptor else {
            panic!("echo should be an app service");
        };
        let mut request = Request::new(Method::POST, "/").with_body("hello");
        request
            .headers
            .insert(CONTENT_TYPE, "text/plain".parse().unwrap());

        let response = app.handle(request).await.unwrap();
        assert_eq!(response.body, "hello");
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(store.root().slice("echo").slice("requests").get(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_echo_double() {
        let store = Store::new();
        let behaviors = echo(&store.root(), &json!({ "double": true })).unwrap();
        let ServiceDescriptor::App { app, .. } = &behaviors.services[0].1 else {
            panic!("echo should be an app service");
        };

        let response = app
            .handle(Request::new(Method::POST, "/").with_body("ab"))
            .await
            .unwrap();
        assert_eq!(response.body, "abab");
    }

    #[test]
    fn test_echo_rejects_bad_options() {
        let store = Store::new();
        let err = echo(&store.root(), &json!({ "double": "yes" })).unwrap_err();
        assert!(err.contains("invalid echo options"));
    }

    #[test]
    fn test_builtin_table() {
        let simulators = builtin();
        assert_eq!(simulators.names(), vec!["echo", "person"]);

        let store = Store::new();
        let behaviors = person(&store.root(), &Value::Null).unwrap();
        assert!(behaviors.services.is_empty());
        assert!(behaviors.scenarios.contains_key("person"));
    }
}
