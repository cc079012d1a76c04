use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use axum::Json;
use capstan::{ConsulRegistry, Registry, Rest, RuntimeBuilder, RuntimeError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Agent {
    registrations: Arc<Mutex<Vec<(Value, Option<String>)>>>,
    reject: bool,
}

async fn register(
    State(agent): State<Agent>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> StatusCode {
    if agent.reject {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    agent.registrations.lock().unwrap().push((payload, auth));
    StatusCode::OK
}

async fn mock_agent(agent: Agent) -> String {
    let app = Router::new()
        .route("/v1/agent/service/register", put(register))
        .with_state(agent);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

#[tokio::test]
async fn registers_service_with_agent() {
    let agent = Agent::default();
    let address = mock_agent(agent.clone()).await;

    let registry = ConsulRegistry::new()
        .with_id("svc-7")
        .unwrap()
        .with_name("billing")
        .unwrap()
        .with_address(&address)
        .unwrap()
        .with_port(9100)
        .unwrap()
        .with_credentials("consul", "secret")
        .unwrap()
        .with_health_endpoint("/healthcheck")
        .unwrap();
    registry.register().await.unwrap();

    let registrations = agent.registrations.lock().unwrap();
    assert_eq!(registrations.len(), 1);
    let (payload, auth) = &registrations[0];
    assert_eq!(payload["ID"], "svc-7");
    assert_eq!(payload["Name"], "billing");
    assert_eq!(payload["Address"], "localhost");
    assert_eq!(payload["Port"], 9100);
    assert_eq!(payload["Check"]["HTTP"], "http://localhost:9100/healthcheck");
    assert_eq!(payload["Check"]["Timeout"], "5s");
    assert!(auth.as_deref().unwrap().starts_with("Basic "));
}

#[tokio::test]
async fn rejected_registration_is_registry_error() {
    let address = mock_agent(Agent {
        reject: true,
        ..Agent::default()
    })
    .await;

    let registry = ConsulRegistry::new().with_address(&address).unwrap();
    let err = registry.register().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Registry(_)));
}

#[tokio::test]
async fn unreachable_agent_is_registry_error() {
    let registry = ConsulRegistry::new().with_address("127.0.0.1:1").unwrap();
    assert!(matches!(
        registry.register().await,
        Err(RuntimeError::Registry(_))
    ));
}

#[tokio::test]
async fn default_registry_announces_runtime_identity() {
    let agent = Agent::default();
    let address = mock_agent(agent.clone()).await;

    let mut runtime = RuntimeBuilder::new()
        .id("node-1")
        .name("inventory")
        .configuration(capstan::JsonConfiguration::from_value(serde_json::json!({
            "registry": { "address": address }
        })))
        .default_registry()
        .transport(Rest::new().host("127.0.0.1").with_port(0))
        .build()
        .unwrap();
    runtime.start().await.unwrap();

    {
        let registrations = agent.registrations.lock().unwrap();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].0["ID"], "node-1");
        assert_eq!(registrations[0].0["Name"], "inventory");
    }

    runtime.stop().await.unwrap();
}
