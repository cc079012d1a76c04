use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::{AuthN, Request, Response, Transport, handler};
use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const REGISTER_ROUTE: &str = "/register";
pub const LOGIN_ROUTE: &str = "/login";
pub const LOGOUT_ROUTE: &str = "/logout/:username";

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

fn failure(logger: &Logger, operation: &str, err: &RuntimeError) -> Response {
    match err {
        RuntimeError::InvalidInput(_)
        | RuntimeError::InvalidCredentials
        | RuntimeError::NotFound(_) => {
            logger.info(format!("{} rejected: {}", operation, err))
        }
        _ => logger.error(format!("{} failed: {}", operation, err)),
    }
    Response::json(StatusCode::BAD_GATEWAY, &json!({ "error": err.client_message() }))
}

enum Action {
    Register,
    Login,
}

async fn credentials_route(
    authn: &dyn AuthN,
    logger: &Logger,
    action: Action,
    request: Request,
) -> Response {
    let operation = match action {
        Action::Register => "register",
        Action::Login => "login",
    };
    let result = match request.json::<Credentials>() {
        Ok(creds) => match action {
            Action::Register => authn.register(&creds.username, &creds.password).await,
            Action::Login => authn.login(&creds.username, &creds.password).await,
        },
        Err(err) => Err(err),
    };
    match result {
        Ok(record) => Response::json(StatusCode::OK, &record),
        Err(err) => failure(logger, operation, &err),
    }
}

/// Exposes register, login and logout of `authn` on the transport.
pub fn install(transport: &mut dyn Transport, authn: Arc<dyn AuthN>, logger: &Logger) -> Result<()> {
    let logger = logger.component("authn.routes");

    let (a, l) = (authn.clone(), logger.clone());
    transport.handler(
        Method::POST,
        REGISTER_ROUTE,
        handler(move |request| {
            let (authn, logger) = (a.clone(), l.clone());
            async move { credentials_route(authn.as_ref(), &logger, Action::Register, request).await }
        }),
    )?;

    let (a, l) = (authn.clone(), logger.clone());
    transport.handler(
        Method::POST,
        LOGIN_ROUTE,
        handler(move |request| {
            let (authn, logger) = (a.clone(), l.clone());
            async move { credentials_route(authn.as_ref(), &logger, Action::Login, request).await }
        }),
    )?;

    transport.handler(
        Method::POST,
        LOGOUT_ROUTE,
        handler(move |request: Request| {
            let (authn, logger) = (authn.clone(), logger.clone());
            async move {
                let username = request.param("username").unwrap_or_default().to_string();
                match authn.logout(&username).await {
                    Ok(()) => Response::empty(StatusCode::OK),
                    Err(err) => {
                        logger.info(format!("logout rejected: {}", err));
                        Response::text(StatusCode::BAD_GATEWAY, err.client_message())
                    }
                }
            }
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::{LocalFileAuthN, PasswordHasher};
    use crate::transport::Rest;
    use axum::body::Body;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn rest_with_routes(dir: &TempDir) -> Rest {
        let authn = LocalFileAuthN::new()
            .with_folder(dir.path())
            .unwrap()
            .with_hasher(PasswordHasher::new(PasswordHasher::MIN_COST).unwrap());
        let mut rest = Rest::new();
        install(&mut rest, Arc::new(authn), &Logger::detached()).unwrap();
        rest
    }

    async fn post(rest: &Rest, uri: &str, body: &str) -> (StatusCode, serde_json::Value, String) {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = rest.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json, text)
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let dir = TempDir::new().unwrap();
        let rest = rest_with_routes(&dir);

        let (status, record, _) =
            post(&rest, "/register", r#"{"username":"alice","password":"s3cret"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["username"], "alice");
        assert!(record.get("password").is_none());

        let (status, record, _) =
            post(&rest, "/login", r#"{"username":"alice","password":"s3cret"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["groups"], serde_json::json!(["user"]));
    }

    #[tokio::test]
    async fn test_failures_are_bad_gateway_without_detail() {
        let dir = TempDir::new().unwrap();
        let rest = rest_with_routes(&dir);

        let (status, unknown, _) =
            post(&rest, "/login", r#"{"username":"ghost","password":"x"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        post(&rest, "/register", r#"{"username":"bob","password":"right"}"#).await;
        let (status, wrong, _) =
            post(&rest, "/login", r#"{"username":"bob","password":"wrong"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(wrong["error"], "wrong username or password");

        // unknown and known users are indistinguishable
        assert_eq!(unknown, wrong);

        let (status, _, _) = post(&rest, "/register", "not json").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_logout_uses_path_parameter() {
        let dir = TempDir::new().unwrap();
        let rest = rest_with_routes(&dir);

        let (status, _, text) = post(&rest, "/logout/alice", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.is_empty());
    }
}
