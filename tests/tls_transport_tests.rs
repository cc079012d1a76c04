use capstan::{Response, Rest, Transport, handler};
use http::{Method, StatusCode};
use std::path::PathBuf;
use tempfile::TempDir;

fn self_signed(dir: &TempDir) -> (PathBuf, PathBuf) {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, generated.cert.pem()).unwrap();
    std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();
    (cert, key)
}

fn insecure_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn serves_routes_over_https() {
    let dir = TempDir::new().unwrap();
    let (cert, key) = self_signed(&dir);

    let mut rest = Rest::new()
        .name("secure")
        .host("127.0.0.1")
        .with_port(0)
        .with_tls(cert, key);
    rest.handler(
        Method::GET,
        "/hello/:name",
        handler(|request| async move {
            let name = request.param("name").unwrap_or_default().to_string();
            Response::text(StatusCode::OK, format!("hello {}", name))
        }),
    )
    .unwrap();
    rest.run().await.unwrap();
    let port = Transport::port(&rest);

    let client = insecure_client();
    let body = client
        .get(format!("https://127.0.0.1:{}/hello/bob", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello bob");

    let health = client
        .get(format!("https://127.0.0.1:{}/healthcheck", port))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "secure service is good");

    // plaintext is not answered on a TLS port
    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/healthcheck", port))
            .await
            .is_err()
    );

    drop(client);
    rest.stop().await.unwrap();
    assert!(!rest.is_running());
}

#[tokio::test]
async fn https_requests_are_counted() {
    let dir = TempDir::new().unwrap();
    let (cert, key) = self_signed(&dir);

    let mut rest = Rest::new().host("127.0.0.1").with_port(0).with_tls(cert, key);
    rest.run().await.unwrap();
    let port = Transport::port(&rest);

    let client = insecure_client();
    for _ in 0..3 {
        client
            .get(format!("https://127.0.0.1:{}/healthcheck", port))
            .send()
            .await
            .unwrap();
    }
    let metrics = rest.metrics().unwrap();
    assert_eq!(metrics.requests("GET", "/healthcheck", 200), 3);

    drop(client);
    rest.stop().await.unwrap();
}
