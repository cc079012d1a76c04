use capstan::{PortNegotiator, Rest, RuntimeError, Transport};
use std::time::Duration;
use tokio::net::TcpListener;

fn negotiator() -> PortNegotiator {
    PortNegotiator::new()
        .host("127.0.0.1")
        .timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn occupied_port_is_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let occupied = listener.local_addr().unwrap().port();

    let port = negotiator()
        .ceiling(occupied.saturating_add(64))
        .negotiate(occupied)
        .await
        .unwrap();
    assert!(port > occupied);
}

#[tokio::test]
async fn free_port_is_returned_as_is() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let free = listener.local_addr().unwrap().port();
    drop(listener);

    let port = negotiator()
        .ceiling(free.saturating_add(1))
        .negotiate(free)
        .await
        .unwrap();
    assert_eq!(port, free);
}

#[tokio::test]
async fn exhausted_range_reports_no_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let occupied = listener.local_addr().unwrap().port();

    let err = negotiator()
        .ceiling(occupied.saturating_add(1))
        .negotiate(occupied)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::NoPortAvailable { start, .. } if start == occupied
    ));
}

#[tokio::test]
async fn rest_moves_past_an_occupied_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let occupied = listener.local_addr().unwrap().port();

    let mut rest = Rest::new()
        .host("127.0.0.1")
        .with_port(occupied)
        .negotiator(negotiator().ceiling(occupied.saturating_add(64)));
    rest.run().await.unwrap();
    let bound = Transport::port(&rest);
    assert!(bound > occupied);

    let body = reqwest::get(format!("http://127.0.0.1:{}/healthcheck", bound))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "default service is good");

    rest.stop().await.unwrap();
}
