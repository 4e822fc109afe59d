//! End-to-end tests: client -> proxy listener -> mock upstream

use egress_proxy::proxy::credential::CredentialInjector;
use egress_proxy::proxy::dispatch::DispatchTransport;
use egress_proxy::proxy::egress::EgressAddressPool;
use egress_proxy::proxy::limiter::QuotaTable;
use egress_proxy::proxy::router::{BackendRouter, Upstreams};
use egress_proxy::server::listener::serve;
use egress_proxy::server::Handler;
use http::header::HeaderName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROBE_HEADER: &str = "x-betteruptime-probe";

async fn start_proxy(upstream: &str, timeout: Duration) -> SocketAddr {
    let transport = DispatchTransport::new(
        BackendRouter::new(Upstreams::new("http", upstream, upstream)),
        EgressAddressPool::new(["127.0.0.1".parse().unwrap()]).unwrap(),
        QuotaTable::default(),
        CredentialInjector::new("S3CRET").unwrap(),
    );
    let handler = Arc::new(Handler::new(
        Arc::new(transport),
        HeaderName::from_static(PROBE_HEADER),
        timeout,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, handler));
    addr
}

async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_probe_is_answered_locally() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/Platform/Destiny2/Manifest/"))
        .header(PROBE_HEADER, "1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_empty_probe_header_is_proxied() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream"))
        .expect(1)
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let response = raw_exchange(
        addr,
        "GET /Platform/ HTTP/1.1\r\nHost: proxy\r\nx-betteruptime-probe: \r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.ends_with("upstream"), "{response}");
}

#[tokio::test]
async fn test_upstream_response_is_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Platform/Destiny2/Stats/PostGameCarnageReport/9/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-upstream", "stats")
                .set_body_string("{\"Response\":{}}"),
        )
        .expect(1)
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let response = reqwest::Client::new()
        .get(format!(
            "http://{addr}/Platform/Destiny2/Stats/PostGameCarnageReport/9/"
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-upstream"], "stats");
    assert_eq!(response.text().await.unwrap(), "{\"Response\":{}}");
}

#[tokio::test]
async fn test_error_status_is_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let response = reqwest::get(format!("http://{addr}/Platform/"))
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "maintenance");
}

#[tokio::test]
async fn test_keep_alive_serves_several_requests() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x"))
        .expect(3)
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    for _ in 0..3 {
        let body = client
            .get(format!("http://{addr}/Platform/"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "x");
    }
}

#[tokio::test]
async fn test_unreachable_upstream_gives_bad_gateway() {
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = dead.local_addr().unwrap().to_string();
    drop(dead);
    let addr = start_proxy(&dead_addr, Duration::from_secs(5)).await;

    let first = raw_exchange(addr, "GET /Platform/ HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(first.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{first}");

    // The listener survives the dial failure
    let second = raw_exchange(addr, "GET /Platform/ HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(second.starts_with("HTTP/1.1 502"), "{second}");
}

#[tokio::test]
async fn test_deadline_gives_gateway_timeout() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&upstream)
        .await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_millis(200)).await;

    let response = raw_exchange(addr, "GET /Platform/ HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 504"), "{response}");
}

#[tokio::test]
async fn test_malformed_request_gets_bad_request() {
    let upstream = MockServer::start().await;
    let addr = start_proxy(&upstream.address().to_string(), Duration::from_secs(5)).await;

    let response = raw_exchange(addr, "NOT-HTTP\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("connection: close\r\n"));
}
