use std::time::Duration;

#[path = "common.rs"]
mod common;

use common::{TestNaming, send_raw};
use lexkv::naming::NamingClientError;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use lexkv::{Endpoint, NamingClient, NamingConfig};

#[tokio::test(flavor = "multi_thread")]
async fn register_lookup_deregister_round_trip() {
    let mut naming = TestNaming::spawn().await;
    let client = NamingClient::new(naming.addr_string());

    assert_eq!(client.lookup().await.expect("lookup empty"), None);

    client
        .register("server1", "127.0.0.1", 9000)
        .await
        .expect("register");
    assert_eq!(
        client.lookup().await.expect("lookup"),
        Some(Endpoint::new("server1", "127.0.0.1", 9000))
    );

    client.heartbeat("server1").await.expect("heartbeat");
    client.deregister("server1").await.expect("deregister");
    assert_eq!(client.lookup().await.expect("lookup after deregister"), None);

    // Deregistering twice is still answered with ok.
    client.deregister("server1").await.expect("second deregister");

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_returns_most_recently_seen_instance() {
    let mut naming = TestNaming::spawn().await;
    let client = NamingClient::new(naming.addr_string());

    client.register("alpha", "10.0.0.1", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.register("beta", "10.0.0.2", 2).await.unwrap();
    assert_eq!(client.lookup().await.unwrap().unwrap().name, "beta");

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.heartbeat("alpha").await.unwrap();
    assert_eq!(client.lookup().await.unwrap().unwrap().name, "alpha");

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_cannot_resurrect_unregistered_instance() {
    let mut naming = TestNaming::spawn().await;
    let client = NamingClient::new(naming.addr_string());

    client.heartbeat("ghost").await.expect("heartbeat answered ok");
    assert!(naming.registry.is_empty().await);
    assert_eq!(client.lookup().await.unwrap(), None);

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_payloads_are_classified() {
    let mut naming = TestNaming::spawn().await;

    let reply = send_raw(naming.addr, b"this is not json\n").await;
    assert_eq!(reply.trim(), r#"{"status":"error","error":"invalid_json"}"#);

    let reply = send_raw(naming.addr, br#"{"type":"teleport"}"#).await;
    assert_eq!(reply.trim(), r#"{"status":"error","error":"unknown_type"}"#);

    let reply = send_raw(naming.addr, br#"{"type":"register","name":"s1"}"#).await;
    assert_eq!(reply.trim(), r#"{"status":"error","error":"invalid_json"}"#);

    let reply = send_raw(naming.addr, br#"{"type":"lookup"}"#).await;
    assert_eq!(reply.trim(), r#"{"status":"error","error":"no_servers"}"#);

    // The service keeps accepting connections after bad input.
    let client = NamingClient::new(naming.addr_string());
    client.register("s1", "h", 1).await.expect("register after errors");

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_instances_are_pruned() {
    let config = NamingConfig::new("127.0.0.1:0")
        .with_ttl(Duration::from_millis(100))
        .with_grace(Duration::from_millis(50))
        .with_prune_interval(Duration::from_millis(25));
    let mut naming = TestNaming::spawn_with(config).await;
    let client = NamingClient::new(naming.addr_string());

    client.register("quiet", "h", 1).await.unwrap();
    client.register("chatty", "h", 2).await.unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.heartbeat("chatty").await.unwrap();
    }

    let names: Vec<String> = naming
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|record| record.name)
        .collect();
    assert_eq!(names, vec!["chatty".to_string()]);

    // A pruned instance must register again; a heartbeat is not enough.
    client.heartbeat("quiet").await.unwrap();
    assert_eq!(naming.registry.len().await, 1);

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn client_reports_unreachable_service() {
    let client = NamingClient::new("127.0.0.1:1").with_timeout(Duration::from_secs(1));
    let err = client.lookup().await.unwrap_err();
    assert!(matches!(
        err,
        NamingClientError::Io(_) | NamingClientError::Timeout(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn request_without_newline_is_answered_while_peer_waits() {
    let mut naming = TestNaming::spawn().await;
    naming.registry.register("server1", "127.0.0.1", 9000).await;

    let mut stream = TcpStream::connect(naming.addr).await.unwrap();
    stream.write_all(br#"{"type": "lookup"}"#).await.unwrap();
    let mut reply = String::new();
    tokio::time::timeout(
        Duration::from_secs(2),
        BufReader::new(&mut stream).read_line(&mut reply),
    )
    .await
    .expect("answered without EOF from the peer")
    .unwrap();

    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["name"], "server1");
    assert_eq!(reply["port"], 9000);

    naming.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_connection_is_closed_after_request_timeout() {
    let mut naming =
        TestNaming::spawn_with(NamingConfig::default().with_request_timeout(Duration::from_millis(200)))
            .await;

    let mut stream = TcpStream::connect(naming.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("server closed the idle connection")
        .unwrap();
    assert_eq!(read, 0);

    naming.shutdown().await;
}
