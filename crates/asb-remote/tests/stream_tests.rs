// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests for the A2A client against mock servers.

use asb_core::{A2aState, Priority, Request, RequestId, RequestKind, RequestStatus};
use asb_remote::{A2aEvent, RemoteClient, RemoteError};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> Request {
    Request {
        id: RequestId::from("req-1"),
        title: None,
        from: "orchestrator".into(),
        to: "billing".into(),
        scope: "billing".into(),
        service: "billing".into(),
        kind: RequestKind::Task,
        priority: Priority::High,
        status: RequestStatus::Pending,
        created: chrono::Utc::now(),
        updated: chrono::Utc::now(),
        attempts: 0,
        depends_on: Vec::new(),
        directive: None,
        related_contract: None,
        command: None,
        command_args: None,
        originated_from: None,
        extra: Vec::new(),
        body: "do the thing".into(),
        path: std::path::PathBuf::from("req-1.md"),
    }
}

#[tokio::test]
async fn consumes_a_complete_event_stream() {
    let server = MockServer::start().await;
    let sse = "\
data: {\"type\":\"task-created\",\"taskId\":\"t-1\",\"contextId\":\"c-1\"}\n\n\
data: {\"type\":\"status-update\",\"state\":\"working\"}\n\n\
data: {\"type\":\"artifact-update\",\"name\":\"contract-update\",\"data\":{\"v\":2}}\n\n\
data: {\"type\":\"status-update\",\"state\":\"completed\"}\n\n";

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let client = RemoteClient::new(Duration::from_secs(5));
    let mut stream = client.send(&server.uri(), &request()).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }

    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], A2aEvent::TaskCreated { task_id, .. } if task_id == "t-1"));
    assert!(matches!(
        &events[1],
        A2aEvent::StatusUpdate {
            state: A2aState::Working,
            ..
        }
    ));
    assert!(matches!(&events[2], A2aEvent::ArtifactUpdate { name, .. } if name == "contract-update"));
    assert!(matches!(
        &events[3],
        A2aEvent::StatusUpdate {
            state: A2aState::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn undecodable_events_are_skipped() {
    let server = MockServer::start().await;
    let sse = "\
data: not json\n\n\
data: {\"type\":\"status-update\",\"state\":\"completed\"}\n\n";

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let client = RemoteClient::new(Duration::from_secs(5));
    let mut stream = client.send(&server.uri(), &request()).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn non_success_status_is_surfaced_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = RemoteClient::new(Duration::from_secs(5));
    let err = client.send(&server.uri(), &request()).await.unwrap_err();
    match err {
        RemoteError::UnexpectedStatus { status, body } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn fetches_the_terminal_task_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"id":"t-1","state":"completed","artifacts":[{"name":"contract-update","data":{"v":2}}]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let client = RemoteClient::new(Duration::from_secs(5));
    let snapshot = client.get_task(&server.uri(), "t-1").await.unwrap();
    assert_eq!(snapshot.id, "t-1");
    assert_eq!(snapshot.state, A2aState::Completed);
    assert_eq!(snapshot.artifacts.len(), 1);
    assert_eq!(snapshot.artifacts[0].name, "contract-update");
}

/// A remote that accepts the request, emits `task-created`, then goes
/// silent must be abandoned within one idle window.
#[tokio::test]
async fn silent_remote_trips_the_idle_timeout() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Hand-rolled HTTP server: send headers and one event, then hang
    // with the socket open.
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;

        let response = "HTTP/1.1 200 OK\r\n\
content-type: text/event-stream\r\n\
connection: keep-alive\r\n\r\n\
data: {\"type\":\"task-created\",\"taskId\":\"t-1\",\"contextId\":\"c-1\"}\n\n";
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        // Keep the connection open well past the idle window.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let idle = Duration::from_secs(1);
    let client = RemoteClient::new(idle);
    let endpoint = format!("http://{addr}/");
    let mut stream = client.send(&endpoint, &request()).await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, A2aEvent::TaskCreated { .. }));

    let started = Instant::now();
    let second = stream.next().await.unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(second, Err(RemoteError::IdleTimeout { secs: 1 })));
    // Within one idle window, give or take scheduling slack.
    assert!(elapsed >= Duration::from_millis(900), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "fired too late: {elapsed:?}");

    // The stream is finished after the timeout.
    assert!(stream.next().await.is_none());
}
