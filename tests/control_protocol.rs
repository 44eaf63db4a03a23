//! Orchestrator tests against a scripted control port.
//!
//! A local TCP server plays the daemon's control port and a channel
//! task plays the worker, so the full start/stop sequencing runs
//! without a tor binary.

use oniondrop::config::{TimeoutConfig, TorConfig, TransportConfig};
use oniondrop::state::TorState;
use oniondrop::tor::worker::{worker_channel, WorkerChannel, WorkerCommand, WorkerSignal};
use oniondrop::tor::{StartError, TorOrchestrator};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

const SERVICE_ID: &str = "vu3mvauquorrtkari6qedjmtmtaffyhbajjgeqnltnjxxp2xlaip3qqd";

/// Canned replies for the fake control port
#[derive(Clone)]
struct Script {
    auth_reply: &'static str,
    add_onion_reply: Vec<String>,
    /// 650 notices pushed right after the ADD_ONION reply
    events: Vec<String>,
}

impl Script {
    fn happy() -> Self {
        Self {
            auth_reply: "250 OK",
            add_onion_reply: vec![format!("250-ServiceID={}", SERVICE_ID), "250 OK".to_string()],
            events: vec![
                "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=50 TAG=loading_descriptors"
                    .to_string(),
                "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done".to_string(),
                format!("650 HS_DESC UPLOAD {} UNKNOWN $hsdir", SERVICE_ID),
                format!("650 HS_DESC UPLOADED {} UNKNOWN $hsdir", SERVICE_ID),
            ],
        }
    }
}

/// Serve scripted replies on an ephemeral port, one connection at a
/// time, until the test ends.
async fn spawn_control_server(script: Script) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let keyword = line.split_whitespace().next().unwrap_or("");
                let reply: Vec<String> = match keyword {
                    "AUTHENTICATE" => vec![script.auth_reply.to_string()],
                    "ADD_ONION" => script.add_onion_reply.clone(),
                    _ => vec!["250 OK".to_string()],
                };
                for line in &reply {
                    let _ = write_half.write_all(line.as_bytes()).await;
                    let _ = write_half.write_all(b"\r\n").await;
                }
                let _ = write_half.flush().await;

                if keyword == "ADD_ONION" {
                    for event in &script.events {
                        let _ = write_half.write_all(event.as_bytes()).await;
                        let _ = write_half.write_all(b"\r\n").await;
                    }
                    let _ = write_half.flush().await;
                }
            }
        }
    });

    port
}

/// A well-behaved worker: every Start answers Ready, every Stop
/// answers Stopped.
fn spawn_fake_worker() -> WorkerChannel {
    let (channel, mut endpoint) = worker_channel();
    tokio::spawn(async move {
        while let Some(cmd) = endpoint.commands.recv().await {
            let signal = match cmd {
                WorkerCommand::Start => WorkerSignal::Ready,
                WorkerCommand::Stop => WorkerSignal::Stopped,
            };
            if endpoint.signals.send(signal).await.is_err() {
                return;
            }
        }
    });
    channel
}

fn orchestrator(control_port: u16, worker: WorkerChannel) -> TorOrchestrator {
    let tor_config = TorConfig {
        control_port,
        control_password: Some("test".to_string()),
        ..TorConfig::default()
    };
    let transport = TransportConfig {
        enabled: false,
        ..TransportConfig::default()
    };
    let timeouts = TimeoutConfig {
        worker_startup_secs: 5,
        worker_stop_secs: 5,
        ..TimeoutConfig::default()
    };
    TorOrchestrator::new(tor_config, transport, timeouts, 17621, worker)
}

#[tokio::test]
async fn start_walks_through_to_started() {
    let port = spawn_control_server(Script::happy()).await;
    let tor = orchestrator(port, spawn_fake_worker());
    let mut states = tor.subscribe();

    let service = tor.start().await.unwrap();
    assert_eq!(service.address, format!("{}.onion", SERVICE_ID));
    assert_eq!(service.target_port, 17621);
    assert_eq!(service.service_id(), SERVICE_ID);

    let started = timeout(
        Duration::from_secs(5),
        states.wait_for(|s| matches!(s, TorState::Started { .. })),
    )
    .await
    .expect("service never became reachable")
    .unwrap();
    assert_eq!(
        started.onion_address(),
        Some(format!("{}.onion", SERVICE_ID).as_str())
    );
    drop(started);

    tor.stop().await;
    assert!(states.borrow().is_stopped());
}

#[tokio::test]
async fn missing_service_id_fails_and_rolls_back() {
    let script = Script {
        add_onion_reply: vec!["250 OK".to_string()],
        events: Vec::new(),
        ..Script::happy()
    };
    let port = spawn_control_server(script).await;
    let tor = orchestrator(port, spawn_fake_worker());

    let err = tor.start().await.unwrap_err();
    assert!(matches!(err, StartError::Protocol(_)), "got {:?}", err);

    // Rollback leaves nothing half-started
    assert!(tor.subscribe().borrow().is_stopped());
}

#[tokio::test]
async fn rejected_authentication_surfaces_and_rolls_back() {
    let script = Script {
        auth_reply: "515 Authentication failed: wrong password",
        events: Vec::new(),
        ..Script::happy()
    };
    let port = spawn_control_server(script).await;
    let tor = orchestrator(port, spawn_fake_worker());

    let err = tor.start().await.unwrap_err();
    assert!(matches!(err, StartError::Authentication(_)), "got {:?}", err);
    assert!(tor.subscribe().borrow().is_stopped());
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let port = spawn_control_server(Script::happy()).await;
    let tor = orchestrator(port, spawn_fake_worker());
    let states = tor.subscribe();

    tor.stop().await;
    tor.stop().await;
    assert!(states.borrow().is_stopped());
}

#[tokio::test]
async fn start_while_started_restarts_cleanly() {
    let port = spawn_control_server(Script::happy()).await;
    let tor = orchestrator(port, spawn_fake_worker());
    let mut states = tor.subscribe();

    tor.start().await.unwrap();
    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| matches!(s, TorState::Started { .. })),
    )
    .await
    .expect("first session never became reachable")
    .unwrap();

    // A second start tears the first session down and runs the full
    // sequence again on a fresh control connection
    let service = tor.start().await.unwrap();
    assert_eq!(service.address, format!("{}.onion", SERVICE_ID));

    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| matches!(s, TorState::Started { .. })),
    )
    .await
    .expect("second session never became reachable")
    .unwrap();

    tor.stop().await;
    assert!(states.borrow().is_stopped());
}
