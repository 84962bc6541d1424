use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quill_jobs::{
    GenerationAdapter, JobCallbacks, JobOutcome, JobOwnerId, JobRequest, JobRunner, Phase,
    PlanningAdapter, RequestContext, RunnerOptions, ServiceEndpoints,
};
use quill_transport::WebSocketTransport;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type ServerSocket = WebSocketStream<TcpStream>;

/// What the fake proposal service observed on its side of the socket.
#[derive(Debug, Default)]
struct ServerLog {
    path: String,
    frames: Vec<Value>,
}

async fn spawn_proposal_service<F, Fut>(script: F) -> (SocketAddr, oneshot::Receiver<ServerLog>)
where
    F: FnOnce(ServerSocket, ServerLog) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ServerLog> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("listener addr");
    let (log_tx, log_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept client");
        let path = Arc::new(Mutex::new(String::new()));
        let seen_path = Arc::clone(&path);
        let socket = accept_hdr_async(tcp, move |request: &Request, response: Response| {
            *seen_path.lock().expect("path lock") = request.uri().path().to_string();
            Ok(response)
        })
        .await
        .expect("websocket handshake");
        let log = ServerLog {
            path: path.lock().expect("path lock").clone(),
            frames: Vec::new(),
        };
        let _ = log_tx.send(script(socket, log).await);
    });
    (addr, log_rx)
}

async fn read_frame(socket: &mut ServerSocket, log: &mut ServerLog) -> Option<Value> {
    loop {
        match socket.next().await? {
            Ok(WsMessage::Text(text)) => {
                let frame: Value = serde_json::from_str(text.as_str()).expect("client sends json");
                log.frames.push(frame.clone());
                return Some(frame);
            }
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn send_frame(socket: &mut ServerSocket, frame: Value) {
    socket
        .send(WsMessage::Text(frame.to_string().into()))
        .await
        .expect("send server frame");
}

fn runner_for(addr: SocketAddr) -> JobRunner {
    let endpoints = ServiceEndpoints::resolve(&format!("http://{addr}"), None).expect("endpoints");
    JobRunner::new(
        Arc::new(WebSocketTransport::new(Duration::from_secs(2))),
        endpoints,
        RunnerOptions::default(),
    )
}

async fn settle<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("job should settle before timeout")
}

#[tokio::test]
async fn integration_generation_job_streams_sections_then_completes() {
    let (addr, log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        send_frame(&mut socket, json!({"type": "section", "data": {"name": "Intro", "content": "Hello"}})).await;
        send_frame(&mut socket, json!({"type": "heartbeat", "count": 1})).await;
        send_frame(&mut socket, json!({"type": "section", "data": {"name": "Budget", "content": "12k"}})).await;
        send_frame(
            &mut socket,
            json!({"type": "complete", "data": {"sections": [
                {"name": "Intro", "content": "Hello"},
                {"name": "Budget", "content": "12k"},
                {"name": "Timeline", "content": "Q3"},
            ]}}),
        )
        .await;
        while read_frame(&mut socket, &mut log).await.is_some() {}
        log
    })
    .await;

    let partials = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&partials);
    let callbacks = JobCallbacks::new().on_partial(move |_, snapshot: &quill_jobs::DraftedProposal| {
        recorded
            .lock()
            .expect("partials lock")
            .push(snapshot.names().map(str::to_string).collect::<Vec<_>>());
    });
    let request = JobRequest::new(JobOwnerId::from(12_u64))
        .with_pitch("Solar for schools")
        .with_one_off("budget", "40k")
        .with_context(RequestContext::for_user("u-7"));
    let handle = runner_for(addr)
        .spawn(GenerationAdapter, request, callbacks)
        .expect("spawn generation job");

    let proposal = match settle(handle.outcome()).await {
        JobOutcome::Completed(proposal) => proposal,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(
        proposal.names().collect::<Vec<_>>(),
        vec!["Intro", "Budget", "Timeline"]
    );
    assert_eq!(
        *partials.lock().expect("partials lock"),
        vec![vec!["Intro".to_string()], vec!["Intro".to_string(), "Budget".to_string()]]
    );

    let log = settle(log_rx).await.expect("server log");
    assert_eq!(log.path, "/ws/generate-proposal");
    assert_eq!(
        log.frames.first(),
        Some(&json!({
            "template_id": "12",
            "pitch": "Solar for schools",
            "one_off_info": {"budget": "40k"},
            "user_id": "u-7",
        }))
    );
}

#[tokio::test]
async fn integration_planning_job_targets_owner_path_and_reads_top_level_completion() {
    let (addr, log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        send_frame(&mut socket, json!({"type": "pre_plan", "data": {"name": "Goals", "content": "g"}})).await;
        send_frame(&mut socket, json!({"type": "plan", "data": {"name": "Budget", "content": "b"}})).await;
        send_frame(
            &mut socket,
            json!({"type": "complete", "pre_plan": {"Goals": "final g"}, "plan": {"Budget": "final b"}}),
        )
        .await;
        log
    })
    .await;

    let handle = runner_for(addr)
        .spawn(
            PlanningAdapter,
            JobRequest::new(JobOwnerId::from(31_u64)),
            JobCallbacks::new(),
        )
        .expect("spawn planning job");

    let plan = match settle(handle.outcome()).await {
        JobOutcome::Completed(plan) => plan,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(plan.pre_plan["Goals"], json!("final g"));
    assert_eq!(plan.plan["Budget"], json!("final b"));

    let log = settle(log_rx).await.expect("server log");
    assert_eq!(log.path, "/ws/plan-proposal/31");
    assert_eq!(log.frames.first(), Some(&json!({"one_off_info": {}})));
}

#[tokio::test]
async fn integration_server_error_frame_fails_the_job_verbatim() {
    let (addr, _log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        send_frame(&mut socket, json!({"type": "section", "data": {"name": "Intro", "content": "x"}})).await;
        send_frame(&mut socket, json!({"type": "error", "message": "model quota exhausted"})).await;
        log
    })
    .await;

    let failures = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&failures);
    let callbacks = JobCallbacks::new().on_failed(move |message: &str| {
        recorded
            .lock()
            .expect("failures lock")
            .push(message.to_string());
    });
    let handle = runner_for(addr)
        .spawn(GenerationAdapter, JobRequest::new(JobOwnerId::from(1_u64)), callbacks)
        .expect("spawn generation job");

    assert_eq!(
        settle(handle.outcome()).await,
        JobOutcome::Failed("model quota exhausted".to_string())
    );
    assert_eq!(
        *failures.lock().expect("failures lock"),
        vec!["model quota exhausted".to_string()]
    );
}

#[tokio::test]
async fn integration_server_dropping_socket_reports_unexpected_close() {
    let (addr, _log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        send_frame(&mut socket, json!({"type": "section", "data": {"name": "Intro", "content": "x"}})).await;
        drop(socket);
        log
    })
    .await;

    let handle = runner_for(addr)
        .spawn(GenerationAdapter, JobRequest::new(JobOwnerId::from(2_u64)), JobCallbacks::new())
        .expect("spawn generation job");
    assert_eq!(
        settle(handle.outcome()).await,
        JobOutcome::Failed("connection closed unexpectedly".to_string())
    );
}

#[tokio::test]
async fn integration_clean_close_without_completion_fails_the_job() {
    let (addr, _log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .expect("close");
        log
    })
    .await;

    let handle = runner_for(addr)
        .spawn(PlanningAdapter, JobRequest::new(JobOwnerId::from(3_u64)), JobCallbacks::new())
        .expect("spawn planning job");
    assert_eq!(
        settle(handle.outcome()).await,
        JobOutcome::Failed("connection closed before the job finished".to_string())
    );
}

#[tokio::test]
async fn integration_cancel_sends_stop_frame_to_service() {
    let (partial_tx, mut partial_rx) = mpsc::unbounded_channel();
    let (addr, log_rx) = spawn_proposal_service(|mut socket, mut log| async move {
        read_frame(&mut socket, &mut log).await;
        send_frame(&mut socket, json!({"type": "section", "data": {"name": "Intro", "content": "x"}})).await;
        // Hold the job open until the client asks to stop.
        while let Some(frame) = read_frame(&mut socket, &mut log).await {
            if frame["type"] == json!("stop") {
                break;
            }
        }
        let _ = socket
            .send(WsMessage::Text(json!({"type": "complete", "data": []}).to_string().into()))
            .await;
        log
    })
    .await;

    let callbacks = JobCallbacks::new().on_partial(move |kind, _: &quill_jobs::DraftedProposal| {
        let _ = partial_tx.send(kind);
    });
    let handle = runner_for(addr)
        .spawn(GenerationAdapter, JobRequest::new(JobOwnerId::from(4_u64)), callbacks)
        .expect("spawn generation job");

    settle(partial_rx.recv()).await.expect("first section");
    settle(handle.cancel()).await.expect("cancel streaming job");
    assert_eq!(handle.phase(), Phase::Cancelled);
    assert_eq!(settle(handle.outcome()).await, JobOutcome::Cancelled);

    let log = settle(log_rx).await.expect("server log");
    assert_eq!(log.frames.last(), Some(&json!({"type": "stop"})));
}

#[tokio::test]
async fn integration_unreachable_service_fails_through_on_failed() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("listener addr");
    drop(listener);

    let handle = runner_for(addr)
        .spawn(GenerationAdapter, JobRequest::new(JobOwnerId::from(5_u64)), JobCallbacks::new())
        .expect("spawn generation job");
    match settle(handle.outcome()).await {
        JobOutcome::Failed(message) => assert!(
            message.starts_with("connection error: failed to connect"),
            "{message}"
        ),
        other => panic!("expected connection failure, got {other:?}"),
    }
}
