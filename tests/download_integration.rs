//! End-to-end engine tests through the reqwest transport against a local
//! range-honoring mock server.

use std::sync::{Arc, Mutex};

use mcdl_core::download::{Heartbeat, HeartbeatCallback, constants::PROGRESS_SCALE};
use mcdl_core::{
    DownloadContractor, DownloadError, ErrorKind, HttpClient, HttpConfig, Job, JobOutcome,
    RetryPolicy, probe,
};
use tempfile::TempDir;

mod support;
use support::range_server::{RangeMode, RangeResponder, mount, payload};
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn client(config: &HttpConfig) -> HttpClient {
    HttpClient::new(config).expect("client builds")
}

fn collect_heartbeats() -> (Arc<Mutex<Vec<Heartbeat>>>, HeartbeatCallback) {
    let beats = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&beats);
    let callback: HeartbeatCallback =
        Box::new(move |beat: &Heartbeat| sink.lock().unwrap().push(beat.clone()));
    (beats, callback)
}

#[tokio::test]
async fn test_probe_reports_size_and_suggested_name() {
    let server = require_mock_server!();
    mount(
        &server,
        "/files/latest",
        RangeResponder::new(payload(4096), RangeMode::Honor)
            .with_content_disposition("attachment; filename=\"disk image.iso\""),
    )
    .await;

    let client = client(&HttpConfig::default());
    let url = format!("{}/files/latest", server.uri());
    let info = probe(&client, &url).await.unwrap();

    assert_eq!(info.total_size, 4096);
    assert_eq!(info.suggested_file_name.as_deref(), Some("disk image.iso"));
}

#[tokio::test]
async fn test_probe_rejects_server_ignoring_range() {
    let server = require_mock_server!();
    mount(
        &server,
        "/plain.bin",
        RangeResponder::new(payload(1000), RangeMode::IgnoreRange),
    )
    .await;

    let client = client(&HttpConfig::default());
    let url = format!("{}/plain.bin", server.uri());
    let err = probe(&client, &url).await.unwrap_err();

    assert!(
        matches!(err, DownloadError::RangeNotSupported { status: 200, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_four_connection_download_writes_exact_bytes() {
    let server = require_mock_server!();
    let body = payload(1_000_003);
    mount(
        &server,
        "/big.bin",
        RangeResponder::new(body.clone(), RangeMode::Honor),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("big.bin");
    let url = format!("{}/big.bin", server.uri());
    let config = HttpConfig::default();
    let client = client(&config);

    let info = probe(&client, &url).await.unwrap();
    let job = Job::builder(url.as_str(), dest.clone(), info.total_size)
        .connections(4)
        .http_config(config)
        .build()
        .unwrap();
    assert_eq!(job.granularity(), 250_001);

    let (beats, callback) = collect_heartbeats();
    let contractor = DownloadContractor::new(RetryPolicy::default());
    let outcome = contractor.start(&job, callback).await.unwrap();

    assert_eq!(outcome, JobOutcome::Completed { bytes: 1_000_003 });
    assert_eq!(std::fs::read(&dest).unwrap(), body);

    let beats = beats.lock().unwrap();
    let last = beats.last().expect("final heartbeat");
    assert!(last.is_final);
    assert_eq!(last.bytes_done, last.bytes_total);
    assert_eq!(last.spans.first().map(|s| s.start), Some(0));
    assert_eq!(last.spans.last().map(|s| s.end), Some(PROGRESS_SCALE));

    // One probe plus one request per range.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);
    let mut ranges: Vec<String> = requests
        .iter()
        .skip(1)
        .filter_map(|r| r.headers.get("range")?.to_str().ok().map(str::to_string))
        .collect();
    ranges.sort();
    assert_eq!(
        ranges,
        vec![
            "bytes=0-250000",
            "bytes=250001-500001",
            "bytes=500002-750002",
            "bytes=750003-1000002",
        ]
    );
}

#[tokio::test]
async fn test_small_granularity_queues_more_ranges_than_connections() {
    let server = require_mock_server!();
    let body = payload(10_000);
    mount(
        &server,
        "/chunks.bin",
        RangeResponder::new(body.clone(), RangeMode::Honor),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("chunks.bin");
    let url = format!("{}/chunks.bin", server.uri());

    let job = Job::builder(url.as_str(), dest.clone(), 10_000)
        .connections(3)
        .granularity(1_000)
        .build()
        .unwrap();
    let contractor = DownloadContractor::new(RetryPolicy::default());
    let outcome = contractor.start(&job, Box::new(|_: &Heartbeat| {})).await.unwrap();

    assert_eq!(outcome, JobOutcome::Completed { bytes: 10_000 });
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert_eq!(server.received_requests().await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_mismatched_content_range_fails_job() {
    let server = require_mock_server!();
    mount(
        &server,
        "/shifty.bin",
        RangeResponder::new(payload(8_000), RangeMode::ShiftLaterRanges),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/shifty.bin", server.uri());

    let job = Job::builder(url.as_str(), dir.path().join("shifty.bin"), 8_000)
        .connections(2)
        .build()
        .unwrap();
    let contractor = DownloadContractor::new(RetryPolicy::default());
    let err = contractor.start(&job, Box::new(|_: &Heartbeat| {})).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation, "unexpected error: {err}");
}

#[tokio::test]
async fn test_job_headers_and_user_agent_reach_every_range_request() {
    let server = require_mock_server!();
    mount(
        &server,
        "/private.bin",
        RangeResponder::new(payload(2_048), RangeMode::Honor),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/private.bin", server.uri());

    // Size lookup with plain settings; only the job carries the token.
    let info = probe(&client(&HttpConfig::default()), &url).await.unwrap();
    let config = HttpConfig::default()
        .with_user_agent("mirror-bot/2")
        .with_header("X-Token: abc123");
    let job = Job::builder(url.as_str(), dir.path().join("private.bin"), info.total_size)
        .connections(2)
        .http_config(config)
        .build()
        .unwrap();
    let contractor = DownloadContractor::new(RetryPolicy::default());
    contractor.start(&job, Box::new(|_: &Heartbeat| {})).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].headers.get("x-token").is_none());
    for request in &requests[1..] {
        assert_eq!(request.headers.get("x-token").unwrap(), "abc123");
        assert_eq!(request.headers.get("user-agent").unwrap(), "mirror-bot/2");
        assert!(request.headers.get("range").is_some());
    }
}

#[tokio::test]
async fn test_connection_refused_is_fatal_when_not_retryable() {
    if support::socket_guard::should_skip_socket_bound_test() {
        return;
    }
    // Bind then drop a listener to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = TempDir::new().unwrap();
    let url = format!("http://127.0.0.1:{port}/gone.bin");

    let job = Job::builder(url.as_str(), dir.path().join("gone.bin"), 100)
        .connections(2)
        .build()
        .unwrap();
    let policy = RetryPolicy::default().with_retryable([]);
    let contractor = DownloadContractor::new(policy);
    let err = contractor.start(&job, Box::new(|_: &Heartbeat| {})).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport, "unexpected error: {err}");
}
