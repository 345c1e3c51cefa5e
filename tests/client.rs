use std::sync::Arc;
use std::time::Duration;

use evmeter::{
    ChargerClient, ChargerReading, ChargerState, ClientConfig, ClientError, MemoryTransport, RecordKind,
};
use tokio::time::Instant;

const STATUS_FRAME: &str = "aa55160102020103000005dc000004d20001e24000050002";
const METRICS_FRAME: &str =
    "aa55250208fd08fa09060642063e064a00a02000f5c300007b01040202000707486f6d654e6574";

fn frame(hex_frame: &str) -> Vec<u8> {
    hex::decode(hex_frame).unwrap()
}

async fn connect() -> (Arc<MemoryTransport>, ChargerClient<Arc<MemoryTransport>>) {
    let transport = Arc::new(MemoryTransport::new());
    let client = ChargerClient::connect(transport.clone(), ClientConfig::new("u")).await.unwrap();
    (transport, client)
}

#[tokio::test(start_paused = true)]
async fn status_request_resolves_with_matching_frame() {
    let (transport, client) = connect().await;
    assert_eq!(transport.subscriptions(), vec!["evmeter/u/+/data".to_string()]);

    let charger = async {
        let published = transport.wait_for_published(1).await;
        assert_eq!(published[0].topic, "evmeter/u/C1/cmd");
        assert_eq!(hex::encode(&published[0].payload), "aa550281");

        // Traffic for other chargers and garbage must not disturb the request.
        transport.inject("evmeter/u/C9/data", frame(STATUS_FRAME));
        transport.inject("evmeter/u/C1/data", vec![0xde, 0xad, 0xbe, 0xef]);
        transport.inject("evmeter/u/C1/data", frame(METRICS_FRAME));
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };

    let (status, ()) = tokio::join!(client.get_charger_status("C1"), charger);
    let status = status.unwrap();
    assert_eq!(status.charger_state, ChargerState::Charging);
    assert_eq!(status.power_kw, 15.0);
    assert_eq!(client.pending_requests(), 0);

    client.disconnect().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn metrics_request_times_out_and_late_frame_is_dropped() {
    let (transport, client) = connect().await;
    let mut events = client.subscribe();

    let start = Instant::now();
    let result = client.get_charger_metrics("C2").await;
    assert!(start.elapsed() >= ClientConfig::DEFAULT_REQUEST_TIMEOUT);
    match result {
        Err(ClientError::RequestTimeout { charger_id, kind, timeout }) => {
            assert_eq!(charger_id.as_str(), "C2");
            assert_eq!(kind, RecordKind::Metrics);
            assert_eq!(timeout, Duration::from_secs(5));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);

    transport.inject("evmeter/u/C2/data", frame(METRICS_FRAME));
    let event = events.recv().await.unwrap();
    assert_eq!(event.charger_id.as_str(), "C2");
    match event.reading {
        Some(ChargerReading::Metrics(metrics)) => assert_eq!(metrics.temperature, 24.5),
        other => panic!("expected metrics reading, got {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_request_fails_fast() {
    let (transport, client) = connect().await;

    let charger = async {
        transport.wait_for_published(1).await;
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };

    let (first, second, ()) =
        tokio::join!(client.get_charger_status("C1"), client.get_charger_status("C1"), charger);

    let results = [first, second];
    let ok = results.iter().filter(|result| result.is_ok()).count();
    let duplicate = results
        .iter()
        .filter(|result| matches!(result, Err(ClientError::AlreadyPending { kind: RecordKind::Status, .. })))
        .count();
    assert_eq!((ok, duplicate), (1, 1));
    assert_eq!(transport.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_kinds_for_one_charger_proceed_independently() {
    let (transport, client) = connect().await;

    let charger = async {
        transport.wait_for_published(2).await;
        // Answers arrive in the opposite order of the requests.
        transport.inject("evmeter/u/C1/data", frame(METRICS_FRAME));
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };

    let (status, metrics, ()) =
        tokio::join!(client.get_charger_status("C1"), client.get_charger_metrics("C1"), charger);
    assert_eq!(status.unwrap().power_kw, 15.0);
    let metrics = metrics.unwrap();
    assert_eq!(metrics.voltage_l1, 230.1);
    assert_eq!(metrics.firmware_version, "1.4.2");
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_fails_every_outstanding_request() {
    let (transport, client) = connect().await;

    let broker = async {
        transport.wait_for_published(3).await;
        assert_eq!(client.pending_requests(), 3);
        transport.drop_connection();
    };

    let (a, b, c, ()) = tokio::join!(
        client.get_charger_status("C1"),
        client.get_charger_metrics("C1"),
        client.get_charger_status("C2"),
        broker
    );
    assert!(matches!(a, Err(ClientError::TransportDisconnected)));
    assert!(matches!(b, Err(ClientError::TransportDisconnected)));
    assert!(matches!(c, Err(ClientError::TransportDisconnected)));
    assert_eq!(client.pending_requests(), 0);

    // The client refuses new work once its connection is gone.
    assert!(matches!(client.get_charger_status("C3").await, Err(ClientError::TransportDisconnected)));
}

#[tokio::test(start_paused = true)]
async fn failed_publish_leaves_no_pending_entry() {
    let (transport, client) = connect().await;

    transport.set_fail_publish(true);
    let result = client.get_charger_status("C1").await;
    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(client.pending_requests(), 0);

    transport.set_fail_publish(false);
    let charger = async {
        transport.wait_for_published(1).await;
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };
    let (status, ()) = tokio::join!(client.get_charger_status("C1"), charger);
    assert!(status.is_ok());
}

#[tokio::test(start_paused = true)]
async fn abandoned_request_frees_its_key() {
    let (transport, client) = connect().await;

    let abandoned = tokio::time::timeout(Duration::from_secs(1), client.get_charger_status("C1")).await;
    assert!(abandoned.is_err());
    assert_eq!(client.pending_requests(), 0);

    let charger = async {
        transport.wait_for_published(2).await;
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };
    let (status, ()) = tokio::join!(client.get_charger_status("C1"), charger);
    assert!(status.is_ok());
}

#[tokio::test(start_paused = true)]
async fn strict_length_drops_padded_frames() {
    let transport = Arc::new(MemoryTransport::new());
    let config = ClientConfig::new("u")
        .with_strict_frame_length(true)
        .with_request_timeout(Duration::from_secs(2));
    let client = ChargerClient::connect(transport.clone(), config).await.unwrap();

    let charger = async {
        transport.wait_for_published(1).await;
        let mut padded = frame(STATUS_FRAME);
        padded.extend_from_slice(&[0x00, 0x00]);
        transport.inject("evmeter/u/C1/data", padded);
    };
    let (status, ()) = tokio::join!(client.get_charger_status("C1"), charger);
    assert!(matches!(status, Err(ClientError::RequestTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn unbounded_timeout_still_resolves() {
    let transport = Arc::new(MemoryTransport::new());
    let config = ClientConfig::new("u").with_request_timeout(Duration::MAX);
    let client = ChargerClient::connect(transport.clone(), config).await.unwrap();

    let charger = async {
        transport.wait_for_published(1).await;
        transport.inject("evmeter/u/C1/data", frame(STATUS_FRAME));
    };

    let (status, ()) = tokio::join!(client.get_charger_status("C1"), charger);
    assert_eq!(status.unwrap().charger_state, ChargerState::Charging);
    assert_eq!(client.pending_requests(), 0);
}
