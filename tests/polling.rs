//! Polling-engine behavior: change detection, initialization retry,
//! single-in-flight discipline, and the error stream.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use omron_tagio::{FinsError, PlcClient, PlcOptions, Transport};

use common::{with_identification, MockUdpPlc, Reply};

fn options(port: u16) -> PlcOptions {
    PlcOptions::new("127.0.0.1", Transport::Udp, 1, 10)
        .with_port(port)
        .with_timeout(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn publishes_only_changes() {
    // the mock walks a value sequence with repeats
    let sequence = [1i16, 1, 1, 2, 2, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3];
    let calls = Arc::new(AtomicUsize::new(0));
    let call_count = calls.clone();
    let plc = MockUdpPlc::start(with_identification("CJ2M-CPU33", move |req| {
        match (req.mrc, req.src) {
            (0x01, 0x01) => {
                let i = call_count.fetch_add(1, Ordering::SeqCst).min(sequence.len() - 1);
                Some(Reply::ok(sequence[i].to_be_bytes().to_vec()))
            }
            _ => None,
        }
    }))
    .await;

    let client = PlcClient::new(options(plc.port)).unwrap();
    client.register_tag::<i16>("D100", "level").unwrap();

    let mut all = client.observe_all();
    let mut sub = client.observe::<i16>("level").unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while received.len() < 3 {
            match sub.recv().await {
                Some(Some(value)) => received.push(value),
                Some(None) => continue,
                None => break,
            }
        }
    })
    .await
    .unwrap();

    // repeats never publish; successive events always differ
    assert_eq!(received, vec![1, 2, 3]);

    let mut aggregate = Vec::new();
    while let Ok(event) = all.try_recv() {
        assert_eq!(event.name, "level");
        aggregate.push(event.value);
    }
    for pair in aggregate.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    assert_eq!(client.value::<i16>("level"), Some(3));
    assert_eq!(client.value::<u32>("level"), None, "kind mismatch reads as None");

    client.dispose().await;
}

#[tokio::test]
async fn late_subscriber_receives_retained_value() {
    let plc = MockUdpPlc::start(with_identification("CJ2M-CPU33", |req| {
        match (req.mrc, req.src) {
            (0x01, 0x01) => Some(Reply::ok(vec![0x00, 0x2A])),
            _ => None,
        }
    }))
    .await;

    let client = PlcClient::new(options(plc.port)).unwrap();
    client.register_tag::<i16>("D100", "answer").unwrap();

    // wait until the cache holds the value
    tokio::time::timeout(Duration::from_secs(3), async {
        while client.value::<i16>("answer").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // a fresh subscription re-emits the cached value immediately
    let mut sub = client.observe::<i16>("answer").unwrap();
    let first = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap();
    assert_eq!(first, Some(Some(42)));

    client.dispose().await;
}

#[tokio::test]
async fn initialization_failure_publishes_and_retries_every_tick() {
    let failures = Arc::new(AtomicUsize::new(0));
    let failure_count = failures.clone();
    let plc = MockUdpPlc::start(Arc::new(move |req| {
        match (req.mrc, req.src) {
            (0x05, 0x01) => {
                // fail identification twice, then answer
                if failure_count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Some(Reply::error(0x03, 0x02))
                } else {
                    Some(Reply::ok(common::controller_payload("CJ2M-CPU33", "V1.40")))
                }
            }
            (0x01, 0x01) => Some(Reply::ok(vec![0x00, 0x07])),
            _ => None,
        }
    }))
    .await;

    let client = PlcClient::new(options(plc.port)).unwrap();
    client.register_tag::<i16>("D100", "t").unwrap();

    let mut errors = client.errors();
    let error = tokio::time::timeout(Duration::from_secs(3), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(error.tag.is_none());
    assert!(matches!(error.error, FinsError::Fins { main: 0x03, .. }));

    // the loop keeps retrying until identification succeeds, then polls
    tokio::time::timeout(Duration::from_secs(3), async {
        while client.value::<i16>("t").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.value::<i16>("t"), Some(7));

    client.dispose().await;
}

#[tokio::test]
async fn at_most_one_request_in_flight_under_parallel_callers() {
    let plc = MockUdpPlc::start_with_delay(
        with_identification("CJ2M-CPU33", |req| match (req.mrc, req.src) {
            (0x07, 0x01) => Some(Reply::ok(vec![0x24, 0x01, 0x02, 0x03, 0x04, 0x05, 0x03])),
            (0x01, 0x01) => Some(Reply::ok(vec![0x00, 0x01])),
            _ => None,
        }),
        Duration::from_millis(15),
    )
    .await;

    let client = Arc::new(
        PlcClient::new(
            options(plc.port)
                .with_timeout(Duration::from_millis(1000))
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap(),
    );
    client.initialize().await.unwrap();
    client.register_tag::<i16>("D100", "busy").unwrap();

    // poll loop + eight parallel clock readers all share the channel
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..3 {
                client.read_clock().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        plc.overlaps.load(Ordering::SeqCst),
        0,
        "a second request arrived while one was in flight"
    );

    client.dispose().await;
}

#[tokio::test]
async fn write_errors_reach_the_error_stream() {
    let plc = MockUdpPlc::start(with_identification("CJ2M-CPU33", |req| {
        match (req.mrc, req.src) {
            // the PLC refuses the write
            (0x01, 0x02) => Some(Reply::error(0x21, 0x01)),
            (0x01, 0x01) => Some(Reply::ok(vec![0x00, 0x00])),
            _ => None,
        }
    }))
    .await;

    let client = PlcClient::new(options(plc.port)).unwrap();
    client.initialize().await.unwrap();
    client.register_tag::<i16>("D100", "guarded").unwrap();

    let mut errors = client.errors();
    client.write::<i16>("guarded", 5);

    let error = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let error = errors.recv().await.unwrap();
            if error.tag.as_deref() == Some("guarded") {
                return error;
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        error.error,
        FinsError::Fins { main: 0x21, sub: 0x01, .. }
    ));

    client.dispose().await;
}

#[tokio::test]
async fn write_to_unregistered_tag_publishes_error() {
    let plc = MockUdpPlc::start(with_identification("CJ2M-CPU33", |_| None)).await;

    let client = PlcClient::new(options(plc.port).with_poll_interval(Duration::from_secs(30)))
        .unwrap();
    let mut errors = client.errors();
    client.write::<i16>("nobody", 1);

    let error = tokio::time::timeout(Duration::from_secs(3), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.tag.as_deref(), Some("nobody"));
    assert!(matches!(error.error, FinsError::AddressInvalid { .. }));

    client.dispose().await;
}

#[tokio::test]
async fn type_mismatched_write_publishes_error() {
    let plc = MockUdpPlc::start(with_identification("CJ2M-CPU33", |req| {
        match (req.mrc, req.src) {
            (0x01, 0x01) => Some(Reply::ok(vec![0x00, 0x00])),
            _ => None,
        }
    }))
    .await;

    let client = PlcClient::new(options(plc.port)).unwrap();
    client.register_tag::<i16>("D100", "narrow").unwrap();

    let mut errors = client.errors();
    client.write::<u32>("narrow", 9);

    let error = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let error = errors.recv().await.unwrap();
            if matches!(error.error, FinsError::TypeMismatch { .. }) {
                return error;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(error.tag.as_deref(), Some("narrow"));

    client.dispose().await;
}
