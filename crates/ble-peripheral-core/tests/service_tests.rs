//! Integration tests for the peripheral service runner
//!
//! Exercises the handle API end to end, radio events emitted from foreign
//! threads and the cancel/delivery race.

use std::sync::Arc;

use ble_peripheral_core::{
    PeripheralConfig, PeripheralController, PeripheralError, PeripheralHandle, PeripheralService,
    PeripheralState, RawAdvertisement, SimulatedRadio,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_test::{assert_pending, task};

async fn spawn_ready(radio: &Arc<SimulatedRadio>) -> (PeripheralHandle, JoinHandle<()>) {
    let mut controller = PeripheralController::new(radio.clone(), PeripheralConfig::default());
    controller
        .wait_for_radio()
        .await
        .expect("radio should resolve");
    PeripheralService::spawn(controller)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_handle_advertising_lifecycle() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;

    assert!(peripheral.is_supported().await.unwrap());
    assert!(!peripheral.is_advertising().await.unwrap());

    peripheral.start(0xFFFF, vec![0xDE, 0xAD]).await.unwrap();
    assert!(peripheral.is_advertising().await.unwrap());
    assert_eq!(peripheral.state().await.unwrap(), PeripheralState::Advertising);
    assert_eq!(radio.advertised(), Some(vec![0xFF, 0xFF, 0xDE, 0xAD]));

    assert_eq!(
        peripheral.start(0xFFFF, vec![0u8; 28]).await,
        Err(PeripheralError::PayloadTooLarge { size: 28, max: 27 })
    );
    assert!(peripheral.is_advertising().await.unwrap());

    peripheral.stop().await.unwrap();
    peripheral.stop().await.unwrap();
    assert_eq!(peripheral.state().await.unwrap(), PeripheralState::Idle);
}

#[tokio::test]
async fn test_handles_are_cloneable() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;
    let other = peripheral.clone();

    other.start(1, vec![1]).await.unwrap();
    assert!(peripheral.is_advertising().await.unwrap());
}

#[tokio::test]
async fn test_shutdown_stops_everything_and_closes_service() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, task) = spawn_ready(&radio).await;

    peripheral.start(1, vec![1]).await.unwrap();
    let _results = peripheral.subscribe_scan_results().await.unwrap();
    assert!(radio.is_scanning());

    peripheral.shutdown().await.unwrap();
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    assert_eq!(radio.advertised(), None);
    assert!(!radio.is_scanning());
    assert_eq!(
        peripheral.is_advertising().await,
        Err(PeripheralError::ServiceClosed)
    );
}

#[tokio::test]
async fn test_dropping_all_handles_ends_runner() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, task) = spawn_ready(&radio).await;
    peripheral.start(1, vec![]).await.unwrap();

    drop(peripheral);
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(radio.advertised(), None);
}

#[tokio::test]
async fn test_state_changes_observed_through_handle() {
    let radio = Arc::new(SimulatedRadio::new().gated());
    let controller = PeripheralController::new(radio.clone(), PeripheralConfig::default());
    let (peripheral, task) = PeripheralService::spawn(controller);
    let mut states = peripheral.subscribe_state();
    assert_eq!(*states.borrow_and_update(), PeripheralState::Unknown);

    radio.release();
    timeout(
        Duration::from_secs(1),
        states.wait_for(|state| *state == PeripheralState::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    peripheral.start(1, vec![1]).await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), PeripheralState::Advertising);

    peripheral.shutdown().await.unwrap();
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(*states.borrow_and_update(), PeripheralState::Idle);
    assert!(states.changed().await.is_err());
}

#[tokio::test]
async fn test_subscription_waits_for_radio_resolution() {
    let radio = Arc::new(SimulatedRadio::new().gated());
    let controller = PeripheralController::new(radio.clone(), PeripheralConfig::default());
    let (peripheral, _task) = PeripheralService::spawn(controller);

    assert!(matches!(
        peripheral.start(1, vec![]).await,
        Err(PeripheralError::RadioUnavailable { .. })
    ));
    let mut results = peripheral.subscribe_scan_results().await.unwrap();
    assert!(!radio.is_scanning());

    radio.release();
    wait_until(|| radio.is_scanning()).await;

    radio.emit(RawAdvertisement::new(0x42, -40).with_local_name("late"));
    let found = timeout(Duration::from_secs(1), results.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.name, "late");
    assert_eq!(peripheral.state().await.unwrap(), PeripheralState::Idle);
}

#[tokio::test]
async fn test_no_results_before_first_advertisement() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;
    let mut results = peripheral.subscribe_scan_results().await.unwrap();

    let mut next = task::spawn(results.recv());
    assert_pending!(next.poll());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_emitted_from_foreign_thread_are_delivered_in_order() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;
    let mut results = peripheral.subscribe_scan_results().await.unwrap();

    let sender = radio.event_sender().expect("scan started");
    let emitter = std::thread::spawn(move || {
        for address in 0..10u64 {
            assert!(sender.deliver(RawAdvertisement::new(address, -50)));
        }
    });
    emitter.join().unwrap();

    let mut seen = Vec::new();
    while seen.len() < 10 {
        let found = timeout(Duration::from_secs(1), results.next())
            .await
            .unwrap()
            .unwrap();
        seen.push(found.address);
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nothing_delivered_after_unsubscribe_returns() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;
    let mut results = peripheral.subscribe_scan_results().await.unwrap();

    let sender = radio.event_sender().expect("scan started");
    let emitter = std::thread::spawn(move || {
        let mut sent = 0u64;
        for address in 0..5_000u64 {
            if sender.deliver(RawAdvertisement::new(address, -50)) {
                sent += 1;
            }
        }
        sent
    });

    peripheral.unsubscribe_scan_results().await.unwrap();
    let before_cancel: Vec<_> = std::iter::from_fn(|| results.try_recv()).collect();
    let sent = emitter.join().unwrap();

    // the session released its sink, so the stream ends without new items
    let tail = timeout(Duration::from_secs(1), results.next()).await.unwrap();
    assert!(tail.is_none());
    assert!(before_cancel.len() as u64 <= sent);
    assert!(!radio.is_scanning());
}

#[tokio::test]
async fn test_resubscribe_replaces_stream() {
    let radio = Arc::new(SimulatedRadio::new());
    let (peripheral, _task) = spawn_ready(&radio).await;

    let mut first = peripheral.subscribe_scan_results().await.unwrap();
    let mut second = peripheral.subscribe_scan_results().await.unwrap();
    radio.emit(RawAdvertisement::new(7, -30));

    let found = timeout(Duration::from_secs(1), second.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.address, 7);
    // the replaced stream was detached and ends
    assert!(timeout(Duration::from_secs(1), first.next())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unsupported_platform_through_handle() {
    let radio = Arc::new(SimulatedRadio::unsupported("no LE peripheral role"));
    let (peripheral, _task) = spawn_ready(&radio).await;

    assert!(!peripheral.is_supported().await.unwrap());
    assert_eq!(peripheral.state().await.unwrap(), PeripheralState::Unsupported);
    assert!(matches!(
        peripheral.subscribe_scan_results().await,
        Err(PeripheralError::RadioUnavailable { .. })
    ));
    assert!(!radio.is_scanning());
}

#[tokio::test]
async fn test_pending_subscription_ends_when_radio_resolves_unsupported() {
    let radio = Arc::new(SimulatedRadio::unsupported("no LE").gated());
    let controller = PeripheralController::new(radio.clone(), PeripheralConfig::default());
    let (peripheral, _task) = PeripheralService::spawn(controller);

    let mut results = peripheral.subscribe_scan_results().await.unwrap();
    radio.release();

    let end = timeout(Duration::from_millis(500), results.next())
        .await
        .expect("stream should end once the radio resolves unusable");
    assert!(end.is_none());
    assert!(!radio.is_scanning());
    assert_eq!(peripheral.state().await.unwrap(), PeripheralState::Unsupported);
}
