//! Bridge start/stop behavior against a mock broker session


use std::time::Duration;
use test_helpers::{started_bridge, test_params, wait_until};
use ttn_bridge::bridge::Bridge;
use ttn_bridge::config::BrokerParams;
use ttn_bridge::testing::MockSession;
use ttn_bridge::{BridgeError, BrokerSession, EngineState, MqttSession};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_start_subscribes_and_runs() {
    let (mut bridge, session) = started_bridge(MockSession::new()).await;

    assert_eq!(bridge.state(), EngineState::Running);
    assert_eq!(session.subscriptions().await, vec!["#".to_string()]);

    bridge.stop();
    bridge.join().await.unwrap();
    assert_eq!(bridge.state(), EngineState::Stopped);
    assert_eq!(session.disconnect_count(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (mut bridge, session) = started_bridge(MockSession::new()).await;
    let handle = bridge.handle();

    handle.stop();
    bridge.stop();
    handle.stop();
    bridge.join().await.unwrap();
    bridge.stop();
    bridge.join().await.unwrap();

    assert_eq!(bridge.state(), EngineState::Stopped);
    assert_eq!(session.disconnect_count(), 1);
}

#[tokio::test]
async fn test_stop_before_start() {
    let session = MockSession::new();
    let mut bridge = Bridge::new(test_params(), session.clone()).unwrap();

    bridge.stop();
    bridge.start().await.unwrap();
    bridge.join().await.unwrap();

    assert_eq!(bridge.state(), EngineState::Stopped);
    assert!(session.connection_state().is_none());
}

fn assert_session<S: BrokerSession>() {}

#[test]
fn test_mqtt_session_is_a_broker_session() {
    assert_session::<MqttSession>();
    assert_session::<MockSession>();
}

#[tokio::test]
async fn test_mqtt_bridge_stopped_before_start_never_connects() {
    let mut bridge = Bridge::mqtt(test_params()).unwrap();
    assert_eq!(bridge.state(), EngineState::Idle);
    assert_eq!(bridge.params().host(), "eu1.cloud.thethings.network");

    bridge.stop();
    let mut bridge = tokio::spawn(async move {
        bridge.start().await.map(|()| bridge)
    })
    .await
    .unwrap()
    .unwrap();

    bridge.join().await.unwrap();
    assert_eq!(bridge.state(), EngineState::Stopped);
}

#[test]
fn test_mqtt_bridge_rejects_invalid_params() {
    let err = Bridge::mqtt(BrokerParams::new("eu1", "", "NNSXS.KEY"))
        .err()
        .expect("construction should fail");
    assert!(matches!(err, BridgeError::Config(_)));
}

#[tokio::test]
async fn test_stop_while_connecting() {
    let session = MockSession::new().with_connect_delay(Duration::from_millis(50));
    let mut bridge = Bridge::new(test_params(), session.clone()).unwrap();
    let handle = bridge.handle();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();
    });

    bridge.start().await.unwrap();
    stopper.await.unwrap();
    tokio::time::timeout(WAIT, bridge.join())
        .await
        .expect("worker should exit on its first wake")
        .unwrap();

    assert_eq!(bridge.state(), EngineState::Stopped);
    assert_eq!(session.disconnect_count(), 1);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (mut bridge, _session) = started_bridge(MockSession::new()).await;

    assert!(matches!(
        bridge.start().await,
        Err(BridgeError::AlreadyStarted)
    ));
    assert_eq!(bridge.state(), EngineState::Running);

    bridge.stop();
    bridge.join().await.unwrap();
}

#[tokio::test]
async fn test_invalid_params_fail_before_connecting() {
    for params in [
        BrokerParams::new("", "test-app@ttn", "NNSXS.KEY"),
        BrokerParams::new("eu1", "", "NNSXS.KEY"),
        BrokerParams::new("eu1", "test-app@ttn", ""),
    ] {
        let session = MockSession::new();
        let result = Bridge::new(params, session.clone());
        let err = result.err().expect("construction should fail");
        assert!(err.is_fatal());
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(session.connection_state().is_none());
    }
}

#[tokio::test]
async fn test_refused_connection_fails_start() {
    let session = MockSession::new().with_connect_failure("Connection refused: NotAuthorized");
    let mut bridge = Bridge::new(test_params(), session).unwrap();

    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::Connection(_)));
    assert!(err.is_fatal());
    assert!(matches!(bridge.state(), EngineState::Failed(_)));
    assert!(bridge.join().await.is_err());
}

#[tokio::test]
async fn test_connection_loss_fails_engine() {
    let (mut bridge, session) = started_bridge(MockSession::new()).await;
    let mut state_rx = bridge.handle().subscribe_state();

    session.sever("keep-alive timeout");

    tokio::time::timeout(
        WAIT,
        state_rx.wait_for(|state| matches!(state, EngineState::Failed(_))),
    )
    .await
    .expect("engine should fail after losing the session")
    .unwrap();

    let err = bridge.join().await.unwrap_err();
    assert!(matches!(err, BridgeError::Connection(_)));
    assert!(err.to_string().contains("Connection"));

    // Stop after failure is harmless
    bridge.stop();
    assert!(matches!(bridge.state(), EngineState::Failed(_)));
}

#[tokio::test]
async fn test_downlinks_queued_before_early_stop_are_never_sent() {
    let session = MockSession::new();
    let mut bridge = Bridge::new(test_params(), session.clone()).unwrap();

    bridge.publish("dev1", b"late").await.unwrap();
    bridge.stop();
    bridge.start().await.unwrap();
    bridge.join().await.unwrap();

    assert!(session.published().await.is_empty());
    assert_eq!(bridge.metrics().downlinks.queued, 1);
}

#[tokio::test]
async fn test_handler_registered_after_start_still_receives() {
    let (mut bridge, session) = started_bridge(MockSession::new()).await;
    let (handler, seen) = test_helpers::recording_handler();
    bridge.on_message(handler);

    session.inject("v3/test-app@ttn/devices/dev1/up", b"{}").await;
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1).await);

    bridge.stop();
    bridge.join().await.unwrap();
}
