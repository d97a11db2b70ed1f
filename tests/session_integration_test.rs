//! Session Integration Tests
//!
//! End-to-end tests for the session state machine over a scripted transport.
//! These tests verify:
//! - Connect/disconnect lifecycle and idempotency
//! - Exponential backoff scheduling and attempt exhaustion
//! - Timer cancellation on forceReconnect and disconnect
//! - Result dispatch ordering and duplicate-final suppression
//! - Frame streaming, the streaming gate and buffer clearing
//!
//! The scripted dialer stands in for the WebSocket layer so every scenario
//! is deterministic; the real transport is covered in ws_transport_test.rs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify, Semaphore};

use recolink::session::RecognitionSession;
use recolink::transport::{Dialer, SocketHalves, SocketMessage, SocketRx, SocketTx};
use recolink::{ConnectionState, RecognitionResult, ReconnectAttempt, SessionConfig, SessionError};

// === Scripted transport ===

/// One scripted dial outcome.
enum DialStep {
    /// Dial fails immediately.
    Fail,
    /// Dial succeeds immediately.
    Ok,
    /// Dial succeeds once a permit is added to the semaphore.
    OkAfter(Arc<Semaphore>),
}

/// Handles for one established fake connection.
///
/// `inbound` injects socket messages into the session; `outbound` observes
/// the text the session wrote. Dropping `inbound` ends the read stream,
/// which the session treats as connection loss.
struct FakeConn {
    inbound: mpsc::UnboundedSender<anyhow::Result<SocketMessage>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

struct FakeTx {
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SocketTx for FakeTx {
    async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("fake socket closed"))
    }

    async fn send_pong(&mut self, _data: Vec<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FakeRx {
    inbound: mpsc::UnboundedReceiver<anyhow::Result<SocketMessage>>,
}

#[async_trait]
impl SocketRx for FakeRx {
    async fn recv(&mut self) -> Option<anyhow::Result<SocketMessage>> {
        self.inbound.recv().await
    }
}

/// Dialer that replays a scripted sequence of outcomes and hands each
/// established connection's handles back to the test.
struct ScriptedDialer {
    script: Mutex<VecDeque<DialStep>>,
    established: mpsc::UnboundedSender<FakeConn>,
    dials: AtomicUsize,
}

impl ScriptedDialer {
    fn new(steps: Vec<DialStep>) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConn>) {
        let (established, conns) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            script: Mutex::new(steps.into()),
            established,
            dials: AtomicUsize::new(0),
        });
        (dialer, conns)
    }

    fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _url: &str, _timeout: Duration) -> anyhow::Result<SocketHalves> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DialStep::Fail);
        match step {
            DialStep::Fail => Err(anyhow::anyhow!("connection refused")),
            DialStep::OkAfter(gate) => {
                let _permit = gate.acquire().await;
                self.establish()
            }
            DialStep::Ok => self.establish(),
        }
    }
}

impl ScriptedDialer {
    fn establish(&self) -> anyhow::Result<SocketHalves> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = self.established.send(FakeConn {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        Ok((
            Box::new(FakeTx {
                outbound: outbound_tx,
            }),
            Box::new(FakeRx { inbound: inbound_rx }),
        ))
    }
}

// === Recording callbacks ===

/// Records every callback invocation for later assertions.
#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<ConnectionState>>,
    results: Mutex<Vec<RecognitionResult>>,
    errors: Mutex<Vec<SessionError>>,
    reconnects: Mutex<Vec<ReconnectAttempt>>,
}

impl Recorder {
    fn wire(self: &Arc<Self>, session: &RecognitionSession) {
        let recorder = Arc::clone(self);
        session.set_on_status_change(move |state| {
            recorder.statuses.lock().unwrap().push(state);
        });
        let recorder = Arc::clone(self);
        session.set_on_result(move |result| {
            recorder.results.lock().unwrap().push(result);
        });
        let recorder = Arc::clone(self);
        session.set_on_error(move |error| {
            recorder.errors.lock().unwrap().push(error);
        });
        let recorder = Arc::clone(self);
        session.set_on_reconnect(move |attempt| {
            recorder.reconnects.lock().unwrap().push(attempt);
        });
    }

    fn statuses(&self) -> Vec<ConnectionState> {
        self.statuses.lock().unwrap().clone()
    }

    fn results(&self) -> Vec<RecognitionResult> {
        self.results.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().unwrap().clone()
    }

    fn reconnects(&self) -> Vec<ReconnectAttempt> {
        self.reconnects.lock().unwrap().clone()
    }

    fn total_events(&self) -> usize {
        self.statuses().len() + self.results().len() + self.errors().len() + self.reconnects().len()
    }
}

// === Test scaffolding ===

/// Config tuned for fast tests: short backoff, long heartbeat.
fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::new("ws://recognition.test/ws");
    config.base_delay = Duration::from_millis(25);
    config.max_delay = Duration::from_millis(200);
    config
}

fn harness(
    config: SessionConfig,
    steps: Vec<DialStep>,
) -> (
    RecognitionSession,
    Arc<ScriptedDialer>,
    mpsc::UnboundedReceiver<FakeConn>,
    Arc<Recorder>,
) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (dialer, conns) = ScriptedDialer::new(steps);
    let session = RecognitionSession::with_dialer(config, Arc::clone(&dialer) as Arc<dyn Dialer>)
        .expect("config is valid");
    let recorder = Arc::new(Recorder::default());
    recorder.wire(&session);
    (session, dialer, conns, recorder)
}

/// Polls `condition` until it holds or the test deadline passes.
async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<FakeConn>) -> FakeConn {
    tokio::time::timeout(Duration::from_secs(5), conns.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("dialer dropped")
}

async fn next_outbound(conn: &mut FakeConn) -> String {
    tokio::time::timeout(Duration::from_secs(5), conn.outbound.recv())
        .await
        .expect("timed out waiting for outbound text")
        .expect("socket closed")
}

fn inject(conn: &FakeConn, value: &Value) {
    conn.inbound
        .send(Ok(SocketMessage::Text(value.to_string())))
        .expect("session hung up");
}

// === Lifecycle ===

/// Test that a clean connect reports Connecting then Connected.
#[tokio::test]
async fn test_connect_reports_connecting_then_connected() {
    let (session, dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect should succeed");
    let _conn = next_conn(&mut conns).await;

    wait_until("connected state", || session.is_connected()).await;
    assert_eq!(
        recorder.statuses(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(dialer.dial_count(), 1);
    assert!(session.last_error().is_none());
}

/// Test that connect() while a dial is in flight resolves immediately
/// without opening a second socket.
#[tokio::test]
async fn test_connect_is_idempotent_while_connecting() {
    let gate = Arc::new(Semaphore::new(0));
    let (session, dialer, mut conns, recorder) = harness(
        fast_config(),
        vec![DialStep::OkAfter(Arc::clone(&gate))],
    );
    let session = Arc::new(session);

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.connect().await })
    };
    wait_until("dial in flight", || {
        session.connection_state() == ConnectionState::Connecting
    })
    .await;

    // Second connect must not dial again.
    session.connect().await.expect("idempotent connect");
    assert_eq!(dialer.dial_count(), 1);

    gate.add_permits(1);
    first
        .await
        .expect("task panicked")
        .expect("first connect should succeed");
    let _conn = next_conn(&mut conns).await;

    wait_until("connected state", || session.is_connected()).await;
    assert_eq!(dialer.dial_count(), 1, "exactly one socket must be opened");
    assert_eq!(
        recorder.statuses(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

/// Test that connect() while already Connected is a no-op.
#[tokio::test]
async fn test_connect_is_idempotent_while_connected() {
    let (session, dialer, mut conns, _recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect should succeed");
    let _conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    session.connect().await.expect("repeat connect");
    assert_eq!(dialer.dial_count(), 1);
}

/// Test that connect after a clean disconnect opens a fresh connection.
#[tokio::test]
async fn test_connect_after_disconnect_starts_fresh() {
    let (session, dialer, mut conns, recorder) =
        harness(fast_config(), vec![DialStep::Ok, DialStep::Ok]);

    session.connect().await.expect("first connect");
    let _first = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    session.connect().await.expect("second connect");
    let _second = next_conn(&mut conns).await;
    wait_until("connected again", || session.is_connected()).await;

    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(
        recorder.statuses(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(session.stats().reconnects, 0);
}

// === Backoff and recovery ===

/// Test the documented first-retry schedule: a failed dial with the default
/// 1000ms base delay produces exactly one reconnect callback carrying
/// attempt 1 and delay 1000, after which the retry succeeds.
#[tokio::test]
async fn test_failed_dial_schedules_retry_with_base_delay() {
    let config = SessionConfig::new("ws://recognition.test/ws");
    let (session, dialer, mut conns, recorder) =
        harness(config, vec![DialStep::Fail, DialStep::Ok]);

    let result = session.connect().await;
    assert!(
        matches!(result, Err(SessionError::ConnectionFailure(_))),
        "initial handshake failure must be reported to the caller"
    );

    wait_until("retry scheduled", || !recorder.reconnects().is_empty()).await;
    let scheduled = recorder.reconnects()[0];
    assert_eq!(scheduled.attempt, 1);
    assert_eq!(scheduled.max_attempts, 3);
    assert_eq!(scheduled.delay_ms, 1000);

    // Recovery continues in the background and succeeds on the next dial.
    wait_until("connected after retry", || session.is_connected()).await;
    let _conn = next_conn(&mut conns).await;
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(
        recorder.reconnects().len(),
        1,
        "a successful retry must not emit a second reconnect callback"
    );
    assert_eq!(session.stats().reconnects, 1);
}

/// Test that retry delays double per attempt and exhaustion surfaces the
/// terminal error exactly once.
#[tokio::test]
async fn test_exhaustion_surfaces_terminal_error_once() {
    let (session, dialer, _conns, recorder) = harness(
        fast_config(),
        vec![DialStep::Fail, DialStep::Fail, DialStep::Fail, DialStep::Fail],
    );

    assert!(session.connect().await.is_err());
    wait_until("terminal error", || !recorder.errors().is_empty()).await;

    let reconnects = recorder.reconnects();
    assert_eq!(
        reconnects.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        reconnects.iter().map(|r| r.delay_ms).collect::<Vec<_>>(),
        vec![25, 50, 100],
        "delays must double from the base"
    );

    assert_eq!(
        recorder.errors(),
        vec![SessionError::AttemptsExhausted { attempts: 3 }]
    );
    assert_eq!(session.connection_state(), ConnectionState::Error);
    assert_eq!(
        session.last_error(),
        Some(SessionError::AttemptsExhausted { attempts: 3 })
    );
    assert_eq!(dialer.dial_count(), 4, "initial dial plus three retries");

    // The terminal error must not repeat.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.errors().len(), 1);

    // Streaming operations from the terminal state are rejected.
    assert_eq!(
        session.start_streaming().await,
        Err(SessionError::NotConnected)
    );
}

/// Test that connect() out of the terminal Error state starts a fresh
/// attempt cycle and clears the recorded error.
#[tokio::test]
async fn test_connect_recovers_from_terminal_error() {
    let (session, dialer, mut conns, recorder) = harness(
        fast_config(),
        vec![
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Ok,
        ],
    );

    assert!(session.connect().await.is_err());
    wait_until("terminal error", || !recorder.errors().is_empty()).await;

    session.connect().await.expect("connect out of Error");
    let _conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;
    assert!(session.last_error().is_none());
    assert_eq!(dialer.dial_count(), 5);
}

/// Test that forceReconnect during backoff cancels the pending timer and
/// dials immediately, with exactly one new Connecting transition.
#[tokio::test]
async fn test_force_reconnect_cancels_backoff_timer() {
    let mut config = fast_config();
    config.base_delay = Duration::from_millis(400);
    let (session, dialer, mut conns, recorder) =
        harness(config, vec![DialStep::Fail, DialStep::Ok]);

    assert!(session.connect().await.is_err());
    wait_until("retry scheduled", || !recorder.reconnects().is_empty()).await;

    session
        .force_reconnect()
        .await
        .expect("forced dial should succeed");
    let _conn = next_conn(&mut conns).await;
    assert!(session.is_connected());
    assert_eq!(dialer.dial_count(), 2);

    // Wait past the original retry deadline: the cancelled timer must not
    // produce another dial or another Connecting transition.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(dialer.dial_count(), 2, "cancelled timer must never fire");
    let connecting = recorder
        .statuses()
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(connecting, 2, "one per dial, none from the stale timer");
}

/// Test that forceReconnect tears down an established connection and
/// reconnects immediately.
#[tokio::test]
async fn test_force_reconnect_replaces_live_connection() {
    let (session, dialer, mut conns, _recorder) =
        harness(fast_config(), vec![DialStep::Ok, DialStep::Ok]);

    session.connect().await.expect("connect");
    let _first = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    session.force_reconnect().await.expect("forced reconnect");
    let _second = next_conn(&mut conns).await;
    assert!(session.is_connected());
    assert_eq!(dialer.dial_count(), 2);
}

/// Test that forceReconnect out of the terminal Error state is accepted.
#[tokio::test]
async fn test_force_reconnect_recovers_from_terminal_error() {
    let (session, _dialer, mut conns, recorder) = harness(
        fast_config(),
        vec![
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Fail,
            DialStep::Ok,
        ],
    );

    assert!(session.connect().await.is_err());
    wait_until("terminal error", || !recorder.errors().is_empty()).await;

    session.force_reconnect().await.expect("forced recovery");
    let _conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;
}

/// Test that disconnect during backoff cancels the timer and silences all
/// callbacks from that point on.
#[tokio::test]
async fn test_disconnect_during_backoff_cancels_timer() {
    let mut config = fast_config();
    config.base_delay = Duration::from_millis(100);
    let (session, dialer, _conns, recorder) = harness(config, vec![DialStep::Fail, DialStep::Ok]);

    assert!(session.connect().await.is_err());
    wait_until("retry scheduled", || !recorder.reconnects().is_empty()).await;

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    let events_at_return = recorder.total_events();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(dialer.dial_count(), 1, "cancelled timer must never dial");
    assert_eq!(
        recorder.total_events(),
        events_at_return,
        "no callbacks may fire after disconnect returns"
    );
    assert_eq!(
        *recorder.statuses().last().expect("status history"),
        ConnectionState::Disconnected
    );
}

/// Test that disconnect while a dial is in flight abandons the dial and
/// fails the suspended connect() call.
#[tokio::test]
async fn test_disconnect_during_dial_abandons_it() {
    let gate = Arc::new(Semaphore::new(0));
    let (session, dialer, _conns, recorder) = harness(
        fast_config(),
        vec![DialStep::OkAfter(Arc::clone(&gate))],
    );
    let session = Arc::new(session);

    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.connect().await })
    };
    wait_until("dial in flight", || {
        session.connection_state() == ConnectionState::Connecting
    })
    .await;

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    let events_at_return = recorder.total_events();

    let outcome = pending.await.expect("task panicked");
    assert!(
        matches!(outcome, Err(SessionError::ConnectionFailure(_))),
        "abandoned connect must fail, got {outcome:?}"
    );

    // Letting the scripted dial proceed now must change nothing: the dial
    // future was dropped with the connection attempt.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(
        recorder.total_events(),
        events_at_return,
        "no callbacks may fire after disconnect returns"
    );
    assert!(!recorder.statuses().contains(&ConnectionState::Connected));
}

/// Test that disconnect out of the terminal error state reports Disconnected
/// and keeps the recorded error readable.
#[tokio::test]
async fn test_disconnect_from_terminal_error() {
    let (session, _dialer, _conns, recorder) = harness(
        fast_config(),
        vec![DialStep::Fail, DialStep::Fail, DialStep::Fail, DialStep::Fail],
    );

    assert!(session.connect().await.is_err());
    wait_until("terminal error", || {
        session.connection_state() == ConnectionState::Error
    })
    .await;

    session.disconnect().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        *recorder.statuses().last().expect("status history"),
        ConnectionState::Disconnected
    );
    assert!(
        matches!(
            session.last_error(),
            Some(SessionError::AttemptsExhausted { .. })
        ),
        "the terminal error stays readable after disconnect"
    );
}

/// Test that losing an established connection triggers automatic recovery
/// and resets the streaming gate.
#[tokio::test]
async fn test_connection_loss_recovers_automatically() {
    let (session, dialer, mut conns, recorder) =
        harness(fast_config(), vec![DialStep::Ok, DialStep::Ok]);

    session.connect().await.expect("connect");
    let first = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;
    session.start_streaming().await.expect("start streaming");

    // Server goes away: the read stream ends.
    drop(first);

    wait_until("retry scheduled", || !recorder.reconnects().is_empty()).await;
    let _second = next_conn(&mut conns).await;
    wait_until("reconnected", || session.is_connected()).await;

    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(recorder.reconnects().len(), 1);
    assert!(
        !session.enqueue_frame(vec![1]),
        "streaming must be re-armed explicitly after a reconnect"
    );
}

// === Result dispatch ===

/// Test the canonical utterance flow: three partials and a final produce
/// exactly four result callbacks, in arrival order.
#[tokio::test]
async fn test_results_dispatch_in_arrival_order() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(&conn, &json!({"text": "hel", "confidence": 0.50, "partial": true}));
    inject(&conn, &json!({"text": "hell", "confidence": 0.72, "partial": true}));
    inject(&conn, &json!({"text": "hello", "confidence": 0.88, "partial": true}));
    inject(&conn, &json!({"text": "hello", "confidence": 0.94, "partial": false}));

    wait_until("four results", || recorder.results().len() == 4).await;
    let results = recorder.results();
    assert_eq!(
        results.iter().map(|r| r.text().to_string()).collect::<Vec<_>>(),
        vec!["hel", "hell", "hello", "hello"]
    );
    assert_eq!(
        results.iter().map(RecognitionResult::is_final).collect::<Vec<_>>(),
        vec![false, false, false, true]
    );
    match &results[3] {
        RecognitionResult::Final {
            confidence,
            is_emergency,
            ..
        } => {
            assert!((confidence - 0.94).abs() < 1e-6);
            assert!(!is_emergency);
        }
        other => panic!("expected a final result, got {other:?}"),
    }
    assert_eq!(session.stats().results_received, 4);
}

/// Test that a duplicate final for an already-settled utterance is dropped,
/// and that the next partial re-arms final delivery.
#[tokio::test]
async fn test_duplicate_final_is_suppressed() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(&conn, &json!({"text": "stop", "confidence": 0.9, "partial": false}));
    wait_until("first final", || recorder.results().len() == 1).await;

    // Retransmitted final: dropped.
    inject(&conn, &json!({"text": "stop", "confidence": 0.9, "partial": false}));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.results().len(), 1, "duplicate final must be dropped");

    // A new utterance re-arms delivery.
    inject(&conn, &json!({"text": "go", "confidence": 0.4, "partial": true}));
    inject(&conn, &json!({"text": "go", "confidence": 0.95, "partial": false}));
    wait_until("second utterance", || recorder.results().len() == 3).await;
    assert!(recorder.results()[2].is_final());
}

/// Test that gesture results ride the same result channel.
#[tokio::test]
async fn test_gesture_results_are_dispatched() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(
        &conn,
        &json!({"gesture_type": "two_fingers", "confidence": 0.97, "is_emergency": true}),
    );
    wait_until("gesture result", || !recorder.results().is_empty()).await;
    match &recorder.results()[0] {
        RecognitionResult::Final {
            text, is_emergency, ..
        } => {
            assert_eq!(text, "two_fingers");
            assert!(is_emergency);
        }
        other => panic!("expected a final gesture result, got {other:?}"),
    }
}

/// Test that malformed inbound messages are dropped without killing the
/// connection or reaching any callback.
#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    for garbage in [
        "not json at all",
        "[1,2,3]",
        "{\"type\":\"mystery\"}",
        "{\"confidence\":0.9}",
        "42",
    ] {
        conn.inbound
            .send(Ok(SocketMessage::Text(garbage.to_string())))
            .expect("session hung up");
    }
    inject(&conn, &json!({"text": "alive", "confidence": 0.8, "partial": true}));

    wait_until("valid result after garbage", || {
        !recorder.results().is_empty()
    })
    .await;
    assert_eq!(recorder.results().len(), 1);
    assert_eq!(recorder.results()[0].text(), "alive");
    assert!(recorder.errors().is_empty(), "garbage must not surface errors");
    assert!(session.is_connected(), "garbage must not drop the connection");
}

/// Test that backend-reported errors surface through the error callback
/// while the connection stays up.
#[tokio::test]
async fn test_backend_error_is_surfaced_without_disconnecting() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(&conn, &json!({"type": "error", "message": "model overloaded"}));
    wait_until("backend error", || !recorder.errors().is_empty()).await;
    assert_eq!(
        recorder.errors(),
        vec![SessionError::Backend("model overloaded".to_string())]
    );
    assert!(session.is_connected());

    // Results keep flowing afterwards.
    inject(&conn, &json!({"text": "ok", "confidence": 0.6, "partial": true}));
    wait_until("result after backend error", || {
        !recorder.results().is_empty()
    })
    .await;
}

/// Test that informational status messages are consumed silently.
#[tokio::test]
async fn test_status_messages_do_not_reach_callbacks() {
    let (session, _dialer, mut conns, recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(&conn, &json!({"type": "connection_established", "client_id": "c1"}));
    inject(&conn, &json!({"type": "heartbeat"}));
    inject(&conn, &json!({"type": "subscription_confirmed", "stream": "speech"}));
    inject(&conn, &json!({"text": "after", "confidence": 0.7, "partial": true}));

    wait_until("result after statuses", || !recorder.results().is_empty()).await;
    assert_eq!(recorder.results().len(), 1);
    assert!(recorder.errors().is_empty());
}

// === Frame streaming ===

/// Test the streaming gate end to end: frames are rejected until
/// startStreaming, transmitted as envelopes while active, and rejected again
/// after stopStreaming.
#[tokio::test]
async fn test_streaming_gate_and_frame_envelopes() {
    let (session, _dialer, mut conns, _recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let mut conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    assert!(
        !session.enqueue_frame(vec![9, 9, 9]),
        "frames must be rejected before startStreaming"
    );

    session.start_streaming().await.expect("start streaming");
    assert!(session.enqueue_frame(vec![1, 2, 3]));

    let raw = next_outbound(&mut conn).await;
    let envelope: Value = serde_json::from_str(&raw).expect("envelope is JSON");
    assert_eq!(envelope["type"], "frame");
    assert_eq!(envelope["seq"], 1);
    assert_eq!(envelope["payload"], "AQID");
    assert!(
        envelope["timestamp_ms"].as_i64().unwrap_or(0) > 1_600_000_000_000,
        "timestamp must be epoch milliseconds"
    );

    assert!(session.enqueue_frame(vec![4, 5]));
    let raw = next_outbound(&mut conn).await;
    let envelope: Value = serde_json::from_str(&raw).expect("envelope is JSON");
    assert_eq!(envelope["seq"], 2, "sequence numbers must increase");

    session.stop_streaming().await.expect("stop streaming");
    assert!(
        !session.enqueue_frame(vec![7]),
        "frames must be rejected after stopStreaming"
    );

    wait_until("send counter settles", || session.stats().frames_sent == 2).await;
    let stats = session.stats();
    assert_eq!(stats.frames_enqueued, 2);
    assert_eq!(stats.frames_dropped, 2);
}

/// Test that disconnect discards buffered frames: nothing from before the
/// disconnect is ever replayed onto a later connection.
#[tokio::test]
async fn test_disconnect_discards_buffered_frames() {
    let (session, _dialer, mut conns, _recorder) =
        harness(fast_config(), vec![DialStep::Ok, DialStep::Ok]);

    session.connect().await.expect("first connect");
    let mut first = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;
    session.start_streaming().await.expect("start streaming");
    assert!(session.enqueue_frame(vec![1]));
    let _ = next_outbound(&mut first).await;

    session.disconnect().await;

    session.connect().await.expect("second connect");
    let mut second = next_conn(&mut conns).await;
    wait_until("connected again", || session.is_connected()).await;
    session.start_streaming().await.expect("start streaming again");
    assert!(session.enqueue_frame(vec![2]));

    let raw = next_outbound(&mut second).await;
    let envelope: Value = serde_json::from_str(&raw).expect("envelope is JSON");
    assert_eq!(
        envelope["payload"], "Ag==",
        "only the frame enqueued after reconnect may be transmitted"
    );
}

/// Test that the heartbeat ping is written at the configured cadence.
#[tokio::test]
async fn test_heartbeat_ping_is_sent() {
    let mut config = fast_config();
    config.heartbeat_interval = Duration::from_millis(50);
    let (session, _dialer, mut conns, _recorder) = harness(config, vec![DialStep::Ok]);

    session.connect().await.expect("connect");
    let mut conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    let text = next_outbound(&mut conn).await;
    assert_eq!(text, "ping");
}

// === Callback registration ===

/// Test that re-registering a callback replaces the previous one.
#[tokio::test]
async fn test_last_callback_registration_wins() {
    let (session, _dialer, mut conns, _recorder) = harness(fast_config(), vec![DialStep::Ok]);

    let first_hits = Arc::new(AtomicUsize::new(0));
    let second_hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = Arc::clone(&first_hits);
        session.set_on_result(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let hits = Arc::clone(&second_hits);
        session.set_on_result(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;
    inject(&conn, &json!({"text": "x", "confidence": 0.5, "partial": true}));

    let waited = Arc::clone(&second_hits);
    wait_until("replacement callback", || waited.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first_hits.load(Ordering::SeqCst), 0, "old callback must be gone");
}

/// Test that a panicking callback does not take the session down.
#[tokio::test]
async fn test_panicking_callback_is_contained() {
    let (session, _dialer, mut conns, _recorder) = harness(fast_config(), vec![DialStep::Ok]);

    session.set_on_result(|_| panic!("listener bug"));

    session.connect().await.expect("connect");
    let conn = next_conn(&mut conns).await;
    wait_until("connected state", || session.is_connected()).await;

    inject(&conn, &json!({"text": "boom", "confidence": 0.5, "partial": true}));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Session survived; swap in a working callback and keep going.
    let delivered = Arc::new(Notify::new());
    {
        let delivered = Arc::clone(&delivered);
        session.set_on_result(move |_| delivered.notify_one());
    }
    inject(&conn, &json!({"text": "fine", "confidence": 0.6, "partial": true}));
    tokio::time::timeout(Duration::from_secs(5), delivered.notified())
        .await
        .expect("session must keep dispatching after a callback panic");
    assert!(session.is_connected());
}
