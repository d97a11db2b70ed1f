//! Session driver task.
//!
//! One spawned task owns the socket and every timer; the façade only sends
//! commands over a channel. The driver is an explicit state machine — each
//! mode has its own select loop and hands the next mode back to `run`:
//!
//! ```text
//! Idle ──connect()──► Dial ──ok──► Connected ──loss──► Backoff ──timer──► Dial
//!   ▲                  │ fail                             │
//!   │                  ▼                                  │ forceReconnect()
//!   │               Backoff ──attempts exhausted──► Idle  │ (timer cancelled)
//!   │                                          (terminal) ▼
//!   └────────────────────── disconnect() ◄───────────── Dial
//! ```
//!
//! Every reconnect decision bumps the epoch counter; an armed backoff timer
//! carries the epoch it was scheduled under and is discarded on mismatch, so
//! a timer superseded by `connect()`/`force_reconnect()`/`disconnect()` can
//! never trigger a dial.
//!
//! Callbacks are invoked from this task, in transition order, with no locks
//! held. Recoverable failures never reach the error callback — they surface
//! as reconnect progress only. Exhaustion surfaces exactly once.
//!
//! Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::buffer::FrameBuffer;
use crate::callbacks::CallbackRegistry;
use crate::codec::{self, Inbound, RecognitionResult, StatusKind};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::{Dialer, SocketMessage, SocketRx, SocketTx};

use super::state::{ConnectionState, ReconnectAttempt, SharedState};

/// Reply channel for commands that resolve with success or failure.
pub(crate) type Reply = oneshot::Sender<Result<(), SessionError>>;

/// Commands the façade sends to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    Connect { reply: Reply },
    Disconnect { reply: oneshot::Sender<()> },
    StartStreaming { reply: Reply },
    StopStreaming { reply: Reply },
    ForceReconnect { reply: Reply },
}

/// What the driver does next after a mode loop returns.
enum Mode {
    /// No socket, no timer: Disconnected or terminal Error.
    Idle,
    /// A dial is in flight (state is Connecting).
    Dial,
    /// Socket open; streaming, heartbeat and inbound dispatch run here.
    Connected {
        tx: Box<dyn SocketTx>,
        rx: Box<dyn SocketRx>,
    },
    /// Waiting out a backoff delay before the next dial.
    Backoff { deadline: Instant, epoch: u64 },
    /// The façade is gone; clean up and end the task.
    Halt,
}

/// The session state machine. Owns the socket exclusively.
pub(crate) struct SessionDriver {
    config: SessionConfig,
    policy: BackoffPolicy,
    dialer: Arc<dyn Dialer>,
    shared: Arc<SharedState>,
    callbacks: Arc<CallbackRegistry>,
    buffer: Arc<Mutex<FrameBuffer>>,
    drain_notify: Arc<Notify>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    session_id: Uuid,
    /// Number of the next reconnect attempt; 0 while no failure is pending.
    attempt: u32,
    /// Generation counter for timer staleness checks.
    epoch: u64,
    /// True after a Final was delivered, until a Partial opens a new
    /// utterance. Duplicate Finals are dropped while set.
    utterance_settled: bool,
    /// Callers suspended on the current Connecting phase.
    dial_waiters: Vec<Reply>,
}

impl SessionDriver {
    pub(crate) fn new(
        config: SessionConfig,
        dialer: Arc<dyn Dialer>,
        shared: Arc<SharedState>,
        callbacks: Arc<CallbackRegistry>,
        buffer: Arc<Mutex<FrameBuffer>>,
        drain_notify: Arc<Notify>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let policy = BackoffPolicy::new(&config);
        Self {
            config,
            policy,
            dialer,
            shared,
            callbacks,
            buffer,
            drain_notify,
            cmd_rx,
            session_id: Uuid::new_v4(),
            attempt: 0,
            epoch: 0,
            utterance_settled: false,
            dial_waiters: Vec::new(),
        }
    }

    /// Runs the driver until the façade drops its command sender.
    pub(crate) async fn run(mut self) {
        log::debug!("[Session] {} driver started", self.session_id);
        let mut mode = Mode::Idle;
        loop {
            mode = match mode {
                Mode::Idle => self.run_idle().await,
                Mode::Dial => self.run_dial().await,
                Mode::Connected { tx, rx } => self.run_connected(tx, rx).await,
                Mode::Backoff { deadline, epoch } => self.run_backoff(deadline, epoch).await,
                Mode::Halt => break,
            };
        }
        log::debug!("[Session] {} driver stopped", self.session_id);
    }

    // ─── Idle: Disconnected or terminal Error ───────────────────────────────

    async fn run_idle(&mut self) -> Mode {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                return Mode::Halt;
            };
            match cmd {
                Command::Connect { reply } => {
                    // Fresh logical session: counters and error slate reset.
                    self.session_id = Uuid::new_v4();
                    self.attempt = 0;
                    self.utterance_settled = false;
                    self.shared.set_last_error(None);
                    return self.begin_dial(Some(reply));
                }
                Command::ForceReconnect { reply } => {
                    if self.shared.connection_state() == ConnectionState::Error {
                        self.attempt = 0;
                        self.shared.set_last_error(None);
                        return self.begin_dial(Some(reply));
                    }
                    let _ = reply.send(Err(SessionError::NotConnected));
                }
                Command::Disconnect { reply } => {
                    self.complete_disconnect(reply, None).await;
                }
                Command::StartStreaming { reply } | Command::StopStreaming { reply } => {
                    let _ = reply.send(Err(SessionError::NotConnected));
                }
            }
        }
    }

    // ─── Dial: one socket-open attempt ──────────────────────────────────────

    async fn run_dial(&mut self) -> Mode {
        let url = self.config.socket_url();
        'redial: loop {
            log::info!("[Session] {} dialing {}", self.session_id, url);
            let dialer = Arc::clone(&self.dialer);
            let dial = dialer.dial(&url, self.config.connect_timeout);
            tokio::pin!(dial);

            loop {
                tokio::select! {
                    result = &mut dial => {
                        return match result {
                            Ok((tx, rx)) => self.on_dial_success(tx, rx),
                            Err(e) => self.on_dial_failed(&e.to_string()),
                        };
                    }
                    cmd = self.cmd_rx.recv() => {
                        match cmd {
                            None => return Mode::Halt,
                            Some(Command::Connect { reply }) => {
                                // Already connecting — idempotent.
                                let _ = reply.send(Ok(()));
                            }
                            Some(Command::Disconnect { reply }) => {
                                self.fail_waiters(SessionError::ConnectionFailure(
                                    "superseded by disconnect".to_string(),
                                ));
                                self.complete_disconnect(reply, None).await;
                                return Mode::Idle;
                            }
                            Some(Command::ForceReconnect { reply }) => {
                                // Abandon the in-flight dial and start over.
                                self.dial_waiters.push(reply);
                                self.attempt = 0;
                                self.epoch += 1;
                                continue 'redial;
                            }
                            Some(Command::StartStreaming { reply })
                            | Some(Command::StopStreaming { reply }) => {
                                let _ = reply.send(Err(SessionError::NotConnected));
                            }
                        }
                    }
                }
            }
        }
    }

    fn on_dial_success(&mut self, tx: Box<dyn SocketTx>, rx: Box<dyn SocketRx>) -> Mode {
        self.attempt = 0;
        self.utterance_settled = false;
        self.transition(ConnectionState::Connected);
        for waiter in self.dial_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        log::info!("[Session] {} connected", self.session_id);
        Mode::Connected { tx, rx }
    }

    fn on_dial_failed(&mut self, message: &str) -> Mode {
        let error = SessionError::ConnectionFailure(message.to_string());
        log::warn!("[Session] {} dial failed: {}", self.session_id, message);
        self.shared.set_last_error(Some(error.clone()));
        for waiter in self.dial_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.schedule_retry_or_give_up()
    }

    // ─── Connected: inbound dispatch, drain, heartbeat ──────────────────────

    async fn run_connected(
        &mut self,
        mut tx: Box<dyn SocketTx>,
        mut rx: Box<dyn SocketRx>,
    ) -> Mode {
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => {
                            let _ = tx.close().await;
                            return Mode::Halt;
                        }
                        Some(Command::Connect { reply }) => {
                            // Already connected — idempotent.
                            let _ = reply.send(Ok(()));
                        }
                        Some(Command::Disconnect { reply }) => {
                            self.complete_disconnect(reply, Some(tx.as_mut())).await;
                            return Mode::Idle;
                        }
                        Some(Command::StartStreaming { reply }) => {
                            self.shared.set_streaming(true);
                            log::info!("[Session] {} streaming started", self.session_id);
                            let _ = reply.send(Ok(()));
                        }
                        Some(Command::StopStreaming { reply }) => {
                            self.shared.set_streaming(false);
                            self.clear_buffer();
                            log::info!("[Session] {} streaming stopped", self.session_id);
                            let _ = reply.send(Ok(()));
                        }
                        Some(Command::ForceReconnect { reply }) => {
                            self.shared.set_streaming(false);
                            self.clear_buffer();
                            if let Err(e) = tx.close().await {
                                log::debug!(
                                    "[Session] {} close before reopen: {}",
                                    self.session_id, e
                                );
                            }
                            self.attempt = 0;
                            return self.begin_dial(Some(reply));
                        }
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(Ok(SocketMessage::Text(text))) => self.handle_text(&text),
                        Some(Ok(SocketMessage::Ping(data))) => {
                            if let Err(e) = tx.send_pong(data).await {
                                log::debug!("[Session] {} pong failed: {}", self.session_id, e);
                            }
                        }
                        Some(Ok(SocketMessage::Pong(_))) => {}
                        Some(Ok(SocketMessage::Binary(data))) => {
                            log::warn!(
                                "[Session] {} dropping unexpected {}-byte binary frame",
                                self.session_id,
                                data.len()
                            );
                        }
                        Some(Ok(SocketMessage::Close { code, reason })) => {
                            return self.on_connection_lost(format!(
                                "closed by server ({code}: {reason})"
                            ));
                        }
                        Some(Err(e)) => {
                            return self.on_connection_lost(e.to_string());
                        }
                        None => {
                            return self.on_connection_lost("stream ended".to_string());
                        }
                    }
                }
                () = self.drain_notify.notified() => {
                    if let Err(e) = self.drain_frames(tx.as_mut()).await {
                        return self.on_connection_lost(e.to_string());
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = tx.send_text(codec::HEARTBEAT_TEXT).await {
                        return self.on_connection_lost(format!("heartbeat failed: {e}"));
                    }
                    log::trace!("[Session] {} heartbeat sent", self.session_id);
                }
            }
        }
    }

    /// Writes every currently buffered frame onto the socket.
    async fn drain_frames(&mut self, tx: &mut dyn SocketTx) -> anyhow::Result<()> {
        loop {
            let frame = self.buffer.lock().expect("frame buffer poisoned").pop();
            let Some(frame) = frame else {
                return Ok(());
            };
            let encoded = codec::encode_frame(&frame);
            tx.send_text(&encoded).await?;
            self.shared.count_sent();
            log::trace!(
                "[Session] {} sent frame seq={} ({} bytes)",
                self.session_id,
                frame.seq,
                frame.payload.len()
            );
        }
    }

    /// Dispatches one inbound text message.
    fn handle_text(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(Inbound::Result(result)) => self.deliver_result(result),
            Ok(Inbound::Status(update)) => match update.kind {
                StatusKind::ConnectionEstablished => {
                    log::info!(
                        "[Session] {} backend greeting (client {})",
                        self.session_id,
                        update.client_id.as_deref().unwrap_or("unknown")
                    );
                }
                kind => {
                    log::debug!("[Session] {} status message: {:?}", self.session_id, kind);
                }
            },
            Ok(Inbound::ServerError { message }) => {
                log::warn!("[Session] {} backend error: {}", self.session_id, message);
                self.callbacks.notify_error(SessionError::Backend(message));
            }
            Err(e) => {
                // Malformed input is dropped here; it never reaches the UI
                // and never takes the loop down.
                log::warn!("[Session] {} dropping message: {}", self.session_id, e);
            }
        }
    }

    /// Delivers a recognition result, enforcing at-most-one Final per
    /// utterance.
    fn deliver_result(&mut self, result: RecognitionResult) {
        match &result {
            RecognitionResult::Partial { .. } => {
                self.utterance_settled = false;
            }
            RecognitionResult::Final {
                text, is_emergency, ..
            } => {
                if self.utterance_settled {
                    log::debug!(
                        "[Session] {} dropping duplicate final for settled utterance",
                        self.session_id
                    );
                    return;
                }
                if *is_emergency {
                    log::warn!("[Session] {} emergency result: {}", self.session_id, text);
                }
                self.utterance_settled = true;
            }
        }
        self.shared.count_result();
        self.callbacks.notify_result(result);
    }

    // ─── Backoff: waiting out a reconnect delay ─────────────────────────────

    async fn run_backoff(&mut self, deadline: Instant, timer_epoch: u64) -> Mode {
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    if timer_epoch != self.epoch {
                        // A newer decision superseded this timer.
                        log::debug!(
                            "[Session] {} discarding stale retry timer",
                            self.session_id
                        );
                        return Mode::Idle;
                    }
                    return self.begin_dial(None);
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return Mode::Halt,
                        Some(Command::Connect { reply }) => {
                            // User-initiated resume: cancel the timer and
                            // start a fresh attempt cycle right away.
                            self.attempt = 0;
                            return self.begin_dial(Some(reply));
                        }
                        Some(Command::ForceReconnect { reply }) => {
                            self.attempt = 0;
                            return self.begin_dial(Some(reply));
                        }
                        Some(Command::Disconnect { reply }) => {
                            self.complete_disconnect(reply, None).await;
                            return Mode::Idle;
                        }
                        Some(Command::StartStreaming { reply })
                        | Some(Command::StopStreaming { reply }) => {
                            let _ = reply.send(Err(SessionError::NotConnected));
                        }
                    }
                }
            }
        }
    }

    // ─── Shared transitions ─────────────────────────────────────────────────

    /// Moves to Connecting and hands control to the dial loop. Bumping the
    /// epoch here invalidates any backoff timer still in flight.
    fn begin_dial(&mut self, reply: Option<Reply>) -> Mode {
        if let Some(reply) = reply {
            self.dial_waiters.push(reply);
        }
        self.epoch += 1;
        self.transition(ConnectionState::Connecting);
        Mode::Dial
    }

    /// Schedules the next retry with the backoff policy, or gives up
    /// terminally once attempts are exhausted.
    fn schedule_retry_or_give_up(&mut self) -> Mode {
        self.attempt += 1;
        if self.policy.is_exhausted(self.attempt) {
            let error = SessionError::AttemptsExhausted {
                attempts: self.policy.max_attempts(),
            };
            log::error!(
                "[Session] {} giving up after {} attempts",
                self.session_id,
                self.policy.max_attempts()
            );
            self.shared.set_last_error(Some(error.clone()));
            self.transition(ConnectionState::Error);
            self.callbacks.notify_error(error);
            return Mode::Idle;
        }

        let delay = self.policy.delay_for(self.attempt);
        self.epoch += 1;
        let timer_epoch = self.epoch;
        self.shared.set_connection_state(ConnectionState::Reconnecting);
        self.shared.count_reconnect();
        log::info!(
            "[Session] {} reconnecting in {}ms (attempt {}/{})",
            self.session_id,
            delay.as_millis(),
            self.attempt,
            self.policy.max_attempts()
        );
        self.callbacks.notify_reconnect(ReconnectAttempt {
            attempt: self.attempt,
            max_attempts: self.policy.max_attempts(),
            delay_ms: delay.as_millis() as u64,
        });
        Mode::Backoff {
            deadline: Instant::now() + delay,
            epoch: timer_epoch,
        }
    }

    /// Tears everything down and acknowledges the disconnect. After the
    /// reply is sent no further callbacks can fire: the socket is gone, the
    /// timer epoch is stale, and the driver sits idle until the next command.
    async fn complete_disconnect(
        &mut self,
        reply: oneshot::Sender<()>,
        tx: Option<&mut dyn SocketTx>,
    ) {
        self.epoch += 1;
        self.shared.set_streaming(false);
        self.clear_buffer();
        if let Some(tx) = tx {
            if let Err(e) = tx.close().await {
                log::debug!("[Session] {} socket close: {}", self.session_id, e);
            }
        }
        if self.shared.connection_state() != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        }
        log::info!("[Session] {} disconnected", self.session_id);
        let _ = reply.send(());
    }

    /// Handles loss of an established connection.
    fn on_connection_lost(&mut self, reason: String) -> Mode {
        let error = SessionError::StreamClosed(reason);
        log::warn!("[Session] {} connection lost: {}", self.session_id, error);
        self.shared.set_last_error(Some(error));
        self.shared.set_streaming(false);
        self.clear_buffer();
        self.schedule_retry_or_give_up()
    }

    /// Records a state change and fires the status callback for the
    /// UI-visible states. Reconnecting is reported through the reconnect
    /// callback instead, so it never goes through here.
    fn transition(&self, state: ConnectionState) {
        self.shared.set_connection_state(state);
        log::info!("[Session] {} state -> {}", self.session_id, state);
        self.callbacks.notify_status(state);
    }

    fn clear_buffer(&self) {
        self.buffer.lock().expect("frame buffer poisoned").clear();
    }

    fn fail_waiters(&mut self, error: SessionError) {
        for waiter in self.dial_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}
