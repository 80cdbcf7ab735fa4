use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use slackline_core::BackoffPolicy;

use crate::transport::{SessionTransport, SocketEnvelope, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("socket mode session terminated: {0}")]
    Auth(String),
}

/// Observable lifecycle of the socket mode session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Reconnection schedule. Attempts are unbounded; only the delay between
/// them is governed here. Auth rejections bypass the schedule entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: BackoffPolicy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { backoff: BackoffPolicy { base_delay_ms: 500, max_delay_ms: 60_000, jitter: true } }
    }
}

impl ReconnectPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Owns the socket mode connection lifecycle: connect, pump envelopes,
/// ack promptly, and reconnect on any transient failure.
///
/// Event payloads come out in arrival order on the supplied channel. The
/// session counts as connected only once the server greeting arrives; the
/// reconnect attempt counter resets at that point so a long-lived session
/// that drops starts its backoff from the base delay again.
pub struct SessionManager<T> {
    transport: T,
    policy: ReconnectPolicy,
    state: watch::Sender<SessionState>,
}

impl<T: SessionTransport> SessionManager<T> {
    pub fn new(transport: T, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self { transport, policy, state }
    }

    /// Subscribe to session state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drive the session until cancellation or a terminal auth failure.
    /// Dropping the event receiver also winds the session down cleanly.
    pub async fn run(
        mut self,
        events: mpsc::Sender<Value>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        loop {
            let phase = if ever_connected || attempt > 0 {
                SessionState::Reconnecting
            } else {
                SessionState::Connecting
            };
            let _ = self.state.send(phase);

            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = cancel.cancelled() => break,
            };

            match connected {
                Ok(()) => debug!(attempt, "socket mode connection established"),
                Err(TransportError::Auth(code)) => {
                    let _ = self.state.send(SessionState::Disconnected);
                    return Err(SessionError::Auth(code));
                }
                Err(error) => {
                    let delay = self.policy.delay(attempt);
                    warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64,
                        "socket mode connect failed; backing off");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = cancel.cancelled() => break,
                    }
                }
            }

            match self.pump(&events, &cancel).await {
                Pump::Shutdown => break,
                Pump::SessionLive => {
                    // `pump` saw the greeting before the drop, so the next
                    // connect restarts the schedule from the base delay.
                    ever_connected = true;
                    attempt = 0;
                }
                Pump::Terminal(code) => {
                    let _ = self.state.send(SessionState::Disconnected);
                    return Err(SessionError::Auth(code));
                }
                Pump::Dropped => attempt = attempt.saturating_add(1),
            }
        }

        self.transport.close().await;
        let _ = self.state.send(SessionState::Disconnected);
        Ok(())
    }

    async fn pump(&mut self, events: &mpsc::Sender<Value>, cancel: &CancellationToken) -> Pump {
        let mut greeted = false;

        loop {
            let envelope = tokio::select! {
                result = self.transport.next_envelope() => result,
                _ = cancel.cancelled() => return Pump::Shutdown,
            };

            match envelope {
                Ok(SocketEnvelope::Hello) => {
                    info!("socket mode session live");
                    greeted = true;
                    let _ = self.state.send(SessionState::Connected);
                }
                Ok(SocketEnvelope::Event { envelope_id, payload }) => {
                    // Ack before forwarding: the server redelivers unacked
                    // envelopes, and forwarding may block on a full channel.
                    if let Some(id) = &envelope_id {
                        if let Err(error) = self.transport.ack(id).await {
                            warn!(envelope_id = %id, error = %error, "envelope ack failed");
                        }
                    }
                    if events.send(payload).await.is_err() {
                        debug!("event receiver dropped; shutting session down");
                        return Pump::Shutdown;
                    }
                }
                Ok(SocketEnvelope::Disconnect { reason }) => {
                    info!(reason = %reason, "server requested disconnect");
                    self.transport.close().await;
                    return finished(greeted);
                }
                Err(TransportError::Auth(code)) => return Pump::Terminal(code),
                Err(error) => {
                    warn!(error = %error, "socket mode stream failed");
                    return finished(greeted);
                }
            }
        }
    }
}

enum Pump {
    /// Cancellation or receiver drop: wind down without reconnecting.
    Shutdown,
    /// The connection reached the greeting before dropping.
    SessionLive,
    /// The connection dropped before it was ever live.
    Dropped,
    /// Auth rejection mid-stream.
    Terminal(String),
}

fn finished(greeted: bool) -> Pump {
    if greeted {
        Pump::SessionLive
    } else {
        Pump::Dropped
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{ReconnectPolicy, SessionError, SessionManager};
    use crate::transport::{SessionTransport, SocketEnvelope, TransportError};
    use slackline_core::BackoffPolicy;

    #[derive(Default)]
    struct ScriptedTransport {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<SocketEnvelope, TransportError>>,
        connect_attempts: usize,
        acks: Vec<String>,
        close_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<SocketEnvelope, TransportError>>,
        ) -> Self {
            Self {
                connect_results: connect_results.into(),
                envelopes: envelopes.into(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SessionTransport for &mut ScriptedTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            self.connect_attempts += 1;
            self.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&mut self) -> Result<SocketEnvelope, TransportError> {
            match self.envelopes.pop_front() {
                Some(result) => result,
                // An exhausted script behaves like a quiet open socket.
                None => std::future::pending().await,
            }
        }

        async fn ack(&mut self, envelope_id: &str) -> Result<(), TransportError> {
            self.acks.push(envelope_id.to_owned());
            Ok(())
        }

        async fn close(&mut self) {
            self.close_calls += 1;
        }
    }

    fn instant_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: BackoffPolicy { base_delay_ms: 0, max_delay_ms: 0, jitter: false },
        }
    }

    fn event(envelope_id: &str, ts: &str) -> SocketEnvelope {
        SocketEnvelope::Event {
            envelope_id: Some(envelope_id.to_owned()),
            payload: json!({"envelope_id": envelope_id, "payload": {"event": {"ts": ts}}}),
        }
    }

    #[tokio::test]
    async fn acks_and_forwards_events_in_arrival_order() {
        let mut transport = ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(SocketEnvelope::Hello),
                Ok(event("env-1", "1.0001")),
                Ok(event("env-2", "1.0002")),
                Ok(SocketEnvelope::Disconnect { reason: "done".to_owned() }),
            ],
        );

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        {
            let manager = SessionManager::new(&mut transport, instant_policy());
            let runner = manager.run(tx, cancel.clone());
            tokio::pin!(runner);

            let first = tokio::select! {
                payload = rx.recv() => payload.expect("first event"),
                _ = &mut runner => panic!("session ended before first event"),
            };
            let second = tokio::select! {
                payload = rx.recv() => payload.expect("second event"),
                _ = &mut runner => panic!("session ended before second event"),
            };
            assert_eq!(first["payload"]["event"]["ts"], "1.0001");
            assert_eq!(second["payload"]["event"]["ts"], "1.0002");
            cancel.cancel();
            runner.await.expect("clean shutdown");
        }

        assert_eq!(transport.acks, vec!["env-1", "env-2"]);
    }

    #[tokio::test]
    async fn transient_connect_failures_retry_until_success() {
        let mut transport = ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("network down".to_owned())),
                Err(TransportError::Closed("handshake reset".to_owned())),
                Ok(()),
            ],
            vec![Ok(SocketEnvelope::Hello)],
        );

        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        {
            let manager = SessionManager::new(&mut transport, instant_policy());
            let mut state = manager.state();
            let runner = manager.run(tx, cancel.clone());
            tokio::pin!(runner);

            loop {
                tokio::select! {
                    changed = state.changed() => {
                        changed.expect("state channel");
                        if state.borrow().is_connected() {
                            break;
                        }
                    }
                    _ = &mut runner => panic!("session ended before connecting"),
                }
            }
            cancel.cancel();
            runner.await.expect("clean shutdown");
        }

        assert_eq!(transport.connect_attempts, 3);
    }

    #[tokio::test]
    async fn auth_rejection_is_terminal() {
        let mut transport = ScriptedTransport::with_script(
            vec![Err(TransportError::Auth("invalid_auth".to_owned()))],
            vec![],
        );

        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        let error = {
            let manager = SessionManager::new(&mut transport, instant_policy());
            manager.run(tx, cancel).await.expect_err("auth must be terminal")
        };

        assert!(matches!(error, SessionError::Auth(code) if code == "invalid_auth"));
        assert_eq!(transport.connect_attempts, 1);
    }

    #[tokio::test]
    async fn server_disconnect_triggers_a_fresh_connection() {
        let mut transport = ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Ok(SocketEnvelope::Hello),
                Ok(SocketEnvelope::Disconnect { reason: "refresh_requested".to_owned() }),
                Ok(SocketEnvelope::Hello),
                Ok(event("env-after", "2.0001")),
            ],
        );

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        {
            let manager = SessionManager::new(&mut transport, instant_policy());
            let runner = manager.run(tx, cancel.clone());
            tokio::pin!(runner);

            let replayed = tokio::select! {
                payload = rx.recv() => payload.expect("event after reconnect"),
                _ = &mut runner => panic!("session ended before redelivery"),
            };
            assert_eq!(replayed["envelope_id"], "env-after");
            cancel.cancel();
            runner.await.expect("clean shutdown");
        }

        assert_eq!(transport.connect_attempts, 2);
    }

    #[tokio::test]
    async fn dropping_the_receiver_winds_the_session_down() {
        let mut transport = ScriptedTransport::with_script(
            vec![Ok(())],
            vec![Ok(SocketEnvelope::Hello), Ok(event("env-1", "1.0001"))],
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        {
            let manager = SessionManager::new(&mut transport, instant_policy());
            manager.run(tx, cancel).await.expect("receiver drop is a clean shutdown");
        }

        assert_eq!(transport.close_calls, 1);
    }
}
