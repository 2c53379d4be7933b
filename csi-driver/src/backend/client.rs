//! A single shared JSON-RPC-over-WebSocket session to the storage backend.
//!
//! Lazily owns one connection behind a mutex, as a true multiplexed
//! session: one reader
//! task owns the socket's read half and dispatches replies to per-request
//! completions, one writer lock serializes outbound frames, and a
//! single-flight guard ensures concurrent callers don't race each other
//! into reconnecting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

use super::error::{BackendError, Result};
use super::protocol::{RpcRequest, RpcResponse};
use crate::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type PendingMap = Arc<AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub tls_verify: bool,
}

/// Process-wide readiness gate, flipped by the backend client as the
/// connection comes up and goes down. Read by `Identity.Probe`.
#[derive(Debug, Default)]
pub struct ReadinessState {
    ready: AtomicBool,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        metrics::set_backend_connected(ready);
    }
}

struct Session {
    write: AsyncMutex<futures_util::stream::SplitSink<WsStream, Message>>,
}

pub struct BackendClient {
    config: BackendConfig,
    session: AsyncMutex<Option<Arc<Session>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reconnect_guard: AsyncMutex<()>,
    pub readiness: Arc<ReadinessState>,
}

impl BackendClient {
    /// Connect, authenticate, and spawn the reader task. Returns once the
    /// session is usable.
    pub async fn connect(config: BackendConfig) -> Result<Arc<Self>> {
        let client = Arc::new(Self {
            config,
            session: AsyncMutex::new(None),
            pending: Arc::new(AsyncMutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            reconnect_guard: AsyncMutex::new(()),
            readiness: Arc::new(ReadinessState::default()),
        });
        client.clone().ensure_connected().await?;
        Ok(client)
    }

    /// The one operation every Controller path funnels through.
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, DEFAULT_CALL_TIMEOUT).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let session = self.ensure_connected().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest::new(id, method, params);
        let frame = serde_json::to_string(&request)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let write_timer = metrics::BackendCallTimer::start(method);
        let send_result = {
            let mut write = session.write.lock().await;
            write.send(Message::Text(frame.into())).await
        };
        if let Err(e) = send_result {
            self.pending.lock().await.remove(&id);
            self.invalidate_session().await;
            write_timer.failure();
            return Err(BackendError::ConnectionLost(e.to_string()));
        }
        metrics::record_backend_message(method, "sent");

        let outcome = timeout(deadline, rx).await;
        match outcome {
            Ok(Ok(result)) => {
                match &result {
                    Ok(_) => write_timer.success(),
                    Err(_) => write_timer.failure(),
                }
                result
            }
            Ok(Err(_canceled)) => {
                write_timer.failure();
                Err(BackendError::ConnectionLost(
                    "reader task dropped the completion channel".into(),
                ))
            }
            Err(_elapsed) => {
                // The pending entry is left in the map; the reader discards
                // the late reply if one eventually arrives.
                write_timer.failure();
                Err(BackendError::DeadlineExceeded)
            }
        }
    }

    /// Returns the current session, reconnecting (with a single-flight
    /// guard and capped exponential backoff) if necessary.
    async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<Session>> {
        if let Some(session) = self.session.lock().await.clone() {
            return Ok(session);
        }

        let _guard = self.reconnect_guard.lock().await;
        // Re-check: another caller may have finished reconnecting while we
        // waited for the guard.
        if let Some(session) = self.session.lock().await.clone() {
            return Ok(session);
        }

        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.clone().connect_once().await {
                Ok(session) => {
                    *self.session.lock().await = Some(session.clone());
                    self.readiness.set(true);
                    return Ok(session);
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "backend reconnect failed, retrying");
                    metrics::record_backend_reconnect_attempt(false);
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
        }
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
        self.readiness.set(false);
    }

    #[instrument(skip(self))]
    async fn connect_once(self: Arc<Self>) -> Result<Arc<Session>> {
        let url = url::Url::parse(&self.config.url)
            .map_err(|e| BackendError::Protocol(format!("invalid backend url: {e}")))?;

        let (ws_stream, _response) = connect_async_tls_with_config(url.as_str(), None, !self.config.tls_verify, None)
            .await
            .map_err(|e| BackendError::ConnectionLost(e.to_string()))?;

        let (write, mut read) = ws_stream.split();
        let session = Arc::new(Session {
            write: AsyncMutex::new(write),
        });

        let pending = self.pending.clone();
        let self_for_reader = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        self_for_reader.dispatch_frame(&pending, &text).await;
                    }
                    Ok(Message::Binary(bin)) => {
                        if let Ok(text) = String::from_utf8(bin.to_vec()) {
                            self_for_reader.dispatch_frame(&pending, &text).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => {
                        break;
                    }
                    Ok(_) => {}
                }
            }
            debug!("backend reader task exiting, failing all pending calls");
            Self::fail_all_pending(&pending, "connection closed").await;
            self_for_reader.invalidate_session().await;
        });

        metrics::record_backend_reconnect_attempt(true);

        // Authenticate immediately after connect; subsequent calls reuse
        // this session.
        self.login(&session).await?;

        Ok(session)
    }

    async fn login(&self, session: &Arc<Session>) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest::new(
            id,
            "auth.login_with_api_key",
            serde_json::json!({ "api_key": self.config.api_key }),
        );
        let frame = serde_json::to_string(&request)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        {
            let mut write = session.write.lock().await;
            write
                .send(Message::Text(frame.into()))
                .await
                .map_err(|e| BackendError::ConnectionLost(e.to_string()))?;
        }

        match timeout(DEFAULT_CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => Err(BackendError::AuthFailed(e.to_string())),
            Ok(Err(_)) => Err(BackendError::AuthFailed("login channel closed".into())),
            Err(_) => Err(BackendError::AuthFailed("login timed out".into())),
        }
    }

    async fn dispatch_frame(&self, pending: &PendingMap, text: &str) {
        let parsed: std::result::Result<RpcResponse, _> = serde_json::from_str(text);
        let response = match parsed {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "discarding unparsable backend frame");
                return;
            }
        };

        let Some(id) = response.id else {
            // Notification; no pending caller to resolve.
            return;
        };

        let maybe_tx = pending.lock().await.remove(&id);
        let Some(tx) = maybe_tx else {
            // Either a duplicate reply or a late reply past our deadline.
            return;
        };

        let outcome = match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(BackendError::Domain {
                code: err.code,
                message: err.message,
            }),
            (None, None) => Err(BackendError::Protocol("frame had neither result nor error".into())),
        };
        let _ = tx.send(outcome);
    }

    async fn fail_all_pending(pending: &PendingMap, reason: &str) {
        let mut map = pending.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(BackendError::ConnectionLost(reason.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_defaults_to_not_ready() {
        let r = ReadinessState::default();
        assert!(!r.is_ready());
    }

    #[test]
    fn readiness_transitions() {
        let r = ReadinessState::default();
        r.set(true);
        assert!(r.is_ready());
        r.set(false);
        assert!(!r.is_ready());
    }

    #[test]
    fn backoff_schedule_is_capped_and_monotonic() {
        let mut backoff = INITIAL_BACKOFF;
        let mut prev = backoff;
        for _ in 0..10 {
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            assert!(backoff >= prev);
            assert!(backoff <= MAX_BACKOFF);
            prev = backoff;
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
