//! The streaming relay orchestrator
//!
//! `RelayClient` drives one logical relay: it opens the upstream
//! connection, runs the decode pipeline (bytes → text → lines → events →
//! SSE frames) on the live stream, retries transient failures with
//! exponential backoff, and consults the circuit breaker before touching
//! the upstream. Frames are forwarded as they are produced; nothing
//! buffers the whole response.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use reqwest::header;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::RelayConfig;
use crate::error::{mapping, RelayError, Result};
use crate::event::{interpret, UpstreamEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::resilience::{BreakerRegistry, CircuitBreakerConfig};
use crate::sse::{unescape_content, EncoderConfig, OutboundFrame, SseEncoder};
use crate::stream::{LineFramer, Utf8Decoder};

/// Connect-phase timeout for the HTTP client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the relay needs to forward one client message
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// The client message to forward
    pub message: String,

    /// Validated session id
    pub session_id: String,

    /// Origin domain of the session
    pub origin_domain: String,

    /// Page the widget is embedded on, if known
    pub page_url: Option<String>,

    /// Client IP, for the registry and the upstream context
    pub client_ip: String,

    /// Client user agent, forwarded as upstream context
    pub user_agent: String,

    /// Short-lived token for the upstream hop (issued by the
    /// `Authenticator` collaborator)
    pub token: String,
}

/// JSON body posted to the upstream webhook
#[derive(Serialize)]
struct UpstreamPayload<'a> {
    message: &'a str,
    timestamp: String,
    jwt_token: &'a str,
    session: SessionContext<'a>,
}

/// Session context block inside the upstream payload
#[derive(Serialize)]
struct SessionContext<'a> {
    session_id: &'a str,
    origin_domain: &'a str,
    page_url: Option<&'a str>,
    client_ip: &'a str,
    user_agent: &'a str,
}

impl<'a> UpstreamPayload<'a> {
    fn new(request: &'a RelayRequest) -> Self {
        Self {
            message: &request.message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            jwt_token: &request.token,
            session: SessionContext {
                session_id: &request.session_id,
                origin_domain: &request.origin_domain,
                page_url: request.page_url.as_deref(),
                client_ip: &request.client_ip,
                user_agent: &request.user_agent,
            },
        }
    }
}

/// The outbound frame stream handed to the transport layer
///
/// Dropping the stream is how client disconnects propagate: the relay
/// task notices the closed channel and cancels the in-flight upstream
/// read promptly.
pub struct RelayStream {
    connection_id: ConnectionId,
    frames: ReceiverStream<OutboundFrame>,
}

impl RelayStream {
    /// Registry id of the connection backing this stream
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }
}

impl Stream for RelayStream {
    type Item = OutboundFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

/// How one attempt against the upstream ended
enum AttemptOutcome {
    /// The upstream stream ran to completion (or sent its own terminal
    /// error event)
    Completed,

    /// The attempt failed; retryability is decided by the caller
    Failed(RelayError),

    /// The client went away mid-attempt
    Disconnected,
}

/// How the whole relay ended, before the terminal sentinel
enum RelayEnd {
    Completed,
    Failed(RelayError),
    Disconnected,
}

/// Per-line control flow inside an attempt
enum LineFlow {
    Continue,
    /// The upstream sent an `error` event; stop reading
    Terminate,
    Disconnected,
}

/// The relay client and retry orchestrator
pub struct RelayClient {
    http: reqwest::Client,
    config: RelayConfig,
    breakers: Arc<BreakerRegistry>,
    registry: Arc<ConnectionRegistry>,
    encoder: SseEncoder,
}

impl RelayClient {
    /// Create a relay client from configuration
    ///
    /// Must be called inside a tokio runtime: the connection registry
    /// starts its heartbeat and cleanup tasks here.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .user_agent(format!("chat-relay/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RelayError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            recovery_timeout: config.breaker_recovery_timeout,
        }));

        let registry = Arc::new(ConnectionRegistry::new(&config));

        let encoder = SseEncoder::new(EncoderConfig {
            forward_lifecycle: config.forward_lifecycle,
        });

        Ok(Self {
            http,
            config,
            breakers,
            registry,
            encoder,
        })
    }

    /// The connection registry backing this client
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The circuit breaker registry backing this client
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Open a relay for one client request
    ///
    /// Registers the connection (capacity and draining checks happen here,
    /// before any upstream contact) and spawns the relay task. The
    /// returned stream yields frames in upstream order and always ends
    /// with exactly one `[DONE]` sentinel unless the client disconnects
    /// first.
    pub async fn open(&self, request: RelayRequest) -> Result<RelayStream> {
        let (connection_id, receiver) = self
            .registry
            .create(&request.session_id, &request.client_ip)?;

        let worker = RelayWorker {
            http: self.http.clone(),
            config: self.config.clone(),
            breakers: Arc::clone(&self.breakers),
            registry: Arc::clone(&self.registry),
            encoder: self.encoder.clone(),
        };

        let task_id = connection_id.clone();
        tokio::spawn(async move {
            worker.run(request, task_id).await;
        });

        Ok(RelayStream {
            connection_id,
            frames: ReceiverStream::new(receiver),
        })
    }

    /// Relay one message and collect the content into a single response
    ///
    /// The non-streaming variant of `open`: drains the frame stream,
    /// unescapes and concatenates content, and skips lifecycle envelopes
    /// and notifications. Errors that ended the relay surface as `Err`.
    pub async fn collect(&self, request: RelayRequest) -> Result<String> {
        let mut stream = self.open(request).await?;
        let mut out = String::new();
        let mut failure: Option<String> = None;

        while let Some(frame) = stream.next().await {
            match frame {
                OutboundFrame::Data(payload) => {
                    if !is_event_envelope(&payload) {
                        out.push_str(&unescape_content(&payload));
                    }
                }
                OutboundFrame::Error(payload) => {
                    failure = Some(payload);
                }
                OutboundFrame::Retry { .. }
                | OutboundFrame::KeepAlive { .. }
                | OutboundFrame::Done => {}
            }
        }

        match failure {
            Some(payload) => Err(RelayError::internal(payload)),
            None => Ok(out),
        }
    }

    /// Probe upstream connectivity
    ///
    /// A lightweight monitoring check; it does not go through the circuit
    /// breaker and never counts against it.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .http
            .get(&self.config.upstream_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        Ok(!response.status().is_server_error())
    }

    /// Drain and stop the relay: no new connections, bounded wait for
    /// active ones
    pub async fn shutdown(&self) {
        self.registry.shutdown(self.config.shutdown_deadline).await;
    }
}

/// Detect encoder-produced JSON envelopes (lifecycle/error payloads)
/// among data frames, so `collect` keeps only real content
fn is_event_envelope(payload: &str) -> bool {
    if !payload.starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(payload)
        .map(|v| v.get("type").is_some() || v.get("error").is_some())
        .unwrap_or(false)
}

/// State cloned into the spawned relay task
struct RelayWorker {
    http: reqwest::Client,
    config: RelayConfig,
    breakers: Arc<BreakerRegistry>,
    registry: Arc<ConnectionRegistry>,
    encoder: SseEncoder,
}

impl RelayWorker {
    /// Drive the relay to completion and release the registry slot
    async fn run(&self, request: RelayRequest, connection_id: ConnectionId) {
        let deadline = self.config.request_timeout;
        let end =
            match tokio::time::timeout(deadline, self.attempt_loop(&request, &connection_id)).await
            {
                Ok(end) => end,
                Err(_) => {
                    warn!(
                        "Relay {} exceeded overall deadline of {:?}",
                        connection_id, deadline
                    );
                    RelayEnd::Failed(RelayError::timeout(format!(
                        "relay exceeded {:?} deadline",
                        deadline
                    )))
                }
            };

        match end {
            RelayEnd::Completed => {
                debug!("Relay {} completed", connection_id);
            }
            RelayEnd::Failed(err) => {
                info!("Relay {} failed: {}", connection_id, err);
                let frame = match &err {
                    RelayError::CircuitOpen { retry_after } => OutboundFrame::error(&format!(
                        "Service temporarily unavailable, retry after {}s",
                        retry_after.as_secs()
                    )),
                    other => OutboundFrame::error(&other.to_string()),
                };
                let _ = self.registry.send(&connection_id, frame).await;
            }
            RelayEnd::Disconnected => {
                // The recipient is gone: no error frame, no sentinel.
                debug!("Relay {} client disconnected", connection_id);
                self.registry.close(&connection_id);
                return;
            }
        }

        let _ = self.registry.send(&connection_id, OutboundFrame::Done).await;
        self.registry.close(&connection_id);
    }

    /// Serialized attempt loop with backoff and breaker bookkeeping
    async fn attempt_loop(&self, request: &RelayRequest, connection_id: &ConnectionId) -> RelayEnd {
        let breaker = self.breakers.breaker(&self.config.upstream_key());
        if let Err(err) = breaker.check() {
            // Shed load without touching the upstream.
            return RelayEnd::Failed(err);
        }

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.config.retry_max_delay)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.config.max_attempts;
        let mut forwarded = false;

        for attempt in 0..max_attempts {
            match self.run_attempt(request, connection_id, &mut forwarded).await {
                AttemptOutcome::Completed => {
                    breaker.record_success();
                    return RelayEnd::Completed;
                }
                AttemptOutcome::Disconnected => return RelayEnd::Disconnected,
                AttemptOutcome::Failed(err) => {
                    if err.is_transient() {
                        breaker.record_failure();
                    }

                    if forwarded {
                        // Content already reached the client; replaying the
                        // request would duplicate tokens they have seen.
                        warn!(
                            "Relay {} failed after partial content, not retrying: {}",
                            connection_id, err
                        );
                        return RelayEnd::Failed(err);
                    }

                    if err.is_permanent() {
                        return RelayEnd::Failed(err);
                    }

                    if attempt + 1 >= max_attempts {
                        return RelayEnd::Failed(RelayError::exhausted(
                            max_attempts,
                            err.to_string(),
                        ));
                    }

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.retry_max_delay);
                    warn!(
                        "Relay {} attempt {}/{} failed, retrying in {:?}: {}",
                        connection_id,
                        attempt + 1,
                        max_attempts,
                        delay,
                        err
                    );

                    let notice = OutboundFrame::Retry {
                        attempt: attempt + 1,
                        max_attempts,
                        delay,
                    };
                    if self.registry.send(connection_id, notice).await.is_err() {
                        return RelayEnd::Disconnected;
                    }

                    tokio::time::sleep(delay).await;
                }
            }
        }

        RelayEnd::Failed(RelayError::exhausted(max_attempts, "no attempt succeeded"))
    }

    /// One attempt: open the upstream stream and pump it through the
    /// decode pipeline
    async fn run_attempt(
        &self,
        request: &RelayRequest,
        connection_id: &ConnectionId,
        forwarded: &mut bool,
    ) -> AttemptOutcome {
        let payload = UpstreamPayload::new(request);
        let mut builder = self
            .http
            .post(&self.config.upstream_url)
            .header(header::ACCEPT, "text/event-stream, text/plain")
            .json(&payload);
        if let Some(ref key) = self.config.upstream_api_key {
            builder = builder.bearer_auth(key);
        }

        // The attempt timeout covers connect + initial response only; the
        // body read is bounded by the overall relay deadline so long
        // healthy streams are not cut off.
        let response = match tokio::time::timeout(self.config.attempt_timeout, builder.send()).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return AttemptOutcome::Failed(err.into()),
            Err(_) => {
                return AttemptOutcome::Failed(RelayError::timeout(format!(
                    "upstream gave no response within {:?}",
                    self.config.attempt_timeout
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return AttemptOutcome::Failed(mapping::map_upstream_error(status, &body));
        }

        let mut bytes = response.bytes_stream();
        let mut decoder = Utf8Decoder::new();
        let mut framer = LineFramer::new();

        loop {
            tokio::select! {
                chunk = bytes.next() => match chunk {
                    Some(Ok(data)) => {
                        let text = decoder.feed(&data);
                        for line in framer.feed(&text) {
                            match self.emit_line(&line, connection_id, forwarded).await {
                                LineFlow::Continue => {}
                                LineFlow::Terminate => return AttemptOutcome::Completed,
                                LineFlow::Disconnected => return AttemptOutcome::Disconnected,
                            }
                        }
                    }
                    Some(Err(err)) => return AttemptOutcome::Failed(err.into()),
                    None => {
                        // Stream ended: flush the decoder tail and any
                        // unterminated final line, best effort.
                        let mut trailing: Vec<String> = Vec::new();
                        if let Some(text) = decoder.finish() {
                            trailing.extend(framer.feed(&text));
                        }
                        if let Some(line) = framer.finish() {
                            trailing.push(line);
                        }
                        for line in trailing {
                            match self.emit_line(&line, connection_id, forwarded).await {
                                LineFlow::Continue => {}
                                LineFlow::Terminate => break,
                                LineFlow::Disconnected => return AttemptOutcome::Disconnected,
                            }
                        }
                        return AttemptOutcome::Completed;
                    }
                },
                () = self.registry.closed(connection_id) => {
                    // Client went away: drop the upstream connection now
                    // rather than holding the socket open.
                    return AttemptOutcome::Disconnected;
                }
            }
        }
    }

    /// Interpret one logical line and forward its frames
    async fn emit_line(
        &self,
        line: &str,
        connection_id: &ConnectionId,
        forwarded: &mut bool,
    ) -> LineFlow {
        let Some(event) = interpret(line) else {
            return LineFlow::Continue;
        };

        let terminal = matches!(event, UpstreamEvent::Error { .. });
        for frame in self.encoder.encode(&event) {
            let is_content = frame.is_content();
            if self.registry.send(connection_id, frame).await.is_err() {
                return LineFlow::Disconnected;
            }
            if is_content {
                *forwarded = true;
            }
        }

        if terminal {
            LineFlow::Terminate
        } else {
            LineFlow::Continue
        }
    }
}
