//! Tracking of active relay connections
//!
//! Every live relay is registered here for heartbeats, idle eviction, and
//! graceful drain on shutdown. The registry owns its background tasks:
//! they are started on construction and cancelled by `shutdown`, never
//! implicitly at import the way the original proxy did it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sse::OutboundFrame;

/// Identifier of one registered connection
pub type ConnectionId = String;

/// Frames buffered per connection before the relay task backpressures
const CHANNEL_CAPACITY: usize = 64;

/// Snapshot of one active connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub session_id: String,
    pub client_ip: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub is_active: bool,
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Total active connections
    pub total: usize,

    /// Number of distinct sessions with at least one connection
    pub sessions: usize,

    /// Connection counts per client IP
    pub by_ip: HashMap<String, usize>,

    /// Age of the oldest connection
    pub oldest_age: Duration,
}

struct ConnectionEntry {
    session_id: String,
    client_ip: String,
    created_at: Instant,
    last_activity: Instant,
    sender: mpsc::Sender<OutboundFrame>,
}

struct RegistryInner {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    accepting: AtomicBool,
    max_connections: usize,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
    cleanup_interval: Duration,
}

/// Registry of active relay connections
///
/// Shared state is a mutex-guarded map mutated by arbitrarily many relay
/// tasks; the lock is never held across an await.
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionRegistry {
    /// Create a registry and start its heartbeat and cleanup tasks
    pub fn new(config: &RelayConfig) -> Self {
        let inner = Arc::new(RegistryInner {
            connections: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            max_connections: config.max_connections,
            heartbeat_interval: config.heartbeat_interval,
            idle_timeout: config.idle_timeout,
            cleanup_interval: config.cleanup_interval,
        });

        let heartbeat_task = tokio::spawn(Self::heartbeat_loop(Arc::clone(&inner)));
        let cleanup_task = tokio::spawn(Self::cleanup_loop(Arc::clone(&inner)));

        Self {
            inner,
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
            cleanup_task: Mutex::new(Some(cleanup_task)),
        }
    }

    /// Register a new connection
    ///
    /// Rejects with `Capacity` above the concurrent-connection ceiling and
    /// with `Draining` once shutdown has begun; both happen before any
    /// upstream call. Returns the connection id and the frame receiver the
    /// client stream reads from.
    pub fn create(
        &self,
        session_id: &str,
        client_ip: &str,
    ) -> Result<(ConnectionId, mpsc::Receiver<OutboundFrame>)> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(RelayError::draining("no new connections accepted"));
        }

        let mut connections = self.inner.connections.lock().unwrap();
        if connections.len() >= self.inner.max_connections {
            return Err(RelayError::capacity(format!(
                "active connection ceiling of {} reached",
                self.inner.max_connections
            )));
        }

        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let now = Instant::now();

        connections.insert(
            id.clone(),
            ConnectionEntry {
                session_id: session_id.to_string(),
                client_ip: client_ip.to_string(),
                created_at: now,
                last_activity: now,
                sender,
            },
        );

        info!("Registered connection {} for session {}", id, session_id);
        Ok((id, receiver))
    }

    /// Deliver a frame to a connection, refreshing its activity timestamp
    ///
    /// Fails with `Disconnected` when the connection is gone or its client
    /// stopped reading.
    pub async fn send(&self, id: &ConnectionId, frame: OutboundFrame) -> Result<()> {
        let sender = {
            let mut connections = self.inner.connections.lock().unwrap();
            let entry = connections
                .get_mut(id)
                .ok_or_else(|| RelayError::disconnected(format!("connection {} not found", id)))?;
            entry.last_activity = Instant::now();
            entry.sender.clone()
        };

        sender
            .send(frame)
            .await
            .map_err(|_| RelayError::disconnected(format!("client for connection {} went away", id)))
    }

    /// Wait until a connection's client stops reading
    ///
    /// Completes when the receiver side of the connection channel is
    /// dropped, or immediately if the connection is already gone. Used by
    /// relay tasks to cancel upstream reads on client disconnect.
    pub async fn closed(&self, id: &ConnectionId) {
        let sender = {
            let connections = self.inner.connections.lock().unwrap();
            connections.get(id).map(|entry| entry.sender.clone())
        };

        match sender {
            Some(sender) => sender.closed().await,
            None => {}
        }
    }

    /// Refresh a connection's activity timestamp
    pub fn touch(&self, id: &ConnectionId) {
        let mut connections = self.inner.connections.lock().unwrap();
        if let Some(entry) = connections.get_mut(id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Remove a connection, closing its outbound frame stream
    pub fn close(&self, id: &ConnectionId) {
        let removed = self.inner.connections.lock().unwrap().remove(id);
        if removed.is_some() {
            info!("Closed connection {}", id);
        }
    }

    /// Look up a connection snapshot
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let connections = self.inner.connections.lock().unwrap();
        connections.get(id).map(|entry| ConnectionInfo {
            id: id.clone(),
            session_id: entry.session_id.clone(),
            client_ip: entry.client_ip.clone(),
            created_at: entry.created_at,
            last_activity: entry.last_activity,
            is_active: true,
        })
    }

    /// Number of active connections
    pub fn active_count(&self) -> usize {
        self.inner.connections.lock().unwrap().len()
    }

    /// Connection statistics
    pub fn stats(&self) -> RegistryStats {
        let connections = self.inner.connections.lock().unwrap();

        let mut by_ip: HashMap<String, usize> = HashMap::new();
        let mut sessions: HashSet<&str> = HashSet::new();
        let mut oldest: Option<Instant> = None;

        for entry in connections.values() {
            *by_ip.entry(entry.client_ip.clone()).or_insert(0) += 1;
            sessions.insert(entry.session_id.as_str());
            oldest = match oldest {
                Some(current) if current <= entry.created_at => Some(current),
                _ => Some(entry.created_at),
            };
        }

        RegistryStats {
            total: connections.len(),
            sessions: sessions.len(),
            by_ip,
            oldest_age: oldest.map(|i| i.elapsed()).unwrap_or_default(),
        }
    }

    /// Whether new connections are currently admitted
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Drain the registry for process shutdown
    ///
    /// Stops admissions, cancels the background tasks, then waits up to
    /// `deadline` for active relays to finish. Connections still open at
    /// the deadline are force-closed and logged.
    pub async fn shutdown(&self, deadline: Duration) {
        self.inner.accepting.store(false, Ordering::SeqCst);

        if let Some(task) = self.heartbeat_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.cleanup_task.lock().unwrap().take() {
            task.abort();
        }

        let started = Instant::now();
        while started.elapsed() < deadline {
            if self.active_count() == 0 {
                info!("Registry drained cleanly");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let force_closed: Vec<ConnectionId> = {
            let mut connections = self.inner.connections.lock().unwrap();
            let ids: Vec<ConnectionId> = connections.keys().cloned().collect();
            connections.clear();
            ids
        };

        if !force_closed.is_empty() {
            warn!(
                "Shutdown deadline reached, force-closed {} connection(s): {:?}",
                force_closed.len(),
                force_closed
            );
        }
    }

    /// Periodic keep-alive for connections with no recent outbound frame
    async fn heartbeat_loop(inner: Arc<RegistryInner>) {
        let mut ticker = tokio::time::interval(inner.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let mut dead: Vec<ConnectionId> = Vec::new();
            let mut sent = 0usize;
            {
                let mut connections = inner.connections.lock().unwrap();
                for (id, entry) in connections.iter_mut() {
                    if entry.last_activity.elapsed() < inner.heartbeat_interval {
                        continue;
                    }
                    match entry.sender.try_send(OutboundFrame::keep_alive()) {
                        Ok(()) => {
                            entry.last_activity = Instant::now();
                            sent += 1;
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // The relay is actively pushing frames; the
                            // client is not idle, skip it.
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            dead.push(id.clone());
                        }
                    }
                }
                for id in &dead {
                    connections.remove(id);
                }
            }

            if sent > 0 {
                debug!("Sent heartbeat to {} connection(s)", sent);
            }
            if !dead.is_empty() {
                info!("Dropped {} dead connection(s) during heartbeat", dead.len());
            }
        }
    }

    /// Periodic eviction of idle connections
    async fn cleanup_loop(inner: Arc<RegistryInner>) {
        let mut ticker = tokio::time::interval(inner.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let evicted: Vec<ConnectionId> = {
                let mut connections = inner.connections.lock().unwrap();
                let idle: Vec<ConnectionId> = connections
                    .iter()
                    .filter(|(_, entry)| entry.last_activity.elapsed() > inner.idle_timeout)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &idle {
                    if let Some(entry) = connections.remove(id) {
                        // Evicted clients still get their terminal frame,
                        // best effort.
                        let _ = entry.sender.try_send(OutboundFrame::Done);
                    }
                }
                idle
            };

            if !evicted.is_empty() {
                info!("Evicted {} idle connection(s)", evicted.len());
            }
        }
    }
}
