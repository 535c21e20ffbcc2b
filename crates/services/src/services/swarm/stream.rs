//! Swarm Progress Streaming
//!
//! Turns database state into a live event feed. The publisher polls a
//! session and diffs against a cursor, so every subscriber sees each item
//! exactly once regardless of when it connected. The connection registry
//! fans engine-initiated notifications out to connected clients.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use db::models::bee_handover::BeeHandover;
use db::models::bee_run::{BeeRun, BeeRunStatus};
use db::models::bee_signal::BeeSignal;
use db::models::swarm_config::SwarmConfig;
use db::models::swarm_session::{SwarmSession, SwarmStatus};

/// One event on a session's progress stream.
#[derive(Debug, Clone)]
pub enum SwarmStreamEvent {
    /// A run appeared for the first time; carries the full run.
    BeeRunStatus(BeeRun),
    /// An already-seen run changed status.
    BeeRunProgress {
        run_id: Uuid,
        status: BeeRunStatus,
        status_text: Option<String>,
    },
    HiveContextUpdate {
        hive_context: Vec<String>,
    },
    BeeSignal(BeeSignal),
    BeeHandover(BeeHandover),
    /// Terminal. Always the last event on a stream.
    SwarmCompleted {
        status: SwarmStatus,
        result: Value,
    },
}

impl SwarmStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeeRunStatus(_) => "bee_run_status",
            Self::BeeRunProgress { .. } => "bee_run_progress",
            Self::HiveContextUpdate { .. } => "hive_context_update",
            Self::BeeSignal(_) => "bee_signal",
            Self::BeeHandover(_) => "bee_handover",
            Self::SwarmCompleted { .. } => "swarm_completed",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Self::BeeRunStatus(run) => serde_json::to_value(run).unwrap_or(Value::Null),
            Self::BeeRunProgress {
                run_id,
                status,
                status_text,
            } => json!({
                "run_id": run_id,
                "status": status,
                "status_text": status_text,
            }),
            Self::HiveContextUpdate { hive_context } => json!({ "hive_context": hive_context }),
            Self::BeeSignal(signal) => serde_json::to_value(signal).unwrap_or(Value::Null),
            Self::BeeHandover(handover) => serde_json::to_value(handover).unwrap_or(Value::Null),
            Self::SwarmCompleted { status, result } => json!({
                "status": status,
                "result": result,
            }),
        }
    }
}

/// Per-subscriber position in a session's history. Everything before the
/// cursor has been delivered.
#[derive(Debug, Default)]
pub struct StreamCursor {
    run_state: HashMap<Uuid, (BeeRunStatus, Option<String>)>,
    signal_state: HashMap<Uuid, bool>,
    seen_handovers: HashSet<Uuid>,
    hive_context_len: usize,
    completed_emitted: bool,
}

/// Polls a session and emits the delta since the subscriber's cursor.
pub struct StreamPublisher {
    db_pool: SqlitePool,
    poll_interval: Duration,
}

impl StreamPublisher {
    pub fn new(db_pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            db_pool,
            poll_interval,
        }
    }

    /// Poll interval from the stored engine configuration.
    pub async fn from_config(db_pool: SqlitePool) -> Result<Self, sqlx::Error> {
        let config = SwarmConfig::get(&db_pool).await?;
        let poll_interval = Duration::from_millis(config.stream_poll_interval_ms.max(50) as u64);
        Ok(Self::new(db_pool, poll_interval))
    }

    /// One diff pass. Returns the new events plus whether the stream is done.
    /// Events for an item are emitted at most once per cursor; the terminal
    /// `swarm_completed` event closes the stream.
    pub async fn poll_once(
        &self,
        session_id: Uuid,
        cursor: &mut StreamCursor,
    ) -> Result<(Vec<SwarmStreamEvent>, bool), sqlx::Error> {
        let Some(session) = SwarmSession::find_by_id(&self.db_pool, session_id).await? else {
            // Session deleted out from under the stream. Nothing more to say.
            return Ok((Vec::new(), true));
        };

        let mut events = Vec::new();

        for run in BeeRun::find_by_session_id(&self.db_pool, session_id).await? {
            let state = (run.status, run.status_text.clone());
            match cursor.run_state.get(&run.id) {
                None => {
                    cursor.run_state.insert(run.id, state);
                    events.push(SwarmStreamEvent::BeeRunStatus(run));
                }
                Some(previous) if *previous != state => {
                    cursor.run_state.insert(run.id, state);
                    events.push(SwarmStreamEvent::BeeRunProgress {
                        run_id: run.id,
                        status: run.status,
                        status_text: run.status_text,
                    });
                }
                Some(_) => {}
            }
        }

        if session.hive_context.len() > cursor.hive_context_len {
            cursor.hive_context_len = session.hive_context.len();
            events.push(SwarmStreamEvent::HiveContextUpdate {
                hive_context: session.hive_context.clone(),
            });
        }

        for signal in BeeSignal::find_by_session_id(&self.db_pool, session_id).await? {
            match cursor.signal_state.get(&signal.id) {
                Some(resolved) if *resolved == signal.is_resolved => {}
                _ => {
                    cursor.signal_state.insert(signal.id, signal.is_resolved);
                    events.push(SwarmStreamEvent::BeeSignal(signal));
                }
            }
        }

        for handover in BeeHandover::find_by_session_id(&self.db_pool, session_id).await? {
            if cursor.seen_handovers.insert(handover.id) {
                events.push(SwarmStreamEvent::BeeHandover(handover));
            }
        }

        let mut terminal = false;
        if session.status.is_terminal() && !cursor.completed_emitted {
            cursor.completed_emitted = true;
            terminal = true;
            events.push(SwarmStreamEvent::SwarmCompleted {
                status: session.status,
                result: session.result.unwrap_or(Value::Null),
            });
        }

        Ok((events, terminal))
    }

    /// Open a live stream for a session. The background poll loop ends when
    /// the session reaches a terminal state or the subscriber goes away.
    pub fn stream(&self, session_id: Uuid) -> mpsc::Receiver<SwarmStreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let publisher = StreamPublisher::new(self.db_pool.clone(), self.poll_interval);

        tokio::spawn(async move {
            let mut cursor = StreamCursor::default();
            loop {
                let (events, terminal) = match publisher.poll_once(session_id, &mut cursor).await {
                    Ok(delta) => delta,
                    Err(e) => {
                        warn!(swarm_session_id = %session_id, error = %e, "Stream poll failed");
                        break;
                    }
                };

                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!(swarm_session_id = %session_id, "Stream subscriber went away");
                        return;
                    }
                }

                if terminal {
                    break;
                }
                tokio::time::sleep(publisher.poll_interval).await;
            }
        });

        rx
    }
}

struct Connection {
    user_id: Uuid,
    org_id: Uuid,
    sender: mpsc::Sender<SwarmStreamEvent>,
}

/// Connected notification clients, keyed by connection id. One user may hold
/// several connections (tabs, devices); sends target all of them. A slow or
/// dead subscriber never blocks delivery to the others.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, user_id: Uuid, org_id: Uuid) -> (Uuid, mpsc::Receiver<SwarmStreamEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let conn_id = Uuid::new_v4();
        self.connections.write().await.insert(
            conn_id,
            Connection {
                user_id,
                org_id,
                sender: tx,
            },
        );
        debug!(conn_id = %conn_id, user_id = %user_id, "Client connected");
        (conn_id, rx)
    }

    pub async fn remove(&self, conn_id: Uuid) {
        if self.connections.write().await.remove(&conn_id).is_some() {
            debug!(conn_id = %conn_id, "Client disconnected");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Deliver to every connection of one user. Returns how many received it.
    pub async fn send_to_user(&self, user_id: Uuid, event: &SwarmStreamEvent) -> usize {
        self.send_where(|c| c.user_id == user_id, event).await
    }

    /// Deliver to every connection in an organization. Returns how many
    /// received it.
    pub async fn send_to_org(&self, org_id: Uuid, event: &SwarmStreamEvent) -> usize {
        self.send_where(|c| c.org_id == org_id, event).await
    }

    async fn send_where<F>(&self, filter: F, event: &SwarmStreamEvent) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (conn_id, connection) in connections.iter() {
            if !filter(connection) {
                continue;
            }
            match connection.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "Dropping event for subscriber");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use db::models::agent_definition::BeeType;
    use db::models::swarm_session::CreateSwarmSession;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::schema::create_all(&pool).await.unwrap();
        pool
    }

    async fn create_session(pool: &SqlitePool) -> SwarmSession {
        SwarmSession::create(
            pool,
            &CreateSwarmSession {
                org_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                trigger_message: "audit everything".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_poll_never_emits_duplicates() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let run = BeeRun::create(&pool, session.id, 0, BeeType::Operator, "auditor", Uuid::new_v4())
            .await
            .unwrap();

        let publisher = StreamPublisher::new(pool.clone(), Duration::from_millis(50));
        let mut cursor = StreamCursor::default();

        let (first, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name(), "bee_run_status");

        // Nothing changed, nothing emitted.
        let (second, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert!(second.is_empty());

        // A status change emits progress, once.
        BeeRun::complete_run(&pool, run.id, "done", 10).await.unwrap();
        let (third, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].name(), "bee_run_progress");
        let (fourth, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert!(fourth.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_session_closes_the_stream() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        SwarmSession::finalize(
            &pool,
            session.id,
            SwarmStatus::Completed,
            &json!({ "synthesized_response": "all good" }),
        )
        .await
        .unwrap();

        let publisher = StreamPublisher::new(pool.clone(), Duration::from_millis(50));
        let mut cursor = StreamCursor::default();

        let (events, terminal) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert!(terminal);
        assert_eq!(events.last().map(|e| e.name()), Some("swarm_completed"));

        // A late poll after the terminal event stays silent.
        let (after, terminal) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        assert!(after.is_empty());
        assert!(!terminal);
    }

    #[tokio::test]
    async fn test_fresh_cursor_replays_history() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let run = BeeRun::create(&pool, session.id, 0, BeeType::Operator, "auditor", Uuid::new_v4())
            .await
            .unwrap();
        BeeSignal::create(
            &pool,
            session.id,
            run.id,
            db::models::bee_signal::SignalType::Info,
            "heads up",
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        SwarmSession::update_hive_context(&pool, session.id, &["[auditor] findings".to_string()])
            .await
            .unwrap();

        // A subscriber connecting late still sees everything.
        let publisher = StreamPublisher::new(pool.clone(), Duration::from_millis(50));
        let mut cursor = StreamCursor::default();
        let (events, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert!(names.contains(&"bee_run_status"));
        assert!(names.contains(&"bee_signal"));
        assert!(names.contains(&"hive_context_update"));
    }

    #[tokio::test]
    async fn test_signal_resolution_is_re_emitted() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let run = BeeRun::create(&pool, session.id, 0, BeeType::Operator, "auditor", Uuid::new_v4())
            .await
            .unwrap();
        let signal = BeeSignal::create(
            &pool,
            session.id,
            run.id,
            db::models::bee_signal::SignalType::Hold,
            "please confirm",
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let publisher = StreamPublisher::new(pool.clone(), Duration::from_millis(50));
        let mut cursor = StreamCursor::default();
        publisher.poll_once(session.id, &mut cursor).await.unwrap();

        BeeSignal::resolve(&pool, session.id, signal.id).await.unwrap();
        let (events, _) = publisher.poll_once(session.id, &mut cursor).await.unwrap();
        let signal_events: Vec<_> = events.iter().filter(|e| e.name() == "bee_signal").collect();
        assert_eq!(signal_events.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_routes_by_user_and_org() {
        let registry = ConnectionRegistry::new();
        let org = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (alice_conn, mut alice_rx) = registry.add(alice, org).await;
        let (_bob_conn, mut bob_rx) = registry.add(bob, org).await;

        let event = SwarmStreamEvent::HiveContextUpdate {
            hive_context: vec!["update".to_string()],
        };

        assert_eq!(registry.send_to_user(alice, &event).await, 1);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());

        assert_eq!(registry.send_to_org(org, &event).await, 2);

        registry.remove(alice_conn).await;
        assert_eq!(registry.send_to_org(org, &event).await, 1);
    }
}
