//! Swarm Job Queue
//!
//! Dispatch hands finished plans to a queue and returns immediately; a
//! worker picks the job up and drives the executor. The queue is a trait so
//! deployments can back it with a broker, and tests can capture jobs without
//! executing anything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use db::models::swarm_config::SwarmConfig;
use sqlx::SqlitePool;

use super::executor::{SwarmExecutor, SwarmJob};

#[async_trait]
pub trait SwarmQueue: Send + Sync {
    /// Accept a job for asynchronous execution. Returning Ok means the job
    /// will eventually run, not that it ran.
    async fn enqueue(&self, job: SwarmJob) -> anyhow::Result<()>;
}

/// Retry policy for job execution.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_retries: i32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl QueueConfig {
    /// Retry policy from the stored engine configuration, defaults when the
    /// row is unreadable.
    pub async fn load(pool: &SqlitePool) -> Self {
        match SwarmConfig::get(pool).await {
            Ok(config) => Self {
                max_retries: config.queue_max_retries.max(0),
                base_delay_ms: config.queue_base_delay_ms.max(0) as u64,
                ..Self::default()
            },
            Err(e) => {
                warn!(error = %e, "Could not load queue config, using defaults");
                Self::default()
            }
        }
    }

    fn retry_delay(&self, attempt: i32) -> Duration {
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt - 1);
        Duration::from_millis(delay as u64)
    }
}

/// In-process queue: each job runs on a spawned task with exponential
/// backoff between attempts. Re-running a job is safe because the executor
/// is idempotent over session state.
pub struct LocalSwarmQueue {
    executor: Arc<SwarmExecutor>,
    config: QueueConfig,
}

impl LocalSwarmQueue {
    pub fn new(executor: Arc<SwarmExecutor>, config: QueueConfig) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl SwarmQueue for LocalSwarmQueue {
    async fn enqueue(&self, job: SwarmJob) -> anyhow::Result<()> {
        let executor = self.executor.clone();
        let config = self.config.clone();

        info!(
            swarm_session_id = %job.swarm_session_id,
            bee_count = job.dispatch_plan.selected_bees.len(),
            "Enqueued swarm job"
        );

        tokio::spawn(async move {
            let mut attempt = 1;
            loop {
                match executor.run(&job).await {
                    Ok(()) => return,
                    Err(e) if attempt <= config.max_retries => {
                        let delay = config.retry_delay(attempt);
                        warn!(
                            swarm_session_id = %job.swarm_session_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Swarm job failed, will retry"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        error!(
                            swarm_session_id = %job.swarm_session_id,
                            attempts = attempt,
                            error = %e,
                            "Swarm job failed after max retries"
                        );
                        return;
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backs_off_exponentially() {
        let config = QueueConfig {
            max_retries: 3,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(400));
    }
}
