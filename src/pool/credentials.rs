//! Rotating credential pool with per-credential health tracking.
//!
//! Rotation is a plain cursor over the configured list. Failed credentials
//! stay in the rotation; only their counters change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::ConfigError;
use crate::llm::Credential;

/// Health state for a single credential.
#[derive(Debug, Clone, Default)]
struct CredentialHealth {
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure_reason: Option<String>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Serializable snapshot of credential health.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealthSnapshot {
    pub index: usize,
    /// Unknown until the credential has been used at least once.
    pub validity: CredentialValidity,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_reason: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialValidity {
    Unknown,
    Working,
    Failing,
}

struct PoolState {
    cursor: usize,
    health: Vec<CredentialHealth>,
}

/// Round-robin pool of backend credentials.
///
/// Safe to share between concurrent runs; cursor and counters are updated
/// under one lock.
pub struct CredentialPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from secrets in rotation order.
    ///
    /// # Errors
    /// Returns `ConfigError::EmptyPool` if `secrets` is empty.
    pub fn new<I, S>(secrets: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials: Vec<Credential> = secrets
            .into_iter()
            .enumerate()
            .map(|(index, secret)| Credential::new(index, secret))
            .collect();
        if credentials.is_empty() {
            return Err(ConfigError::EmptyPool("credential"));
        }
        let health = vec![CredentialHealth::default(); credentials.len()];
        Ok(Self {
            credentials,
            state: Mutex::new(PoolState { cursor: 0, health }),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Return the credential under the cursor and advance it.
    pub async fn next(&self) -> Credential {
        let mut state = self.state.lock().await;
        let credential = self.credentials[state.cursor].clone();
        state.cursor = (state.cursor + 1) % self.credentials.len();
        credential
    }

    /// Record a failed attempt. The credential stays in rotation.
    pub async fn mark_failed(&self, credential: &Credential, reason: &str) {
        let mut state = self.state.lock().await;
        let Some(health) = state.health.get_mut(credential.index()) else {
            return;
        };
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.total_failures += 1;
        health.last_failure_reason = Some(reason.to_string());
        health.last_failure_at = Some(Utc::now());

        tracing::info!(
            credential = credential.index(),
            consecutive_failures = health.consecutive_failures,
            reason = %reason,
            "Credential attempt failed"
        );
    }

    /// Record a successful attempt, resetting consecutive failures.
    pub async fn mark_succeeded(&self, credential: &Credential) {
        let mut state = self.state.lock().await;
        if let Some(health) = state.health.get_mut(credential.index()) {
            health.consecutive_failures = 0;
            health.total_successes += 1;
        }
    }

    /// Health snapshot for every credential, in pool order.
    pub async fn snapshot(&self) -> Vec<CredentialHealthSnapshot> {
        let state = self.state.lock().await;
        state
            .health
            .iter()
            .enumerate()
            .map(|(index, h)| CredentialHealthSnapshot {
                index,
                validity: if h.total_successes == 0 && h.total_failures == 0 {
                    CredentialValidity::Unknown
                } else if h.consecutive_failures == 0 {
                    CredentialValidity::Working
                } else {
                    CredentialValidity::Failing
                },
                consecutive_failures: h.consecutive_failures,
                total_failures: h.total_failures,
                total_successes: h.total_successes,
                last_failure_reason: h.last_failure_reason.clone(),
                last_failure_at: h.last_failure_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_a_configuration_error() {
        let result = CredentialPool::new(Vec::<String>::new());
        assert!(matches!(result, Err(ConfigError::EmptyPool("credential"))));
    }

    #[tokio::test]
    async fn next_cycles_in_order() {
        let pool = CredentialPool::new(["a", "b", "c"]).unwrap();
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(pool.next().await.index());
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_draws_keep_rotation_and_counters_consistent() {
        const TASKS: usize = 8;
        const DRAWS: usize = 30;

        let pool = std::sync::Arc::new(CredentialPool::new(["a", "b", "c"]).unwrap());
        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut drawn = Vec::with_capacity(DRAWS);
                for _ in 0..DRAWS {
                    let credential = pool.next().await;
                    pool.mark_failed(&credential, "rate_limit").await;
                    drawn.push(credential.index());
                    tokio::task::yield_now().await;
                }
                drawn
            }));
        }

        let mut per_index = [0usize; 3];
        for handle in handles {
            for index in handle.await.unwrap() {
                per_index[index] += 1;
            }
        }
        assert_eq!(per_index, [TASKS * DRAWS / 3; 3]);

        let health = pool.snapshot().await;
        let total: u64 = health.iter().map(|h| h.total_failures).sum();
        assert_eq!(total, (TASKS * DRAWS) as u64);
        for h in &health {
            assert_eq!(h.total_failures, (TASKS * DRAWS / 3) as u64);
            assert_eq!(h.validity, CredentialValidity::Failing);
        }
    }

    #[tokio::test]
    async fn failed_credentials_stay_in_rotation() {
        let pool = CredentialPool::new(["a", "b"]).unwrap();
        let first = pool.next().await;
        pool.mark_failed(&first, "rate_limit").await;
        pool.mark_failed(&first, "rate_limit").await;

        assert_eq!(pool.next().await.index(), 1);
        assert_eq!(pool.next().await.index(), 0);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].consecutive_failures, 2);
        assert_eq!(snapshot[0].validity, CredentialValidity::Failing);
        assert_eq!(snapshot[0].last_failure_reason.as_deref(), Some("rate_limit"));
        assert_eq!(snapshot[1].validity, CredentialValidity::Unknown);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let pool = CredentialPool::new(["a"]).unwrap();
        let credential = pool.next().await;
        pool.mark_failed(&credential, "timeout").await;
        pool.mark_succeeded(&credential).await;

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].consecutive_failures, 0);
        assert_eq!(snapshot[0].total_failures, 1);
        assert_eq!(snapshot[0].total_successes, 1);
        assert_eq!(snapshot[0].validity, CredentialValidity::Working);
    }
}
