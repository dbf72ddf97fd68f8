//! Distributed mutual exclusion across scheduled job instances via a single
//! `ingestion_locks` row per job name, with heartbeat-based stale-lock
//! reclaim and an NZ-local-time termination cutoff.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::database::DbPool;
use crate::errors::LockError;
use crate::nz_time::should_terminate_for_nz_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    ConcurrentExecutionDetected,
}

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_claim(
        &self,
        job_name: &str,
        holder_id: &str,
        stale_after_ms: u64,
    ) -> Result<LockAcquisition, LockError>;

    async fn heartbeat(&self, job_name: &str, holder_id: &str, progress: serde_json::Value) -> Result<(), LockError>;

    async fn release(
        &self,
        job_name: &str,
        holder_id: &str,
        status: &str,
        progress: serde_json::Value,
    ) -> Result<(), LockError>;
}

pub struct PgLockStore {
    pool: DbPool,
}

impl PgLockStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_claim(
        &self,
        job_name: &str,
        holder_id: &str,
        stale_after_ms: u64,
    ) -> Result<LockAcquisition, LockError> {
        let row = sqlx::query(
            "INSERT INTO ingestion_locks (job_name, holder_id, acquired_at, heartbeat_at, status, progress) \
             VALUES ($1, $2, now(), now(), 'active', '{}'::jsonb) \
             ON CONFLICT (job_name) DO UPDATE SET \
               holder_id = excluded.holder_id, acquired_at = now(), heartbeat_at = now(), \
               status = 'active', progress = excluded.progress \
             WHERE ingestion_locks.status != 'active' \
                OR ingestion_locks.heartbeat_at < now() - ($3 || ' milliseconds')::interval \
             RETURNING holder_id",
        )
        .bind(job_name)
        .bind(holder_id)
        .bind(stale_after_ms.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Store(e.to_string()))?;

        match row {
            Some(r) => {
                let claimed_by: String = r.try_get("holder_id").map_err(|e| LockError::Store(e.to_string()))?;
                if claimed_by == holder_id {
                    Ok(LockAcquisition::Acquired)
                } else {
                    Ok(LockAcquisition::ConcurrentExecutionDetected)
                }
            }
            None => Ok(LockAcquisition::ConcurrentExecutionDetected),
        }
    }

    async fn heartbeat(&self, job_name: &str, holder_id: &str, progress: serde_json::Value) -> Result<(), LockError> {
        sqlx::query(
            "UPDATE ingestion_locks SET heartbeat_at = now(), progress = $3 WHERE job_name = $1 AND holder_id = $2",
        )
        .bind(job_name)
        .bind(holder_id)
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Store(e.to_string()))?;
        Ok(())
    }

    async fn release(
        &self,
        job_name: &str,
        holder_id: &str,
        status: &str,
        progress: serde_json::Value,
    ) -> Result<(), LockError> {
        sqlx::query(
            "UPDATE ingestion_locks SET status = $3, progress = $4 WHERE job_name = $1 AND holder_id = $2",
        )
        .bind(job_name)
        .bind(holder_id)
        .bind(status)
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Store(e.to_string()))?;
        Ok(())
    }
}

/// Owns the lifetime of one job's lock: acquisition, heartbeat ticker and
/// release. Callers must wrap their job body so `release` always runs, even
/// on early termination or an unhandled error.
pub struct LockHandle {
    store: Arc<dyn LockStore>,
    job_name: String,
    holder_id: String,
    started_at: chrono::DateTime<Utc>,
    progress: Arc<ArcSwap<serde_json::Value>>,
    stop_heartbeat: Option<tokio::sync::watch::Sender<bool>>,
    heartbeat_task: Option<tokio::task::JoinHandle<()>>,
}

impl LockHandle {
    /// `fast_lock_check` in spec terms: must resolve quickly (no retries,
    /// a single upsert round trip). Returns `None` if another holder is
    /// active with a fresh heartbeat.
    pub async fn acquire(
        store: Arc<dyn LockStore>,
        job_name: &str,
        stale_after_ms: u64,
    ) -> Result<Option<Self>, LockError> {
        let holder_id = Uuid::new_v4().to_string();
        let acquisition = store.try_claim(job_name, &holder_id, stale_after_ms).await?;
        match acquisition {
            LockAcquisition::ConcurrentExecutionDetected => Ok(None),
            LockAcquisition::Acquired => Ok(Some(Self {
                store,
                job_name: job_name.to_string(),
                holder_id,
                started_at: Utc::now(),
                progress: Arc::new(ArcSwap::from_pointee(serde_json::json!({}))),
                stop_heartbeat: None,
                heartbeat_task: None,
            })),
        }
    }

    /// Starts a background ticker that writes `heartbeat_at = now()` and
    /// the latest progress snapshot every `interval`.
    pub fn setup_heartbeat(&mut self, interval: Duration) {
        let (tx, mut rx) = tokio::sync::watch::channel(false);
        let store = self.store.clone();
        let job_name = self.job_name.clone();
        let holder_id = self.holder_id.clone();
        let progress = self.progress.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = (**progress.load()).clone();
                        if let Err(err) = store.heartbeat(&job_name, &holder_id, snapshot).await {
                            tracing::warn!(job_name, error = %err, "heartbeat write failed");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        self.stop_heartbeat = Some(tx);
        self.heartbeat_task = Some(task);
    }

    /// Records a compact progress checkpoint read by the next heartbeat
    /// tick, without blocking on a database round trip.
    pub fn checkpoint(&self, progress: serde_json::Value) {
        self.progress.store(Arc::new(progress));
    }

    pub fn should_terminate_for_nz_time(&self, termination_hour: u32) -> bool {
        should_terminate_for_nz_time(Utc::now(), self.started_at, termination_hour)
    }

    /// Sets the final status, writes final progress and stops the
    /// heartbeat ticker. Idempotent: safe to call once per exit path.
    pub async fn release(&mut self, reason: &str, final_progress: serde_json::Value) -> Result<(), LockError> {
        if let Some(tx) = self.stop_heartbeat.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.heartbeat_task.take() {
            let _ = task.await;
        }
        self.store.release(&self.job_name, &self.holder_id, reason, final_progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemoryLockStore {
        state: Mutex<Option<(String, chrono::DateTime<Utc>)>>, // (holder_id, heartbeat_at)
    }

    impl InMemoryLockStore {
        fn new() -> Self {
            Self { state: Mutex::new(None) }
        }
    }

    #[async_trait]
    impl LockStore for InMemoryLockStore {
        async fn try_claim(
            &self,
            _job_name: &str,
            holder_id: &str,
            stale_after_ms: u64,
        ) -> Result<LockAcquisition, LockError> {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now();
            let stale = state
                .as_ref()
                .map(|(_, hb)| (now - *hb).num_milliseconds() as u64 > stale_after_ms)
                .unwrap_or(true);
            if stale {
                *state = Some((holder_id.to_string(), now));
                Ok(LockAcquisition::Acquired)
            } else {
                Ok(LockAcquisition::ConcurrentExecutionDetected)
            }
        }

        async fn heartbeat(&self, _job_name: &str, holder_id: &str, _progress: serde_json::Value) -> Result<(), LockError> {
            let mut state = self.state.lock().unwrap();
            *state = Some((holder_id.to_string(), Utc::now()));
            Ok(())
        }

        async fn release(&self, _job_name: &str, _holder_id: &str, _status: &str, _progress: serde_json::Value) -> Result<(), LockError> {
            let mut state = self.state.lock().unwrap();
            *state = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_concurrent_acquire_is_rejected_while_first_holds_fresh_heartbeat() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let first = LockHandle::acquire(store.clone(), "discovery", 60_000).await.unwrap();
        assert!(first.is_some());

        let second = LockHandle::acquire(store.clone(), "discovery", 60_000).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn stale_lock_can_be_reclaimed() {
        struct AlwaysStale;
        #[async_trait]
        impl LockStore for AlwaysStale {
            async fn try_claim(&self, _j: &str, _h: &str, _s: u64) -> Result<LockAcquisition, LockError> {
                Ok(LockAcquisition::Acquired)
            }
            async fn heartbeat(&self, _j: &str, _h: &str, _p: serde_json::Value) -> Result<(), LockError> {
                Ok(())
            }
            async fn release(&self, _j: &str, _h: &str, _s: &str, _p: serde_json::Value) -> Result<(), LockError> {
                Ok(())
            }
        }
        let store: Arc<dyn LockStore> = Arc::new(AlwaysStale);
        let reclaimed = LockHandle::acquire(store, "discovery", 60_000).await.unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn release_is_safe_without_heartbeat_started() {
        let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
        let mut handle = LockHandle::acquire(store, "discovery", 60_000).await.unwrap().unwrap();
        handle.release("completed", serde_json::json!({"done": true})).await.unwrap();
    }
}
