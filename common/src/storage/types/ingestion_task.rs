use std::time::Duration;

use chrono::Duration as ChronoDuration;
use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 300;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Pending,
    Reserved,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Reserved => "Reserved",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::DeadLetter)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct TaskErrorInfo {
    pub message: String,
}

/// How a processed task leaves the worker. `Retry` puts it back on the queue
/// after a delay; `DeadLetter` parks it for operator attention. There is no
/// cancel path since nothing in the engine cancels work mid-flight.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded,
    Retry {
        error: TaskErrorInfo,
        delay: Duration,
    },
    DeadLetter {
        error: TaskErrorInfo,
    },
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: TaskLifecycleMachine,
        initial: Pending,
        states: [Pending, Reserved, Processing, Succeeded, Failed, DeadLetter],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
                transition: { from: Failed, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Succeeded }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            deadletter {
                transition: { from: Failed, to: DeadLetter }
            }
            release {
                transition: { from: Reserved, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> TaskLifecycleMachine<(), Pending> {
        TaskLifecycleMachine::new(())
    }

    fn processing() -> TaskLifecycleMachine<(), Processing> {
        pending()
            .reserve()
            .expect("reserve transition from Pending should exist")
            .start_processing()
            .expect("start_processing transition from Reserved should exist")
    }

    /// A settle outcome is only legal from Processing; walking the typestate
    /// chain proves every settle path exists before the conditional update
    /// runs.
    pub(super) fn assert_settle_paths() {
        assert!(processing().succeed().is_ok());
        let failed = processing()
            .fail()
            .expect("fail transition from Processing should exist");
        assert!(failed.deadletter().is_ok());
    }
}

fn invalid_transition(state: TaskState, event: &str) -> AppError {
    AppError::Validation(format!(
        "Invalid task transition: {} -> {event}",
        state.as_str()
    ))
}

stored_object!(IngestionTask, "ingestion_task", {
    tenant_id: String,
    source_pointer: String,
    display_name: String,
    state: TaskState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_message: Option<String>
});

impl IngestionTask {
    pub fn new(tenant_id: String, source_pointer: String, display_name: String) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            source_pointer,
            display_name,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub async fn enqueue(
        tenant_id: String,
        source_pointer: String,
        display_name: String,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let task = Self::new(tenant_id, source_pointer, display_name);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Atomically claim the oldest due task. Pending and retry-scheduled
    /// tasks become eligible once their `scheduled_at` passes; a task whose
    /// worker lease expired is reclaimed (and its attempt counter left
    /// alone, since the attempt was already charged at the first claim).
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<IngestionTask>, AppError> {
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state IN $eligible
                  AND scheduled_at <= $now
                  AND (attempts < max_attempts OR state IN $leased)
                  AND (
                        locked_at = NONE
                        OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET state = $reserved,
                attempts = if state IN $leased THEN attempts ELSE math::min([attempts + 1, max_attempts]) END,
                locked_at = $now,
                worker_id = $worker,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let eligible = vec![
            TaskState::Pending.as_str(),
            TaskState::Failed.as_str(),
            TaskState::Reserved.as_str(),
            TaskState::Processing.as_str(),
        ];
        let leased = vec![TaskState::Reserved.as_str(), TaskState::Processing.as_str()];

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("eligible", eligible))
            .bind(("leased", leased))
            .bind(("reserved", TaskState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let task: Option<IngestionTask> = result.take(0)?;
        Ok(task)
    }

    /// Move a freshly-claimed task into Processing, guarded on the claiming
    /// worker still holding it.
    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<IngestionTask, AppError> {
        if !matches!(self.state, TaskState::Reserved) {
            return Err(invalid_transition(self.state, "start_processing"));
        }

        const START_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $processing, locked_at = $now, updated_at = $now
            WHERE state = $reserved AND worker_id = $worker
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("reserved", TaskState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, "start_processing"))
    }

    /// Settle a Processing task with its terminal-or-retry outcome in one
    /// guarded update.
    pub async fn settle(
        &self,
        outcome: TaskOutcome,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        if !matches!(self.state, TaskState::Processing) {
            return Err(invalid_transition(self.state, "settle"));
        }
        lifecycle::assert_settle_paths();

        let now = chrono::Utc::now();
        let (next_state, scheduled_at, error_message) = match &outcome {
            TaskOutcome::Succeeded => (TaskState::Succeeded, now, None),
            TaskOutcome::Retry { error, delay } => {
                let retry_at = now
                    + ChronoDuration::from_std(*delay)
                        .unwrap_or_else(|_| ChronoDuration::seconds(30));
                (TaskState::Failed, retry_at, Some(error.message.clone()))
            }
            TaskOutcome::DeadLetter { error } => {
                (TaskState::DeadLetter, now, Some(error.message.clone()))
            }
        };

        const SETTLE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $next_state,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $scheduled_at,
                error_message = $error_message,
                updated_at = $now
            WHERE state = $processing AND worker_id = $worker
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(SETTLE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("next_state", next_state.as_str()))
            .bind(("scheduled_at", SurrealDatetime::from(scheduled_at)))
            .bind(("error_message", error_message))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("worker", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, "settle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("task_test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn lease() -> Duration {
        Duration::from_secs(DEFAULT_LEASE_SECS as u64)
    }

    async fn enqueue_and_claim(db: &SurrealDbClient, worker: &str, name: &str) -> IngestionTask {
        IngestionTask::enqueue(
            "t1".into(),
            format!("raw/{name}"),
            name.into(),
            db,
        )
        .await
        .expect("task enqueued");

        IngestionTask::claim_next_ready(db, worker, Utc::now(), lease())
            .await
            .expect("claim query")
            .expect("task claimed")
    }

    #[tokio::test]
    async fn claim_reserves_the_oldest_due_task() {
        let db = memory_db().await;
        let claimed = enqueue_and_claim(&db, "worker-a", "report.pdf").await;

        assert_eq!(claimed.state, TaskState::Reserved);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));

        // Nothing else is due while the lease is held.
        let second = IngestionTask::claim_next_ready(&db, "worker-b", Utc::now(), lease())
            .await
            .expect("claim query");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn retry_outcome_reschedules_and_is_reclaimable() {
        let db = memory_db().await;
        let claimed = enqueue_and_claim(&db, "worker-a", "report.pdf").await;
        let processing = claimed.mark_processing(&db).await.expect("processing");

        let failed = processing
            .settle(
                TaskOutcome::Retry {
                    error: TaskErrorInfo {
                        message: "vector service 503".into(),
                    },
                    delay: Duration::from_secs(0),
                },
                &db,
            )
            .await
            .expect("settle retry");
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("vector service 503"));
        assert!(failed.can_retry());

        let reclaimed = IngestionTask::claim_next_ready(&db, "worker-b", Utc::now(), lease())
            .await
            .expect("claim query")
            .expect("failed task reclaimed");
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn succeeded_outcome_leaves_the_queue() {
        let db = memory_db().await;
        let claimed = enqueue_and_claim(&db, "worker-a", "report.pdf").await;
        let processing = claimed.mark_processing(&db).await.expect("processing");

        let done = processing
            .settle(TaskOutcome::Succeeded, &db)
            .await
            .expect("settle success");
        assert_eq!(done.state, TaskState::Succeeded);
        assert!(done.state.is_terminal());

        let next = IngestionTask::claim_next_ready(&db, "worker-a", Utc::now(), lease())
            .await
            .expect("claim query");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn dead_letter_outcome_parks_the_task() {
        let db = memory_db().await;
        let claimed = enqueue_and_claim(&db, "worker-a", "archive.zst").await;
        let processing = claimed.mark_processing(&db).await.expect("processing");

        let dead = processing
            .settle(
                TaskOutcome::DeadLetter {
                    error: TaskErrorInfo {
                        message: "Unsupported file type: .zst".into(),
                    },
                },
                &db,
            )
            .await
            .expect("settle dead letter");

        assert_eq!(dead.state, TaskState::DeadLetter);
        assert!(dead.state.is_terminal());
        assert_eq!(
            dead.error_message.as_deref(),
            Some("Unsupported file type: .zst")
        );

        let next = IngestionTask::claim_next_ready(&db, "worker-a", Utc::now(), lease())
            .await
            .expect("claim query");
        assert!(next.is_none(), "dead-lettered tasks are never re-claimed");
    }

    #[tokio::test]
    async fn settle_requires_a_processing_task() {
        let db = memory_db().await;
        let claimed = enqueue_and_claim(&db, "worker-a", "report.pdf").await;

        // Still Reserved; settling must be rejected locally.
        let result = claimed.settle(TaskOutcome::Succeeded, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
