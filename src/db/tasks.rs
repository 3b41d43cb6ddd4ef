//! Task queue operations via direct SQLx.
//!
//! Each method is a single statement; the conditional updates carry their
//! guard in the `WHERE` clause and report success through the affected row
//! count or `RETURNING`.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{
    ClaimFilter, Finalize, ListQuery, NewTask, State, TERMINAL_THRESHOLD, Task, TaskId,
};
use crate::store::{InsertOutcome, PRIORITY_EXHAUSTED, TaskStore};

/// Column list for `task_queue` queries.
const COLUMNS: &str = "\
    id, priority, description, task_type, configuration, config_hash, \
    assigned_to, state, created, last_updated, result, success, runtime, \
    log, worker_labels";

/// Attempts at inserting when the conflicting row turns terminal between
/// the insert and the lookup of its id.
const INSERT_ATTEMPTS: usize = 3;

fn codes(states: &[State]) -> Vec<i16> {
    states.iter().map(|s| s.code()).collect()
}

#[async_trait]
impl TaskStore for super::Db {
    async fn insert(&self, new: &NewTask, config_hash: &str) -> Result<InsertOutcome> {
        for _ in 0..INSERT_ATTEMPTS {
            // The partial unique index on (task_type, config_hash) makes the
            // duplicate check and the insert one statement.
            let query = format!(
                "INSERT INTO task_queue \
                     (priority, description, task_type, configuration, config_hash, worker_labels) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (task_type, config_hash) WHERE state < {TERMINAL_THRESHOLD} \
                 DO NOTHING \
                 RETURNING {COLUMNS}"
            );
            let inserted: Option<TaskRow> = sqlx::query_as(&query)
                .bind(new.priority)
                .bind(&new.description)
                .bind(&new.task_type)
                .bind(&new.configuration)
                .bind(config_hash)
                .bind(&new.worker_labels)
                .fetch_optional(self.pool())
                .await?;

            if let Some(row) = inserted {
                return Ok(InsertOutcome::Inserted(Box::new(row.try_into_task()?)));
            }

            let existing: Option<(i64,)> = sqlx::query_as(&format!(
                "SELECT id FROM task_queue \
                 WHERE task_type = $1 AND config_hash = $2 AND state < {TERMINAL_THRESHOLD} \
                 LIMIT 1"
            ))
            .bind(&new.task_type)
            .bind(config_hash)
            .fetch_optional(self.pool())
            .await?;

            if let Some((id,)) = existing {
                return Ok(InsertOutcome::Duplicate(TaskId(id)));
            }
            tracing::debug!(
                task_type = %new.task_type,
                "conflicting task finished before lookup, retrying insert"
            );
        }

        Err(Error::Other(format!(
            "could not insert task of type {} after {INSERT_ATTEMPTS} attempts",
            new.task_type
        )))
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM task_queue WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or(Error::NotFound(id))?.try_into_task()
    }

    async fn find_assigned(&self, worker: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM task_queue \
             WHERE assigned_to = $1 AND state < {TERMINAL_THRESHOLD} \
             ORDER BY priority DESC, id ASC \
             LIMIT 1"
        ))
        .bind(worker)
        .fetch_optional(self.pool())
        .await?;

        row.map(TaskRow::try_into_task).transpose()
    }

    async fn claim_candidates(&self, filter: &ClaimFilter, limit: i64) -> Result<Vec<TaskId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM task_queue \
             WHERE assigned_to = '' AND state = $1 \
             AND (cardinality($2::text[]) = 0 OR task_type = ANY($2)) \
             AND worker_labels <@ $3::text[] \
             ORDER BY priority DESC, id ASC \
             LIMIT $4",
        )
        .bind(State::Queued.code())
        .bind(&filter.task_types)
        .bind(&filter.labels)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }

    async fn try_assign(&self, id: TaskId, worker: &str) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE task_queue \
             SET assigned_to = $1, state = $2, last_updated = now() \
             WHERE id = $3 AND assigned_to = '' AND state = $4",
        )
        .bind(worker)
        .bind(State::Running.code())
        .bind(id.0)
        .bind(State::Queued.code())
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn boost_priority(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE task_queue \
             SET priority = x.new_priority::integer, last_updated = now() \
             FROM (SELECT COALESCE(MAX(priority), 0)::bigint + 1 AS new_priority \
                   FROM task_queue) x \
             WHERE id = $1 AND x.new_priority <= {} \
             RETURNING {}",
            i32::MAX,
            qualified_columns("task_queue")
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_task(),
            None => {
                self.get(id).await?;
                Err(Error::Validation(PRIORITY_EXHAUSTED.into()))
            }
        }
    }

    async fn transition(&self, id: TaskId, from: State, to: State) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE task_queue SET state = $1, last_updated = now() \
             WHERE id = $2 AND state = $3",
        )
        .bind(to.code())
        .bind(id.0)
        .bind(from.code())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Distinguish "guard did not match" from "no such task".
            self.get(id).await?;
        }
        Ok(rows_affected == 1)
    }

    async fn append_log(&self, id: TaskId, text: &str) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE task_queue SET log = log || $1, last_updated = now() \
             WHERE id = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(text)
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or(Error::NotFound(id))?.try_into_task()
    }

    async fn finalize(&self, id: TaskId, from: &[State], fin: &Finalize) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE task_queue \
             SET log = CASE WHEN length($1) >= length(log) THEN $1 ELSE log END, \
                 state = $2, success = $3, result = $4, runtime = $5, last_updated = now() \
             WHERE id = $6 AND state = ANY($7) \
             RETURNING {COLUMNS}"
        ))
        .bind(&fin.log)
        .bind(fin.state.code())
        .bind(fin.success)
        .bind(&fin.result)
        .bind(fin.runtime)
        .bind(id.0)
        .bind(codes(from))
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_into_task()?)),
            None => {
                self.get(id).await?;
                Ok(None)
            }
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Task>> {
        let order_clause = query
            .effective_ordering()
            .iter()
            .map(|o| format!("{} {}", o.column.sql_column(), o.direction.sql()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {COLUMNS} FROM task_queue \
             WHERE ($1::smallint[] IS NULL OR state = ANY($1)) \
             ORDER BY {order_clause} \
             LIMIT $2 OFFSET $3"
        );

        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(query.states().map(|s| codes(&s)))
            .bind(query.effective_limit())
            .bind(query.effective_offset())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn health_check(&self) -> Result<()> {
        super::Db::health_check(self).await
    }
}

/// `COLUMNS` prefixed with a table name, for statements with a `FROM` join.
fn qualified_columns(table: &str) -> String {
    COLUMNS
        .split(',')
        .map(|c| format!("{table}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    priority: i32,
    description: String,
    task_type: String,
    configuration: serde_json::Value,
    config_hash: String,
    assigned_to: String,
    state: i16,
    created: chrono::DateTime<chrono::Utc>,
    last_updated: chrono::DateTime<chrono::Utc>,
    result: serde_json::Value,
    success: bool,
    runtime: Option<f64>,
    log: String,
    worker_labels: Vec<String>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            priority: self.priority,
            description: self.description,
            task_type: self.task_type,
            configuration: self.configuration,
            config_hash: self.config_hash,
            assigned_to: self.assigned_to,
            state: State::from_code(self.state)?,
            created: self.created,
            last_updated: self.last_updated,
            result: self.result,
            success: self.success,
            runtime: self.runtime,
            log: self.log,
            worker_labels: self.worker_labels,
        })
    }
}
