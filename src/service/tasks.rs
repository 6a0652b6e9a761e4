//! Personal task lists.
//!
//! Tasks belong to an account rather than a guild, so they are not cached
//! in any aggregate and every call goes to storage.

use crate::domain::Snowflake;
use crate::error::StoreError;
use crate::persistence::models::Task;
use crate::persistence::{Entity, PersistenceClient, ensure_account};

/// Adds an open task to `author_id`'s list, creating the account if needed.
///
/// # Errors
///
/// Returns [`StoreError`] if the transaction fails.
pub async fn add_task(
    db: &PersistenceClient,
    author_id: Snowflake,
    content: impl Into<String>,
) -> Result<Task, StoreError> {
    let task = Task::new(db.next_id(), author_id, content);
    let mut tx = db.begin().await?;
    ensure_account(&mut *tx, author_id).await?;
    db.upsert_on(&mut *tx, &task).await?;
    tx.commit().await?;
    tracing::debug!(%author_id, task_id = %task.id, "task added");
    Ok(task)
}

/// `author_id`'s tasks, oldest first. Finished tasks are skipped unless
/// `include_finished` is set.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub async fn tasks_of(
    db: &PersistenceClient,
    author_id: Snowflake,
    include_finished: bool,
) -> Result<Vec<Task>, StoreError> {
    let query = format!(
        "{} WHERE author_id = $1 AND ($2 OR NOT finished) ORDER BY created_at, id",
        db.statements::<Task>()?.select_all()
    );
    db.get_vec(&query, vec![author_id.into(), include_finished.into()])
        .await
}

/// Marks one of `author_id`'s open tasks finished. Returns `false` if the
/// task is not theirs, unknown, or already finished.
///
/// # Errors
///
/// Returns [`StoreError`] if the update fails.
pub async fn finish_task(
    db: &PersistenceClient,
    author_id: Snowflake,
    task_id: Snowflake,
) -> Result<bool, StoreError> {
    let updated = db
        .execute(
            "UPDATE tasks SET finished = TRUE WHERE id = $1 AND author_id = $2 AND NOT finished",
            vec![task_id.into(), author_id.into()],
        )
        .await?;
    Ok(updated > 0)
}

/// Deletes one of `author_id`'s tasks. Returns `false` if it is not theirs.
///
/// # Errors
///
/// Returns [`StoreError`] if the delete fails.
pub async fn remove_task(
    db: &PersistenceClient,
    author_id: Snowflake,
    task_id: Snowflake,
) -> Result<bool, StoreError> {
    let deleted = db
        .execute(
            "DELETE FROM tasks WHERE id = $1 AND author_id = $2",
            vec![task_id.into(), author_id.into()],
        )
        .await?;
    Ok(deleted > 0)
}

/// Deletes every finished task on `author_id`'s list. Returns how many.
///
/// # Errors
///
/// Returns [`StoreError`] if the delete fails.
pub async fn clear_finished(
    db: &PersistenceClient,
    author_id: Snowflake,
) -> Result<u64, StoreError> {
    let cleared = db
        .execute(
            "DELETE FROM tasks WHERE author_id = $1 AND finished",
            vec![author_id.into()],
        )
        .await?;
    tracing::debug!(%author_id, cleared, "finished tasks cleared");
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_add_reports_acquisition() {
        let db = PersistenceClient::unreachable();
        let result = add_task(&db, Snowflake::new(1), "water the plants").await;
        assert!(matches!(result, Err(StoreError::Acquisition(_))));
    }

    #[test]
    fn new_tasks_start_open() {
        let task = Task::new(Snowflake::new(2), Snowflake::new(1), "write docs");
        assert!(!task.finished);
        assert_eq!(task.values().len(), Task::SCHEMA.columns.len());
    }
}
