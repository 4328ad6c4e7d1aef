use crate::error::CoreError;
use crate::models::{Task, TaskStatus, TaskWithAssignees};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

#[async_trait]
impl super::InstanceRepository for SqliteRepository {
    async fn find_template_instances(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<TaskWithAssignees>, CoreError> {
        let tasks: Vec<Task> = sqlx::query_as(
            "SELECT * FROM tasks WHERE recurring_template_id = $1 ORDER BY occurrence_date",
        )
        .bind(template_id)
        .fetch_all(self.pool())
        .await?;

        let mut instances = Vec::with_capacity(tasks.len());
        for task in tasks {
            let assignees: Vec<(Uuid,)> = sqlx::query_as(
                "SELECT user_id FROM task_assignments WHERE task_id = $1 ORDER BY user_id",
            )
            .bind(task.id)
            .fetch_all(self.pool())
            .await?;
            instances.push(TaskWithAssignees {
                task,
                assignees: assignees.into_iter().map(|(id,)| id).collect(),
            });
        }
        Ok(instances)
    }
}

impl SqliteRepository {
    /// All occurrence dates already materialized for a template, for O(1)
    /// duplicate testing during generation. Read fresh inside the calling
    /// transaction so concurrent generation converges.
    pub(crate) async fn existing_occurrence_dates_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
    ) -> Result<HashSet<NaiveDate>, CoreError> {
        let rows: Vec<(NaiveDate,)> = sqlx::query_as(
            r#"SELECT occurrence_date FROM tasks
            WHERE recurring_template_id = $1 AND occurrence_date IS NOT NULL"#,
        )
        .bind(template_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(|(date,)| date).collect())
    }

    pub(crate) async fn count_upcoming_instances_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        today: NaiveDate,
    ) -> Result<i64, CoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE recurring_template_id = $1 AND occurrence_date >= $2",
        )
        .bind(template_id)
        .bind(today)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count.0)
    }

    /// Batch-insert occurrence rows. Duplicate `(template, occurrence_date)`
    /// slots are dropped by the unique index rather than failing the batch,
    /// which makes concurrent top-up self-healing.
    pub(crate) async fn insert_instances_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        tasks: &[Task],
    ) -> Result<(), CoreError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"INSERT OR IGNORE INTO tasks
            (id, title, description, status, priority, unit, goal_type, target_quantity,
             current_quantity, scheduled_date, deadline, occurrence_date,
             recurring_template_id, created_by, created_at, updated_at) "#,
        );
        qb.push_values(tasks.iter(), |mut b, task| {
            b.push_bind(task.id)
                .push_bind(&task.title)
                .push_bind(&task.description)
                .push_bind(&task.status)
                .push_bind(&task.priority)
                .push_bind(&task.unit)
                .push_bind(&task.goal_type)
                .push_bind(task.target_quantity)
                .push_bind(task.current_quantity)
                .push_bind(task.scheduled_date)
                .push_bind(task.deadline)
                .push_bind(task.occurrence_date)
                .push_bind(task.recurring_template_id)
                .push_bind(task.created_by)
                .push_bind(task.created_at)
                .push_bind(task.updated_at);
        });
        qb.build().execute(&mut **tx).await?;
        Ok(())
    }

    /// Re-fetch rows by id after a batch insert. Rows that lost a duplicate
    /// race are absent from the result.
    pub(crate) async fn find_tasks_by_ids_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        ids: &[Uuid],
    ) -> Result<Vec<Task>, CoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY occurrence_date");
        let tasks: Vec<Task> = qb.build_query_as().fetch_all(&mut **tx).await?;
        Ok(tasks)
    }

    /// Assign every user to every task: the full cross product, as stamped
    /// from the template's default assignees.
    pub(crate) async fn insert_assignments_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        task_ids: &[Uuid],
        user_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        if task_ids.is_empty() || user_ids.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(Uuid, Uuid)> = task_ids
            .iter()
            .flat_map(|&task_id| user_ids.iter().map(move |&user_id| (task_id, user_id)))
            .collect();

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO task_assignments (task_id, user_id) ");
        qb.push_values(pairs.iter(), |mut b, (task_id, user_id)| {
            b.push_bind(*task_id).push_bind(*user_id);
        });
        qb.build().execute(&mut **tx).await?;
        Ok(())
    }

    /// Delete strictly untouched future occurrences: pending status, zero
    /// progress, dated today or later. In-progress, completed, and past rows
    /// are never candidates.
    pub(crate) async fn delete_untouched_future_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        today: NaiveDate,
    ) -> Result<u64, CoreError> {
        sqlx::query(
            r#"DELETE FROM task_assignments WHERE task_id IN
            (SELECT id FROM tasks
             WHERE recurring_template_id = $1 AND occurrence_date >= $2
               AND status = $3 AND current_quantity = 0)"#,
        )
        .bind(template_id)
        .bind(today)
        .bind(TaskStatus::Pending)
        .execute(&mut **tx)
        .await?;

        let result = sqlx::query(
            r#"DELETE FROM tasks
            WHERE recurring_template_id = $1 AND occurrence_date >= $2
              AND status = $3 AND current_quantity = 0"#,
        )
        .bind(template_id)
        .bind(today)
        .bind(TaskStatus::Pending)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
