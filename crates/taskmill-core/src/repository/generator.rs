use crate::error::CoreError;
use crate::models::{AuditEvent, AuditEventType, Task, TaskStatus};
use crate::recurrence;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
impl super::GeneratorRepository for SqliteRepository {
    async fn generate_instances(
        &self,
        template_id: Uuid,
        count: usize,
    ) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await?;
        let created =
            Self::generate_instances_in_transaction(&mut tx, template_id, count, None).await?;
        tx.commit().await?;
        Ok(created.len())
    }

    async fn ensure_instance_buffer(
        &self,
        template_id: Uuid,
        min_buffer: u32,
        today: NaiveDate,
    ) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await?;
        let created =
            Self::ensure_instance_buffer_in_transaction(&mut tx, template_id, min_buffer, today)
                .await?;
        tx.commit().await?;
        Ok(created.len())
    }

    async fn regenerate_future_instances(
        &self,
        template_id: Uuid,
        today: NaiveDate,
        count: usize,
    ) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await?;
        let created =
            Self::regenerate_future_in_transaction(&mut tx, template_id, today, count).await?;
        tx.commit().await?;
        Ok(created.len())
    }
}

impl SqliteRepository {
    /// Materialize up to `count` missing occurrences for a template within
    /// an existing transaction.
    ///
    /// No-op for a missing or deactivated template. Existing occurrence
    /// dates are re-read fresh here, so a retry after a crash (or a
    /// concurrent generation racing this one) converges instead of
    /// duplicating; whatever slips through the pre-filter is absorbed by the
    /// unique `(template, occurrence_date)` index at insert time.
    ///
    /// `not_before` floors generation at an injected "today": the buffer and
    /// reactivation paths use it so a dormant period is never backfilled.
    pub(crate) async fn generate_instances_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        count: usize,
        not_before: Option<NaiveDate>,
    ) -> Result<Vec<Task>, CoreError> {
        let Some(template) = Self::fetch_template_in_transaction(tx, template_id).await? else {
            return Ok(Vec::new());
        };
        if !template.is_active {
            return Ok(Vec::new());
        }

        let existing = Self::existing_occurrence_dates_in_transaction(tx, template_id).await?;
        let dates = recurrence::calculate_occurrences(&template.rule, count, &existing, not_before);
        if dates.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let tasks: Vec<Task> = dates
            .iter()
            .map(|&date| Task {
                id: Uuid::now_v7(),
                title: template.title.clone(),
                description: template.description.clone(),
                status: TaskStatus::Pending,
                priority: template.priority.clone(),
                unit: template.unit.clone(),
                goal_type: template.goal_type.clone(),
                target_quantity: template.target_quantity,
                current_quantity: 0.0,
                scheduled_date: Some(date),
                deadline: date
                    .and_hms_milli_opt(23, 59, 59, 999)
                    .map(|dt| dt.and_utc()),
                occurrence_date: Some(date),
                recurring_template_id: Some(template_id),
                created_by: template.created_by,
                created_at: now,
                updated_at: now,
            })
            .collect();

        Self::insert_instances_in_transaction(tx, &tasks).await?;

        // Rows that lost a duplicate race are missing here and get neither
        // assignments nor audit events.
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let inserted = Self::find_tasks_by_ids_in_transaction(tx, &ids).await?;
        if inserted.is_empty() {
            return Ok(inserted);
        }

        let task_ids: Vec<Uuid> = inserted.iter().map(|t| t.id).collect();
        Self::insert_assignments_in_transaction(tx, &task_ids, &template.default_assignees)
            .await?;

        for task in &inserted {
            let event = AuditEvent {
                id: Uuid::now_v7(),
                task_id: Some(task.id),
                actor_id: template.created_by,
                event_type: AuditEventType::RecurringInstanceGenerated,
                message: match task.occurrence_date {
                    Some(date) => format!("Generated recurring task instance for {date}"),
                    None => "Generated recurring task instance".to_string(),
                },
                template_id: Some(template_id),
                created_at: now,
            };
            Self::record_event_in_transaction(tx, &event).await?;
        }

        debug!(
            template_id = %template_id,
            created = inserted.len(),
            "materialized recurring task instances"
        );
        Ok(inserted)
    }

    /// Top a template up to at least `min_buffer` occurrences dated `today`
    /// or later, within an existing transaction.
    pub(crate) async fn ensure_instance_buffer_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        min_buffer: u32,
        today: NaiveDate,
    ) -> Result<Vec<Task>, CoreError> {
        let upcoming =
            Self::count_upcoming_instances_in_transaction(tx, template_id, today).await?;
        let shortfall = i64::from(min_buffer) - upcoming;
        if shortfall <= 0 {
            return Ok(Vec::new());
        }
        Self::generate_instances_in_transaction(tx, template_id, shortfall as usize, Some(today))
            .await
    }

    /// Delete untouched future occurrences and generate a fresh buffer,
    /// within an existing transaction. In-progress, completed, and past
    /// occurrences are never touched: a recurrence-rule edit must not
    /// silently delete or corrupt work already underway.
    pub(crate) async fn regenerate_future_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        today: NaiveDate,
        count: usize,
    ) -> Result<Vec<Task>, CoreError> {
        let deleted =
            Self::delete_untouched_future_in_transaction(tx, template_id, today).await?;
        if deleted > 0 {
            debug!(
                template_id = %template_id,
                deleted,
                "removed untouched future occurrences before regeneration"
            );
        }
        Self::generate_instances_in_transaction(tx, template_id, count, None).await
    }
}
