use crate::error::CoreError;
use crate::models::AuditEvent;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

#[async_trait]
impl super::AuditRepository for SqliteRepository {
    async fn find_events_for_template(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<AuditEvent>, CoreError> {
        let events = sqlx::query_as(
            "SELECT * FROM audit_events WHERE template_id = $1 ORDER BY created_at",
        )
        .bind(template_id)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }

    async fn find_events_for_task(&self, task_id: Uuid) -> Result<Vec<AuditEvent>, CoreError> {
        let events =
            sqlx::query_as("SELECT * FROM audit_events WHERE task_id = $1 ORDER BY created_at")
                .bind(task_id)
                .fetch_all(self.pool())
                .await?;
        Ok(events)
    }
}

impl SqliteRepository {
    /// Append one event to the audit trail within an existing transaction.
    pub(crate) async fn record_event_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        event: &AuditEvent,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO audit_events
            (id, task_id, actor_id, event_type, message, template_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(event.id)
        .bind(event.task_id)
        .bind(event.actor_id)
        .bind(event.event_type)
        .bind(&event.message)
        .bind(event.template_id)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
