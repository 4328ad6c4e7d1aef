use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{AuditEvent, RecurringTemplate, TaskWithAssignees, User};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

// Re-export domain modules
pub mod audit;
pub mod generator;
pub mod instances;
pub mod templates;
pub mod users;

/// Domain-specific trait for recurring template reads.
///
/// Template mutations are composite operations (rule validation, assignee
/// replacement, regeneration, audit) and live on the service façade, which
/// drives the `*_in_transaction` helpers in [`templates`] inside one
/// transaction.
#[async_trait]
pub trait TemplateRepository {
    async fn find_template_by_id(&self, id: Uuid) -> Result<Option<RecurringTemplate>, CoreError>;
    async fn find_all_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError>;
    async fn find_active_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError>;
}

/// Domain-specific trait for materialized occurrence reads.
#[async_trait]
pub trait InstanceRepository {
    /// All occurrences of a template in calendar order, each with its
    /// assignee ids.
    async fn find_template_instances(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<TaskWithAssignees>, CoreError>;
}

/// Domain-specific trait for the user rows backing assignee validation.
#[async_trait]
pub trait UserRepository {
    async fn add_user(&self, username: &str) -> Result<User, CoreError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError>;
}

/// Domain-specific trait for reading the audit trail.
#[async_trait]
pub trait AuditRepository {
    async fn find_events_for_template(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<AuditEvent>, CoreError>;
    async fn find_events_for_task(&self, task_id: Uuid) -> Result<Vec<AuditEvent>, CoreError>;
}

/// Domain-specific trait for instance generation and buffer maintenance.
#[async_trait]
pub trait GeneratorRepository {
    /// Materializes up to `count` missing occurrences for a template.
    /// Returns the number created. No-op for missing or inactive templates.
    async fn generate_instances(&self, template_id: Uuid, count: usize)
        -> Result<usize, CoreError>;

    /// Tops the template up to at least `min_buffer` occurrences dated
    /// `today` or later. Idempotent; safe under concurrent scheduler ticks.
    async fn ensure_instance_buffer(
        &self,
        template_id: Uuid,
        min_buffer: u32,
        today: NaiveDate,
    ) -> Result<usize, CoreError>;

    /// Deletes untouched future occurrences (pending, zero progress) and
    /// generates a fresh buffer. In-flight and past work is never touched.
    async fn regenerate_future_instances(
        &self,
        template_id: Uuid,
        today: NaiveDate,
        count: usize,
    ) -> Result<usize, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository:
    TemplateRepository + InstanceRepository + UserRepository + AuditRepository + GeneratorRepository
{
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}
