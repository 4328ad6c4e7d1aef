//! Public façade over the recurring-template machinery.
//!
//! Controllers and the periodic scheduler talk to [`RecurringTemplateService`];
//! each mutating operation runs inside a single transaction together with its
//! audit-event emission, driving the `*_in_transaction` helpers on
//! [`SqliteRepository`].

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    AuditEvent, AuditEventType, GenerationSummary, NewTemplateData, RecurrenceRule,
    RecurringTemplate, TaskWithAssignees, UpdateTemplateData,
};
use crate::recurrence::{self, GenerationConfig};
use crate::repository::{
    GeneratorRepository, InstanceRepository, SqliteRepository, TemplateRepository,
};

/// Source of the current calendar date. Injected so tests can pin "today"
/// instead of depending on the wall clock.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct RecurringTemplateService {
    repo: SqliteRepository,
    config: GenerationConfig,
    clock: Clock,
}

impl RecurringTemplateService {
    pub fn new(repo: SqliteRepository) -> Self {
        Self::with_config(repo, GenerationConfig::default())
    }

    pub fn with_config(repo: SqliteRepository, config: GenerationConfig) -> Self {
        Self {
            repo,
            config,
            clock: Arc::new(|| Utc::now().date_naive()),
        }
    }

    /// Replace the clock, typically with a fixed date in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn repository(&self) -> &SqliteRepository {
        &self.repo
    }

    fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    /// Create a template, attach its default assignees, and materialize the
    /// first buffer of occurrences, all in one transaction.
    ///
    /// Unknown assignee ids are rejected with a validation error listing
    /// every offending id, before anything is written.
    pub async fn create_template(
        &self,
        data: NewTemplateData,
        assignee_ids: Option<Vec<Uuid>>,
    ) -> Result<RecurringTemplate, CoreError> {
        recurrence::validate_rule(&data.rule)?;
        let assignees = assignee_ids.unwrap_or_default();

        let mut tx = self.repo.pool().begin().await?;

        let missing =
            SqliteRepository::find_missing_user_ids_in_transaction(&mut tx, &assignees).await?;
        if !missing.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "Unknown assignee ids: {}",
                join_ids(&missing)
            )));
        }

        let template = SqliteRepository::insert_template_in_transaction(&mut tx, &data).await?;
        SqliteRepository::replace_assignees_in_transaction(&mut tx, template.id, &assignees)
            .await?;

        let instances = SqliteRepository::generate_instances_in_transaction(
            &mut tx,
            template.id,
            self.config.min_buffer as usize,
            None,
        )
        .await?;

        let event = AuditEvent {
            id: Uuid::now_v7(),
            task_id: instances.first().map(|t| t.id),
            actor_id: data.created_by,
            event_type: AuditEventType::RecurringTemplateCreated,
            message: format!("Created recurring template '{}'", template.title),
            template_id: Some(template.id),
            created_at: Utc::now(),
        };
        SqliteRepository::record_event_in_transaction(&mut tx, &event).await?;

        let created = SqliteRepository::fetch_template_in_transaction(&mut tx, template.id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", template.id)))?;

        tx.commit().await?;

        info!(
            template_id = %created.id,
            instances = instances.len(),
            "created recurring template"
        );
        Ok(created)
    }

    /// Apply a partial update. When any recurrence-affecting field changes,
    /// untouched future occurrences are regenerated under the new rule;
    /// in-flight and past work is left alone. A supplied assignee list
    /// replaces the default set wholesale.
    pub async fn update_template(
        &self,
        id: Uuid,
        updates: UpdateTemplateData,
        assignee_ids: Option<Vec<Uuid>>,
    ) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.repo.pool().begin().await?;

        let current = SqliteRepository::fetch_template_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", id)))?;

        recurrence::validate_rule(&merged_rule(&current.rule, &updates))?;

        if let Some(assignees) = &assignee_ids {
            let missing =
                SqliteRepository::find_missing_user_ids_in_transaction(&mut tx, assignees).await?;
            if !missing.is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "Unknown assignee ids: {}",
                    join_ids(&missing)
                )));
            }
            SqliteRepository::replace_assignees_in_transaction(&mut tx, id, assignees).await?;
        }

        SqliteRepository::update_template_in_transaction(&mut tx, id, &updates).await?;

        if updates.affects_recurrence() {
            SqliteRepository::regenerate_future_in_transaction(
                &mut tx,
                id,
                self.today(),
                self.config.min_buffer as usize,
            )
            .await?;
        }

        let event = AuditEvent {
            id: Uuid::now_v7(),
            task_id: None,
            actor_id: current.created_by,
            event_type: AuditEventType::RecurringTemplateUpdated,
            message: format!("Updated recurring template '{}'", current.title),
            template_id: Some(id),
            created_at: Utc::now(),
        };
        SqliteRepository::record_event_in_transaction(&mut tx, &event).await?;

        let updated = SqliteRepository::fetch_template_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", id)))?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Stop future generation without deleting anything that already exists.
    pub async fn deactivate_template(&self, id: Uuid) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.repo.pool().begin().await?;
        SqliteRepository::set_template_active_in_transaction(&mut tx, id, false).await?;
        let template = SqliteRepository::fetch_template_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", id)))?;
        tx.commit().await?;
        Ok(template)
    }

    /// Resume generation from today and top the buffer back up. The dormant
    /// period is not backfilled.
    pub async fn reactivate_template(&self, id: Uuid) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.repo.pool().begin().await?;
        SqliteRepository::set_template_active_in_transaction(&mut tx, id, true).await?;
        SqliteRepository::ensure_instance_buffer_in_transaction(
            &mut tx,
            id,
            self.config.min_buffer,
            self.today(),
        )
        .await?;
        let template = SqliteRepository::fetch_template_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", id)))?;
        tx.commit().await?;
        Ok(template)
    }

    /// Hard delete: removes the template and every occurrence, assignment,
    /// and default assignee belonging to it.
    pub async fn delete_template(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.repo.pool().begin().await?;
        SqliteRepository::delete_template_in_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_template(&self, id: Uuid) -> Result<RecurringTemplate, CoreError> {
        self.repo
            .find_template_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Template with id {} not found", id)))
    }

    pub async fn get_all_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError> {
        self.repo.find_all_templates().await
    }

    pub async fn get_active_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError> {
        self.repo.find_active_templates().await
    }

    /// All occurrences of a template in calendar order with their assignees.
    pub async fn get_template_instances(
        &self,
        id: Uuid,
    ) -> Result<Vec<TaskWithAssignees>, CoreError> {
        // Surface a missing template as not-found rather than an empty list.
        self.get_template(id).await?;
        self.repo.find_template_instances(id).await
    }

    /// Top one template up to at least `min_buffer` future occurrences.
    pub async fn ensure_instance_buffer(
        &self,
        id: Uuid,
        min_buffer: u32,
    ) -> Result<usize, CoreError> {
        self.repo
            .ensure_instance_buffer(id, min_buffer, self.today())
            .await
    }

    /// Scheduler entry point: sweep every active template and top up its
    /// buffer. A failure on one template is recorded and the sweep moves on;
    /// it never aborts the whole run.
    pub async fn ensure_all_templates_have_instances(
        &self,
    ) -> Result<GenerationSummary, CoreError> {
        let templates = self.repo.find_active_templates().await?;
        let today = self.today();
        let mut summary = GenerationSummary::default();

        for template in templates {
            summary.templates_processed += 1;
            match self
                .repo
                .ensure_instance_buffer(template.id, self.config.min_buffer, today)
                .await
            {
                Ok(created) => summary.instances_created += created,
                Err(err) => {
                    warn!(
                        template_id = %template.id,
                        error = %err,
                        "failed to top up recurring template"
                    );
                    summary.templates_with_errors += 1;
                    summary.errors.push(format!("{}: {}", template.id, err));
                }
            }
        }

        Ok(summary)
    }
}

fn merged_rule(current: &RecurrenceRule, updates: &UpdateTemplateData) -> RecurrenceRule {
    RecurrenceRule {
        frequency: updates.frequency.unwrap_or(current.frequency),
        interval: updates.interval.unwrap_or(current.interval),
        days_of_week: updates
            .days_of_week
            .clone()
            .unwrap_or_else(|| current.days_of_week.clone()),
        day_of_month: updates.day_of_month.unwrap_or(current.day_of_month),
        start_date: updates.start_date.unwrap_or(current.start_date),
        end_date: updates.end_date.unwrap_or(current.end_date),
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
