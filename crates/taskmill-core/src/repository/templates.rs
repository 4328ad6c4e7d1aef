use crate::error::CoreError;
use crate::models::{
    Frequency, GoalType, NewTemplateData, RecurrenceRule, RecurringTemplate, TaskPriority,
    UpdateTemplateData,
};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, Transaction};
use uuid::Uuid;

/// Raw template row; `days_of_week` is stored as a JSON array column.
#[derive(Debug, FromRow)]
struct TemplateRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    priority: TaskPriority,
    unit: Option<String>,
    goal_type: GoalType,
    target_quantity: Option<f64>,
    frequency: Frequency,
    recur_interval: i64,
    days_of_week: Option<String>,
    day_of_month: Option<i64>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    created_by: Uuid,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TemplateRow {
    fn into_template(self, default_assignees: Vec<Uuid>) -> Result<RecurringTemplate, CoreError> {
        let days_of_week = match self.days_of_week.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Vec::new(),
        };
        Ok(RecurringTemplate {
            id: self.id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            unit: self.unit,
            goal_type: self.goal_type,
            target_quantity: self.target_quantity,
            rule: RecurrenceRule {
                frequency: self.frequency,
                interval: self.recur_interval as u32,
                days_of_week,
                day_of_month: self.day_of_month.map(|d| d as u32),
                start_date: self.start_date,
                end_date: self.end_date,
            },
            created_by: self.created_by,
            is_active: self.is_active,
            default_assignees,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn days_of_week_json(days: &[u8]) -> Result<Option<String>, CoreError> {
    if days.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(days)?))
    }
}

#[async_trait]
impl super::TemplateRepository for SqliteRepository {
    async fn find_template_by_id(&self, id: Uuid) -> Result<Option<RecurringTemplate>, CoreError> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        match row {
            Some(row) => {
                let assignees = Self::load_assignees(self.pool(), row.id).await?;
                Ok(Some(row.into_template(assignees)?))
            }
            None => Ok(None),
        }
    }

    async fn find_all_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as("SELECT * FROM recurring_templates ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let assignees = Self::load_assignees(self.pool(), row.id).await?;
            templates.push(row.into_template(assignees)?);
        }
        Ok(templates)
    }

    async fn find_active_templates(&self) -> Result<Vec<RecurringTemplate>, CoreError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT * FROM recurring_templates WHERE is_active = TRUE ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;
        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let assignees = Self::load_assignees(self.pool(), row.id).await?;
            templates.push(row.into_template(assignees)?);
        }
        Ok(templates)
    }
}

impl SqliteRepository {
    pub(crate) async fn load_assignees<'e, E>(
        executor: E,
        template_id: Uuid,
    ) -> Result<Vec<Uuid>, CoreError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM template_assignees WHERE template_id = $1 ORDER BY user_id",
        )
        .bind(template_id)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Fetch a template (with its default assignees) within an existing
    /// transaction.
    pub(crate) async fn fetch_template_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<Option<RecurringTemplate>, CoreError> {
        let row: Option<TemplateRow> =
            sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        match row {
            Some(row) => {
                let assignees = Self::load_assignees(&mut **tx, row.id).await?;
                Ok(Some(row.into_template(assignees)?))
            }
            None => Ok(None),
        }
    }

    /// Insert a new template row within an existing transaction. Assignees
    /// are attached separately via [`Self::replace_assignees_in_transaction`].
    pub(crate) async fn insert_template_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        data: &NewTemplateData,
    ) -> Result<RecurringTemplate, CoreError> {
        let now = Utc::now();
        let template = RecurringTemplate {
            id: Uuid::now_v7(),
            title: data.title.clone(),
            description: data.description.clone(),
            priority: data.priority.clone(),
            unit: data.unit.clone(),
            goal_type: data.goal_type.clone(),
            target_quantity: data.target_quantity,
            rule: data.rule.clone(),
            created_by: data.created_by,
            is_active: true,
            default_assignees: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO recurring_templates
            (id, title, description, priority, unit, goal_type, target_quantity,
             frequency, recur_interval, days_of_week, day_of_month, start_date, end_date,
             created_by, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"#,
        )
        .bind(template.id)
        .bind(&template.title)
        .bind(&template.description)
        .bind(&template.priority)
        .bind(&template.unit)
        .bind(&template.goal_type)
        .bind(template.target_quantity)
        .bind(template.rule.frequency)
        .bind(i64::from(template.rule.interval))
        .bind(days_of_week_json(&template.rule.days_of_week)?)
        .bind(template.rule.day_of_month.map(i64::from))
        .bind(template.rule.start_date)
        .bind(template.rule.end_date)
        .bind(template.created_by)
        .bind(template.is_active)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(template)
    }

    /// Apply a partial update within an existing transaction. Does nothing
    /// when the update carries no fields.
    pub(crate) async fn update_template_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
        data: &UpdateTemplateData,
    ) -> Result<(), CoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE recurring_templates SET ");
        let mut updated = false;

        if let Some(title) = &data.title {
            qb.push("title = ");
            qb.push_bind(title.clone());
            updated = true;
        }
        if let Some(description) = &data.description {
            if updated {
                qb.push(", ");
            }
            qb.push("description = ");
            qb.push_bind(description.clone());
            updated = true;
        }
        if let Some(priority) = &data.priority {
            if updated {
                qb.push(", ");
            }
            qb.push("priority = ");
            qb.push_bind(priority.clone());
            updated = true;
        }
        if let Some(unit) = &data.unit {
            if updated {
                qb.push(", ");
            }
            qb.push("unit = ");
            qb.push_bind(unit.clone());
            updated = true;
        }
        if let Some(goal_type) = &data.goal_type {
            if updated {
                qb.push(", ");
            }
            qb.push("goal_type = ");
            qb.push_bind(goal_type.clone());
            updated = true;
        }
        if let Some(target_quantity) = &data.target_quantity {
            if updated {
                qb.push(", ");
            }
            qb.push("target_quantity = ");
            qb.push_bind(*target_quantity);
            updated = true;
        }
        if let Some(frequency) = data.frequency {
            if updated {
                qb.push(", ");
            }
            qb.push("frequency = ");
            qb.push_bind(frequency);
            updated = true;
        }
        if let Some(interval) = data.interval {
            if updated {
                qb.push(", ");
            }
            qb.push("recur_interval = ");
            qb.push_bind(i64::from(interval));
            updated = true;
        }
        if let Some(days) = &data.days_of_week {
            if updated {
                qb.push(", ");
            }
            qb.push("days_of_week = ");
            qb.push_bind(days_of_week_json(days)?);
            updated = true;
        }
        if let Some(day_of_month) = &data.day_of_month {
            if updated {
                qb.push(", ");
            }
            qb.push("day_of_month = ");
            qb.push_bind(day_of_month.map(i64::from));
            updated = true;
        }
        if let Some(start_date) = data.start_date {
            if updated {
                qb.push(", ");
            }
            qb.push("start_date = ");
            qb.push_bind(start_date);
            updated = true;
        }
        if let Some(end_date) = &data.end_date {
            if updated {
                qb.push(", ");
            }
            qb.push("end_date = ");
            qb.push_bind(*end_date);
            updated = true;
        }

        if !updated {
            return Ok(());
        }

        qb.push(", updated_at = ");
        qb.push_bind(Utc::now());
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb.build().execute(&mut **tx).await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "Template with id {} not found",
                id
            )));
        }
        Ok(())
    }

    /// Flip the active flag within an existing transaction.
    pub(crate) async fn set_template_active_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
        active: bool,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE recurring_templates SET is_active = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(active)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "Template with id {} not found",
                id
            )));
        }
        Ok(())
    }

    /// Replace the template's default-assignee set (full replace, not merge)
    /// within an existing transaction.
    pub(crate) async fn replace_assignees_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        template_id: Uuid,
        assignee_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM template_assignees WHERE template_id = $1")
            .bind(template_id)
            .execute(&mut **tx)
            .await?;

        for user_id in assignee_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO template_assignees (template_id, user_id) VALUES ($1, $2)",
            )
            .bind(template_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Hard delete: the template row plus all its occurrences, assignments,
    /// and default assignees. The audit trail is kept.
    pub(crate) async fn delete_template_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"DELETE FROM task_assignments WHERE task_id IN
            (SELECT id FROM tasks WHERE recurring_template_id = $1)"#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM tasks WHERE recurring_template_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM template_assignees WHERE template_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        let result = sqlx::query("DELETE FROM recurring_templates WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "Template with id {} not found",
                id
            )));
        }
        Ok(())
    }
}
