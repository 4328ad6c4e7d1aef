use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task status: {0}")]
pub struct ParseTaskStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseTaskStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(ParseTaskStatusError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task priority: {0}")]
pub struct ParseTaskPriorityError(String);

impl FromStr for TaskPriority {
    type Err = ParseTaskPriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(ParseTaskPriorityError(s.to_string())),
        }
    }
}

/// Whether a task tracks an open-ended quantity or a fixed target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GoalType {
    Open,
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Yearly => write!(f, "yearly"),
        }
    }
}

/// The recurrence shape of a template, projected down to exactly the fields
/// the calculator needs. Calendar math operates on this value type only,
/// never on the full template record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Every N periods. Must be at least 1 for a well-formed rule.
    pub interval: u32,
    /// Weekday set, 0 = Sunday through 6 = Saturday. Weekly rules only.
    pub days_of_week: Vec<u8>,
    /// Target day 1..=31, clamped to month length. Monthly rules only.
    pub day_of_month: Option<u32>,
    pub start_date: NaiveDate,
    /// Inclusive upper bound; no occurrence lands strictly after it.
    pub end_date: Option<NaiveDate>,
}

/// A stored recurrence definition from which task occurrences are stamped out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTemplate {
    #[serde(with = "uuid::serde::compact")]
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub unit: Option<String>,
    pub goal_type: GoalType,
    pub target_quantity: Option<f64>,
    pub rule: RecurrenceRule,
    #[serde(with = "uuid::serde::compact")]
    pub created_by: Uuid,
    pub is_active: bool,
    /// Users assigned to every newly materialized occurrence. Editing this
    /// set never touches occurrences that already exist.
    pub default_assignees: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One concrete task row. Recurring occurrences carry `occurrence_date` and
/// a back-reference to their template; plain tasks carry neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub unit: Option<String>,
    pub goal_type: GoalType,
    pub target_quantity: Option<f64>,
    pub current_quantity: f64,
    pub scheduled_date: Option<NaiveDate>,
    pub deadline: Option<DateTime<Utc>>,
    pub occurrence_date: Option<NaiveDate>,
    pub recurring_template_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task occurrence together with the users assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithAssignees {
    pub task: Task,
    pub assignees: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RecurringTemplateCreated,
    RecurringTemplateUpdated,
    RecurringInstanceGenerated,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEventType::RecurringTemplateCreated => write!(f, "recurring_template_created"),
            AuditEventType::RecurringTemplateUpdated => write!(f, "recurring_template_updated"),
            AuditEventType::RecurringInstanceGenerated => {
                write!(f, "recurring_instance_generated")
            }
        }
    }
}

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub task_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub event_type: AuditEventType,
    pub message: String,
    pub template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new recurring template.
#[derive(Debug, Clone)]
pub struct NewTemplateData {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub unit: Option<String>,
    pub goal_type: GoalType,
    pub target_quantity: Option<f64>,
    pub rule: RecurrenceRule,
    pub created_by: Uuid,
}

/// Partial update for an existing template. Double-`Option` fields distinguish
/// "leave unchanged" from "set to NULL".
#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateData {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<TaskPriority>,
    pub unit: Option<Option<String>>,
    pub goal_type: Option<GoalType>,
    pub target_quantity: Option<Option<f64>>,
    pub frequency: Option<Frequency>,
    pub interval: Option<u32>,
    pub days_of_week: Option<Vec<u8>>,
    pub day_of_month: Option<Option<u32>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
}

impl UpdateTemplateData {
    /// Whether this update touches any field that changes which occurrence
    /// dates the rule produces. Such updates trigger regeneration of
    /// untouched future occurrences.
    pub fn affects_recurrence(&self) -> bool {
        self.frequency.is_some()
            || self.interval.is_some()
            || self.days_of_week.is_some()
            || self.day_of_month.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
    }
}

/// Statistics collected while sweeping all active templates.
#[derive(Debug, Clone, Default)]
pub struct GenerationSummary {
    pub templates_processed: usize,
    pub instances_created: usize,
    pub templates_with_errors: usize,
    pub errors: Vec<String>,
}
