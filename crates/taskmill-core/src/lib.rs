//! # Taskmill Core Library
//!
//! A task management backend built around recurring task templates: a
//! template carries a recurrence rule, and the engine materializes concrete
//! task instances from it ahead of time, keeping a rolling buffer of upcoming
//! occurrences topped up.
//!
//! ## Features
//!
//! - **Recurrence Rules**: Daily, weekly, monthly, and yearly patterns with
//!   intervals, weekly day selection, monthly day-of-month clamping, and
//!   optional end dates
//! - **Rolling Instance Buffer**: Each active template always has a window of
//!   pre-generated upcoming instances, replenished idempotently
//! - **Safe Regeneration**: Editing a rule replaces only untouched future
//!   instances; in-progress and past work is never deleted
//! - **Audit Trail**: Template lifecycle and instance generation leave a
//!   queryable event log
//! - **Type Safety**: Compile-time checked data access with sqlx
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Core data structures and transfer objects
//! - [`repository`]: Data access layer with Repository pattern
//! - [`recurrence`]: Recurrence rule expansion and occurrence calculation
//! - [`service`]: Transactional façade over templates and generation
//! - [`error`]: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use taskmill_core::{
//!     db,
//!     models::{Frequency, GoalType, NewTemplateData, RecurrenceRule, TaskPriority},
//!     repository::{SqliteRepository, UserRepository},
//!     service::RecurringTemplateService,
//! };
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = db::establish_connection("tasks.db").await?;
//!     let repo = SqliteRepository::new(pool);
//!     let owner = repo.add_user("alice").await?;
//!
//!     let service = RecurringTemplateService::new(repo);
//!     let template = service
//!         .create_template(
//!             NewTemplateData {
//!                 title: "Water the plants".to_string(),
//!                 description: None,
//!                 priority: TaskPriority::Medium,
//!                 unit: None,
//!                 goal_type: GoalType::Open,
//!                 target_quantity: None,
//!                 rule: RecurrenceRule {
//!                     frequency: Frequency::Daily,
//!                     interval: 2,
//!                     days_of_week: vec![],
//!                     day_of_month: None,
//!                     start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
//!                     end_date: None,
//!                 },
//!                 created_by: owner.id,
//!             },
//!             Some(vec![owner.id]),
//!         )
//!         .await?;
//!
//!     let instances = service.get_template_instances(template.id).await?;
//!     println!("{} upcoming occurrences", instances.len());
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod service;
