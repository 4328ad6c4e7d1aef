use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use taskmill_core::db::establish_connection;
use taskmill_core::error::CoreError;
use taskmill_core::models::{
    AuditEventType, Frequency, GoalType, NewTemplateData, RecurrenceRule, TaskPriority,
    TaskStatus, UpdateTemplateData, User,
};
use taskmill_core::repository::{AuditRepository, SqliteRepository, UserRepository};
use taskmill_core::service::{Clock, RecurringTemplateService};

/// Fixed "today" for every test: a Monday, so weekly scenarios are easy to
/// reason about.
fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date")
}

fn fixed_clock(date: NaiveDate) -> Clock {
    Arc::new(move || date)
}

/// Helper function to create a test database
async fn setup_test_db() -> (sqlx::SqlitePool, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("Failed to establish test database connection");

    (pool, temp_dir)
}

fn service_at(pool: &sqlx::SqlitePool, date: NaiveDate) -> RecurringTemplateService {
    RecurringTemplateService::new(SqliteRepository::new(pool.clone()))
        .with_clock(fixed_clock(date))
}

async fn create_test_user(pool: &sqlx::SqlitePool, username: &str) -> User {
    SqliteRepository::new(pool.clone())
        .add_user(username)
        .await
        .expect("Failed to create test user")
}

fn daily_rule(start: NaiveDate) -> RecurrenceRule {
    RecurrenceRule {
        frequency: Frequency::Daily,
        interval: 1,
        days_of_week: vec![],
        day_of_month: None,
        start_date: start,
        end_date: None,
    }
}

fn template_data(title: &str, rule: RecurrenceRule, created_by: Uuid) -> NewTemplateData {
    NewTemplateData {
        title: title.to_string(),
        description: Some(format!("Test template: {}", title)),
        priority: TaskPriority::Medium,
        unit: None,
        goal_type: GoalType::Open,
        target_quantity: None,
        rule,
        created_by,
    }
}

#[tokio::test]
async fn create_daily_template_materializes_initial_buffer() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let helper = create_test_user(&pool, "bob").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            Some(vec![owner.id, helper.id]),
        )
        .await
        .expect("Failed to create template");

    assert!(template.is_active);
    assert_eq!(template.default_assignees.len(), 2);

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 12);

    for (i, instance) in instances.iter().enumerate() {
        let expected_date = today() + Duration::days(i as i64);
        assert_eq!(instance.task.occurrence_date, Some(expected_date));
        assert_eq!(instance.task.scheduled_date, Some(expected_date));
        assert_eq!(instance.task.status, TaskStatus::Pending);
        assert_eq!(instance.task.current_quantity, 0.0);
        assert_eq!(instance.task.title, "Water plants");
        assert_eq!(instance.task.recurring_template_id, Some(template.id));
        assert_eq!(
            instance.task.deadline,
            Some(
                expected_date
                    .and_hms_milli_opt(23, 59, 59, 999)
                    .unwrap()
                    .and_utc()
            )
        );
        // Every occurrence gets the full default assignee set.
        assert_eq!(instance.assignees.len(), 2);
        assert!(instance.assignees.contains(&owner.id));
        assert!(instance.assignees.contains(&helper.id));
    }
}

#[tokio::test]
async fn create_weekly_template_follows_day_selection() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    // Mon/Wed/Fri starting on a Monday.
    let rule = RecurrenceRule {
        frequency: Frequency::Weekly,
        interval: 1,
        days_of_week: vec![1, 3, 5],
        day_of_month: None,
        start_date: today(),
        end_date: None,
    };
    let template = service
        .create_template(template_data("Gym", rule, owner.id), None)
        .await
        .expect("Failed to create template");

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    let dates: Vec<NaiveDate> = instances
        .iter()
        .filter_map(|i| i.task.occurrence_date)
        .collect();

    let expected: Vec<NaiveDate> = [0, 2, 4, 7, 9, 11, 14, 16, 18, 21, 23, 25]
        .iter()
        .map(|&offset| today() + Duration::days(offset))
        .collect();
    assert_eq!(dates, expected);
}

#[tokio::test]
async fn create_rejects_unknown_assignees_without_writing() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let bogus = Uuid::now_v7();
    let result = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            Some(vec![owner.id, bogus]),
        )
        .await;

    match result {
        Err(CoreError::InvalidInput(message)) => {
            assert!(message.contains(&bogus.to_string()));
        }
        other => panic!("Expected InvalidInput, got {:?}", other),
    }

    let templates = service
        .get_all_templates()
        .await
        .expect("Failed to list templates");
    assert!(templates.is_empty());

    let (task_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await
        .expect("Failed to count tasks");
    assert_eq!(task_count, 0);
}

#[tokio::test]
async fn create_rejects_invalid_rules() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    // Zero interval.
    let mut rule = daily_rule(today());
    rule.interval = 0;
    let result = service
        .create_template(template_data("Bad", rule, owner.id), None)
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));

    // Weekly with an out-of-range weekday.
    let rule = RecurrenceRule {
        frequency: Frequency::Weekly,
        interval: 1,
        days_of_week: vec![7],
        day_of_month: None,
        start_date: today(),
        end_date: None,
    };
    let result = service
        .create_template(template_data("Bad", rule, owner.id), None)
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));

    // End date before start date.
    let mut rule = daily_rule(today());
    rule.end_date = Some(today() - Duration::days(1));
    let result = service
        .create_template(template_data("Bad", rule, owner.id), None)
        .await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[tokio::test]
async fn ensure_instance_buffer_is_idempotent() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");

    // Buffer is already full, so this is a no-op.
    let created = service
        .ensure_instance_buffer(template.id, 12)
        .await
        .expect("Failed to ensure buffer");
    assert_eq!(created, 0);

    // Raising the floor generates exactly the shortfall.
    let created = service
        .ensure_instance_buffer(template.id, 15)
        .await
        .expect("Failed to ensure buffer");
    assert_eq!(created, 3);

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 15);
}

#[tokio::test]
async fn end_date_caps_generation() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let mut rule = daily_rule(today());
    rule.end_date = Some(today() + Duration::days(4));
    let template = service
        .create_template(template_data("Short run", rule, owner.id), None)
        .await
        .expect("Failed to create template");

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 5);
    assert_eq!(
        instances.last().unwrap().task.occurrence_date,
        Some(today() + Duration::days(4))
    );

    // The rule is exhausted, so topping up produces nothing more.
    let created = service
        .ensure_instance_buffer(template.id, 12)
        .await
        .expect("Failed to ensure buffer");
    assert_eq!(created, 0);
}

#[tokio::test]
async fn recurrence_update_regenerates_only_untouched_future_instances() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");

    // Start work on the occurrence three days out.
    let in_flight_date = today() + Duration::days(3);
    sqlx::query(
        r#"UPDATE tasks SET status = $1, current_quantity = 2
        WHERE recurring_template_id = $2 AND occurrence_date = $3"#,
    )
    .bind(TaskStatus::InProgress)
    .bind(template.id)
    .bind(in_flight_date)
    .execute(&pool)
    .await
    .expect("Failed to mark task in progress");

    // Switch to every-other-day.
    let updated = service
        .update_template(
            template.id,
            UpdateTemplateData {
                interval: Some(2),
                ..Default::default()
            },
            None,
        )
        .await
        .expect("Failed to update template");
    assert_eq!(updated.rule.interval, 2);

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");

    // 12 fresh every-other-day occurrences plus the untouched in-flight one.
    assert_eq!(instances.len(), 13);

    let in_flight = instances
        .iter()
        .find(|i| i.task.occurrence_date == Some(in_flight_date))
        .expect("In-flight occurrence must survive regeneration");
    assert_eq!(in_flight.task.status, TaskStatus::InProgress);
    assert_eq!(in_flight.task.current_quantity, 2.0);

    let regenerated: Vec<NaiveDate> = instances
        .iter()
        .filter(|i| i.task.occurrence_date != Some(in_flight_date))
        .filter_map(|i| i.task.occurrence_date)
        .collect();
    let expected: Vec<NaiveDate> = (0..12)
        .map(|i| today() + Duration::days(i * 2))
        .collect();
    assert_eq!(regenerated, expected);
}

#[tokio::test]
async fn cosmetic_update_leaves_instances_alone() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");

    let before = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");

    let updated = service
        .update_template(
            template.id,
            UpdateTemplateData {
                title: Some("Water all plants".to_string()),
                priority: Some(TaskPriority::High),
                ..Default::default()
            },
            None,
        )
        .await
        .expect("Failed to update template");
    assert_eq!(updated.title, "Water all plants");
    assert_eq!(updated.priority, TaskPriority::High);

    let after = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    let before_ids: Vec<Uuid> = before.iter().map(|i| i.task.id).collect();
    let after_ids: Vec<Uuid> = after.iter().map(|i| i.task.id).collect();
    assert_eq!(before_ids, after_ids);
}

#[tokio::test]
async fn assignee_replacement_only_affects_new_instances() {
    let (pool, _temp_dir) = setup_test_db().await;
    let alice = create_test_user(&pool, "alice").await;
    let bob = create_test_user(&pool, "bob").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), alice.id),
            Some(vec![alice.id]),
        )
        .await
        .expect("Failed to create template");

    service
        .update_template(template.id, UpdateTemplateData::default(), Some(vec![bob.id]))
        .await
        .expect("Failed to replace assignees");

    let created = service
        .ensure_instance_buffer(template.id, 15)
        .await
        .expect("Failed to ensure buffer");
    assert_eq!(created, 3);

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 15);

    for instance in &instances {
        let date = instance.task.occurrence_date.expect("occurrence date");
        if date < today() + Duration::days(12) {
            // Original instances keep their stamped assignment.
            assert_eq!(instance.assignees, vec![alice.id]);
        } else {
            assert_eq!(instance.assignees, vec![bob.id]);
        }
    }
}

#[tokio::test]
async fn deactivation_keeps_instances_and_blocks_generation() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");

    let deactivated = service
        .deactivate_template(template.id)
        .await
        .expect("Failed to deactivate");
    assert!(!deactivated.is_active);

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 12);

    let created = service
        .ensure_instance_buffer(template.id, 20)
        .await
        .expect("Failed to ensure buffer");
    assert_eq!(created, 0);

    let active = service
        .get_active_templates()
        .await
        .expect("Failed to list active templates");
    assert!(active.is_empty());
}

#[tokio::test]
async fn reactivation_resumes_from_today_without_backfill() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");
    service
        .deactivate_template(template.id)
        .await
        .expect("Failed to deactivate");

    // A month goes by before anyone reactivates.
    let later = today() + Duration::days(30);
    let later_service = service_at(&pool, later);
    let reactivated = later_service
        .reactivate_template(template.id)
        .await
        .expect("Failed to reactivate");
    assert!(reactivated.is_active);

    let instances = later_service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(instances.len(), 24);

    // Nothing was generated inside the dormant window.
    let last_original = today() + Duration::days(11);
    for instance in &instances {
        let date = instance.task.occurrence_date.expect("occurrence date");
        assert!(
            date <= last_original || date >= later,
            "Unexpected backfilled occurrence at {}",
            date
        );
    }
    let resumed: Vec<NaiveDate> = instances
        .iter()
        .filter_map(|i| i.task.occurrence_date)
        .filter(|&d| d >= later)
        .collect();
    let expected: Vec<NaiveDate> = (0..12).map(|i| later + Duration::days(i)).collect();
    assert_eq!(resumed, expected);
}

#[tokio::test]
async fn delete_removes_template_instances_and_assignments() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            Some(vec![owner.id]),
        )
        .await
        .expect("Failed to create template");

    service
        .delete_template(template.id)
        .await
        .expect("Failed to delete template");

    let result = service.get_template(template.id).await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));

    let (tasks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await
        .expect("Failed to count tasks");
    let (assignments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_assignments")
        .fetch_one(&pool)
        .await
        .expect("Failed to count assignments");
    let (assignees,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM template_assignees")
        .fetch_one(&pool)
        .await
        .expect("Failed to count template assignees");
    assert_eq!(tasks, 0);
    assert_eq!(assignments, 0);
    assert_eq!(assignees, 0);

    // The audit trail outlives the template.
    let events = service
        .repository()
        .find_events_for_template(template.id)
        .await
        .expect("Failed to load events");
    assert!(!events.is_empty());
}

#[tokio::test]
async fn lifecycle_is_recorded_in_audit_trail() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let template = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");
    service
        .update_template(
            template.id,
            UpdateTemplateData {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .expect("Failed to update template");

    let events = service
        .repository()
        .find_events_for_template(template.id)
        .await
        .expect("Failed to load events");

    let created: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::RecurringTemplateCreated)
        .collect();
    let updated: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::RecurringTemplateUpdated)
        .collect();
    let generated: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::RecurringInstanceGenerated)
        .collect();

    assert_eq!(created.len(), 1);
    assert_eq!(updated.len(), 1);
    assert_eq!(generated.len(), 12);
    assert_eq!(created[0].actor_id, owner.id);

    // The creation event points at the first materialized instance.
    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(created[0].task_id, Some(instances[0].task.id));

    for event in &generated {
        assert!(event.task_id.is_some());
        assert_eq!(event.template_id, Some(template.id));
    }
}

#[tokio::test]
async fn sweep_tops_up_all_active_templates() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let first = service
        .create_template(
            template_data("Water plants", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");
    let second = service
        .create_template(
            template_data("Feed cat", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");
    let dormant = service
        .create_template(
            template_data("Old chore", daily_rule(today()), owner.id),
            None,
        )
        .await
        .expect("Failed to create template");
    service
        .deactivate_template(dormant.id)
        .await
        .expect("Failed to deactivate");

    // Simulate time passing: five days later the buffers have drained.
    let later = today() + Duration::days(5);
    let later_service = service_at(&pool, later);
    let summary = later_service
        .ensure_all_templates_have_instances()
        .await
        .expect("Sweep failed");

    assert_eq!(summary.templates_processed, 2);
    // Each active template has 7 upcoming occurrences left and gets 5 more.
    assert_eq!(summary.instances_created, 10);
    assert_eq!(summary.templates_with_errors, 0);
    assert!(summary.errors.is_empty());

    for id in [first.id, second.id] {
        let instances = later_service
            .get_template_instances(id)
            .await
            .expect("Failed to load instances");
        assert_eq!(instances.len(), 17);
    }
    let dormant_instances = later_service
        .get_template_instances(dormant.id)
        .await
        .expect("Failed to load instances");
    assert_eq!(dormant_instances.len(), 12);
}

#[tokio::test]
async fn monthly_rule_clamps_to_short_months() {
    let (pool, _temp_dir) = setup_test_db().await;
    let owner = create_test_user(&pool, "alice").await;
    let service = service_at(&pool, today());

    let rule = RecurrenceRule {
        frequency: Frequency::Monthly,
        interval: 1,
        days_of_week: vec![],
        day_of_month: Some(31),
        start_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        end_date: None,
    };
    let template = service
        .create_template(template_data("Pay rent", rule, owner.id), None)
        .await
        .expect("Failed to create template");

    let instances = service
        .get_template_instances(template.id)
        .await
        .expect("Failed to load instances");
    let dates: Vec<NaiveDate> = instances
        .iter()
        .filter_map(|i| i.task.occurrence_date)
        .collect();

    let expected: Vec<NaiveDate> = [
        (2026, 1, 31),
        (2026, 2, 28),
        (2026, 3, 31),
        (2026, 4, 30),
        (2026, 5, 31),
        (2026, 6, 30),
        (2026, 7, 31),
        (2026, 8, 31),
        (2026, 9, 30),
        (2026, 10, 31),
        (2026, 11, 30),
        (2026, 12, 31),
    ]
    .iter()
    .map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
    .collect();
    assert_eq!(dates, expected);
}

#[tokio::test]
async fn missing_template_surfaces_not_found() {
    let (pool, _temp_dir) = setup_test_db().await;
    let service = service_at(&pool, today());

    let bogus = Uuid::now_v7();
    assert!(matches!(
        service.get_template(bogus).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        service.get_template_instances(bogus).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        service
            .update_template(bogus, UpdateTemplateData::default(), None)
            .await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        service.deactivate_template(bogus).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        service.delete_template(bogus).await,
        Err(CoreError::NotFound(_))
    ));
}
