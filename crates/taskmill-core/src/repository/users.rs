use crate::error::CoreError;
use crate::models::User;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

#[async_trait]
impl super::UserRepository for SqliteRepository {
    async fn add_user(&self, username: &str) -> Result<User, CoreError> {
        let user = User {
            id: Uuid::now_v7(),
            username: username.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO users (id, username, created_at) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.username)
            .bind(user.created_at)
            .execute(self.pool())
            .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }
}

impl SqliteRepository {
    /// Which of the given ids do not resolve to a real user? Used to reject
    /// bad assignee lists before any write happens.
    pub(crate) async fn find_missing_user_ids_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, CoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM users WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        qb.push(")");

        let found: Vec<(Uuid,)> = qb.build_query_as().fetch_all(&mut **tx).await?;
        let found: HashSet<Uuid> = found.into_iter().map(|(id,)| id).collect();

        let mut missing = Vec::new();
        for id in ids {
            if !found.contains(id) && !missing.contains(id) {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}
