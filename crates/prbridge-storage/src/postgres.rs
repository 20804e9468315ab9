//! PostgreSQL implementation of NotifyStore
//!
//! Idempotency is enforced by the schema:
//! - `events.hash` is unique; inserts use `ON CONFLICT DO NOTHING`
//! - `(project, name)` and `(user_id, repo_id)` are unique; writes upsert
//! - the ack update keeps the first `send_at`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prbridge_core::{
    email_key, validate_repo_names, validate_user_ids, Event, GcPolicy, InsertOutcome, NewEvent,
    NotifyStore, Repo, StoreError, Subscription, SubscriptionKind, User,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

use crate::models::{EventRow, RepoRow, SubscriptionRow, UserRow};

const EVENT_COLUMNS: &str = "id, hash, event_type, recipient_tg_id, recipient_chat_id, \
    sender_name, repo_project, repo_name, pr_id, pr_title, pr_url, send_ack, send_at, created_at";

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("Failed to {}: {}", context, e);
        StoreError::Database(e.to_string())
    }
}

/// PostgreSQL implementation of NotifyStore
///
/// # Example
///
/// ```ignore
/// use prbridge_storage::PostgresStore;
///
/// let store = PostgresStore::connect("postgres://localhost/prbridge", 5).await?;
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store with an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(db_err("connect to database"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("running migrations: {e}")))?;

        info!(max_connections, "Database connected, migrations applied");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotifyStore for PostgresStore {
    // =========================================================================
    // Repos
    // =========================================================================

    #[instrument(skip(self))]
    async fn create_repo(&self, project: &str, name: &str) -> Result<(), StoreError> {
        validate_repo_names(project, name)?;

        let result = sqlx::query(
            r#"
            INSERT INTO repos (project, name)
            VALUES ($1, $2)
            ON CONFLICT (project, name) DO NOTHING
            "#,
        )
        .bind(project)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err("create repo"))?;

        if result.rows_affected() > 0 {
            debug!(%project, %name, "Repo created");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_repo(&self, project: &str, name: &str) -> Result<Option<Repo>, StoreError> {
        let row = sqlx::query_as::<_, RepoRow>(
            r#"
            SELECT id, project, name, created_at
            FROM repos
            WHERE project = $1 AND name = $2
            "#,
        )
        .bind(project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get repo"))?;

        Ok(row.map(Repo::from))
    }

    #[instrument(skip(self))]
    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError> {
        let rows = sqlx::query_as::<_, RepoRow>(
            "SELECT id, project, name, created_at FROM repos ORDER BY project, name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list repos"))?;

        Ok(rows.into_iter().map(Repo::from).collect())
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[instrument(skip(self))]
    async fn create_user(
        &self,
        tg_id: i64,
        tg_chat_id: i64,
        tg_login: &str,
    ) -> Result<User, StoreError> {
        validate_user_ids(tg_id, tg_chat_id)?;

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (tg_id, tg_chat_id, tg_login)
            VALUES ($1, $2, $3)
            RETURNING id, tg_id, tg_login, tg_chat_id, bb_email, active, created_at
            "#,
        )
        .bind(tg_id)
        .bind(tg_chat_id)
        .bind(tg_login)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("create user"))?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, tg_id, tg_login, tg_chat_id, bb_email, active, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get user"))?;

        Ok(row.map(User::from))
    }

    #[instrument(skip(self))]
    async fn get_user_by_tg_id(&self, tg_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, tg_id, tg_login, tg_chat_id, bb_email, active, created_at
            FROM users
            WHERE tg_id = $1
            "#,
        )
        .bind(tg_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get user by telegram ID"))?;

        Ok(row.map(User::from))
    }

    #[instrument(skip(self))]
    async fn get_user_by_bb_email(&self, bb_email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, tg_id, tg_login, tg_chat_id, bb_email, active, created_at
            FROM users
            WHERE bb_email <> '' AND LOWER(TRIM(bb_email)) = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(email_key(bb_email))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get user by Bitbucket email"))?;

        Ok(row.map(User::from))
    }

    #[instrument(skip(self))]
    async fn set_user_bb_email(&self, user_id: i64, bb_email: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET bb_email = $2 WHERE id = $1")
            .bind(user_id)
            .bind(bb_email)
            .execute(&self.pool)
            .await
            .map_err(db_err("set user Bitbucket email"))?;

        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, repo_id, kind, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list subscriptions for user"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_subscriptions_for_repo(
        &self,
        repo_id: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, repo_id, kind, created_at, updated_at
            FROM subscriptions
            WHERE repo_id = $1
            ORDER BY id
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list subscriptions for repo"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn set_subscription(
        &self,
        user_id: i64,
        repo_id: i64,
        kind: SubscriptionKind,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, repo_id, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, repo_id)
            DO UPDATE SET kind = EXCLUDED.kind, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(repo_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("set subscription"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_subscription(&self, user_id: i64, repo_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND repo_id = $2")
            .bind(user_id)
            .bind(repo_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete subscription"))?;

        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    #[instrument(skip(self, event), fields(hash = %event.hash))]
    async fn create_event_if_absent(&self, event: NewEvent) -> Result<InsertOutcome, StoreError> {
        let query = format!(
            r#"
            INSERT INTO events (
                hash, event_type, recipient_tg_id, recipient_chat_id, sender_name,
                repo_project, repo_name, pr_id, pr_title, pr_url, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (hash) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(&event.hash)
            .bind(event.event_type.as_str())
            .bind(event.recipient_tg_id)
            .bind(event.recipient_chat_id)
            .bind(&event.sender_name)
            .bind(&event.repo_project)
            .bind(&event.repo_name)
            .bind(event.pr_id)
            .bind(&event.pr_title)
            .bind(&event.pr_url)
            .bind(event.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("create event"))?;

        match row {
            Some(row) => Ok(InsertOutcome::Created(Event::try_from(row)?)),
            None => Ok(InsertOutcome::AlreadyExists),
        }
    }

    #[instrument(skip(self))]
    async fn set_event_sent(
        &self,
        event_id: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE events
            SET send_ack = TRUE, send_at = COALESCE(send_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("set event sent"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_unsent_events(&self) -> Result<Vec<Event>, StoreError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE send_ack = FALSE ORDER BY id");
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list unsent events"))?;

        rows.into_iter().map(Event::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_outdated_event_ids(
        &self,
        cutoff: DateTime<Utc>,
        policy: GcPolicy,
    ) -> Result<Vec<i64>, StoreError> {
        let query = match policy {
            GcPolicy::AckedBySentAt => {
                "SELECT id FROM events WHERE send_ack = TRUE AND send_at < $1 ORDER BY id"
            }
            GcPolicy::ByCreatedAt => "SELECT id FROM events WHERE created_at < $1 ORDER BY id",
        };

        sqlx::query_scalar::<_, i64>(query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list outdated events"))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_events(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete events"))?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Key-value
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kvs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get value"))
    }

    #[instrument(skip(self))]
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kvs (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err("set value"))?;

        Ok(())
    }
}
