use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{NewTask, NewUser, Task, TaskPatch, Translation, User};
use crate::store::{TaskRepository, TranslationStore, UserRepository};

const TASK_COLUMNS: &str =
    "id, user_id, title, description, start_time, end_time, auto_translate, created_at, updated_at";
const TRANSLATION_COLUMNS: &str =
    "id, task_id, language, title, description, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, created_at, updated_at";

/// Postgres-backed storage. Connections are checked out of the pool per
/// statement and returned when the statement completes or fails.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to Postgres and create tables if they do not exist.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.init_schema().await?;

        info!("✓ Database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create users table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ NOT NULL,
                auto_translate BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT tasks_interval_check CHECK (start_time < end_time)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create tasks table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create tasks index")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_translations (
                id BIGSERIAL PRIMARY KEY,
                task_id BIGINT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                language VARCHAR(2) NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT task_translations_task_language_key UNIQUE (task_id, language)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create task_translations table")?;

        // Translations can outgrow the canonical 255-character title
        sqlx::query("ALTER TABLE task_translations ALTER COLUMN title TYPE TEXT")
            .execute(&self.pool)
            .await
            .context("Failed to widen task_translations.title")?;

        Ok(())
    }
}

/// Translate constraint violations into domain errors.
fn map_db_error(err: sqlx::Error, what: &str) -> AppError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_foreign_key_violation() {
            return AppError::not_found(what.to_string());
        }
        if db_err.is_check_violation() {
            return AppError::validation("end_time must be after start_time");
        }
        if db_err.is_unique_violation() {
            return AppError::Conflict(format!("{} already exists", what));
        }
    }
    AppError::Database(err)
}

#[async_trait]
impl UserRepository for Database {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash)
             VALUES ($1, $2, $3)
             RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match map_db_error(e, "User") {
                AppError::Conflict(_) => {
                    AppError::Conflict("Username or email already registered".to_string())
                }
                other => other,
            })
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }
}

#[async_trait]
impl TaskRepository for Database {
    async fn create_task(&self, user_id: i64, task: &NewTask) -> AppResult<Task> {
        let sql = format!(
            "INSERT INTO tasks (user_id, title, description, start_time, end_time, auto_translate)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(user_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.start_time)
            .bind(task.end_time)
            .bind(task.auto_translate)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("User {}", user_id)))
    }

    async fn get_task(&self, task_id: i64) -> AppResult<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);

        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(task)
    }

    async fn list_tasks_by_user(&self, user_id: i64) -> AppResult<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE user_id = $1 ORDER BY start_time ASC, id ASC",
            TASK_COLUMNS
        );

        let tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(tasks)
    }

    async fn update_task(&self, task_id: i64, patch: &TaskPatch) -> AppResult<Option<Task>> {
        let sql = format!(
            "UPDATE tasks SET
                title = COALESCE($2, title),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                start_time = COALESCE($5, start_time),
                end_time = COALESCE($6, end_time),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TASK_COLUMNS
        );

        let description = patch.description.clone().flatten();

        sqlx::query_as::<_, Task>(&sql)
            .bind(task_id)
            .bind(&patch.title)
            .bind(patch.description.is_some())
            .bind(description)
            .bind(patch.start_time)
            .bind(patch.end_time)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("Task {}", task_id)))
    }

    async fn delete_task(&self, task_id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TranslationStore for Database {
    async fn upsert_translation(
        &self,
        task_id: i64,
        language: &str,
        title: &str,
        description: Option<&str>,
    ) -> AppResult<Translation> {
        // Single statement, so concurrent jobs for one key cannot both insert
        let sql = format!(
            "INSERT INTO task_translations (task_id, language, title, description)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (task_id, language) DO UPDATE
             SET title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 updated_at = NOW()
             RETURNING {}",
            TRANSLATION_COLUMNS
        );

        sqlx::query_as::<_, Translation>(&sql)
            .bind(task_id)
            .bind(language)
            .bind(title)
            .bind(description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match map_db_error(e, &format!("Task {}", task_id)) {
                AppError::Conflict(message) => AppError::StoreConflict(message),
                other => other,
            })
    }

    async fn list_translations(
        &self,
        task_id: i64,
        language: Option<&str>,
    ) -> AppResult<Vec<Translation>> {
        let sql = format!(
            "SELECT {} FROM task_translations
             WHERE task_id = $1 AND ($2::TEXT IS NULL OR language = $2)
             ORDER BY language",
            TRANSLATION_COLUMNS
        );

        let translations = sqlx::query_as::<_, Translation>(&sql)
            .bind(task_id)
            .bind(language)
            .fetch_all(&self.pool)
            .await?;

        Ok(translations)
    }

    async fn list_translations_for_tasks(&self, task_ids: &[i64]) -> AppResult<Vec<Translation>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM task_translations WHERE task_id = ANY($1) ORDER BY task_id, language",
            TRANSLATION_COLUMNS
        );

        let translations = sqlx::query_as::<_, Translation>(&sql)
            .bind(task_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(translations)
    }
}
