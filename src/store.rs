//! Storage seams shared by the Postgres database and the in-memory store.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{NewTask, NewUser, Task, TaskPatch, Translation, User};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with `Conflict` if the username or email is taken.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>>;
}

/// Canonical task rows. Deleting a task removes its translations.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, user_id: i64, task: &NewTask) -> AppResult<Task>;

    async fn get_task(&self, task_id: i64) -> AppResult<Option<Task>>;

    /// Tasks owned by `user_id`, earliest start first.
    async fn list_tasks_by_user(&self, user_id: i64) -> AppResult<Vec<Task>>;

    /// Apply `patch` and bump `updated_at`. `None` if the task does not exist.
    async fn update_task(&self, task_id: i64, patch: &TaskPatch) -> AppResult<Option<Task>>;

    /// Returns `false` if the task did not exist.
    async fn delete_task(&self, task_id: i64) -> AppResult<bool>;
}

/// At most one translation per (task, language).
#[async_trait]
pub trait TranslationStore: Send + Sync {
    /// Insert or overwrite the translation for (task, language) atomically.
    ///
    /// Fails with `NotFound` if the task no longer exists.
    async fn upsert_translation(
        &self,
        task_id: i64,
        language: &str,
        title: &str,
        description: Option<&str>,
    ) -> AppResult<Translation>;

    async fn list_translations(
        &self,
        task_id: i64,
        language: Option<&str>,
    ) -> AppResult<Vec<Translation>>;

    /// Translations of several tasks in one round-trip.
    async fn list_translations_for_tasks(&self, task_ids: &[i64]) -> AppResult<Vec<Translation>>;
}
