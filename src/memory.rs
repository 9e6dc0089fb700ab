//! Process-local store used when no `DATABASE_URL` is configured.
//!
//! Holds the same invariants as the Postgres schema: unique usernames and
//! emails, one translation per (task, language), and cascading deletes.
//! All state sits behind one mutex, so every operation is atomic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{AppError, AppResult};
use crate::models::{NewTask, NewUser, Task, TaskPatch, Translation, User};
use crate::store::{TaskRepository, TranslationStore, UserRepository};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    tasks: BTreeMap<i64, Task>,
    translations: BTreeMap<(i64, String), Translation>,
    next_user_id: i64,
    next_task_id: i64,
    next_translation_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("memory store lock poisoned")))
    }

    /// Number of stored translation rows, across all tasks.
    pub fn translation_count(&self) -> AppResult<usize> {
        Ok(self.state()?.translations.len())
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut state = self.state()?;

        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(AppError::Conflict(
                "Username or email already registered".to_string(),
            ));
        }

        let now = Utc::now();
        let id = next_id(&mut state.next_user_id);
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let state = self.state()?;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create_task(&self, user_id: i64, task: &NewTask) -> AppResult<Task> {
        let mut state = self.state()?;

        if !state.users.contains_key(&user_id) {
            return Err(AppError::not_found(format!("User {}", user_id)));
        }

        let now = Utc::now();
        let id = next_id(&mut state.next_task_id);
        let created = Task {
            id,
            user_id,
            title: task.title.clone(),
            description: task.description.clone(),
            start_time: task.start_time,
            end_time: task.end_time,
            auto_translate: task.auto_translate,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(id, created.clone());
        Ok(created)
    }

    async fn get_task(&self, task_id: i64) -> AppResult<Option<Task>> {
        Ok(self.state()?.tasks.get(&task_id).cloned())
    }

    async fn list_tasks_by_user(&self, user_id: i64) -> AppResult<Vec<Task>> {
        let state = self.state()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn update_task(&self, task_id: i64, patch: &TaskPatch) -> AppResult<Option<Task>> {
        let mut state = self.state()?;

        let Some(existing) = state.tasks.get(&task_id) else {
            return Ok(None);
        };

        let mut updated = patch.apply_to(existing);
        if updated.end_time <= updated.start_time {
            return Err(AppError::validation("end_time must be after start_time"));
        }
        updated.updated_at = Utc::now();
        state.tasks.insert(task_id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_task(&self, task_id: i64) -> AppResult<bool> {
        let mut state = self.state()?;

        if state.tasks.remove(&task_id).is_none() {
            return Ok(false);
        }
        state.translations.retain(|(id, _), _| *id != task_id);
        Ok(true)
    }
}

#[async_trait]
impl TranslationStore for MemoryStore {
    async fn upsert_translation(
        &self,
        task_id: i64,
        language: &str,
        title: &str,
        description: Option<&str>,
    ) -> AppResult<Translation> {
        let mut state = self.state()?;

        if !state.tasks.contains_key(&task_id) {
            return Err(AppError::not_found(format!("Task {}", task_id)));
        }

        let now = Utc::now();
        let key = (task_id, language.to_string());
        let existing = state.translations.get(&key).cloned();
        let translation = match existing {
            Some(existing) => Translation {
                title: title.to_string(),
                description: description.map(str::to_string),
                updated_at: now,
                ..existing
            },
            None => Translation {
                id: next_id(&mut state.next_translation_id),
                task_id,
                language: language.to_string(),
                title: title.to_string(),
                description: description.map(str::to_string),
                created_at: now,
                updated_at: now,
            },
        };
        state.translations.insert(key, translation.clone());
        Ok(translation)
    }

    async fn list_translations(
        &self,
        task_id: i64,
        language: Option<&str>,
    ) -> AppResult<Vec<Translation>> {
        let state = self.state()?;
        Ok(state
            .translations
            .values()
            .filter(|t| t.task_id == task_id)
            .filter(|t| language.map_or(true, |lang| t.language == lang))
            .cloned()
            .collect())
    }

    async fn list_translations_for_tasks(&self, task_ids: &[i64]) -> AppResult<Vec<Translation>> {
        let state = self.state()?;
        Ok(state
            .translations
            .values()
            .filter(|t| task_ids.contains(&t.task_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    async fn store_with_task() -> (MemoryStore, User, Task) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                username: "ivan".to_string(),
                email: "ivan@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .expect("create user");
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let task = store
            .create_task(
                user.id,
                &NewTask {
                    title: "Купить молоко".to_string(),
                    description: None,
                    start_time: start,
                    end_time: start + Duration::hours(1),
                    auto_translate: true,
                },
            )
            .await
            .expect("create task");
        (store, user, task)
    }

    // ==================== User Tests ====================

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (store, _, _) = store_with_task().await;
        let result = store
            .create_user(NewUser {
                username: "ivan".to_string(),
                email: "other@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_find_user_by_username() {
        let (store, user, _) = store_with_task().await;
        let found = store.find_user_by_username("ivan").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
        assert!(store.find_user_by_username("petr").await.unwrap().is_none());
    }

    // ==================== Task Tests ====================

    #[tokio::test]
    async fn test_create_task_for_unknown_user_fails() {
        let store = MemoryStore::new();
        let start = Utc::now();
        let result = store
            .create_task(
                99,
                &NewTask {
                    title: "x".to_string(),
                    description: None,
                    start_time: start,
                    end_time: start + Duration::hours(1),
                    auto_translate: false,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_updated_at() {
        let (store, _, task) = store_with_task().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let patch = TaskPatch {
            title: Some("Купить хлеб".to_string()),
            ..Default::default()
        };
        let updated = store.update_task(task.id, &patch).await.unwrap().unwrap();

        assert_eq!(updated.title, "Купить хлеб");
        assert!(updated.updated_at > task.updated_at);
        assert_eq!(updated.created_at, task.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_task_returns_none() {
        let store = MemoryStore::new();
        let result = store.update_task(42, &TaskPatch::default()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_task_cascades_translations() {
        let (store, _, task) = store_with_task().await;
        store
            .upsert_translation(task.id, "en", "Buy milk", None)
            .await
            .unwrap();
        assert_eq!(store.translation_count().unwrap(), 1);

        assert!(store.delete_task(task.id).await.unwrap());
        assert_eq!(store.translation_count().unwrap(), 0);
        assert!(!store.delete_task(task.id).await.unwrap());
    }

    // ==================== Translation Tests ====================

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row_with_second_content() {
        let (store, _, task) = store_with_task().await;

        let first = store
            .upsert_translation(task.id, "en", "Buy milk", None)
            .await
            .unwrap();
        let second = store
            .upsert_translation(task.id, "en", "Purchase milk", Some("2 liters"))
            .await
            .unwrap();

        let rows = store.list_translations(task.id, Some("en")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Purchase milk");
        assert_eq!(rows[0].description.as_deref(), Some("2 liters"));
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_upsert_for_deleted_task_does_not_resurrect() {
        let (store, _, task) = store_with_task().await;
        store.delete_task(task.id).await.unwrap();

        let result = store.upsert_translation(task.id, "en", "Buy milk", None).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(store.get_task(task.id).await.unwrap().is_none());
        assert_eq!(store.translation_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_never_duplicate() {
        let (store, _, task) = store_with_task().await;

        let writes = (0..20).map(|i| {
            let store = store.clone();
            let title = format!("Title {}", i);
            async move { store.upsert_translation(task.id, "en", &title, None).await }
        });
        for result in futures::future::join_all(writes).await {
            result.expect("upsert should succeed");
        }

        let rows = store.list_translations(task.id, None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_list_translations_filters_by_language() {
        let (store, _, task) = store_with_task().await;
        store
            .upsert_translation(task.id, "en", "Buy milk", None)
            .await
            .unwrap();

        assert_eq!(store.list_translations(task.id, None).await.unwrap().len(), 1);
        assert!(store
            .list_translations(task.id, Some("de"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list_translations_for_tasks(&[task.id, 999])
                .await
                .unwrap()
                .len(),
            1
        );
    }

    proptest! {
        #[test]
        fn prop_upsert_sequence_leaves_last_write(titles in proptest::collection::vec("[a-zA-Z ]{1,20}", 1..8)) {
            let rows = tokio_test::block_on(async {
                let (store, _, task) = store_with_task().await;
                for title in &titles {
                    store.upsert_translation(task.id, "en", title, None).await.unwrap();
                }
                store.list_translations(task.id, Some("en")).await.unwrap()
            });

            prop_assert_eq!(rows.len(), 1);
            prop_assert_eq!(&rows[0].title, titles.last().unwrap());
        }
    }
}
