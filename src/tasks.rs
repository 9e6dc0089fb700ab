//! Task mutations and ownership-scoped reads.
//!
//! Writes are persisted synchronously. Translation is handed to the
//! background scheduler afterwards and never delays or fails the write.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{NewTask, Task, TaskPatch};
use crate::read_model::{TaskReader, TaskView};
use crate::scheduler::JobSubmitter;
use crate::store::{TaskRepository, TranslationStore};

/// Whether an update touching text re-translates a task created with
/// `auto_translate = false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetranslatePolicy {
    /// Re-translate on every text change, regardless of the stored flag
    #[default]
    Always,
    /// Re-translate only tasks created with `auto_translate = true`
    RespectAutoTranslate,
}

impl RetranslatePolicy {
    fn applies_to(self, task: &Task) -> bool {
        match self {
            Self::Always => true,
            Self::RespectAutoTranslate => task.auto_translate,
        }
    }
}

impl FromStr for RetranslatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "respect_auto_translate" => Ok(Self::RespectAutoTranslate),
            other => anyhow::bail!("unknown retranslate policy '{}'", other),
        }
    }
}

impl fmt::Display for RetranslatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::RespectAutoTranslate => "respect_auto_translate",
        })
    }
}

#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    reader: TaskReader,
    jobs: JobSubmitter,
    policy: RetranslatePolicy,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        translations: Arc<dyn TranslationStore>,
        jobs: JobSubmitter,
        policy: RetranslatePolicy,
    ) -> Self {
        Self {
            tasks,
            reader: TaskReader::new(translations),
            jobs,
            policy,
        }
    }

    /// Persist a task and return its canonical view. Queues a translation
    /// when `auto_translate` is set.
    pub async fn create(&self, user_id: i64, new_task: NewTask) -> AppResult<TaskView> {
        new_task.validate()?;

        let task = self.tasks.create_task(user_id, &new_task).await?;
        info!(task_id = task.id, user_id, "Task created");

        let view = self.reader.canonical_view(&task);
        if task.auto_translate {
            self.jobs.submit(task.id);
        }
        Ok(view)
    }

    pub async fn list(&self, user_id: i64, language: Option<&str>) -> AppResult<Vec<TaskView>> {
        let tasks = self.tasks.list_tasks_by_user(user_id).await?;
        Ok(self.reader.present_many(&tasks, language).await)
    }

    pub async fn get(
        &self,
        user_id: i64,
        task_id: i64,
        language: Option<&str>,
    ) -> AppResult<TaskView> {
        let task = self.owned(user_id, task_id).await?;
        Ok(self.reader.present_one(&task, language).await)
    }

    /// Apply a partial update. Naming `title` or `description` queues a
    /// re-translation, subject to the configured policy; the translation
    /// already stored keeps being served until the job replaces it.
    pub async fn update(
        &self,
        user_id: i64,
        task_id: i64,
        patch: TaskPatch,
    ) -> AppResult<TaskView> {
        let current = self.owned(user_id, task_id).await?;
        patch.validate_against(&current)?;

        if patch.is_empty() {
            debug!(task_id, "Empty patch, nothing to update");
            return Ok(self.reader.present_one(&current, None).await);
        }

        let updated = self
            .tasks
            .update_task(task_id, &patch)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {}", task_id)))?;
        info!(task_id, user_id, "Task updated");

        if patch.touches_text() && self.policy.applies_to(&updated) {
            self.jobs.submit(updated.id);
        }
        Ok(self.reader.present_one(&updated, None).await)
    }

    pub async fn delete(&self, user_id: i64, task_id: i64) -> AppResult<()> {
        self.owned(user_id, task_id).await?;

        if !self.tasks.delete_task(task_id).await? {
            return Err(AppError::not_found(format!("Task {}", task_id)));
        }
        info!(task_id, user_id, "Task deleted");
        Ok(())
    }

    /// Tasks of other users are reported as missing.
    async fn owned(&self, user_id: i64, task_id: i64) -> AppResult<Task> {
        self.tasks
            .get_task(task_id)
            .await?
            .filter(|task| task.user_id == user_id)
            .ok_or_else(|| AppError::not_found(format!("Task {}", task_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::Language;
    use crate::memory::MemoryStore;
    use crate::models::NewUser;
    use crate::scheduler::{SchedulerConfig, TranslationScheduler};
    use crate::store::UserRepository;
    use crate::translation::{TranslationError, TranslationProvider};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use tokio::sync::Semaphore;

    /// Dictionary provider. With a gate, each call waits for a permit.
    struct DictionaryProvider {
        gate: Option<Arc<Semaphore>>,
        fail: bool,
    }

    #[async_trait]
    impl TranslationProvider for DictionaryProvider {
        async fn translate_text(
            &self,
            text: &str,
            _source: Language,
            _target: Language,
        ) -> Result<String, TranslationError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Err(TranslationError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(match text {
                "Купить молоко" => "Buy milk",
                "Купить хлеб" => "Buy bread",
                "2 литра" => "2 liters",
                _ => "???",
            }
            .to_string())
        }
    }

    struct Harness {
        service: TaskService,
        store: MemoryStore,
        jobs: JobSubmitter,
        _scheduler: TranslationScheduler,
        alice: i64,
        bob: i64,
    }

    impl Harness {
        async fn new() -> Self {
            Self::build(None, false, RetranslatePolicy::Always, 1024).await
        }

        async fn build(
            gate: Option<Arc<Semaphore>>,
            fail: bool,
            policy: RetranslatePolicy,
            queue_capacity: usize,
        ) -> Self {
            let store = MemoryStore::new();
            let alice = user(&store, "alice").await;
            let bob = user(&store, "bob").await;

            let scheduler = TranslationScheduler::start(
                SchedulerConfig {
                    queue_capacity,
                    ..Default::default()
                },
                Arc::new(DictionaryProvider { gate, fail }),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
            );
            let jobs = scheduler.submitter();
            let service = TaskService::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                jobs.clone(),
                policy,
            );

            Self {
                service,
                store,
                jobs,
                _scheduler: scheduler,
                alice,
                bob,
            }
        }
    }

    async fn user(store: &MemoryStore, name: &str) -> i64 {
        store
            .create_user(NewUser {
                username: name.into(),
                email: format!("{}@example.com", name),
                password_hash: "hash".into(),
            })
            .await
            .unwrap()
            .id
    }

    fn milk(auto_translate: bool) -> NewTask {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        NewTask {
            title: "Купить молоко".into(),
            description: Some("2 литра".into()),
            start_time: start,
            end_time: start + Duration::hours(1),
            auto_translate,
        }
    }

    // ==================== Create Tests ====================

    #[tokio::test]
    async fn test_create_returns_canonical_then_translation_appears() {
        let h = Harness::new().await;

        let created = h.service.create(h.alice, milk(true)).await.unwrap();
        assert_eq!(created.title, "Купить молоко");
        assert!(created.translations.is_empty());

        h.jobs.wait_idle().await;

        let en = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(en.title, "Buy milk");
        assert_eq!(en.description.as_deref(), Some("2 liters"));

        let ru = h.service.get(h.alice, created.id, Some("ru")).await.unwrap();
        assert_eq!(ru.title, "Купить молоко");
        assert_eq!(ru.translations.len(), 1);
    }

    #[tokio::test]
    async fn test_create_without_auto_translate_submits_nothing() {
        let h = Harness::new().await;

        let created = h.service.create(h.alice, milk(false)).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(h.jobs.metrics().submitted, 0);
        let en = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(en.title, "Купить молоко");
    }

    #[tokio::test]
    async fn test_create_with_bad_interval_persists_nothing() {
        let h = Harness::new().await;
        let mut task = milk(true);
        task.end_time = task.start_time;

        let err = h.service.create(h.alice, task).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.service.list(h.alice, None).await.unwrap().is_empty());
        assert_eq!(h.jobs.metrics().submitted, 0);
    }

    #[tokio::test]
    async fn test_create_succeeds_when_provider_fails() {
        let h = Harness::build(None, true, RetranslatePolicy::Always, 1024).await;

        let created = h.service.create(h.alice, milk(true)).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(h.jobs.metrics().failed, 1);
        let en = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(en.title, "Купить молоко");
    }

    #[tokio::test]
    async fn test_create_succeeds_when_queue_is_full() {
        let h = Harness::build(None, false, RetranslatePolicy::Always, 1).await;

        // Nothing yields between these, so the second job finds the queue full
        h.service.create(h.alice, milk(true)).await.unwrap();
        h.service.create(h.alice, milk(true)).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(h.service.list(h.alice, None).await.unwrap().len(), 2);
        assert_eq!(h.jobs.metrics().dropped, 1);
    }

    // ==================== Update Tests ====================

    #[tokio::test]
    async fn test_time_only_update_submits_no_job() {
        let h = Harness::new().await;
        let created = h.service.create(h.alice, milk(true)).await.unwrap();
        h.jobs.wait_idle().await;

        let patch = TaskPatch {
            start_time: Some(created.start_time - Duration::hours(1)),
            ..Default::default()
        };
        let updated = h.service.update(h.alice, created.id, patch).await.unwrap();

        assert_eq!(updated.start_time, created.start_time - Duration::hours(1));
        assert_eq!(h.jobs.metrics().submitted, 1);
    }

    #[tokio::test]
    async fn test_title_update_serves_stale_translation_until_job_completes() {
        let gate = Arc::new(Semaphore::new(0));
        let h = Harness::build(Some(Arc::clone(&gate)), false, RetranslatePolicy::Always, 1024)
            .await;
        let mut task = milk(true);
        task.description = None;

        let created = h.service.create(h.alice, task).await.unwrap();
        gate.add_permits(1);
        h.jobs.wait_idle().await;

        let patch = TaskPatch {
            title: Some("Купить хлеб".into()),
            ..Default::default()
        };
        let updated = h.service.update(h.alice, created.id, patch).await.unwrap();
        assert_eq!(updated.title, "Купить хлеб");
        assert_eq!(h.jobs.metrics().submitted, 2);

        let stale = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(stale.title, "Buy milk");

        gate.add_permits(1);
        h.jobs.wait_idle().await;

        let fresh = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(fresh.title, "Buy bread");
        assert_eq!(h.store.translation_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_merged_bad_interval() {
        let h = Harness::new().await;
        let created = h.service.create(h.alice, milk(false)).await.unwrap();

        let patch = TaskPatch {
            end_time: Some(created.start_time - Duration::minutes(1)),
            ..Default::default()
        };
        let err = h.service.update(h.alice, created.id, patch).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        let unchanged = h.service.get(h.alice, created.id, None).await.unwrap();
        assert_eq!(unchanged.end_time, created.end_time);
    }

    #[tokio::test]
    async fn test_respect_auto_translate_policy() {
        let h = Harness::build(None, false, RetranslatePolicy::RespectAutoTranslate, 1024).await;
        let created = h.service.create(h.alice, milk(false)).await.unwrap();

        let patch = TaskPatch {
            title: Some("Купить хлеб".into()),
            ..Default::default()
        };
        h.service.update(h.alice, created.id, patch).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(h.jobs.metrics().submitted, 0);
    }

    #[tokio::test]
    async fn test_always_policy_retranslates_opted_out_task() {
        let h = Harness::new().await;
        let created = h.service.create(h.alice, milk(false)).await.unwrap();

        let patch = TaskPatch {
            description: Some(None),
            ..Default::default()
        };
        let updated = h.service.update(h.alice, created.id, patch).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(updated.description, None);
        assert_eq!(h.jobs.metrics().submitted, 1);
        let en = h.service.get(h.alice, created.id, Some("en")).await.unwrap();
        assert_eq!(en.title, "Buy milk");
        assert_eq!(en.description, None);
    }

    // ==================== Ownership Tests ====================

    #[tokio::test]
    async fn test_foreign_task_is_not_found() {
        let h = Harness::new().await;
        let created = h.service.create(h.alice, milk(false)).await.unwrap();

        let get = h.service.get(h.bob, created.id, None).await.unwrap_err();
        let update = h
            .service
            .update(h.bob, created.id, TaskPatch::default())
            .await
            .unwrap_err();
        let delete = h.service.delete(h.bob, created.id).await.unwrap_err();

        assert!(get.is_not_found());
        assert!(update.is_not_found());
        assert!(delete.is_not_found());
        assert!(h.service.get(h.alice, created.id, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_translated() {
        let h = Harness::new().await;
        h.service.create(h.alice, milk(true)).await.unwrap();
        h.service.create(h.bob, milk(false)).await.unwrap();
        h.jobs.wait_idle().await;

        let alice_en = h.service.list(h.alice, Some("en")).await.unwrap();
        let bob_en = h.service.list(h.bob, Some("en")).await.unwrap();

        assert_eq!(alice_en.len(), 1);
        assert_eq!(alice_en[0].title, "Buy milk");
        assert_eq!(bob_en.len(), 1);
        assert_eq!(bob_en[0].title, "Купить молоко");
    }

    // ==================== Delete Tests ====================

    #[tokio::test]
    async fn test_delete_before_job_runs() {
        let h = Harness::new().await;

        let created = h.service.create(h.alice, milk(true)).await.unwrap();
        h.service.delete(h.alice, created.id).await.unwrap();
        h.jobs.wait_idle().await;

        assert_eq!(h.jobs.metrics().skipped, 1);
        assert_eq!(h.store.translation_count().unwrap(), 0);
        assert!(h.service.get(h.alice, created.id, None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_translations() {
        let h = Harness::new().await;
        let created = h.service.create(h.alice, milk(true)).await.unwrap();
        h.jobs.wait_idle().await;
        assert_eq!(h.store.translation_count().unwrap(), 1);

        h.service.delete(h.alice, created.id).await.unwrap();

        assert_eq!(h.store.translation_count().unwrap(), 0);
    }

    // ==================== Policy Parsing Tests ====================

    #[test]
    fn test_policy_from_str() {
        assert_eq!("always".parse::<RetranslatePolicy>().unwrap(), RetranslatePolicy::Always);
        assert_eq!(
            " Respect_Auto_Translate ".parse::<RetranslatePolicy>().unwrap(),
            RetranslatePolicy::RespectAutoTranslate
        );
        assert!("never".parse::<RetranslatePolicy>().is_err());
        assert_eq!(RetranslatePolicy::default().to_string(), "always");
    }
}
