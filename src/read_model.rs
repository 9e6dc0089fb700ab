//! Bilingual task views.
//!
//! A view carries the canonical row's ids, interval and timestamps. Title and
//! description come from the translation for the requested language when one
//! exists, and from the canonical row otherwise.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::i18n::Language;
use crate::models::{Task, Translation};
use crate::store::TranslationStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationSummary {
    pub language: String,
    pub title: String,
    pub description: Option<String>,
}

impl From<&Translation> for TranslationSummary {
    fn from(translation: &Translation) -> Self {
        Self {
            language: translation.language.clone(),
            title: translation.title.clone(),
            description: translation.description.clone(),
        }
    }
}

/// Externally visible task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub translations: Vec<TranslationSummary>,
}

/// Normalize a requested language code. Empty or absent means `None`,
/// which callers treat as the canonical language.
pub fn normalize_language(requested: Option<&str>) -> Option<String> {
    requested
        .map(|code| code.trim().to_lowercase())
        .filter(|code| !code.is_empty())
}

/// Compose the view of `task` for `requested`.
///
/// `translations` may contain rows of other tasks; only rows whose
/// `task_id` matches are used.
pub fn present(
    task: &Task,
    translations: &[Translation],
    requested: Option<&str>,
    canonical: Language,
) -> TaskView {
    let own: Vec<&Translation> = translations
        .iter()
        .filter(|t| t.task_id == task.id)
        .collect();

    let selected = normalize_language(requested)
        .filter(|code| code != canonical.code())
        .and_then(|code| own.iter().copied().find(|t| t.language == code));

    let (title, description) = match selected {
        Some(translation) => (translation.title.clone(), translation.description.clone()),
        None => (task.title.clone(), task.description.clone()),
    };

    TaskView {
        id: task.id,
        user_id: task.user_id,
        title,
        description,
        start_time: task.start_time,
        end_time: task.end_time,
        created_at: task.created_at,
        updated_at: task.updated_at,
        translations: own.into_iter().map(TranslationSummary::from).collect(),
    }
}

/// Reads translations for tasks and composes views, degrading to canonical
/// content when the translation store cannot be read.
#[derive(Clone)]
pub struct TaskReader {
    translations: Arc<dyn TranslationStore>,
    canonical: Language,
}

impl TaskReader {
    pub fn new(translations: Arc<dyn TranslationStore>) -> Self {
        Self {
            translations,
            canonical: Language::canonical(),
        }
    }

    /// View without consulting the store, in the canonical language.
    pub fn canonical_view(&self, task: &Task) -> TaskView {
        present(task, &[], None, self.canonical)
    }

    pub async fn present_one(&self, task: &Task, requested: Option<&str>) -> TaskView {
        let translations = match self.translations.list_translations(task.id, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    task_id = task.id,
                    error = %e,
                    "Failed to read translations, serving canonical task"
                );
                Vec::new()
            }
        };
        present(task, &translations, requested, self.canonical)
    }

    /// Views for several tasks, fetching their translations in one batch.
    pub async fn present_many(&self, tasks: &[Task], requested: Option<&str>) -> Vec<TaskView> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let translations = match self.translations.list_translations_for_tasks(&ids).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    tasks = ids.len(),
                    error = %e,
                    "Failed to read translations, serving canonical tasks"
                );
                Vec::new()
            }
        };

        let mut by_task: HashMap<i64, Vec<Translation>> = HashMap::new();
        for translation in translations {
            by_task.entry(translation.task_id).or_default().push(translation);
        }

        tasks
            .iter()
            .map(|task| {
                let rows = by_task.get(&task.id).map(Vec::as_slice).unwrap_or(&[]);
                present(task, rows, requested, self.canonical)
            })
            .collect()
    }
}
