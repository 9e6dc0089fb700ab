//! Persistent records and the write-side inputs that produce them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

pub const TITLE_MAX_CHARS: usize = 255;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Canonical task row. Title and description are in the canonical language.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub auto_translate: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Translation {
    pub id: i64,
    pub task_id: i64,
    pub language: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_auto_translate() -> bool {
    true
}

/// Body of a task creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default = "default_auto_translate")]
    pub auto_translate: bool,
}

impl NewTask {
    pub fn validate(&self) -> AppResult<()> {
        validate_title(&self.title)?;
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        validate_interval(self.start_time, self.end_time)
    }
}

/// Partial update of a task. Only the fields named here can change.
///
/// `description` distinguishes "absent" (`None`) from an explicit `null`
/// (`Some(None)`), which clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskPatch {
    /// Whether the patch names a translatable field, even with an unchanged value.
    pub fn touches_text(&self) -> bool {
        self.title.is_some() || self.description.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_text() && self.start_time.is_none() && self.end_time.is_none()
    }

    /// Validate the patch against the current row, including the merged interval.
    pub fn validate_against(&self, current: &Task) -> AppResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(Some(description)) = &self.description {
            validate_description(description)?;
        }
        let start = self.start_time.unwrap_or(current.start_time);
        let end = self.end_time.unwrap_or(current.end_time);
        validate_interval(start, end)
    }

    /// Apply the patch to a copy of `task`, without touching timestamps.
    pub fn apply_to(&self, task: &Task) -> Task {
        let mut updated = task.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(start) = self.start_time {
            updated.start_time = start;
        }
        if let Some(end) = self.end_time {
            updated.end_time = end;
        }
        updated
    }
}

fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub fn validate_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(AppError::validation(format!(
            "title must be at most {} characters",
            TITLE_MAX_CHARS
        )));
    }
    Ok(())
}

pub fn validate_description(description: &str) -> AppResult<()> {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(AppError::validation(format!(
            "description must be at most {} characters",
            DESCRIPTION_MAX_CHARS
        )));
    }
    Ok(())
}

/// Start must strictly precede end.
pub fn validate_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if end <= start {
        return Err(AppError::validation("end_time must be after start_time"));
    }
    Ok(())
}
