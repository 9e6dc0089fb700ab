//! Languages tasks can be authored in and translated into.
//!
//! - `registry`: the supported locales and which one is canonical
//! - `language`: validated `Language` handle used by config, jobs and reads
//!
//! ```rust,ignore
//! use task_manager_api::i18n::Language;
//!
//! let canonical = Language::canonical();      // ru
//! let target = Language::from_code("en")?;
//! ```

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};
