//! Language registry: the two locales tasks can be read in.
//!
//! Tasks are authored in the canonical language and translated into the
//! other one in the background. The registry is immutable metadata, built
//! once on first access.

use std::sync::OnceLock;

/// Metadata for a supported language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "ru", "en")
    pub code: &'static str,

    /// English name of the language
    pub name: &'static str,

    /// Whether tasks are authored in this language (exactly one is)
    pub is_canonical: bool,

    /// Whether this language can be requested or targeted
    pub enabled: bool,
}

/// Registry of supported languages.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the registry instance, initializing it on first call.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Look up a language by its ISO 639-1 code.
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    /// The language tasks are authored in.
    ///
    /// # Panics
    /// Panics if the registry does not define exactly one canonical language.
    pub fn canonical(&self) -> &LanguageConfig {
        let canonical_langs: Vec<_> = self
            .languages
            .iter()
            .filter(|lang| lang.is_canonical)
            .collect();

        match canonical_langs.len() {
            0 => panic!("No canonical language found in registry"),
            1 => canonical_langs[0],
            _ => panic!("Multiple canonical languages found in registry"),
        }
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            code: "ru",
            name: "Russian",
            is_canonical: true,
            enabled: true,
        },
        LanguageConfig {
            code: "en",
            name: "English",
            is_canonical: false,
            enabled: true,
        },
    ]
}
