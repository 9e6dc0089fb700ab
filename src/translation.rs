use crate::i18n::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure talking to the translation provider.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    /// Transport failure, including timeouts.
    #[error("translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("translation API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("malformed translation response: {0}")]
    MalformedResponse(String),
}

impl TranslationError {
    /// Rate limits, server errors and transport failures are transient.
    /// Other 4xx client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Request(_) | Self::MalformedResponse(_) => true,
        }
    }
}

/// External text-translation service.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// One outbound call translating non-empty `text`.
    async fn translate_text(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, TranslationError>;

    /// Translate an optional field.
    ///
    /// Empty or absent text yields `None` and same-language requests echo the
    /// input; neither reaches the network.
    async fn translate(
        &self,
        text: Option<&str>,
        source: Language,
        target: Language,
    ) -> Result<Option<String>, TranslationError> {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        if source == target {
            return Ok(Some(text.to_string()));
        }

        self.translate_text(text, source, target).await.map(Some)
    }
}

/// Google Cloud Translation v2 request body
#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslatedText {
    translated_text: String,
}

/// Client for the Google Cloud Translation v2 REST API.
#[derive(Debug, Clone)]
pub struct GoogleTranslateClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl GoogleTranslateClient {
    /// Build a client whose every call is bounded by `timeout`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranslationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TranslationProvider for GoogleTranslateClient {
    async fn translate_text(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, TranslationError> {
        let request = TranslateRequest {
            q: text,
            source: source.code(),
            target: target.code(),
            // Plain text output, no HTML entity escaping
            format: "text",
        };

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(TranslationError::Status { status, body });
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::MalformedResponse(e.to_string()))?;

        parsed
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| {
                TranslationError::MalformedResponse("response contained no translations".into())
            })
    }
}
