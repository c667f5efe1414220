use std::time::Duration;

use async_trait::async_trait;

use common::error::AppError;

use super::complete_text;
use super::instructions::TRANSLATION_SYSTEM_MESSAGE;

/// Paragraph-at-a-time translation, used by the mass-translation job.
#[async_trait]
pub trait ParagraphTranslator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, AppError>;
}

/// Production translator over chat completions.
pub struct OpenAiTranslator {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiTranslator {
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ParagraphTranslator for OpenAiTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, AppError> {
        let user = format!("Target language: {target_language}\n\n{text}");
        let reply = tokio::time::timeout(
            self.timeout,
            complete_text(&self.client, &self.model, TRANSLATION_SYSTEM_MESSAGE, user),
        )
        .await
        .map_err(|_| {
            AppError::DeadlineExceeded(format!(
                "translation model call exceeded {}s",
                self.timeout.as_secs()
            ))
        })??;

        let translated = reply.trim();
        if translated.is_empty() {
            return Err(AppError::LLMParsing("empty translation".into()));
        }
        Ok(translated.to_string())
    }
}
