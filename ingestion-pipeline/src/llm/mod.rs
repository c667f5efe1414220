pub mod instructions;
pub mod segmenter;
pub mod translator;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};

use common::error::AppError;

/// One chat round trip: system + user message, plain-text reply.
pub(crate) async fn complete_text(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    system: &str,
    user: String,
) -> Result<String, AppError> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.0)
        .messages([
            ChatCompletionRequestSystemMessage::from(system).into(),
            ChatCompletionRequestUserMessage::from(user).into(),
        ])
        .build()
        .map_err(AppError::from)?;

    let response = client.chat().create(request).await.map_err(AppError::from)?;

    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| AppError::LLMParsing("no content in model response".into()))
}

/// Parse a comma-separated index reply, tolerating stray prose around the
/// numbers. Indices are returned sorted and deduplicated.
pub(crate) fn parse_index_list(reply: &str) -> Vec<usize> {
    let mut indices: Vec<usize> = reply
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_lists() {
        assert_eq!(parse_index_list("3, 7, 12"), vec![3, 7, 12]);
        assert_eq!(parse_index_list("3,7,12"), vec![3, 7, 12]);
    }

    #[test]
    fn tolerates_prose_and_duplicates() {
        assert_eq!(
            parse_index_list("The phrase-final words are: 3, 3, 12 and 7."),
            vec![3, 7, 12]
        );
    }

    #[test]
    fn empty_reply_gives_empty_list() {
        assert!(parse_index_list("none").is_empty());
        assert!(parse_index_list("").is_empty());
    }
}
