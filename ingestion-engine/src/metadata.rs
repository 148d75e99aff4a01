use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use common::error::AppError;
use serde_json::json;
use tracing::warn;

use crate::types::{DescriptiveMetadata, StructuredProfile};

pub const MAX_KEYWORDS: usize = 10;

pub static DOCUMENT_SUMMARY_SYSTEM_MESSAGE: &str = "You analyze documents for a \
searchable knowledge base. Given a document name and a content excerpt, respond \
with a concise 2-3 sentence summary and a list of 5-10 relevant keywords.";

pub fn get_document_summary_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "keywords": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["summary", "keywords"],
        "additionalProperties": false
    })
}

#[derive(Debug, serde::Deserialize)]
struct SummaryPayload {
    summary: String,
    keywords: Vec<String>,
}

/// Ask the summarizer for descriptive metadata over a bounded excerpt, with
/// a request timeout and at most one retry on transient failure. Callers
/// treat any error as non-fatal and degrade to empty metadata.
pub async fn extract_with_summarizer(
    openai_client: &Client<OpenAIConfig>,
    model: &str,
    display_name: &str,
    excerpt: &str,
    timeout: Duration,
) -> Result<DescriptiveMetadata, AppError> {
    let request = build_summary_request(model, display_name, excerpt)?;

    let mut last_error = String::new();
    for attempt in 0..2u8 {
        match tokio::time::timeout(timeout, perform_summary(openai_client, request.clone())).await
        {
            Ok(Ok(metadata)) => return Ok(metadata),
            Ok(Err(err)) => {
                let transient = is_transient(&err);
                last_error = err.to_string();
                if !transient {
                    return Err(err);
                }
                if attempt == 0 {
                    warn!(error = %last_error, "summarizer call failed; retrying once");
                }
            }
            Err(_elapsed) => {
                last_error = format!("summarizer request timed out after {timeout:?}");
                if attempt == 0 {
                    warn!("summarizer call timed out; retrying once");
                }
            }
        }
    }

    Err(AppError::MetadataExtraction(last_error))
}

fn build_summary_request(
    model: &str,
    display_name: &str,
    excerpt: &str,
) -> Result<CreateChatCompletionRequest, AppError> {
    let user_message = format!("Document: {display_name}\nContent sample:\n{excerpt}");

    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Summary and keywords for the submitted document".into()),
            name: "document_summary".into(),
            schema: Some(get_document_summary_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(DOCUMENT_SUMMARY_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()?;

    Ok(request)
}

async fn perform_summary(
    openai_client: &Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
) -> Result<DescriptiveMetadata, AppError> {
    let response = openai_client.chat().create(request).await?;

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or(AppError::MetadataExtraction(
            "No content found in summarizer response".into(),
        ))?;

    let payload = serde_json::from_str::<SummaryPayload>(content).map_err(|e| {
        AppError::MetadataExtraction(format!("Failed to parse summarizer response: {e}"))
    })?;

    Ok(DescriptiveMetadata {
        summary: payload.summary,
        keywords: dedupe_keywords(payload.keywords),
    })
}

fn is_transient(error: &AppError) -> bool {
    matches!(error, AppError::OpenAI(OpenAIError::Reqwest(_)))
}

/// Deterministic metadata for tabular sources; no generative call involved.
/// An empty profile falls back to a bare file-type description.
pub fn structured_metadata(
    profile: &StructuredProfile,
    extension: &str,
    display_name: &str,
) -> DescriptiveMetadata {
    if profile.is_empty() {
        return DescriptiveMetadata {
            summary: format!("{} file: {display_name}", extension.to_uppercase()),
            keywords: dedupe_keywords(vec![extension.to_string(), "structured data".to_string()]),
        };
    }

    let summary = format!(
        "table with {} rows and the following columns: {}",
        profile.row_count,
        profile.column_headers.join(", ")
    );

    DescriptiveMetadata {
        summary,
        keywords: header_keywords(&profile.column_headers),
    }
}

/// Lowercased, underscore-split header tokens, deduplicated, capped.
fn header_keywords(column_headers: &[String]) -> Vec<String> {
    let tokens = column_headers.iter().flat_map(|header| {
        header
            .split(|c: char| c == '_' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(str::to_ascii_lowercase)
    });

    dedupe_keywords(tokens.collect())
}

fn dedupe_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut deduped: Vec<String> = Vec::new();
    for keyword in keywords {
        let trimmed = keyword.trim().to_string();
        if trimmed.is_empty() || deduped.contains(&trimmed) {
            continue;
        }
        deduped.push(trimmed);
        if deduped.len() == MAX_KEYWORDS {
            break;
        }
    }
    deduped
}

/// Bound an excerpt for the summarizer without splitting a char.
pub fn excerpt_of(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_metadata_describes_the_table() {
        let profile = StructuredProfile {
            column_headers: vec!["date".to_string(), "amount".to_string()],
            row_count: 42,
        };
        let metadata = structured_metadata(&profile, "csv", "sales.csv");
        assert_eq!(
            metadata.summary,
            "table with 42 rows and the following columns: date, amount"
        );
        assert_eq!(metadata.keywords, vec!["date", "amount"]);
    }

    #[test]
    fn header_tokens_are_split_lowercased_and_deduped() {
        let headers = vec![
            "Crop_Type".to_string(),
            "crop yield".to_string(),
            "SEASON".to_string(),
        ];
        let keywords = header_keywords(&headers);
        assert_eq!(keywords, vec!["crop", "type", "yield", "season"]);
    }

    #[test]
    fn keywords_are_capped_at_ten() {
        let headers: Vec<String> = (0..15).map(|i| format!("column_{i}")).collect();
        let keywords = header_keywords(&headers);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
    }

    #[test]
    fn empty_profile_falls_back_to_a_type_description() {
        let metadata = structured_metadata(&StructuredProfile::default(), "xlsx", "ledger.xlsx");
        assert_eq!(metadata.summary, "XLSX file: ledger.xlsx");
        assert!(metadata.keywords.contains(&"xlsx".to_string()));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let text = "aaaé".repeat(100);
        let excerpt = excerpt_of(&text, 7);
        assert_eq!(excerpt.chars().count(), 7);

        let short = excerpt_of("tiny", 100);
        assert_eq!(short, "tiny");
    }

    #[test]
    fn summary_schema_requires_both_fields() {
        let schema = get_document_summary_schema();
        assert_eq!(schema["required"][0], "summary");
        assert_eq!(schema["required"][1], "keywords");
    }
}
