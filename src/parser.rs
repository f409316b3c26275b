//! Schema-guided JSON output parsing with a single model-assisted repair.
//!
//! [`JsonOutputParser`] produces format instructions from a type's JSON
//! schema and parses model replies into that type, tolerating Markdown code
//! fences, `<think>` blocks and prose around the JSON value.
//! [`OutputFixingParser`] wraps it: when parsing fails it sends the reply,
//! the instructions and the error back to the model once and parses the
//! answer. There is no further retry.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{PortalError, Result};
use crate::llm::ChatModel;
use crate::models::{ComparisonRow, Metadata};
use crate::prompts::{template, PromptType};

/// Types a model can be asked to produce as JSON.
pub trait OutputSchema: DeserializeOwned {
    fn json_schema() -> Value;
}

impl OutputSchema for Metadata {
    fn json_schema() -> Value {
        let text = json!({ "type": "string" });
        json!({
            "title": "Metadata",
            "type": "object",
            "properties": {
                "Summary": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Summary of the document"
                },
                "Title": text,
                "Author": text,
                "DateCreated": text,
                "LastModifiedDate": text,
                "Publisher": text,
                "Language": text,
                "PageCount": { "anyOf": [{ "type": "integer" }, { "type": "string" }] },
                "SentimentTone": text
            },
            "required": [
                "Title", "Author", "DateCreated", "LastModifiedDate", "Publisher",
                "Language", "PageCount", "SentimentTone"
            ]
        })
    }
}

impl OutputSchema for Vec<ComparisonRow> {
    fn json_schema() -> Value {
        json!({
            "title": "SummaryResponse",
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "Page": { "type": "string" },
                    "Changes": { "type": "string" }
                },
                "required": ["Page", "Changes"]
            }
        })
    }
}

pub struct JsonOutputParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: OutputSchema> Default for JsonOutputParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: OutputSchema> JsonOutputParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn format_instructions(&self) -> String {
        format!(
            "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n\
             Here is the output schema:\n```\n{}\n```\n\
             Respond with the JSON value only, without commentary.",
            T::json_schema()
        )
    }

    pub fn parse(&self, text: &str) -> Result<T> {
        let candidate = extract_json(text)
            .ok_or_else(|| PortalError::Parse("no JSON value found in model output".to_string()))?;
        serde_json::from_str(candidate)
            .map_err(|e| PortalError::Parse(format!("model output does not match schema: {}", e)))
    }
}

/// A [`JsonOutputParser`] that asks the model to repair unparseable output once.
pub struct OutputFixingParser<T> {
    parser: JsonOutputParser<T>,
    llm: Arc<dyn ChatModel>,
}

impl<T: OutputSchema> OutputFixingParser<T> {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self {
            parser: JsonOutputParser::new(),
            llm,
        }
    }

    pub fn format_instructions(&self) -> String {
        self.parser.format_instructions()
    }

    pub async fn parse(&self, completion: &str) -> Result<T> {
        let err = match self.parser.parse(completion) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        tracing::warn!(error = %err, "Model output failed to parse, requesting repair");

        let instructions = self.parser.format_instructions();
        let error_text = err.to_string();
        let messages = template(PromptType::OutputFixing).render(
            &[
                ("instructions", instructions.as_str()),
                ("completion", completion),
                ("error", error_text.as_str()),
            ],
            &[],
        );
        let repaired = self.llm.complete(&messages).await?;
        self.parser.parse(&repaired)
    }
}

/// Locates the JSON value in a model reply.
fn extract_json(text: &str) -> Option<&str> {
    let mut s = text.trim();

    // Reasoning models prefix their answer with a <think> block.
    if let Some(end) = s.find("</think>") {
        s = s[end + "</think>".len()..].trim();
    }

    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            s = body[..end].trim();
        }
    }

    let open = s.find(['{', '['])?;
    let close_char = if s.as_bytes()[open] == b'{' { '}' } else { ']' };
    let close = s.rfind(close_char)?;
    if close < open {
        return None;
    }
    Some(&s[open..=close])
}
