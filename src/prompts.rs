//! Fixed prompt templates.
//!
//! Templates use `{name}` placeholders filled by [`PromptTemplate::render`].
//! Chat-style prompts place the caller's history between the system
//! instruction and the final user turn.

use crate::models::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptType {
    DocumentAnalysis,
    DocumentComparison,
    ContextualizeQuestion,
    ContextQa,
    OutputFixing,
}

/// A system instruction plus a user-turn template.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Builds the message list, substituting `vars` and inserting `history`
    /// before the user turn.
    pub fn render(&self, vars: &[(&str, &str)], history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.system.is_empty() {
            messages.push(ChatMessage::system(fill(self.system, vars)));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(fill(self.user, vars)));
        messages
    }
}

/// Single-pass placeholder substitution; values are never re-scanned.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn template(kind: PromptType) -> PromptTemplate {
    match kind {
        PromptType::DocumentAnalysis => DOCUMENT_ANALYSIS,
        PromptType::DocumentComparison => DOCUMENT_COMPARISON,
        PromptType::ContextualizeQuestion => CONTEXTUALIZE_QUESTION,
        PromptType::ContextQa => CONTEXT_QA,
        PromptType::OutputFixing => OUTPUT_FIXING,
    }
}

const DOCUMENT_ANALYSIS: PromptTemplate = PromptTemplate {
    system: "You are a highly capable assistant trained to analyze and summarize documents. \
Return ONLY valid JSON matching the exact schema below.\n\n{format_instructions}",
    user: "Analyze this document:\n{document_text}",
};

const DOCUMENT_COMPARISON: PromptTemplate = PromptTemplate {
    system: "You will be provided with content from two documents. Your tasks are:\n\
1. Compare the content of the two documents.\n\
2. Identify the differences and note down the page number.\n\
3. The output must be a page-wise comparison.\n\
4. If a page has no change, report 'NO CHANGE' for it.\n\n\
{format_instructions}",
    user: "Input documents:\n\n{combined_docs}",
};

const CONTEXTUALIZE_QUESTION: PromptTemplate = PromptTemplate {
    system: "Given a conversation history and the most recent user query, rewrite the query \
as a standalone question that makes sense without relying on the previous context. \
Do not provide an answer; only reformulate the question if necessary, otherwise return it unchanged.",
    user: "{input}",
};

const CONTEXT_QA: PromptTemplate = PromptTemplate {
    system: "You are an assistant designed to answer questions using the provided context. \
Rely only on the retrieved information to form your response. If the answer is not found \
in the context, respond with 'I don't know.' Keep your answer concise and no longer than \
three sentences.\n\n{context}",
    user: "{input}",
};

const OUTPUT_FIXING: PromptTemplate = PromptTemplate {
    system: "",
    user: "Instructions:\n--------------\n{instructions}\n--------------\n\
Completion:\n--------------\n{completion}\n--------------\n\n\
Above, the Completion did not satisfy the constraints given in the Instructions.\n\
Error:\n--------------\n{error}\n--------------\n\n\
Please try again. Please only respond with an answer that satisfies the constraints \
laid out in the Instructions:",
};
