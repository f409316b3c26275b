//! Conversational retrieval-augmented generation over a session index.
//!
//! A [`ConversationalRag`] starts without a retriever and must be given one,
//! either at construction ([`ConversationalRag::with_retriever`]) or by
//! loading a saved index ([`ConversationalRag::load_retriever_from_index`]).
//! Each [`invoke`](ConversationalRag::invoke) makes two model calls:
//!
//! 1. Rewrite the question into a standalone one using the chat history.
//! 2. Retrieve chunks for the rewritten question and answer the original
//!    question from them.
//!
//! History is supplied by the caller on every call; nothing is remembered
//! between calls.

use std::path::Path;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{PortalError, Result};
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Chunk};
use crate::prompts::{template, PromptType};
use crate::vector_store::{Retriever, SearchKwargs, SearchType, VectorIndex};

/// Answer returned when the model produces nothing.
pub const NO_ANSWER: &str = "No relevant information found.";

enum State {
    Uninitialized,
    RetrieverLoaded(Retriever),
}

pub struct ConversationalRag {
    session_id: Option<String>,
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    state: State,
}

impl ConversationalRag {
    pub fn new(
        session_id: Option<String>,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        tracing::info!(session_id = ?session_id, model = %llm.model_name(), "ConversationalRAG initialized");
        Self {
            session_id,
            llm,
            embedder,
            state: State::Uninitialized,
        }
    }

    pub fn with_retriever(
        session_id: Option<String>,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Retriever,
    ) -> Self {
        let mut rag = Self::new(session_id, llm, embedder);
        rag.state = State::RetrieverLoaded(retriever);
        rag
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, State::RetrieverLoaded(_))
    }

    /// Loads a saved index from `index_path` and builds the retriever.
    ///
    /// Without `search_kwargs` the retriever returns the top `k` chunks.
    pub async fn load_retriever_from_index(
        &mut self,
        index_path: &Path,
        k: usize,
        index_name: &str,
        search_type: SearchType,
        search_kwargs: Option<SearchKwargs>,
    ) -> Result<()> {
        let retriever = self
            .build_retriever(index_path, k, index_name, search_type, search_kwargs)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, index_path = %index_path.display(), "Failed to load retriever");
                e.context("Loading error in ConversationalRAG")
            })?;
        tracing::info!(
            index_path = %index_path.display(),
            index_name = %index_name,
            k = retriever.k(),
            search_type = %search_type,
            session_id = ?self.session_id,
            "FAISS retriever loaded successfully"
        );
        self.state = State::RetrieverLoaded(retriever);
        Ok(())
    }

    async fn build_retriever(
        &self,
        index_path: &Path,
        k: usize,
        index_name: &str,
        search_type: SearchType,
        search_kwargs: Option<SearchKwargs>,
    ) -> Result<Retriever> {
        if !index_path.is_dir() {
            return Err(PortalError::NotFound(format!(
                "FAISS index directory not found: {}",
                index_path.display()
            )));
        }
        let dir = index_path.to_path_buf();
        let name = index_name.to_string();
        let index = tokio::task::spawn_blocking(move || VectorIndex::load_local(&dir, &name))
            .await
            .map_err(|e| PortalError::Io(std::io::Error::other(e)))??;
        if index.model_name() != self.embedder.model_name() {
            return Err(PortalError::Config(format!(
                "index was built with embedding model '{}' but '{}' is loaded",
                index.model_name(),
                self.embedder.model_name()
            )));
        }
        let kwargs = search_kwargs
            .map(|kw| SearchKwargs { k, ..kw })
            .unwrap_or_else(|| SearchKwargs::with_k(k));
        Retriever::new(Arc::new(index), self.embedder.clone(), search_type, kwargs)
    }

    /// Answers `user_input` given the prior conversation.
    pub async fn invoke(&self, user_input: &str, chat_history: &[ChatMessage]) -> Result<String> {
        let State::RetrieverLoaded(retriever) = &self.state else {
            let err = PortalError::InvalidInput(
                "RAG chain not initialized. Call load_retriever_from_index() before invoke()."
                    .to_string(),
            );
            tracing::error!(session_id = ?self.session_id, "RAG chain not initialized");
            return Err(err.context("Invocation error in ConversationalRAG"));
        };

        self.run(retriever, user_input, chat_history)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, session_id = ?self.session_id, "Failed to invoke ConversationalRAG");
                e.context("Invocation error in ConversationalRAG")
            })
    }

    async fn run(
        &self,
        retriever: &Retriever,
        user_input: &str,
        chat_history: &[ChatMessage],
    ) -> Result<String> {
        let rewrite = template(PromptType::ContextualizeQuestion)
            .render(&[("input", user_input)], chat_history);
        let rewritten = self.llm.complete(&rewrite).await?;
        let standalone = match rewritten.trim() {
            "" => user_input,
            q => q,
        };

        let chunks = retriever.retrieve(standalone).await?;
        let context = format_docs(&chunks);

        let qa = template(PromptType::ContextQa).render(
            &[("context", context.as_str()), ("input", user_input)],
            chat_history,
        );
        let answer = self.llm.complete(&qa).await?;
        let answer = match answer.trim() {
            "" => NO_ANSWER.to_string(),
            a => a.to_string(),
        };

        tracing::info!(
            session_id = ?self.session_id,
            user_query = %user_input,
            standalone_question = %standalone,
            retrieved = chunks.len(),
            answer_preview = %answer.chars().take(150).collect::<String>(),
            "Chain invoked successfully"
        );
        Ok(answer)
    }
}

/// Joins chunk texts into the context block.
fn format_docs(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OneHot;

    #[async_trait]
    impl EmbeddingProvider for OneHot {
        fn model_name(&self) -> &str {
            "one-hot"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("cat") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    /// Replies in order and records every prompt.
    struct Script {
        replies: Mutex<Vec<&'static str>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Script {
        fn new(mut replies: Vec<&'static str>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Script {
        fn model_name(&self) -> &str {
            "script"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok(self.replies.lock().unwrap().pop().unwrap_or("").to_string())
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: text.to_string(),
            source: "pets.txt".to_string(),
            page: None,
            chunk_index: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn save_index(dir: &Path, model: &str) {
        VectorIndex::from_parts(
            model,
            vec![chunk("the cat sleeps"), chunk("the dog barks")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap()
        .save_local(dir, "index")
        .unwrap();
    }

    #[tokio::test]
    async fn invoke_before_load_fails() {
        let rag = ConversationalRag::new(None, Script::new(vec!["x"]), Arc::new(OneHot));
        let err = rag.invoke("hi", &[]).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn missing_index_path_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut rag = ConversationalRag::new(None, Script::new(vec![]), Arc::new(OneHot));
        let err = rag
            .load_retriever_from_index(&tmp.path().join("absent"), 5, "index", SearchType::Similarity, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!rag.is_loaded());
    }

    #[tokio::test]
    async fn embedding_model_mismatch_is_config_error() {
        let tmp = TempDir::new().unwrap();
        save_index(tmp.path(), "other-model");
        let mut rag = ConversationalRag::new(None, Script::new(vec![]), Arc::new(OneHot));
        let err = rag
            .load_retriever_from_index(tmp.path(), 5, "index", SearchType::Similarity, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn two_stage_chain_uses_rewritten_question_for_retrieval() {
        let tmp = TempDir::new().unwrap();
        save_index(tmp.path(), "one-hot");
        let llm = Script::new(vec!["What does the cat do?", "It sleeps."]);
        let mut rag = ConversationalRag::new(Some("s".into()), llm.clone(), Arc::new(OneHot));
        rag.load_retriever_from_index(tmp.path(), 1, "index", SearchType::Similarity, None)
            .await
            .unwrap();

        let history = vec![
            ChatMessage::user("Tell me about the cat"),
            ChatMessage::assistant("It is a pet."),
        ];
        let answer = rag.invoke("What does it do?", &history).await.unwrap();
        assert_eq!(answer, "It sleeps.");

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        // rewrite: system, 2 history turns, user
        assert_eq!(prompts[0].len(), 4);
        let qa_system = &prompts[1][0].content;
        assert!(qa_system.contains("the cat sleeps"));
        assert!(!qa_system.contains("the dog barks"));
        assert_eq!(prompts[1].last().unwrap().content, "What does it do?");
    }

    #[tokio::test]
    async fn blank_answer_becomes_sentinel() {
        let tmp = TempDir::new().unwrap();
        save_index(tmp.path(), "one-hot");
        let mut rag = ConversationalRag::new(None, Script::new(vec!["q", "   "]), Arc::new(OneHot));
        rag.load_retriever_from_index(tmp.path(), 2, "index", SearchType::Mmr, None)
            .await
            .unwrap();
        assert_eq!(rag.invoke("q", &[]).await.unwrap(), NO_ANSWER);
    }

    #[test]
    fn format_docs_joins_with_blank_line() {
        assert_eq!(format_docs(&[chunk("a"), chunk("b")]), "a\n\nb");
    }

    #[tokio::test]
    async fn threshold_kwargs_filter_weak_matches() {
        let tmp = TempDir::new().unwrap();
        save_index(tmp.path(), "one-hot");
        let llm = Script::new(vec!["cat?", "Only the cat."]);
        let mut rag = ConversationalRag::new(None, llm.clone(), Arc::new(OneHot));
        let kwargs = SearchKwargs {
            score_threshold: Some(0.5),
            ..SearchKwargs::default()
        };
        rag.load_retriever_from_index(
            tmp.path(),
            2,
            "index",
            SearchType::SimilarityScoreThreshold,
            Some(kwargs),
        )
        .await
        .unwrap();

        assert_eq!(rag.invoke("cat?", &[]).await.unwrap(), "Only the cat.");
        let prompts = llm.prompts.lock().unwrap();
        let qa_system = &prompts[1][0].content;
        assert!(qa_system.contains("the cat sleeps"));
        assert!(!qa_system.contains("the dog barks"));
    }
}
