//! Streaming multi-turn chat over an [`LlmProvider`].
//!
//! A [`ChatSession`] owns the conversation history. Each call to
//! [`ChatSession::send`] streams the reply as growing snapshots of the
//! accumulated text, and records the assistant turn once the stream ends.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// Default system prompt for interactive sessions.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer concisely and accurately.";

/// A conversation with a model.
pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    model: String,
    history: Vec<Message>,
}

impl ChatSession {
    /// Starts a session whose history is seeded with `system_prompt`.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            history: vec![Message::system(system_prompt)],
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Sends `text` as the next user turn.
    ///
    /// Every item is the full reply so far. The assistant turn is appended
    /// to the history only when the stream completes without error.
    pub fn send(
        &mut self,
        text: impl Into<String>,
    ) -> impl Stream<Item = Result<String, LlmError>> + '_ {
        self.history.push(Message::user(text));
        let request = GenerationRequest::new(self.model.clone(), self.history.clone()).streaming();

        try_stream! {
            let mut fragments = self.provider.generate_stream(request).await?;
            let mut reply = String::new();
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                reply.push_str(&fragment);
                yield reply.clone();
            }
            debug!(turns = self.history.len() + 1, chars = reply.len(), "Chat reply complete");
            self.history.push(Message::assistant(reply));
        }
    }
}
