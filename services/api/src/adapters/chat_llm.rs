//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the chat-generation LLM.
//! It implements the `ChatGenerationService` port from the `core` crate,
//! relaying the provider's SSE stream as plain text chunks.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use goal_coach_core::ports::{ChatGenerationService, ChunkStream, PortError, PortResult};

/// Cap on a single generated reply.
const MAX_COMPLETION_TOKENS: u32 = 1000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `ChatGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatGenerationService for OpenAiChatAdapter {
    /// Opens one streaming chat-completion call and yields its text deltas.
    ///
    /// The assembled prompt already carries the system instruction and
    /// conversational memory, so it is sent as a single user message.
    async fn stream_reply(&self, prompt: &str) -> PortResult<ChunkStream> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                    name: None,
                },
            )],
            max_completion_tokens: Some(MAX_COMPLETION_TOKENS),
            stream: Some(true),
            ..Default::default()
        };

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut stream = stream;
            while let Some(result) = stream.next().await {
                let chunk = result.map_err(|e| PortError::Unexpected(e.to_string()))?;
                for choice in &chunk.choices {
                    if let Some(text) = &choice.delta.content {
                        if !text.is_empty() {
                            yield text.clone();
                        }
                    }
                }
            }
        }))
    }
}
