use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::retry::ClientError;
use super::types::ChatRequest;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// provider name for logging (e.g. "gemini-openai")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest) -> Result<String, ClientError>;

    /// chat completion (streaming); the receiver yields text deltas
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ClientError>>, ClientError>;
}
