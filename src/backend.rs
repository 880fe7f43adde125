use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::{error::VeoError, models::{ChatTurn, GenerationRequest, OperationHandle}, operation::OperationStatus};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, VeoError>> + Send>>;
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, VeoError>> + Send>>;

/// Incremental piece of a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    Content(String),
    Thinking(String),
}

/// Start and inspect long-running video generations.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn start_generation(&self, request: &GenerationRequest) -> Result<OperationHandle, VeoError>;

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, VeoError>;

    async fn download(&self, uri: &str) -> Result<Bytes, VeoError>;
}

/// Streaming conversational model used by the chat route.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_reply(&self, history: &[ChatTurn], message: &str) -> Result<DeltaStream, VeoError>;

    /// Cheap authenticated call used to check credentials and quota.
    async fn probe(&self) -> Result<usize, VeoError>;
}

/// Raw event-stream transport consumed by the chat client.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, message: &str, history: &[ChatTurn]) -> Result<ByteStream, VeoError>;
}
