use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::DocchatError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ContentChunk(String),
    /// Scratch tokens a model emits before answering; never shown to users.
    ReasoningChunk(String),
    FinalAnswer(String),
    Metadata { key: String, value: crate::Value },
}

#[async_trait]
pub trait Runnable<Input: Send + 'static, Output: Send + 'static> {
    async fn invoke(&self, input: Input) -> Result<Output, DocchatError>;

    fn stream(&self, input: Input) -> BoxStream<'_, Result<StreamEvent, DocchatError>>;
}

#[async_trait]
impl<Input, Output, T> Runnable<Input, Output> for std::sync::Arc<T>
where
    Input: Send + 'static,
    Output: Send + 'static,
    T: Runnable<Input, Output> + Send + Sync + ?Sized,
{
    async fn invoke(&self, input: Input) -> Result<Output, DocchatError> {
        (**self).invoke(input).await
    }

    fn stream(&self, input: Input) -> BoxStream<'_, Result<StreamEvent, DocchatError>> {
        (**self).stream(input)
    }
}
