mod chat_event;
mod device;
mod document;
mod embedding;
mod error;
mod llm;
mod retry;
mod runnable;
mod value;
mod vector_store;

pub use chat_event::{ChatEvent, SourceRef};
pub use device::Device;
pub use document::Document;
pub use embedding::Embedding;
pub use error::{DocchatError, EmbeddingError, StoreError};
pub use llm::{Llm, LlmRequest, LlmResponse, Message, Role};
pub use retry::{is_retryable, Retrying, RunnableExt};
pub use runnable::{Runnable, StreamEvent};
pub use value::Value;
pub use vector_store::{SearchResult, VectorStore};
