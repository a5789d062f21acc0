mod ollama;

pub use ollama::{ollama_stream_events, GenerationOptions, OllamaClient};
pub use docchat_core::{Llm, LlmRequest, LlmResponse, Message, Role};
