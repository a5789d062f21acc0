use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use docchat_core::{DocchatError, LlmRequest, LlmResponse, Runnable, StreamEvent};
use docchat_rag::adapters::sse::{done_event, ping_event, to_sse_event};
use docchat_rag::{DocChat, RagConfig, SessionEvent, SessionManager, UploadedFile};
use docchat_retrieval::HashEmbedder;

/// Stands in for a model server: replies with the first line of context.
struct ContextEcho;

fn first_context_line(request: &LlmRequest) -> String {
    request
        .messages
        .iter()
        .find_map(|message| message.content.split("Context: ").nth(1))
        .and_then(|context| context.lines().next())
        .unwrap_or("I don't know.")
        .to_string()
}

#[async_trait]
impl Runnable<LlmRequest, LlmResponse> for ContextEcho {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, DocchatError> {
        Ok(LlmResponse {
            content: first_context_line(&input),
        })
    }

    fn stream(&self, input: LlmRequest) -> BoxStream<'_, Result<StreamEvent, DocchatError>> {
        let words: Vec<_> = first_context_line(&input)
            .split_inclusive(' ')
            .map(|word| Ok(StreamEvent::ContentChunk(word.to_string())))
            .collect();
        stream::iter(words).boxed()
    }
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let root = std::env::temp_dir().join("docchat-simple-chat-stream");
    let config = RagConfig {
        documents_dir: root.join("data"),
        index_dir: root.join("db"),
        ..RagConfig::default()
    };

    let app = DocChat::builder()
        .with_config(config)
        .with_llm(Arc::new(ContextEcho))
        .with_embedder(Arc::new(HashEmbedder::new(384)))
        .build()?;
    let manager = SessionManager::new(app);

    let (id, greeting) = manager.create().await?;
    for event in &greeting {
        print!("{}", to_sse_event(event));
    }

    let session = manager.get(&id).await.ok_or("session vanished")?;
    let upload = session
        .dispatch(SessionEvent::Upload(UploadedFile {
            name: "france.txt".to_string(),
            mime_type: "text/plain".to_string(),
            content: Some(
                b"Paris is the capital and most populous city of France.\n\nFrance is a country in Western Europe."
                    .to_vec(),
            ),
        }))
        .await?;
    for event in &upload {
        print!("{}", to_sse_event(event));
    }

    print!("{}", ping_event());
    let mut answer = session
        .send(SessionEvent::Message(
            "What is the capital of France?".to_string(),
        ))
        .await?;
    while let Some(item) = answer.next().await {
        match item {
            Ok(event) => print!("{}", to_sse_event(&event)),
            Err(error) => {
                eprintln!("session error: {error}");
                break;
            }
        }
    }
    print!("{}", done_event());

    manager.end_all().await;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}
