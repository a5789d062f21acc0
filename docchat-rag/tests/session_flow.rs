use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use docchat_core::{ChatEvent, DocchatError, LlmRequest, LlmResponse, Runnable, StreamEvent};
use docchat_rag::{
    ChatSession, DocChat, RagConfig, RagError, SessionEvent, SessionHandle, SessionManager,
    SessionState, UploadedFile, ASK_FILE_PROMPT, INVALID_UPLOAD_MESSAGE, WELCOME_MESSAGE,
};
use docchat_retrieval::HashEmbedder;

/// Answers from the prompt: "Paris" only when the context mentions it.
#[derive(Default)]
struct ContextLlm {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    questions: Mutex<Vec<String>>,
    delay: Option<Duration>,
    stall: bool,
}

impl ContextLlm {
    fn answer_for(&self, request: &LlmRequest) -> Vec<String> {
        let prompt = request
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<String>();
        if let Some(question) = prompt.split("Question: ").nth(1) {
            let question = question.lines().next().unwrap_or_default().to_string();
            self.questions.lock().unwrap().push(question);
        }
        if prompt.contains("capital of France is Paris") {
            vec![
                "<think>the context says Paris</think>".to_string(),
                "The capital of France ".to_string(),
                "is Paris.".to_string(),
            ]
        } else {
            vec!["I don't know.".to_string()]
        }
    }
}

#[async_trait]
impl Runnable<LlmRequest, LlmResponse> for ContextLlm {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, DocchatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            content: self.answer_for(&input).concat(),
        })
    }

    fn stream(&self, input: LlmRequest) -> BoxStream<'_, Result<StreamEvent, DocchatError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            return stream::pending().boxed();
        }
        let chunks = self.answer_for(&input);
        let delay = self.delay;
        async_stream::stream! {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamEvent::ContentChunk(chunk));
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        .boxed()
    }
}

fn app(root: &Path, llm: Arc<ContextLlm>) -> DocChat {
    let config = RagConfig {
        documents_dir: root.join("data"),
        index_dir: root.join("db"),
        ..RagConfig::default()
    };
    DocChat::builder()
        .with_config(config)
        .with_llm(llm)
        .with_embedder(Arc::new(HashEmbedder::new(384)))
        .build()
        .unwrap()
}

fn text_file(name: &str, content: &str) -> UploadedFile {
    UploadedFile {
        name: name.to_string(),
        mime_type: "text/plain".to_string(),
        content: Some(content.as_bytes().to_vec()),
    }
}

fn final_answer(events: &[ChatEvent]) -> &str {
    events
        .iter()
        .find_map(|event| match event {
            ChatEvent::Final { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .expect("a final answer")
}

async fn started(app: DocChat) -> SessionHandle {
    let handle = SessionHandle::spawn(ChatSession::new("session-1", app));
    handle.dispatch(SessionEvent::Start).await.unwrap();
    handle
}

#[tokio::test]
async fn start_greets_and_asks_for_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let handle = SessionHandle::spawn(ChatSession::new(
        "session-1",
        app(dir.path(), Arc::new(ContextLlm::default())),
    ));

    let events = handle.dispatch(SessionEvent::Start).await.unwrap();

    assert_eq!(
        events[0],
        ChatEvent::Message {
            content: WELCOME_MESSAGE.to_string()
        }
    );
    assert_eq!(
        events[1],
        ChatEvent::AskFile {
            prompt: ASK_FILE_PROMPT.to_string(),
            accept: vec!["application/pdf".to_string(), "text/plain".to_string()],
        }
    );

    let again = handle.dispatch(SessionEvent::Start).await.unwrap_err();
    assert!(matches!(again, RagError::Runtime(_)));
}

#[tokio::test]
async fn uploaded_file_answers_the_question() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ContextLlm::default());
    let app = app(dir.path(), llm.clone());
    let handle = started(app.clone()).await;

    let upload = handle
        .dispatch(SessionEvent::Upload(text_file(
            "france.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();
    assert!(upload.iter().any(|event| matches!(
        event,
        ChatEvent::Status { stage, .. } if stage == "indexing"
    )));
    assert_eq!(
        upload.last(),
        Some(&ChatEvent::Message {
            content: "File 'france.txt' has been indexed! You can now ask questions.".to_string()
        })
    );
    assert!(dir.path().join("data/france.txt").exists());
    assert!(dir.path().join("db/index.json").exists());
    assert_eq!(app.index().len().await, 1);

    let answer = handle
        .dispatch(SessionEvent::Message(
            "What is the capital of France?".to_string(),
        ))
        .await
        .unwrap();

    let stages: Vec<&str> = answer
        .iter()
        .filter_map(|event| match event {
            ChatEvent::Status { stage, .. } => Some(stage.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stages, ["retrieving", "generating"]);

    let streamed: String = answer
        .iter()
        .filter_map(|event| match event {
            ChatEvent::Token { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "The capital of France is Paris.");
    assert_eq!(final_answer(&answer), "The capital of France is Paris.");

    let sources = answer
        .iter()
        .find_map(|event| match event {
            ChatEvent::Sources { sources, .. } => Some(sources),
            _ => None,
        })
        .expect("sources");
    assert_eq!(sources.len(), 1);
    assert!(sources[0].source.ends_with("france.txt"));
    assert!(answer.iter().all(|event| event.step() == Some(2)));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_index_answers_dont_know_without_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ContextLlm::default());
    let handle = started(app(dir.path(), llm.clone())).await;

    let events = handle
        .dispatch(SessionEvent::Message("Anything?".to_string()))
        .await
        .unwrap();

    assert_eq!(final_answer(&events), "I don't know.");
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_uploads_leave_the_index_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Arc::new(ContextLlm::default()));
    let handle = started(app.clone()).await;
    handle
        .dispatch(SessionEvent::Upload(text_file(
            "france.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();

    let rejected = [
        UploadedFile {
            name: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            content: Some(vec![1, 2, 3]),
        },
        UploadedFile {
            name: "empty.txt".to_string(),
            mime_type: "text/plain".to_string(),
            content: None,
        },
        UploadedFile {
            name: "notes.pdf".to_string(),
            mime_type: "text/plain".to_string(),
            content: Some(b"not a pdf".to_vec()),
        },
    ];
    for file in rejected {
        let events = handle.dispatch(SessionEvent::Upload(file)).await.unwrap();
        assert!(events.contains(&ChatEvent::Message {
            content: INVALID_UPLOAD_MESSAGE.to_string()
        }));
        let error = events.last().expect("an error event");
        assert!(matches!(
            error,
            ChatEvent::Error { recoverable: true, source: Some(source), .. } if source == "upload"
        ));
    }

    assert_eq!(app.index().len().await, 1);
    assert!(!dir.path().join("data/photo.png").exists());

    let answer = handle
        .dispatch(SessionEvent::Message(
            "What is the capital of France?".to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(final_answer(&answer), "The capital of France is Paris.");
}

#[tokio::test]
async fn broken_pdf_upload_is_reported_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Arc::new(ContextLlm::default()));
    let handle = started(app.clone()).await;

    let events = handle
        .dispatch(SessionEvent::Upload(UploadedFile {
            name: "broken.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            content: Some(b"%PDF-1.4 garbage".to_vec()),
        }))
        .await
        .unwrap();

    assert!(matches!(
        events.last(),
        Some(ChatEvent::Error { recoverable: true, source: Some(source), .. }) if source == "ingestion"
    ));
    assert!(!dir.path().join("data/broken.pdf").exists());
    assert!(app.index().is_empty().await);
}

#[tokio::test]
async fn rejected_reupload_keeps_the_previous_file_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Arc::new(ContextLlm::default()));
    let handle = started(app.clone()).await;
    handle
        .dispatch(SessionEvent::Upload(text_file(
            "notes.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();
    let indexed = app.index().len().await;

    let events = handle
        .dispatch(SessionEvent::Upload(UploadedFile {
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            content: Some(vec![0xff, 0xfe, 0xfd]),
        }))
        .await
        .unwrap();

    assert!(matches!(
        events.last(),
        Some(ChatEvent::Error { recoverable: true, source: Some(source), .. }) if source == "ingestion"
    ));
    let stored = std::fs::read_to_string(dir.path().join("data/notes.txt")).unwrap();
    assert_eq!(stored, "The capital of France is Paris.");
    assert!(!dir.path().join("data/.notes.txt.previous").exists());
    assert_eq!(app.index().len().await, indexed);

    let answer = handle
        .dispatch(SessionEvent::Message(
            "What is the capital of France?".to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(final_answer(&answer), "The capital of France is Paris.");
}

#[tokio::test]
async fn accepted_reupload_replaces_the_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Arc::new(ContextLlm::default()));
    let handle = started(app.clone()).await;
    for content in ["An old draft.", "The capital of France is Paris."] {
        let events = handle
            .dispatch(SessionEvent::Upload(text_file("notes.txt", content)))
            .await
            .unwrap();
        assert!(!events.iter().any(|event| matches!(event, ChatEvent::Error { .. })));
    }

    let stored = std::fs::read_to_string(dir.path().join("data/notes.txt")).unwrap();
    assert_eq!(stored, "The capital of France is Paris.");
    assert!(!dir.path().join("data/.notes.txt.previous").exists());
    assert_eq!(app.index().len().await, 1);
}

#[tokio::test]
async fn upload_names_are_reduced_to_their_base_name() {
    let dir = tempfile::tempdir().unwrap();
    let handle = started(app(dir.path(), Arc::new(ContextLlm::default()))).await;

    handle
        .dispatch(SessionEvent::Upload(text_file(
            "../../escape.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();

    assert!(dir.path().join("data/escape.txt").exists());
    assert!(!dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn messages_are_answered_one_at_a_time_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ContextLlm {
        delay: Some(Duration::from_millis(10)),
        ..ContextLlm::default()
    });
    let handle = started(app(dir.path(), llm.clone())).await;
    handle
        .dispatch(SessionEvent::Upload(text_file(
            "france.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();

    let first = handle
        .send(SessionEvent::Message("first question about France".to_string()))
        .await
        .unwrap();
    let second = handle
        .send(SessionEvent::Message("second question about France".to_string()))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        first.collect::<Vec<_>>(),
        second.collect::<Vec<_>>()
    );
    let first: Vec<ChatEvent> = first.into_iter().map(Result::unwrap).collect();
    let second: Vec<ChatEvent> = second.into_iter().map(Result::unwrap).collect();

    assert_eq!(final_answer(&first), "The capital of France is Paris.");
    assert_eq!(final_answer(&second), "The capital of France is Paris.");
    assert!(first.iter().all(|event| event.step() == Some(2)));
    assert!(second.iter().all(|event| event.step() == Some(3)));
    assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        *llm.questions.lock().unwrap(),
        ["first question about France", "second question about France"]
    );
}

#[tokio::test]
async fn ending_cancels_generation_and_rejects_later_events() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ContextLlm {
        stall: true,
        ..ContextLlm::default()
    });
    let handle = started(app(dir.path(), llm.clone())).await;
    handle
        .dispatch(SessionEvent::Upload(text_file(
            "france.txt",
            "The capital of France is Paris.",
        )))
        .await
        .unwrap();

    let mut pending = handle
        .send(SessionEvent::Message("What is the capital of France?".to_string()))
        .await
        .unwrap();
    let retrieving = pending.next().await.unwrap().unwrap();
    assert!(matches!(retrieving, ChatEvent::Status { ref stage, .. } if stage == "retrieving"));

    handle.end().await.unwrap();

    let rest: Vec<ChatEvent> = pending.map(Result::unwrap).collect().await;
    assert!(matches!(
        rest.last(),
        Some(ChatEvent::Error { recoverable: false, source: Some(source), .. }) if source == "generation"
    ));
    assert!(!rest.iter().any(|event| matches!(event, ChatEvent::Final { .. })));

    assert!(handle.is_ended());
    let error = handle
        .dispatch(SessionEvent::Message("still there?".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(error, RagError::SessionEnded));
}

#[tokio::test]
async fn ended_session_state_rejects_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = ChatSession::new("direct", app(dir.path(), Arc::new(ContextLlm::default())));
    let (sink, mut events) = tokio::sync::mpsc::channel(16);

    session.handle(SessionEvent::Start, &sink).await.unwrap();
    assert_eq!(session.state(), SessionState::AwaitingUpload);
    session.handle(SessionEvent::End, &sink).await.unwrap();
    assert_eq!(session.state(), SessionState::Ended);
    assert!(session.cancellation_token().is_cancelled());

    let error = session
        .handle(SessionEvent::Message("hi".to_string()), &sink)
        .await
        .unwrap_err();
    assert!(matches!(error, RagError::SessionEnded));

    drop(sink);
    let mut received = 0;
    while events.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, 2);
}

#[tokio::test]
async fn manager_tracks_sessions_until_they_end() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(app(dir.path(), Arc::new(ContextLlm::default())));

    let (id, events) = manager.create().await.unwrap();
    let (other, _) = manager.create().await.unwrap();
    assert_ne!(id, other);
    assert_eq!(events.len(), 2);
    assert_eq!(manager.len().await, 2);

    let handle = manager.get(&id).await.expect("session");
    assert_eq!(handle.id(), id);
    assert!(!handle.is_ended());

    assert!(manager.end(&id).await.expect("known id").is_ok());
    assert!(manager.get(&id).await.is_none());
    assert!(manager.end(&id).await.is_none());
    assert!(handle.is_ended());

    manager.end_all().await;
    assert!(manager.is_empty().await);
}
