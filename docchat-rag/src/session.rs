use std::path::Path;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use docchat_core::ChatEvent;
use docchat_retrieval::IngestSource;

use crate::{AnswerEvent, DocChat, RagError};

pub const WELCOME_MESSAGE: &str = "Hi, Welcome to the chatbot. Upload a file to get started!";
pub const ASK_FILE_PROMPT: &str = "Upload a PDF or text file.";
pub const ACCEPTED_MIME_TYPES: &[&str] = &["application/pdf", "text/plain"];
pub const INVALID_UPLOAD_MESSAGE: &str = "Error: Uploaded file format is incorrect. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Started,
    AwaitingUpload,
    Ready,
    Ended,
}

/// A file handed over by the transport. `content` is `None` when the client
/// announced a file but sent no body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub content: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Upload(UploadedFile),
    Message(String),
    End,
}

type EventSink = mpsc::Sender<Result<ChatEvent, RagError>>;

/// One conversation. Owned by its task; see [`SessionHandle`].
pub struct ChatSession {
    id: String,
    state: SessionState,
    app: DocChat,
    bound: Option<DocChat>,
    cancel: CancellationToken,
    step: usize,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, app: DocChat) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Started,
            app,
            bound: None,
            cancel: CancellationToken::new(),
            step: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fires when the session ends; in-flight generation watches it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Applies one event, pushing the resulting chat events into `sink`.
    ///
    /// Failures the user can recover from (bad uploads, generation errors)
    /// become `ChatEvent::Error` and return `Ok`.
    pub async fn handle(&mut self, event: SessionEvent, sink: &EventSink) -> Result<(), RagError> {
        if self.state == SessionState::Ended {
            return Err(RagError::SessionEnded);
        }
        if self.cancel.is_cancelled() && event != SessionEvent::End {
            return Err(RagError::SessionEnded);
        }

        match event {
            SessionEvent::Start => self.start(sink).await,
            SessionEvent::Upload(file) => self.upload(file, sink).await,
            SessionEvent::Message(content) => self.message(&content, sink).await,
            SessionEvent::End => {
                self.end();
                Ok(())
            }
        }
    }

    async fn start(&mut self, sink: &EventSink) -> Result<(), RagError> {
        if self.state != SessionState::Started {
            return Err(RagError::Runtime("session already started".into()));
        }
        self.bound = Some(self.app.clone());
        self.state = SessionState::AwaitingUpload;
        tracing::info!(session_id = %self.id, "session started");

        emit(sink, ChatEvent::Message { content: WELCOME_MESSAGE.to_string() }).await;
        emit(
            sink,
            ChatEvent::AskFile {
                prompt: ASK_FILE_PROMPT.to_string(),
                accept: ACCEPTED_MIME_TYPES.iter().map(|t| t.to_string()).collect(),
            },
        )
        .await;
        Ok(())
    }

    fn bound(&self) -> Result<DocChat, RagError> {
        self.bound
            .clone()
            .ok_or_else(|| RagError::Runtime("session has not started".into()))
    }

    async fn upload(&mut self, file: UploadedFile, sink: &EventSink) -> Result<(), RagError> {
        let app = self.bound()?;
        self.step += 1;
        let step = self.step;

        match self.store_and_index(&app, &file, sink, step).await {
            Ok(name) => {
                emit(
                    sink,
                    ChatEvent::Message {
                        content: format!("File '{name}' has been indexed! You can now ask questions."),
                    },
                )
                .await;
            }
            Err(err) => {
                tracing::warn!(session_id = %self.id, file = %file.name, error = %err, "upload rejected");
                if matches!(err, RagError::InvalidUpload(_)) {
                    emit(sink, ChatEvent::Message { content: INVALID_UPLOAD_MESSAGE.to_string() }).await;
                }
                emit(sink, error_event(&err, step, true)).await;
            }
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    async fn store_and_index(
        &self,
        app: &DocChat,
        file: &UploadedFile,
        sink: &EventSink,
        step: usize,
    ) -> Result<String, RagError> {
        let name = validate_upload(file, app.config().max_upload_bytes)?;
        let content = file.content.as_deref().unwrap_or_default();

        let dir = app.documents_dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| RagError::Runtime(format!("cannot create {}: {err}", dir.display())))?;
        let path = dir.join(&name);
        let backup = dir.join(format!(".{name}.previous"));
        let had_previous = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if had_previous {
            tokio::fs::rename(&path, &backup)
                .await
                .map_err(|err| RagError::Runtime(format!("cannot set aside {}: {err}", path.display())))?;
        }
        if let Err(err) = tokio::fs::write(&path, content).await {
            restore_previous(&path, &backup, had_previous).await;
            return Err(RagError::Runtime(format!("cannot write {}: {err}", path.display())));
        }

        emit(
            sink,
            ChatEvent::Status {
                stage: "indexing".to_string(),
                message: format!("Indexing '{name}'"),
                step,
                session_id: self.id.clone(),
            },
        )
        .await;

        match app.ingest(IngestSource::File(path.clone())).await {
            Ok(report) => {
                if had_previous {
                    if let Err(err) = tokio::fs::remove_file(&backup).await {
                        tracing::warn!(path = %backup.display(), error = %err, "could not remove replaced upload");
                    }
                }
                tracing::info!(session_id = %self.id, file = %name, chunks = report.chunks, "upload indexed");
                Ok(name)
            }
            Err(err) => {
                restore_previous(&path, &backup, had_previous).await;
                Err(err)
            }
        }
    }

    async fn message(&mut self, content: &str, sink: &EventSink) -> Result<(), RagError> {
        let app = self.bound()?;
        self.step += 1;
        let step = self.step;

        emit(
            sink,
            ChatEvent::Status {
                stage: "retrieving".to_string(),
                message: "Searching your documents".to_string(),
                step,
                session_id: self.id.clone(),
            },
        )
        .await;

        let mut events = app.chain().query_stream(content, self.cancel.child_token());
        while let Some(event) = events.next().await {
            match event {
                Ok(AnswerEvent::Retrieved { sources }) => {
                    emit(
                        sink,
                        ChatEvent::Status {
                            stage: "generating".to_string(),
                            message: format!("Found {} relevant passages", sources.len()),
                            step,
                            session_id: self.id.clone(),
                        },
                    )
                    .await;
                }
                Ok(AnswerEvent::Token(content)) => {
                    emit(sink, ChatEvent::Token { content, step }).await;
                }
                Ok(AnswerEvent::Answer(answer)) => {
                    emit(sink, ChatEvent::Sources { sources: answer.sources, step }).await;
                    emit(sink, ChatEvent::Final { content: answer.answer, step }).await;
                }
                Err(err) => {
                    tracing::warn!(session_id = %self.id, step, error = %err, "query failed");
                    let recoverable = !self.cancel.is_cancelled();
                    emit(sink, error_event(&err, step, recoverable)).await;
                    break;
                }
            }
        }
        Ok(())
    }

    fn end(&mut self) {
        self.cancel.cancel();
        self.bound = None;
        self.state = SessionState::Ended;
        tracing::info!(session_id = %self.id, "session ended");
    }
}

/// Puts back the file a rejected upload replaced, or drops the rejected file
/// when there was nothing before it.
async fn restore_previous(path: &Path, backup: &Path, had_previous: bool) {
    let restored = if had_previous {
        tokio::fs::rename(backup, path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    if let Err(err) = restored {
        tracing::warn!(path = %path.display(), error = %err, "could not roll back rejected upload");
    }
}

/// Checks type and content, returning the base file name to store it under.
fn validate_upload(file: &UploadedFile, max_bytes: usize) -> Result<String, RagError> {
    if !ACCEPTED_MIME_TYPES.contains(&file.mime_type.as_str()) {
        return Err(RagError::InvalidUpload(format!(
            "unsupported type '{}', expected one of {}",
            file.mime_type,
            ACCEPTED_MIME_TYPES.join(", ")
        )));
    }
    let content = match file.content.as_deref() {
        Some(content) if !content.is_empty() => content,
        _ => return Err(RagError::InvalidUpload("file has no content".into())),
    };
    if content.len() > max_bytes {
        return Err(RagError::InvalidUpload(format!(
            "file is {} bytes, the limit is {max_bytes}",
            content.len()
        )));
    }

    let name = Path::new(&file.name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .ok_or_else(|| RagError::InvalidUpload(format!("invalid file name '{}'", file.name)))?;

    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let extension_matches = match file.mime_type.as_str() {
        "application/pdf" => extension == "pdf",
        _ => matches!(extension.as_str(), "txt" | "md" | "markdown"),
    };
    if !extension_matches {
        return Err(RagError::InvalidUpload(format!(
            "file name '{name}' does not match type '{}'",
            file.mime_type
        )));
    }
    Ok(name.to_string())
}

fn error_event(err: &RagError, step: usize, recoverable: bool) -> ChatEvent {
    ChatEvent::Error {
        message: err.to_string(),
        step,
        recoverable,
        source: Some(err.stage().to_string()),
    }
}

async fn emit(sink: &EventSink, event: ChatEvent) {
    // A closed sink means the client stopped listening; the session carries on.
    let _ = sink.send(Ok(event)).await;
}

struct Command {
    event: SessionEvent,
    sink: EventSink,
}

/// Cheap, cloneable handle to a session running on its own task.
///
/// Commands queue up and run one at a time, so a message sent while another
/// is being answered waits its turn.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    event_buffer_size: usize,
}

impl SessionHandle {
    pub fn spawn(session: ChatSession) -> Self {
        let (commands, receiver) = mpsc::channel(32);
        let handle = Self {
            id: session.id().to_string(),
            commands,
            cancel: session.cancellation_token(),
            event_buffer_size: session.app.event_buffer_size(),
        };
        tokio::spawn(run_session(session, receiver));
        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }

    /// Queues `event` and returns the stream of events it produces.
    pub async fn send(
        &self,
        event: SessionEvent,
    ) -> Result<ReceiverStream<Result<ChatEvent, RagError>>, RagError> {
        if self.cancel.is_cancelled() {
            return Err(RagError::SessionEnded);
        }
        self.enqueue(event).await
    }

    /// Like [`SessionHandle::send`], collecting every event.
    pub async fn dispatch(&self, event: SessionEvent) -> Result<Vec<ChatEvent>, RagError> {
        let stream = self.send(event).await?;
        collect(stream).await
    }

    /// Cancels any in-flight generation, then ends the session.
    pub async fn end(&self) -> Result<Vec<ChatEvent>, RagError> {
        self.cancel.cancel();
        let stream = self.enqueue(SessionEvent::End).await?;
        collect(stream).await
    }

    async fn enqueue(
        &self,
        event: SessionEvent,
    ) -> Result<ReceiverStream<Result<ChatEvent, RagError>>, RagError> {
        let (sink, events) = mpsc::channel(self.event_buffer_size);
        self.commands
            .send(Command { event, sink })
            .await
            .map_err(|_| RagError::SessionEnded)?;
        Ok(ReceiverStream::new(events))
    }
}

async fn collect(
    mut stream: ReceiverStream<Result<ChatEvent, RagError>>,
) -> Result<Vec<ChatEvent>, RagError> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}

async fn run_session(mut session: ChatSession, mut commands: mpsc::Receiver<Command>) {
    while let Some(Command { event, sink }) = commands.recv().await {
        let ending = event == SessionEvent::End;
        if let Err(err) = session.handle(event, &sink).await {
            let _ = sink.send(Err(err)).await;
        }
        if ending || session.state() == SessionState::Ended {
            break;
        }
    }

    commands.close();
    while let Some(Command { sink, .. }) = commands.recv().await {
        let _ = sink.send(Err(RagError::SessionEnded)).await;
    }
}
