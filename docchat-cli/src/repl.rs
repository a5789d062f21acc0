//! Terminal chat session: the same state machine the HTTP transport drives.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use docchat_core::{ChatEvent, SourceRef};
use docchat_rag::{DocChat, SessionEvent, SessionHandle, SessionManager, UploadedFile};

const HISTORY_FILE: &str = ".docchat_history";

pub fn print_flush(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

pub fn print_sources(sources: &[SourceRef]) {
    for source in sources {
        match source.page {
            Some(page) => println!("  [{}, page {page}] score {:.3}", source.source, source.score),
            None => println!("  [{}] score {:.3}", source.source, source.score),
        }
    }
}

/// MIME type the upload will be announced with.
pub fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" | "md" | "markdown" => "text/plain",
        _ => "application/octet-stream",
    }
}

enum Input {
    Upload(PathBuf),
    Quit,
    Help,
    Question(String),
}

fn parse(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some(("/upload", path)) => Some(Input::Upload(PathBuf::from(path.trim()))),
        _ => match line {
            "/quit" | "/exit" => Some(Input::Quit),
            "/help" => Some(Input::Help),
            _ => Some(Input::Question(line.to_string())),
        },
    }
}

fn print_help() {
    println!("  /upload <path>  index a PDF or text file");
    println!("  /quit           end the session");
    println!("  anything else is a question about your documents");
}

fn history_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(HISTORY_FILE))
        .unwrap_or_else(|| HISTORY_FILE.into())
}

pub async fn run(app: DocChat) -> Result<()> {
    let manager = SessionManager::new(app);
    let (id, greeting) = manager.create().await?;
    let session = manager
        .get(&id)
        .await
        .context("session ended before it started")?;
    for event in &greeting {
        render(event)?;
    }

    let mut editor = DefaultEditor::new().context("cannot open the terminal")?;
    let history = history_path();
    let _ = editor.load_history(&history);

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let Some(input) = parse(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.trim());

        match input {
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Upload(path) => upload(&session, &path).await?,
            Input::Question(question) => {
                let mut events = session.send(SessionEvent::Message(question)).await?;
                while let Some(event) = events.next().await {
                    render(&event?)?;
                }
            }
        }
    }

    if let Err(err) = editor.save_history(&history) {
        tracing::debug!(error = %err, "history not saved");
    }
    manager.end(&id).await.transpose()?;
    println!("Goodbye!");
    Ok(())
}

async fn upload(session: &SessionHandle, path: &Path) -> Result<()> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(err) => {
            eprintln!("cannot read {}: {err}", path.display());
            return Ok(());
        }
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = UploadedFile {
        name,
        mime_type: mime_for(path).to_string(),
        content: Some(content),
    };

    let mut events = session.send(SessionEvent::Upload(file)).await?;
    while let Some(event) = events.next().await {
        render(&event?)?;
    }
    Ok(())
}

fn render(event: &ChatEvent) -> io::Result<()> {
    match event {
        ChatEvent::Message { content } => println!("{content}"),
        ChatEvent::AskFile { prompt, .. } => println!("{prompt} (/upload <path>)"),
        ChatEvent::Status { message, .. } => eprintln!("… {message}"),
        ChatEvent::Token { content, .. } => print_flush(content)?,
        ChatEvent::Sources { sources, .. } => {
            println!();
            print_sources(sources);
        }
        ChatEvent::Final { .. } => println!(),
        ChatEvent::Error { message, .. } => eprintln!("error: {message}"),
    }
    Ok(())
}
