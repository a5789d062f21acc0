use serde::{Deserialize, Serialize};

/// Where a retrieved passage came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub page: Option<u64>,
    pub chunk_index: Option<u64>,
    pub score: f32,
}

/// Server-to-client event produced by a chat session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    Status {
        stage: String,
        message: String,
        step: usize,
        session_id: String,
    },
    /// Plain assistant message (welcome text, upload confirmations).
    Message {
        content: String,
    },
    AskFile {
        prompt: String,
        accept: Vec<String>,
    },
    Token {
        content: String,
        step: usize,
    },
    Sources {
        sources: Vec<SourceRef>,
        step: usize,
    },
    Final {
        content: String,
        step: usize,
    },
    Error {
        message: String,
        step: usize,
        recoverable: bool,
        source: Option<String>,
    },
}

impl ChatEvent {
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::Status { step, .. }
            | Self::Token { step, .. }
            | Self::Sources { step, .. }
            | Self::Final { step, .. }
            | Self::Error { step, .. } => Some(*step),
            Self::Message { .. } | Self::AskFile { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Status { session_id, .. } => Some(session_id.as_str()),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
