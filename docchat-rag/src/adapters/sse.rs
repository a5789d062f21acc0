use serde_json::{json, Value};

use docchat_core::ChatEvent;

fn format_sse(event_type: &str, payload: &Value) -> String {
    format!("event: {event_type}\ndata: {payload}\n\n")
}

/// SSE event name for a chat event.
pub fn event_name(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::Status { .. } => "status",
        ChatEvent::Message { .. } => "message",
        ChatEvent::AskFile { .. } => "ask_file",
        ChatEvent::Token { .. } => "token",
        ChatEvent::Sources { .. } => "sources",
        ChatEvent::Final { .. } => "answer",
        ChatEvent::Error { .. } => "error",
    }
}

pub fn event_payload(event: &ChatEvent) -> Value {
    match event {
        ChatEvent::Status {
            stage,
            message,
            step,
            session_id,
        } => json!({
            "stage": stage,
            "message": message,
            "step": step,
            "session_id": session_id,
        }),
        ChatEvent::Message { content } => json!({ "content": content }),
        ChatEvent::AskFile { prompt, accept } => json!({
            "prompt": prompt,
            "accept": accept,
        }),
        ChatEvent::Token { content, step } => json!({
            "content": content,
            "step": step,
        }),
        ChatEvent::Sources { sources, step } => json!({
            "sources": sources,
            "step": step,
        }),
        ChatEvent::Final { content, step } => json!({
            "content": content,
            "step": step,
        }),
        ChatEvent::Error {
            message,
            step,
            recoverable,
            source,
        } => json!({
            "message": message,
            "step": step,
            "recoverable": recoverable,
            "source": source,
        }),
    }
}

pub fn to_sse_event(event: &ChatEvent) -> String {
    format_sse(event_name(event), &event_payload(event))
}

pub fn ping_event() -> String {
    format_sse("ping", &json!({}))
}

pub fn done_event() -> String {
    format_sse("done", &json!({}))
}
