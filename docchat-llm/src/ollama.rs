use std::time::Duration;

use bytes::BytesMut;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use docchat_core::{Device, DocchatError, Runnable, StreamEvent};

use crate::{LlmRequest, LlmResponse, Message};

/// Sampling and placement options forwarded to Ollama's `options` object.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
}

impl GenerationOptions {
    pub fn with_device(mut self, device: Device) -> Self {
        self.num_gpu = device.ollama_num_gpu();
        self
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    options: GenerationOptions,
    http: Client,
}

/// Decodes a complete NDJSON chat body into stream events.
pub fn ollama_stream_events(input: &[u8]) -> Result<Vec<StreamEvent>, DocchatError> {
    let mut answer = String::new();
    let mut events = Vec::new();
    for line in input.split(|byte| *byte == b'\n') {
        let (decoded, done) = decode_line(line, &mut answer)?;
        events.extend(decoded);
        if done {
            break;
        }
    }
    Ok(events)
}

fn decode_line(line: &[u8], answer: &mut String) -> Result<(Vec<StreamEvent>, bool), DocchatError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok((Vec::new(), false));
    }

    let chunk: OllamaChatResponse =
        serde_json::from_str(text).map_err(|err| DocchatError::ParseFailed {
            output: text.to_string(),
            reason: err.to_string(),
        })?;
    if let Some(error) = chunk.error {
        return Err(DocchatError::LlmProvider(error));
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::ReasoningChunk(thinking));
        }
        if !message.content.is_empty() {
            answer.push_str(&message.content);
            events.push(StreamEvent::ContentChunk(message.content));
        }
    }
    if chunk.done {
        events.push(StreamEvent::FinalAnswer(answer.clone()));
    }
    Ok((events, chunk.done))
}

fn parse_stream_response(
    response: reqwest::Response,
) -> BoxStream<'static, Result<StreamEvent, DocchatError>> {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer = BytesMut::new();
        let mut answer = String::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(err) => {
                    yield Err(DocchatError::LlmProvider(err.to_string()));
                    return;
                }
            }

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.split_to(pos + 1);
                match decode_line(&line, &mut answer) {
                    Ok((events, done)) => {
                        for event in events {
                            yield Ok(event);
                        }
                        if done {
                            return;
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        // Last line may arrive without a trailing newline.
        match decode_line(&buffer, &mut answer) {
            Ok((events, _)) => {
                for event in events {
                    yield Ok(event);
                }
            }
            Err(err) => yield Err(err),
        }
    }
    .boxed()
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Result<Self, DocchatError> {
        Self::with_timeout(base_url, model, Duration::from_secs(300))
    }

    pub fn with_timeout(
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, DocchatError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|err| DocchatError::LlmProvider(err.to_string()))?;
        Ok(Self {
            base_url,
            model,
            options: GenerationOptions::default(),
            http,
        })
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, input: LlmRequest, stream: bool) -> OllamaChatRequest {
        let LlmRequest { model, messages } = input;
        let model = if model.is_empty() {
            self.model.clone()
        } else {
            model
        };
        OllamaChatRequest {
            model,
            messages,
            stream,
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "GenerationOptions::is_empty")]
    options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

async fn provider_error(response: reqwest::Response) -> DocchatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<OllamaErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("HTTP {status}: {body}"));
    DocchatError::LlmProvider(message)
}

#[async_trait::async_trait]
impl Runnable<LlmRequest, LlmResponse> for OllamaClient {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, DocchatError> {
        let request = self.build_request(input, false);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "ollama chat");

        let response = self
            .http
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|err| DocchatError::LlmProvider(err.to_string()))?;
        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        let response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|err| DocchatError::LlmProvider(err.to_string()))?;
        if let Some(error) = response.error {
            return Err(DocchatError::LlmProvider(error));
        }

        Ok(LlmResponse {
            content: response.message.map(|m| m.content).unwrap_or_default(),
        })
    }

    fn stream(&self, input: LlmRequest) -> BoxStream<'_, Result<StreamEvent, DocchatError>> {
        let request = self.build_request(input, true);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "ollama chat stream");
        let client = self.clone();

        stream::once(async move {
            client
                .http
                .post(client.chat_url())
                .json(&request)
                .send()
                .await
                .map_err(|err| DocchatError::LlmProvider(err.to_string()))
        })
        .flat_map(|result| match result {
            Ok(response) if response.status().is_success() => parse_stream_response(response),
            Ok(response) => stream::once(provider_error(response)).map(Err).boxed(),
            Err(err) => stream::iter(vec![Err(err)]).boxed(),
        })
        .boxed()
    }
}
