//! OpenAI chat-completions backend.

use std::io::BufReader;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::llm::sse::{Fragment, SseEvent, text_stream};
use crate::llm::{CompletionRequest, Endpoint, TextStream, ensure_success};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant.";
const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug)]
pub struct OpenAiApi {
    endpoint: Endpoint,
}

impl OpenAiApi {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(
        &self,
        model: &str,
        request: &CompletionRequest<'_>,
        stream: bool,
    ) -> Result<reqwest::blocking::Response> {
        let conn = self.endpoint.connection()?;
        let system = request
            .system
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
        messages.extend(request.messages.iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        let body = ChatRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };
        let response = conn
            .http
            .post(self.endpoint.url("/chat/completions"))
            .bearer_auth(&conn.api_key)
            .json(&body)
            .send()
            .context("call OpenAI API")?;
        ensure_success(response, PROVIDER)
    }

    #[instrument(skip_all, fields(model))]
    pub(crate) fn complete(&self, model: &str, request: &CompletionRequest<'_>) -> Result<String> {
        let response = self.send(model, request, false)?;
        let parsed: ChatResponse = response
            .json()
            .context("decode chat completions response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "openai completion");
        Ok(text)
    }

    #[instrument(skip_all, fields(model))]
    pub(crate) fn stream(&self, model: &str, request: &CompletionRequest<'_>) -> Result<TextStream> {
        let response = self.send(model, request, true)?;
        Ok(text_stream(BufReader::new(response), decode_event))
    }
}

fn decode_event(event: &SseEvent) -> Result<Fragment> {
    if event.data.trim() == "[DONE]" {
        return Ok(Fragment::End);
    }
    let value: Value = serde_json::from_str(&event.data).context("decode OpenAI stream chunk")?;
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map_or(Fragment::Skip, |t| Fragment::Text(t.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn api(url: &str) -> OpenAiApi {
        OpenAiApi::new(Endpoint::new(url, "PATH", Duration::from_secs(5)))
    }

    #[test]
    fn prepends_default_system_message() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", Matcher::Regex("^Bearer ".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "You are a helpful coding assistant."},
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"done"}}]}"#)
            .create();

        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let text = api(&server.url())
            .complete("gpt-test", &CompletionRequest::new(&messages))
            .expect("complete");
        assert_eq!(text, "done");
        mock.assert();
    }

    #[test]
    fn null_content_reads_as_empty_text() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":null}}]}"#)
            .create();
        let messages = vec![Message::user("hi")];
        let text = api(&server.url())
            .complete("m", &CompletionRequest::new(&messages).with_system("sys"))
            .expect("complete");
        assert_eq!(text, "");
    }

    #[test]
    fn decodes_stream_chunks() {
        let chunk = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{"content":"abc"}}]}"#.to_string(),
        };
        assert_eq!(
            decode_event(&chunk).expect("decode"),
            Fragment::Text("abc".to_string())
        );
        let role_only = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{"role":"assistant"}}]}"#.to_string(),
        };
        assert_eq!(decode_event(&role_only).expect("decode"), Fragment::Skip);
        let done = SseEvent {
            event: None,
            data: "[DONE]".to_string(),
        };
        assert_eq!(decode_event(&done).expect("decode"), Fragment::End);
    }
}
