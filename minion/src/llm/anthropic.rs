//! Anthropic Messages API backend.

use std::io::BufReader;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::Message;
use crate::llm::sse::{Fragment, SseEvent, text_stream};
use crate::llm::{CompletionRequest, Endpoint, TextStream, ensure_success};

const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug)]
pub struct AnthropicApi {
    endpoint: Endpoint,
}

impl AnthropicApi {
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
        let body = MessagesRequest {
            model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: request.messages,
            system: request.system.filter(|s| !s.is_empty()),
            stream,
        };
        let response = conn
            .http
            .post(self.endpoint.url("/v1/messages"))
            .header("x-api-key", &conn.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .context("call Anthropic API")?;
        ensure_success(response, PROVIDER)
    }

    #[instrument(skip_all, fields(model))]
    pub(crate) fn complete(&self, model: &str, request: &CompletionRequest<'_>) -> Result<String> {
        let response = self.send(model, request, false)?;
        let parsed: MessagesResponse = response
            .json()
            .context("decode Anthropic messages response")?;
        let text = parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .unwrap_or_default();
        debug!(chars = text.len(), "anthropic completion");
        Ok(text)
    }

    #[instrument(skip_all, fields(model))]
    pub(crate) fn stream(&self, model: &str, request: &CompletionRequest<'_>) -> Result<TextStream> {
        let response = self.send(model, request, true)?;
        Ok(text_stream(BufReader::new(response), decode_event))
    }
}

fn decode_event(event: &SseEvent) -> Result<Fragment> {
    let value: Value =
        serde_json::from_str(&event.data).context("decode Anthropic stream event")?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .or(event.event.as_deref())
        .unwrap_or("");
    match kind {
        "content_block_delta" => Ok(value
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map_or(Fragment::Skip, |t| Fragment::Text(t.to_string()))),
        "message_stop" => Ok(Fragment::End),
        "error" => Err(anyhow!(
            "Anthropic stream error: {}",
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
        )),
        _ => Ok(Fragment::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn api(url: &str) -> AnthropicApi {
        AnthropicApi::new(Endpoint::new(url, "PATH", Duration::from_secs(5)))
    }

    #[test]
    fn sends_system_top_level_and_reads_first_block() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-test",
                "system": "be brief",
                "max_tokens": 100,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"first"},{"type":"text","text":"second"}]}"#)
            .create();

        let messages = vec![Message::user("hi")];
        let mut request = CompletionRequest::new(&messages).with_system("be brief");
        request.max_tokens = 100;
        let text = api(&server.url())
            .complete("claude-test", &request)
            .expect("complete");
        assert_eq!(text, "first");
        mock.assert();
    }

    #[test]
    fn empty_content_reads_as_empty_text() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content":[]}"#)
            .create();
        let messages = vec![Message::user("hi")];
        let text = api(&server.url())
            .complete("m", &CompletionRequest::new(&messages))
            .expect("complete");
        assert_eq!(text, "");
    }

    #[test]
    fn streams_text_deltas() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/v1/messages")
            .match_body(Matcher::PartialJson(json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\n\n",
                "event: ping\ndata: {\"type\":\"ping\"}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ))
            .create();
        let messages = vec![Message::user("hi")];
        let parts: Vec<String> = api(&server.url())
            .stream("m", &CompletionRequest::new(&messages))
            .expect("open")
            .collect::<Result<_>>()
            .expect("stream");
        assert_eq!(parts, vec!["Hi ", "there"]);
    }

    #[test]
    fn stream_error_event_surfaces_as_item() {
        let event = SseEvent {
            event: Some("error".to_string()),
            data: r#"{"type":"error","error":{"message":"overloaded"}}"#.to_string(),
        };
        let err = decode_event(&event).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }
}
