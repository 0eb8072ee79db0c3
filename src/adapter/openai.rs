//! OpenAI-compatible chat completion adapter (spec.md §4.1).

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::adapter::sse::{parse_openai_sse_line, LineBuffer, SseFrame};
use crate::adapter::{build_http_client, AdapterConfig, ServerAdapter};
use crate::model::{ErrorKind, RequestResult};

pub struct OpenAiAdapter {
    config: AdapterConfig,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        let client = build_http_client(&config);
        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[async_trait]
impl ServerAdapter for OpenAiAdapter {
    async fn send(&self, request_id: u64, prompt: &str, max_tokens: usize, stream: bool) -> RequestResult {
        if stream {
            self.send_streaming(request_id, prompt, max_tokens).await
        } else {
            self.send_non_streaming(request_id, prompt, max_tokens).await
        }
    }

    async fn health(&self) -> bool {
        for path in ["/health", "/v1/models"] {
            if let Ok(resp) = self.client.get(self.url(path)).send().await {
                if resp.status().is_success() {
                    return true;
                }
            }
        }
        false
    }
}

impl OpenAiAdapter {
    async fn send_streaming(&self, request_id: u64, prompt: &str, max_tokens: usize) -> RequestResult {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "stream": true,
        });

        let start = Instant::now();
        let input_tokens = estimate_tokens(prompt);

        let resp = match self.client.post(self.url("/v1/chat/completions")).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return map_transport_error(request_id, &e, start, input_tokens),
        };

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            return RequestResult::failure(request_id, elapsed_ms(start), input_tokens, ErrorKind::Http(code));
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut first_token_at: Option<Instant> = None;
        let mut token_times: Vec<Instant> = Vec::new();
        let mut output_tokens: u64 = 0;

        loop {
            let chunk = match stream.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return map_transport_error(request_id, &e, start, input_tokens);
                }
                None => break,
            };

            let mut done = false;
            for line in buffer.push(&chunk) {
                match parse_openai_sse_line(&line) {
                    Some(SseFrame::Done) => {
                        done = true;
                        break;
                    }
                    Some(SseFrame::Token(_)) => {
                        let now = Instant::now();
                        if first_token_at.is_none() {
                            first_token_at = Some(now);
                        } else {
                            token_times.push(now);
                        }
                        output_tokens += 1;
                    }
                    None => continue,
                }
            }
            if done {
                break;
            }
        }

        let end = Instant::now();
        let ttft_ms = first_token_at.unwrap_or(end).duration_since(start).as_secs_f64() * 1000.0;
        let e2e_ms = end.duration_since(start).as_secs_f64() * 1000.0;

        let itl_ms = match first_token_at {
            Some(first) => {
                let mut gaps = Vec::with_capacity(token_times.len());
                let mut prev = first;
                for t in &token_times {
                    gaps.push(t.duration_since(prev).as_secs_f64() * 1000.0);
                    prev = *t;
                }
                gaps
            }
            None => Vec::new(),
        };

        RequestResult::success(request_id, ttft_ms, e2e_ms, input_tokens, output_tokens, itl_ms)
    }

    async fn send_non_streaming(&self, request_id: u64, prompt: &str, max_tokens: usize) -> RequestResult {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "stream": false,
        });

        let start = Instant::now();
        let input_estimate = estimate_tokens(prompt);

        let resp = match self.client.post(self.url("/v1/chat/completions")).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return map_transport_error(request_id, &e, start, input_estimate),
        };

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            return RequestResult::failure(request_id, elapsed_ms(start), input_estimate, ErrorKind::Http(code));
        }

        let parsed = resp.json::<ChatResponse>().await;
        let e2e_ms = elapsed_ms(start);

        let parsed = match parsed {
            Ok(p) => p,
            Err(_) => return RequestResult::failure(request_id, e2e_ms, input_estimate, ErrorKind::Decode),
        };

        let output_tokens = parsed
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| {
                parsed
                    .choices
                    .first()
                    .and_then(|c| c.message.as_ref())
                    .and_then(|m| m.content.as_ref())
                    .map(|c| estimate_tokens(c))
                    .unwrap_or(0)
            });
        let input_tokens = parsed.usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(input_estimate);

        // Non-streaming has no observable first-token event, so ttft == e2e
        // and tpot is derived from the total duration instead of the
        // event-spacing formula `send`/`RequestResult::success` use for
        // streamed requests (spec.md §8 boundary behaviour).
        let tpot_ms = if output_tokens > 0 {
            Some(e2e_ms / output_tokens as f64)
        } else {
            None
        };

        RequestResult {
            request_id,
            ttft_ms: e2e_ms,
            tpot_ms,
            e2e_ms,
            input_tokens,
            output_tokens,
            itl_ms: None,
            success: true,
            error_kind: None,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn map_transport_error(request_id: u64, err: &reqwest::Error, start: Instant, input_tokens: u64) -> RequestResult {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::Connect
    } else if err.is_decode() {
        ErrorKind::Decode
    } else {
        ErrorKind::Other
    };
    RequestResult::failure(request_id, elapsed_ms(start), input_tokens, kind)
}

/// Whitespace-split word count. Exact tokenization is a non-goal (spec.md
/// §1); this is only used when a server omits usage counters.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> AdapterConfig {
        AdapterConfig {
            server_url: url,
            model: "test-model".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn non_streaming_success_uses_server_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello there"}}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(config(server.uri()));
        let result = adapter.send(1, "hi", 16, false).await;

        assert!(result.success);
        assert_eq!(result.input_tokens, 7);
        assert_eq!(result.output_tokens, 3);
        assert_eq!(result.ttft_ms, result.e2e_ms);
        assert!(result.tpot_ms.is_some());
    }

    #[tokio::test]
    async fn http_error_status_maps_to_http_error_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(config(server.uri()));
        let result = adapter.send(1, "hi", 16, false).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Http(500)));
    }

    #[tokio::test]
    async fn streaming_counts_tokens_and_stops_at_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(config(server.uri()));
        let result = adapter.send(1, "hi", 16, true).await;

        assert!(result.success);
        assert_eq!(result.output_tokens, 2);
    }

    #[tokio::test]
    async fn health_tries_models_endpoint_when_health_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(config(server.uri()));
        assert!(adapter.health().await);
    }

    #[test]
    fn estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens("the quick brown fox"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
