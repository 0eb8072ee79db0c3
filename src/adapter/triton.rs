//! Triton Inference Server generate/generate_stream adapter (spec.md §4.1).
//!
//! The health check fixes a bug present in the system this was distilled
//! from: the readiness probe and the per-model readiness probe must both
//! be attempted and ANDed together. An early return after the first probe
//! would leave the model-readiness check unreachable.

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::adapter::sse::{parse_triton_line, LineBuffer};
use crate::adapter::{build_http_client, AdapterConfig, ServerAdapter};
use crate::model::{ErrorKind, RequestResult};

pub struct TritonAdapter {
    config: AdapterConfig,
    client: reqwest::Client,
}

impl TritonAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        let client = build_http_client(&config);
        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    text_output: Option<String>,
}

#[async_trait]
impl ServerAdapter for TritonAdapter {
    async fn send(&self, request_id: u64, prompt: &str, max_tokens: usize, stream: bool) -> RequestResult {
        if stream {
            self.send_streaming(request_id, prompt, max_tokens).await
        } else {
            self.send_non_streaming(request_id, prompt, max_tokens).await
        }
    }

    async fn health(&self) -> bool {
        let ready = self
            .client
            .get(self.url("/v2/health/ready"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        let model_ready = self
            .client
            .get(self.url(&format!("/v2/models/{}/ready", self.config.model)))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        ready && model_ready
    }
}

impl TritonAdapter {
    fn generate_body(&self, prompt: &str, max_tokens: usize, stream: bool) -> serde_json::Value {
        json!({
            "text_input": prompt,
            "max_tokens": max_tokens,
            "stream": stream,
        })
    }

    async fn send_non_streaming(&self, request_id: u64, prompt: &str, max_tokens: usize) -> RequestResult {
        let body = self.generate_body(prompt, max_tokens, false);
        let start = Instant::now();
        let input_tokens = estimate_tokens(prompt);

        let resp = match self
            .client
            .post(self.url(&format!("/v2/models/{}/generate", self.config.model)))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return map_transport_error(request_id, &e, start, input_tokens),
        };

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            return RequestResult::failure(request_id, elapsed_ms(start), input_tokens, ErrorKind::Http(code));
        }

        let parsed = resp.json::<GenerateResponse>().await;
        let e2e_ms = elapsed_ms(start);

        let parsed = match parsed {
            Ok(p) => p,
            Err(_) => return RequestResult::failure(request_id, e2e_ms, input_tokens, ErrorKind::Decode),
        };

        let output_tokens = parsed.text_output.as_deref().map(estimate_tokens).unwrap_or(0);
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

    async fn send_streaming(&self, request_id: u64, prompt: &str, max_tokens: usize) -> RequestResult {
        let body = self.generate_body(prompt, max_tokens, true);
        let start = Instant::now();
        let input_tokens = estimate_tokens(prompt);

        let resp = match self
            .client
            .post(self.url(&format!("/v2/models/{}/generate_stream", self.config.model)))
            .json(&body)
            .send()
            .await
        {
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
        let mut prev_text = String::new();
        let mut output_tokens: u64 = 0;

        loop {
            let chunk = match stream.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return map_transport_error(request_id, &e, start, input_tokens),
                None => break,
            };

            for line in buffer.push(&chunk) {
                let Some(cumulative) = parse_triton_line(&line) else {
                    continue;
                };
                let delta = cumulative.strip_prefix(&prev_text).unwrap_or(&cumulative);
                if delta.is_empty() {
                    continue;
                }
                prev_text = cumulative;
                let new_tokens = estimate_tokens(delta).max(1);
                let now = Instant::now();
                for _ in 0..new_tokens {
                    if first_token_at.is_none() {
                        first_token_at = Some(now);
                    } else {
                        token_times.push(now);
                    }
                }
                output_tokens += new_tokens;
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

fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
