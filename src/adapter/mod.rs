//! Server Adapter (port, spec.md §4.1). The core is parameterised over any
//! type implementing [`ServerAdapter`]; two bundled adapters target
//! OpenAI-compatible chat completion servers and Triton's generate
//! endpoint. Adapters are looked up by name through [`AdapterRegistry`],
//! matching the teacher's transformer registry pattern
//! (`transform::registry::TransformerRegistry`) generalised to a single
//! capability instead of a chain.

pub mod openai;
pub mod sse;
pub mod triton;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BenchError, Result};
use crate::model::RequestResult;

pub use openai::OpenAiAdapter;
pub use triton::TritonAdapter;

/// Capability every benchmarked server must expose (spec.md §4.1).
/// Adapter implementations MUST NOT propagate errors across this
/// boundary for per-request failures: `send` always returns `Ok`, with
/// failure encoded in `RequestResult::success`/`error_kind`.
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    async fn send(&self, request_id: u64, prompt: &str, max_tokens: usize, stream: bool) -> RequestResult;

    async fn health(&self) -> bool;

    /// Best-effort warmup; errors are swallowed per spec.md §4.1.
    async fn warmup(&self, n: usize, input_len: usize, output_len: usize) {
        let prompt = crate::generator::synthetic_prompt(input_len);
        for i in 0..n {
            let _ = self.send(i as u64, &prompt, output_len, false).await;
        }
    }
}

/// Shared construction parameters for the bundled adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub server_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Builds an HTTP client honouring `AdapterConfig::timeout`, forwarding
/// `api_key` as a bearer token if present (spec.md §6 "Environment").
pub(crate) fn build_http_client(config: &AdapterConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().timeout(config.timeout);
    if let Some(key) = &config.api_key {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        builder = builder.default_headers(headers);
    }
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Process-global-free registry mapping a short adapter name
/// (`"openai"`, `"triton"`) to a constructor. Per the DESIGN NOTES (§9),
/// this registry is only used at the CLI boundary where an adapter kind
/// is user-selectable; the core itself takes an already-built adapter.
#[derive(Default)]
pub struct AdapterRegistry;

impl AdapterRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, kind: &str, config: AdapterConfig) -> Result<Arc<dyn ServerAdapter>> {
        match kind {
            "openai" => Ok(Arc::new(OpenAiAdapter::new(config))),
            "triton" => Ok(Arc::new(TritonAdapter::new(config))),
            other => Err(BenchError::UnknownAdapter(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_unknown_kind() {
        let registry = AdapterRegistry::new();
        let config = AdapterConfig {
            server_url: "http://localhost".to_string(),
            model: "m".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        };
        assert!(matches!(
            registry.build("nonsense", config),
            Err(BenchError::UnknownAdapter(_))
        ));
    }

    #[test]
    fn registry_builds_known_kinds() {
        let registry = AdapterRegistry::new();
        for kind in ["openai", "triton"] {
            let config = AdapterConfig {
                server_url: "http://localhost".to_string(),
                model: "m".to_string(),
                api_key: None,
                timeout: Duration::from_secs(30),
            };
            assert!(registry.build(kind, config).is_ok());
        }
    }
}
