//! Embedding generation.
//!
//! Providers turn code text into fixed-dimension vectors over HTTP (Ollama,
//! any OpenAI-compatible server, Nomic Atlas) or deterministically (mock).
//! A rayon pool bounds concurrency; each worker keeps exactly one request
//! in flight. Failures retry with exponential backoff and then degrade to
//! "no embedding" — a missing vector is a valid persisted state, never a
//! reason to abort the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{CieError, Result};
use crate::model::RunCounters;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

fn parse_floats(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn http_error(provider: &str, err: ureq::Error) -> CieError {
    CieError::Embedding {
        detail: match err {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                format!("{provider} returned HTTP {code}: {}", body.chars().take(200).collect::<String>())
            }
            other => format!("{provider} unreachable: {other}"),
        },
    }
}

fn malformed(provider: &str) -> CieError {
    CieError::Embedding {
        detail: format!("{provider} response did not contain an embedding array"),
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Local Ollama daemon: one prompt per request.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    agent: ureq::Agent,
}

impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let resp: serde_json::Value = self
            .agent
            .post(&url)
            .send_json(json!({ "model": self.model, "prompt": text }))
            .map_err(|e| http_error("ollama", e))?
            .into_json()
            .map_err(|e| CieError::Embedding {
                detail: format!("ollama sent non-JSON: {e}"),
            })?;
        resp.get("embedding")
            .and_then(parse_floats)
            .ok_or_else(|| malformed("ollama"))
    }
}

/// Any server speaking the OpenAI `/v1/embeddings` shape.
pub struct OpenAiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let mut req = self.agent.post(&url);
        if let Some(key) = &self.api_key {
            req = req.set("Authorization", &format!("Bearer {key}"));
        }
        let resp: serde_json::Value = req
            .send_json(json!({ "model": self.model, "input": text }))
            .map_err(|e| http_error("openai", e))?
            .into_json()
            .map_err(|e| CieError::Embedding {
                detail: format!("openai sent non-JSON: {e}"),
            })?;
        resp.get("data")
            .and_then(|d| d.get(0))
            .and_then(|first| first.get("embedding"))
            .and_then(parse_floats)
            .ok_or_else(|| malformed("openai"))
    }
}

/// Nomic Atlas hosted embeddings.
pub struct NomicProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl EmbeddingProvider for NomicProvider {
    fn name(&self) -> &'static str {
        "nomic"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embedding/text", self.base_url.trim_end_matches('/'));
        let mut req = self.agent.post(&url);
        if let Some(key) = &self.api_key {
            req = req.set("Authorization", &format!("Bearer {key}"));
        }
        let resp: serde_json::Value = req
            .send_json(json!({ "model": self.model, "texts": [text] }))
            .map_err(|e| http_error("nomic", e))?
            .into_json()
            .map_err(|e| CieError::Embedding {
                detail: format!("nomic sent non-JSON: {e}"),
            })?;
        resp.get("embeddings")
            .and_then(|e| e.get(0))
            .and_then(parse_floats)
            .ok_or_else(|| malformed("nomic"))
    }
}

/// Deterministic zero vectors of the configured dimension. Test provider.
pub struct MockProvider {
    dimensions: usize,
}

impl MockProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimensions])
    }
}

pub fn provider_from_config(cfg: &EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    match cfg.provider {
        EmbeddingProviderKind::Ollama => Box::new(OllamaProvider {
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            agent: agent(cfg.timeout_secs),
        }),
        EmbeddingProviderKind::Openai => Box::new(OpenAiProvider {
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            agent: agent(cfg.timeout_secs),
        }),
        EmbeddingProviderKind::Nomic => Box::new(NomicProvider {
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            agent: agent(cfg.timeout_secs),
        }),
        EmbeddingProviderKind::Mock => Box::new(MockProvider::new(cfg.dimensions)),
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub entity_id: String,
    pub text: String,
}

pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    pool: rayon::ThreadPool,
    workers: usize,
    /// 0 until the first successful vector fixes the run's dimension.
    expected_dim: AtomicUsize,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>, workers: usize) -> Result<Embedder> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("cie-embed-{i}"))
            .build()
            .map_err(|e| CieError::Embedding {
                detail: format!("could not start embed pool: {e}"),
            })?;
        Ok(Embedder {
            provider,
            pool,
            workers: workers.max(1),
            expected_dim: AtomicUsize::new(0),
        })
    }

    fn embed_with_retry(&self, text: &str, counters: &RunCounters) -> Option<Vec<f32>> {
        let mut attempt = 0;
        loop {
            match self.provider.embed(text) {
                Ok(vector) => return self.check_dimension(vector, counters),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        warn!(provider = self.provider.name(), error = %e, "embedding failed after retries");
                        counters.bump_embedding_errors();
                        return None;
                    }
                    let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1));
                    debug!(provider = self.provider.name(), attempt, backoff_ms = backoff, "retrying embedding");
                    std::thread::sleep(Duration::from_millis(backoff));
                }
            }
        }
    }

    /// The first non-empty vector fixes the run's dimension; anything of a
    /// different length afterwards is dropped and counted.
    fn check_dimension(&self, vector: Vec<f32>, counters: &RunCounters) -> Option<Vec<f32>> {
        if vector.is_empty() {
            counters.bump_embedding_errors();
            return None;
        }
        let dim = vector.len();
        match self
            .expected_dim
            .compare_exchange(0, dim, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Some(vector),
            Err(expected) if expected == dim => Some(vector),
            Err(expected) => {
                warn!(got = dim, expected, "dropping embedding with mismatched dimension");
                counters.bump_embedding_errors();
                None
            }
        }
    }

    /// Embed a batch. Returns `entity_id → vector` for the successes; ids
    /// absent from the map persist without an embedding. `on_progress` is
    /// called on the caller's thread with monotonically increasing counts.
    pub fn run<F>(
        &self,
        requests: &[EmbedRequest],
        counters: &RunCounters,
        cancelled: &AtomicBool,
        mut on_progress: F,
    ) -> HashMap<String, Vec<f32>>
    where
        F: FnMut(usize, usize),
    {
        let total = requests.len();
        let mut done = 0usize;
        let mut out = HashMap::with_capacity(total);

        // Chunked dispatch keeps at most 2×workers requests queued and lets
        // progress (and cancellation) surface between chunks.
        for chunk in requests.chunks((self.workers * 2).max(1)) {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let results: Vec<(String, Option<Vec<f32>>)> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .map(|req| {
                        if cancelled.load(Ordering::Relaxed) {
                            return (req.entity_id.clone(), None);
                        }
                        (req.entity_id.clone(), self.embed_with_retry(&req.text, counters))
                    })
                    .collect()
            });
            for (id, vector) in results {
                if let Some(v) = vector {
                    out.insert(id, v);
                }
            }
            done += chunk.len();
            on_progress(done, total);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn requests(n: usize) -> Vec<EmbedRequest> {
        (0..n)
            .map(|i| EmbedRequest {
                entity_id: format!("e{i}"),
                text: format!("fn f{i}() {{}}"),
            })
            .collect()
    }

    #[test]
    fn mock_provider_fills_every_id() {
        let embedder = Embedder::new(Box::new(MockProvider::new(8)), 4).unwrap();
        let counters = RunCounters::default();
        let cancelled = AtomicBool::new(false);

        let mut seen = Vec::new();
        let reqs = requests(10);
        let out = embedder.run(&reqs, &counters, &cancelled, |done, total| {
            seen.push((done, total));
        });

        assert_eq!(out.len(), 10);
        assert!(out.values().all(|v| v.len() == 8));
        assert_eq!(counters.snapshot().embedding_errors, 0);
        // Progress is monotonic and ends at (total, total).
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last(), Some(&(10, 10)));
    }

    /// Returns vectors of shrinking length after the first call.
    struct ShrinkingProvider {
        calls: AtomicU32,
    }

    impl EmbeddingProvider for ShrinkingProvider {
        fn name(&self) -> &'static str {
            "shrinking"
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.0; if n == 0 { 4 } else { 2 }])
        }
    }

    #[test]
    fn mismatched_dimensions_are_dropped_and_counted() {
        let embedder = Embedder::new(
            Box::new(ShrinkingProvider {
                calls: AtomicU32::new(0),
            }),
            1,
        )
        .unwrap();
        let counters = RunCounters::default();
        let cancelled = AtomicBool::new(false);

        let out = embedder.run(&requests(3), &counters, &cancelled, |_, _| {});
        assert_eq!(out.len(), 1, "only the dimension-fixing vector survives");
        assert_eq!(counters.snapshot().embedding_errors, 2);
    }

    /// Fails twice, then succeeds.
    struct FlakyProvider {
        calls: AtomicU32,
    }

    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(CieError::Embedding {
                    detail: "transient".into(),
                });
            }
            Ok(vec![1.0, 2.0])
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let embedder = Embedder::new(
            Box::new(FlakyProvider {
                calls: AtomicU32::new(0),
            }),
            1,
        )
        .unwrap();
        let counters = RunCounters::default();
        let cancelled = AtomicBool::new(false);

        let out = embedder.run(&requests(1), &counters, &cancelled, |_, _| {});
        assert_eq!(out.len(), 1);
        assert_eq!(out["e0"], vec![1.0, 2.0]);
        assert_eq!(counters.snapshot().embedding_errors, 0);
    }

    /// Always fails.
    struct DeadProvider;

    impl EmbeddingProvider for DeadProvider {
        fn name(&self) -> &'static str {
            "dead"
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(CieError::Embedding {
                detail: "connection refused".into(),
            })
        }
    }

    #[test]
    fn terminal_failure_yields_no_vector_but_no_abort() {
        let embedder = Embedder::new(Box::new(DeadProvider), 2).unwrap();
        let counters = RunCounters::default();
        let cancelled = AtomicBool::new(false);

        let out = embedder.run(&requests(2), &counters, &cancelled, |_, _| {});
        assert!(out.is_empty());
        assert_eq!(counters.snapshot().embedding_errors, 2);
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        let embedder = Embedder::new(Box::new(MockProvider::new(4)), 1).unwrap();
        let counters = RunCounters::default();
        let cancelled = AtomicBool::new(true);

        let out = embedder.run(&requests(8), &counters, &cancelled, |_, _| {});
        assert!(out.is_empty());
    }
}
