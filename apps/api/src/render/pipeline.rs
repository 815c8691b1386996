//! PDF generation pipeline.
//!
//! Flow: admission check → canonical hash → cache get → (on miss)
//! compile under the per-key in-flight gate → cache put → return bytes
//! tagged hit/miss. Denial happens before hashing; compilation failures
//! propagate and never populate the cache; a failed cache write is
//! logged and the freshly compiled bytes are still returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex as CompileGate;
use tracing::{debug, info, warn};

use crate::models::document::DocumentPayload;
use crate::render::cache::PdfCache;
use crate::render::compiler::{CompileError, DocumentCompiler};
use crate::render::hashing::{payload_key, CacheKey};
use crate::render::latex;
use crate::render::ratelimit::{Decision, RateLimiter};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("rate limit exceeded")]
    RateLimited(Decision),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("payload could not be hashed: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

pub struct RenderedPdf {
    pub bytes: Bytes,
    pub cache_status: CacheStatus,
    pub key: CacheKey,
    /// The admission decision, carried so handlers can emit the
    /// rate-limit headers on success too.
    pub decision: Decision,
}

pub struct RenderPipeline {
    limiter: Arc<RateLimiter>,
    cache: PdfCache,
    compiler: Arc<dyn DocumentCompiler>,
    /// Per-key compile gates: concurrent misses for the same content
    /// await one compilation instead of racing the toolchain.
    inflight: Mutex<HashMap<CacheKey, Arc<CompileGate<()>>>>,
}

impl RenderPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: PdfCache,
        compiler: Arc<dyn DocumentCompiler>,
    ) -> Self {
        Self {
            limiter,
            cache,
            compiler,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Admin surface: cache stats and clear go straight to the cache.
    pub fn cache(&self) -> &PdfCache {
        &self.cache
    }

    /// Generates (or fetches) the PDF for `payload` on behalf of
    /// `identifier`. `fresh` bypasses both the cache read and write,
    /// for callers that need a guaranteed re-render.
    pub async fn generate(
        &self,
        identifier: &str,
        payload: &DocumentPayload,
        fresh: bool,
    ) -> Result<RenderedPdf, RenderError> {
        let decision = self.limiter.check(identifier);
        if !decision.allowed {
            info!("pdf generation denied for {identifier}: window saturated");
            return Err(RenderError::RateLimited(decision));
        }

        let key = payload_key(&serde_json::to_value(payload)?)?;

        if !fresh {
            if let Some(bytes) = self.cache.get(&key).await {
                debug!("cache hit for {}", key.short());
                return Ok(RenderedPdf {
                    bytes,
                    cache_status: CacheStatus::Hit,
                    key,
                    decision,
                });
            }
        }

        let gate = self.gate_for(&key);
        let result = self.compile_gated(&gate, &key, payload, fresh, decision).await;
        self.release_gate(&key, &gate);
        result
    }

    async fn compile_gated(
        &self,
        gate: &CompileGate<()>,
        key: &CacheKey,
        payload: &DocumentPayload,
        fresh: bool,
        decision: Decision,
    ) -> Result<RenderedPdf, RenderError> {
        let _held = gate.lock().await;

        // A concurrent request may have landed the artifact while this
        // one waited on the gate.
        if !fresh {
            if let Some(bytes) = self.cache.get(key).await {
                debug!("cache hit for {} after awaiting in-flight compile", key.short());
                return Ok(RenderedPdf {
                    bytes,
                    cache_status: CacheStatus::Hit,
                    key: *key,
                    decision,
                });
            }
        }

        let source = latex::render_document(payload);
        let pdf = self.compiler.compile(&source).await?;

        if fresh {
            debug!("cache bypassed for {}", key.short());
        } else if let Err(e) = self.cache.put(key, &pdf).await {
            // A lost write costs a recompilation later, nothing more.
            warn!("failed to persist compiled pdf for {}: {e}", key.short());
        }

        info!("compiled {} bytes for {}", pdf.len(), key.short());
        Ok(RenderedPdf {
            bytes: Bytes::from(pdf),
            cache_status: if fresh { CacheStatus::Bypass } else { CacheStatus::Miss },
            key: *key,
            decision,
        })
    }

    fn gate_for(&self, key: &CacheKey) -> Arc<CompileGate<()>> {
        let mut inflight = self.inflight.lock().expect("in-flight gate map poisoned");
        inflight.entry(*key).or_default().clone()
    }

    fn release_gate(&self, key: &CacheKey, gate: &Arc<CompileGate<()>>) {
        let mut inflight = self.inflight.lock().expect("in-flight gate map poisoned");
        // Map holds one reference and this call another; more means a
        // waiter still needs the gate. A waiter that re-creates a gate
        // after removal only risks a redundant compile, which the
        // double-checked cache read absorbs.
        if Arc::strong_count(gate) <= 2 {
            inflight.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{PersonalInfo, ResumePayload};
    use crate::render::cache::CacheConfig;
    use crate::render::clock::manual::ManualClock;
    use crate::render::clock::Clock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct CountingCompiler {
        calls: AtomicUsize,
        delay: Duration,
        output: Vec<u8>,
    }

    impl CountingCompiler {
        fn new(output: &[u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                output: output.to_vec(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentCompiler for CountingCompiler {
        async fn compile(&self, _source: &str) -> Result<Vec<u8>, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.output.clone())
        }
    }

    struct TimeoutCompiler;

    #[async_trait]
    impl DocumentCompiler for TimeoutCompiler {
        async fn compile(&self, _source: &str) -> Result<Vec<u8>, CompileError> {
            Err(CompileError::Timeout {
                elapsed: Duration::from_secs(30),
                log: "interrupted".to_string(),
            })
        }
    }

    fn payload(name: &str) -> DocumentPayload {
        DocumentPayload::Resume(ResumePayload {
            personal: PersonalInfo {
                name: name.to_string(),
                email: None,
                phone: None,
                location: None,
                website: None,
                summary: None,
            },
            experience: vec![],
            education: vec![],
            skills: vec![],
        })
    }

    async fn pipeline_with(
        limit: u32,
        compiler: Arc<dyn DocumentCompiler>,
    ) -> (RenderPipeline, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let cache = PdfCache::new(
            CacheConfig {
                root: dir.path().to_path_buf(),
                max_age: Duration::from_secs(3600),
                max_total_bytes: 1 << 20,
            },
            clock.clone(),
        )
        .await
        .unwrap();
        let limiter = Arc::new(RateLimiter::new(limit, Duration::from_secs(60), clock));
        (RenderPipeline::new(limiter, cache, compiler), dir)
    }

    #[tokio::test]
    async fn test_second_identical_request_is_a_cache_hit() {
        let compiler = Arc::new(CountingCompiler::new(b"%PDF-1"));
        let (pipeline, _dir) = pipeline_with(5, compiler.clone()).await;

        let first = pipeline.generate("u", &payload("Ada"), false).await.unwrap();
        let second = pipeline.generate("u", &payload("Ada"), false).await.unwrap();

        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(compiler.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_cache_entry() {
        let (pipeline, _dir) = pipeline_with(5, Arc::new(TimeoutCompiler)).await;

        let result = pipeline.generate("u", &payload("Ada"), false).await;
        assert!(matches!(
            result,
            Err(RenderError::Compile(CompileError::Timeout { .. }))
        ));
        assert_eq!(pipeline.cache().stats().await.count, 0);
    }

    #[tokio::test]
    async fn test_saturated_identifier_is_denied_before_compiling() {
        let compiler = Arc::new(CountingCompiler::new(b"%PDF-1"));
        let (pipeline, _dir) = pipeline_with(2, compiler.clone()).await;

        pipeline.generate("u", &payload("one"), false).await.unwrap();
        pipeline.generate("u", &payload("two"), false).await.unwrap();
        let third = pipeline.generate("u", &payload("three"), false).await;

        assert!(matches!(third, Err(RenderError::RateLimited(_))));
        assert_eq!(compiler.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_flag_bypasses_read_and_write() {
        let compiler = Arc::new(CountingCompiler::new(b"%PDF-new"));
        let (pipeline, _dir) = pipeline_with(5, compiler.clone()).await;

        // Prime the cache directly with different bytes for the key.
        let key = payload_key(&serde_json::to_value(payload("Ada")).unwrap()).unwrap();
        pipeline.cache().put(&key, b"%PDF-old").await.unwrap();

        let rendered = pipeline.generate("u", &payload("Ada"), true).await.unwrap();
        assert_eq!(rendered.cache_status, CacheStatus::Bypass);
        assert_eq!(rendered.bytes.as_ref(), b"%PDF-new");
        assert_eq!(compiler.calls(), 1);

        // The bypass wrote nothing: the primed entry is untouched.
        assert_eq!(pipeline.cache().get(&key).await.unwrap().as_ref(), b"%PDF-old");
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_compile() {
        let compiler = Arc::new(CountingCompiler {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
            output: b"%PDF-1".to_vec(),
        });
        let (pipeline, _dir) = pipeline_with(5, compiler.clone()).await;
        let pipeline = Arc::new(pipeline);

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.generate("u1", &payload("Ada"), false).await })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.generate("u2", &payload("Ada"), false).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(compiler.calls(), 1);
        assert_eq!(a.bytes, b.bytes);
        let statuses = [a.cache_status, b.cache_status];
        assert!(statuses.contains(&CacheStatus::Miss));
        assert!(statuses.contains(&CacheStatus::Hit));
    }
}
