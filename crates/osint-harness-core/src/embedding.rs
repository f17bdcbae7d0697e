//! Embedding provider trait, the offline hashing provider, the
//! security-domain prefix wrapper, and vector utilities.
//!
//! Network-backed providers (OpenAI, fastembed) live in the `osint-harness`
//! app crate and implement the same [`EmbeddingProvider`] trait.
//!
//! Embedding never aborts ingestion or a query: [`embed_or_zero`] turns any
//! provider failure into a zero vector of the provider's dimensionality, and
//! [`embed_chunks`] leaves a failed chunk without an embedding.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::Chunk;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("expected a {expected}-dimensional vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, one result per input in order.
    ///
    /// The default embeds each text on its own. Providers with a batch
    /// endpoint override this.
    fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn dims(&self) -> usize {
        (**self).dims()
    }
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }
    fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        (**self).embed_batch(texts)
    }
}

/// Embed `text`, falling back to a zero vector.
///
/// Empty or whitespace-only text, a provider error, and a vector of the wrong
/// length all yield `vec![0.0; provider.dims()]`. Failures are logged.
pub fn embed_or_zero(provider: &dyn EmbeddingProvider, text: &str) -> Vec<f32> {
    let dims = provider.dims();
    if text.trim().is_empty() {
        return vec![0.0; dims];
    }
    match provider.embed(text).and_then(|v| check_dims(v, dims)) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(model = provider.model_name(), error = %e, "embedding failed, using zero vector");
            vec![0.0; dims]
        }
    }
}

fn check_dims(v: Vec<f32>, dims: usize) -> Result<Vec<f32>, EmbeddingError> {
    if v.len() == dims {
        Ok(v)
    } else {
        Err(EmbeddingError::DimensionMismatch {
            expected: dims,
            actual: v.len(),
        })
    }
}

/// Outcome of embedding a batch of chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub embedded: usize,
    pub failed: usize,
}

/// Attach an embedding to every chunk that can be embedded.
///
/// Per-item failures leave `embedding = None` and are counted; the batch
/// itself never fails.
pub fn embed_chunks(provider: &dyn EmbeddingProvider, chunks: &mut [Chunk]) -> EmbedReport {
    let dims = provider.dims();
    let texts: Vec<String> = chunks.iter().map(|c| c.content.text.clone()).collect();
    let results = provider.embed_batch(&texts);

    let mut report = EmbedReport::default();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        if chunk.content.text.trim().is_empty() {
            chunk.embedding = Some(vec![0.0; dims]);
            report.embedded += 1;
            continue;
        }
        let result = match results.get(i) {
            Some(r) => r.clone().and_then(|v| check_dims(v, dims)),
            None => Err(EmbeddingError::Request(
                "provider returned fewer vectors than inputs".to_string(),
            )),
        };
        match result {
            Ok(v) => {
                chunk.embedding = Some(v);
                report.embedded += 1;
            }
            Err(e) => {
                tracing::warn!(chunk_id = %chunk.id, error = %e, "chunk left without embedding");
                chunk.embedding = None;
                report.failed += 1;
            }
        }
    }
    report
}

/// Prefix prepended to `text` before embedding in the security domain.
///
/// The first matching rule wins; text with no security flavour gets no
/// prefix.
pub fn security_prefix(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    const RULES: [(&str, &str); 5] = [
        ("vulnerability", "security vulnerability: "),
        ("malware", "malware analysis: "),
        ("threat", "threat intelligence: "),
        ("attack", "attack technique: "),
        ("research", "security research: "),
    ];
    for (needle, prefix) in RULES {
        if lower.contains(needle) {
            return prefix;
        }
    }
    if ["security", "cyber", "hack", "breach"]
        .iter()
        .any(|w| lower.contains(w))
    {
        return "cybersecurity context: ";
    }
    ""
}

/// Wraps a provider so every text is embedded with its [`security_prefix`].
pub struct SecurityPrefixed<P> {
    inner: P,
}

impl<P: EmbeddingProvider> SecurityPrefixed<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for SecurityPrefixed<P> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inner
            .embed(&format!("{}{}", security_prefix(text), text))
    }
    fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", security_prefix(t), t))
            .collect();
        self.inner.embed_batch(&prefixed)
    }
}

/// Deterministic bag-of-words embedding via feature hashing.
///
/// Lower-cased alphanumeric tokens are hashed (SHA-256) into `dims`
/// buckets and the counts are L2-normalised. Needs no model download or
/// network access, so it is the default provider and the one tests use.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.dims == 0 {
            return Err(EmbeddingError::Request(
                "hashing provider configured with 0 dimensions".to_string(),
            ));
        }
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// vectors with zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkContent};

    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Request("boom".to_string()))
        }
    }

    /// Fails on any text containing "poison", echoes length otherwise.
    struct PickyProvider;

    impl EmbeddingProvider for PickyProvider {
        fn model_name(&self) -> &str {
            "picky"
        }
        fn dims(&self) -> usize {
            2
        }
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                Err(EmbeddingError::Request("refused".to_string()))
            } else {
                Ok(vec![text.len() as f32, 1.0])
            }
        }
    }

    /// Records the exact text it was asked to embed.
    struct EchoProvider(std::sync::Mutex<Vec<String>>);

    impl EmbeddingProvider for EchoProvider {
        fn model_name(&self) -> &str {
            "echo"
        }
        fn dims(&self) -> usize {
            1
        }
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(vec![1.0])
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            original_doc_id: "d".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            content: ChunkContent {
                title: String::new(),
                text: text.to_string(),
                attributes: Default::default(),
            },
            embedding: None,
            original_document_path: String::new(),
            source_type: "t".to_string(),
            source_name: "n".to_string(),
            ingested_at: chrono::Utc::now(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_embed_or_zero_empty_text() {
        let p = HashingProvider::new(16);
        assert_eq!(embed_or_zero(&p, ""), vec![0.0; 16]);
        assert_eq!(embed_or_zero(&p, "   "), vec![0.0; 16]);
    }

    #[test]
    fn test_embed_or_zero_provider_failure() {
        assert_eq!(embed_or_zero(&FailingProvider, "anything"), vec![0.0; 8]);
    }

    #[test]
    fn test_embed_or_zero_wrong_length() {
        struct Liar;
        impl EmbeddingProvider for Liar {
            fn model_name(&self) -> &str {
                "liar"
            }
            fn dims(&self) -> usize {
                4
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                Ok(vec![1.0])
            }
        }
        assert_eq!(embed_or_zero(&Liar, "text"), vec![0.0; 4]);
    }

    #[test]
    fn test_hashing_provider_deterministic_and_normalised() {
        let p = HashingProvider::new(64);
        let a = p.embed("SQL injection in login").unwrap();
        let b = p.embed("sql INJECTION in login").unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_provider_related_text_scores_higher() {
        let p = HashingProvider::new(256);
        let q = p.embed("sql injection vulnerability").unwrap();
        let related = p.embed("a sql injection flaw in the login form").unwrap();
        let unrelated = p.embed("ransomware gang leaks hospital records").unwrap();
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn test_embed_chunks_isolates_failures() {
        let mut chunks = vec![chunk("c0", "fine"), chunk("c1", "poison pill"), chunk("c2", "ok")];
        let report = embed_chunks(&PickyProvider, &mut chunks);
        assert_eq!(report, EmbedReport { embedded: 2, failed: 1 });
        assert!(chunks[0].embedding.is_some());
        assert!(chunks[1].embedding.is_none());
        assert_eq!(chunks[2].embedding.as_deref(), Some(&[2.0, 1.0][..]));
    }

    #[test]
    fn test_security_prefix_rules() {
        assert_eq!(security_prefix("A critical Vulnerability"), "security vulnerability: ");
        assert_eq!(security_prefix("new malware strain"), "malware analysis: ");
        assert_eq!(security_prefix("threat landscape"), "threat intelligence: ");
        assert_eq!(security_prefix("phishing attack"), "attack technique: ");
        assert_eq!(security_prefix("research paper"), "security research: ");
        assert_eq!(security_prefix("data breach"), "cybersecurity context: ");
        assert_eq!(security_prefix("weather report"), "");
        // vulnerability outranks malware
        assert_eq!(security_prefix("malware exploiting a vulnerability"), "security vulnerability: ");
    }

    #[test]
    fn test_security_prefixed_wraps_text_and_keeps_dims() {
        let wrapped = SecurityPrefixed::new(EchoProvider(Default::default()));
        assert_eq!(wrapped.dims(), 1);
        wrapped.embed("malware sample").unwrap();
        wrapped.embed("lunch menu").unwrap();
        let seen = wrapped.into_inner().0.into_inner().unwrap();
        assert_eq!(seen, vec!["malware analysis: malware sample", "lunch menu"]);
    }
}
