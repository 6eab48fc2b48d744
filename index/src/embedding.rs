use crate::error::IndexError;
use crate::error::Result;

/// Errors that can occur when producing embeddings.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },
    #[error("no embeddable tokens in input text")]
    EmptyInput,
    #[error("embedding provider failed: {0}")]
    Provider(String),
}

/// Provider interface for generating fixed-dimension embeddings.
///
/// Indexing and querying must go through the same provider, otherwise the
/// stored vectors and the query vector live in different spaces.
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic feature-hashing embedder that needs no model or network.
///
/// Tokens are lower-cased alphanumeric runs; CJK characters count as tokens of
/// their own. Each token lands in one bucket with a hash-derived sign and the
/// result is L2-normalized, so identical texts always score 1.0.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dim: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if self.dim == 0 {
            return Err(EmbeddingError::InvalidDimension { expected: 1, got: 0 });
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let mut v = vec![0.0f32; self.dim];
        for tok in &tokens {
            let h = fnv1a(tok.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Every token cancelled out; fall back to the unsigned histogram.
            for tok in &tokens {
                let bucket = (fnv1a(tok.as_bytes()) % self.dim as u64) as usize;
                v[bucket] = 1.0;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            v.iter_mut().for_each(|x| *x /= norm);
            return Ok(v);
        }
        v.iter_mut().for_each(|x| *x /= norm);
        Ok(v)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            out.push(c.to_string());
        } else if c.is_alphanumeric() {
            cur.extend(c.to_lowercase());
        } else if !cur.is_empty() {
            out.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// A zero-norm operand is reported as [`IndexError::ZeroNorm`] and differing
/// lengths as [`IndexError::DimensionMismatch`]; neither yields a score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(IndexError::DimensionMismatch { expected: a.len(), got: b.len() });
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Err(IndexError::ZeroNorm);
    }
    Ok((dot / (na.sqrt() * nb.sqrt())) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_orders_similarities() {
        let q = vec![1.0, 0.0, 0.0];
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.5, 0.5, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        let s_a = cosine_similarity(&q, &a).unwrap();
        let s_b = cosine_similarity(&q, &b).unwrap();
        let s_c = cosine_similarity(&q, &c).unwrap();
        assert!(s_a > s_b && s_b > s_c);
    }

    #[test]
    fn self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        let s = cosine_similarity(&v, &v).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_is_an_error() {
        let err = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::ZeroNorm));
        let err = cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::ZeroNorm));
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let p = HashingEmbeddingProvider::new(64);
        let a = p.embed("A dog runs on the beach").unwrap();
        let b = p.embed("a DOG runs on the beach!").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_prefers_shared_tokens() {
        let p = HashingEmbeddingProvider::new(256);
        let q = p.embed("red car").unwrap();
        let near = p.embed("a red car parked outside").unwrap();
        let far = p.embed("kitten sleeping indoors").unwrap();
        let s_near = cosine_similarity(&q, &near).unwrap();
        let s_far = cosine_similarity(&q, &far).unwrap();
        assert!(s_near > s_far);
    }

    #[test]
    fn hashing_embedder_splits_cjk_characters() {
        assert_eq!(tokenize("室外的車"), vec!["室", "外", "的", "車"]);
        assert_eq!(tokenize("Hello, 世界 ok"), vec!["hello", "世", "界", "ok"]);
    }

    #[test]
    fn hashing_embedder_rejects_empty_text() {
        let p = HashingEmbeddingProvider::new(8);
        assert!(matches!(p.embed("  ...  "), Err(EmbeddingError::EmptyInput)));
    }
}
