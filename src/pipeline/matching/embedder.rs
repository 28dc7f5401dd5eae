use std::path::PathBuf;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::normalize::normalize;
use crate::models::MedicalTest;

/// Standard embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Encoder id of the sentence-transformers model the catalog exports use.
pub const MINILM_MODEL_ID: &str = "all-MiniLM-L6-v2";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Embedding model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Embedding model initialization: {0}")]
    ModelInit(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Embedding generation failed: {0}")]
    Encoding(String),

    #[error("Nothing to encode")]
    EmptyInput,
}

/// Maps normalized text into the vector space of the synonym embeddings.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector.
pub trait EmbeddingEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError>;

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncoderError> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    fn dimension(&self) -> usize;

    /// Stable name of the vector space. Catalog vectors are only comparable
    /// with fragments encoded by an encoder reporting the same id.
    fn model_id(&self) -> &str;
}

/// Embed every synonym of `tests` with `encoder` and label the vectors.
pub fn embed_catalog(
    encoder: &dyn EmbeddingEncoder,
    tests: Vec<MedicalTest>,
) -> Result<Vec<MedicalTest>, EncoderError> {
    tests
        .into_iter()
        .map(|test| {
            let normalized: Vec<String> = test.synonyms.iter().map(|s| normalize(s)).collect();
            let texts: Vec<&str> = normalized.iter().map(String::as_str).collect();
            let embeddings = encoder.encode_batch(&texts)?;
            Ok(test.with_embeddings(embeddings).embedded_by(encoder.model_id()))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// ONNX Encoder — behind `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{l2_normalize, EmbeddingEncoder, EncoderError, EMBEDDING_DIM, MINILM_MODEL_ID};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// all-MiniLM-L6-v2 inference through ONNX Runtime.
    ///
    /// `model_dir` must contain `model.onnx` and `tokenizer.json`. The session
    /// sits behind a Mutex because `Session::run` takes `&mut self`.
    pub struct OnnxEncoder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEncoder {
        pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            if !model_path.exists() {
                return Err(EncoderError::ModelNotFound(model_path));
            }
            if !tokenizer_path.exists() {
                return Err(EncoderError::ModelNotFound(tokenizer_path));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| EncoderError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| EncoderError::ModelInit(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| EncoderError::ModelInit(format!("ONNX load failed: {e}")))?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| EncoderError::ModelInit(format!("Tokenizer load failed: {e}")))?;

            tracing::info!(model_dir = %model_dir.display(), "ONNX encoder loaded");

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        fn infer(&self, text: &str) -> Result<Vec<f32>, EncoderError> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| EncoderError::Tokenization(e.to_string()))?;

            let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let attention_mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect();
            let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

            let seq_len = input_ids.len();
            let to_array = |values: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), values)
                    .map_err(|e| EncoderError::Encoding(e.to_string()))
            };
            let ids_array = to_array(input_ids)?;
            let mask_array = to_array(attention_mask.clone())?;
            let type_array = to_array(token_type_ids)?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| EncoderError::Encoding(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| EncoderError::Encoding(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| EncoderError::Encoding(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EncoderError::Encoding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| EncoderError::Encoding(format!("ONNX inference failed: {e}")))?;

            let (shape, output_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EncoderError::Encoding(format!("Output extraction: {e}")))?;

            if shape.len() != 3 || shape[2] as usize != EMBEDDING_DIM {
                return Err(EncoderError::Encoding(format!(
                    "Unexpected output shape: {shape:?}, expected [1, {seq_len}, {EMBEDDING_DIM}]"
                )));
            }

            // Mean pooling over attended tokens
            let mut pooled = vec![0.0f32; EMBEDDING_DIM];
            let mut mask_sum = 0.0f32;
            for (token_idx, &mask) in attention_mask.iter().enumerate().take(seq_len) {
                let mask = mask as f32;
                mask_sum += mask;
                let offset = token_idx * EMBEDDING_DIM;
                for (dim_idx, p) in pooled.iter_mut().enumerate() {
                    *p += output_data[offset + dim_idx] * mask;
                }
            }
            if mask_sum > 0.0 {
                for val in &mut pooled {
                    *val /= mask_sum;
                }
            }

            l2_normalize(&mut pooled);
            Ok(pooled)
        }
    }

    impl EmbeddingEncoder for OnnxEncoder {
        fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError> {
            if text.trim().is_empty() {
                return Err(EncoderError::EmptyInput);
            }
            self.infer(text)
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn model_id(&self) -> &str {
            MINILM_MODEL_ID
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEncoder;

/// Offline encoder based on token feature hashing.
///
/// Each whitespace token is hashed with SHA-256; the digest picks a slot and a
/// sign. Similar wording gives similar vectors, which is enough for catalogs
/// whose synonyms were embedded with the same encoder (see [`embed_catalog`]).
pub struct HashingEncoder {
    dimension: usize,
    model_id: String,
}

impl HashingEncoder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("sha256-hashing-{dimension}"),
        }
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingEncoder for HashingEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError> {
        let mut vec = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;

        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let slot = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]) % self.dimension as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[slot as usize] += sign;
            tokens += 1;
        }

        if tokens == 0 {
            return Err(EncoderError::EmptyInput);
        }

        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vec.iter_mut() {
            *val /= norm;
        }
    }
}
