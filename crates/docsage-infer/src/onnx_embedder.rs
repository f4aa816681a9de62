//! ONNX sentence-embedding backend (bge / MiniLM style models).
//!
//! Expects `model.onnx` and `tokenizer.json` in one directory. Token
//! embeddings are mean-pooled over the attention mask and L2-normalized.
//! Requires the `onnx` feature.

#[cfg(feature = "onnx")]
mod inner {
    use std::path::Path;

    use docsage_core::{Error, Result};
    use ndarray::Array1;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tokenizers::Tokenizer;
    use tracing::info;

    use crate::embedder::{EmbedderBackend, EmbeddingResult};

    const MAX_SEQ_LEN: usize = 512;

    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        dimension: usize,
    }

    fn infer_err(context: &str, e: impl std::fmt::Display) -> Error {
        Error::Inference(format!("{context}: {e}"))
    }

    impl OnnxEmbedder {
        /// Load the model, then probe it once to learn its output dimension.
        pub fn load(model_dir: &Path) -> Result<Self> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");
            if !model_path.is_file() {
                return Err(Error::NotFound(model_path.display().to_string()));
            }
            if !tokenizer_path.is_file() {
                return Err(Error::NotFound(tokenizer_path.display().to_string()));
            }

            // load-dynamic: ORT_DYLIB_PATH must point at libonnxruntime.
            ort::init().commit();

            let session = Session::builder()
                .map_err(|e| infer_err("session builder", e))?
                .with_intra_threads(2)
                .map_err(|e| infer_err("intra threads", e))?
                .commit_from_file(&model_path)
                .map_err(|e| infer_err("load model", e))?;
            let tokenizer =
                Tokenizer::from_file(&tokenizer_path).map_err(|e| infer_err("load tokenizer", e))?;

            let mut embedder = Self {
                session: Mutex::new(session),
                tokenizer,
                dimension: 0,
            };
            embedder.dimension = embedder.infer("dimension probe")?.len();
            info!(
                "ONNX embedder loaded: dim={}, model={}",
                embedder.dimension,
                model_path.display()
            );
            Ok(embedder)
        }

        fn infer(&self, text: &str) -> Result<Array1<f32>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| infer_err("tokenize", e))?;
            let seq_len = encoding.get_ids().len().min(MAX_SEQ_LEN);
            if seq_len == 0 {
                return Err(Error::MalformedInput("no tokens".into()));
            }
            let ids: Vec<i64> = encoding.get_ids()[..seq_len].iter().map(|&x| x as i64).collect();
            let mask: Vec<i64> = encoding.get_attention_mask()[..seq_len]
                .iter()
                .map(|&x| x as i64)
                .collect();
            let type_ids = vec![0i64; seq_len];

            let ids_tensor = Tensor::from_array(([1usize, seq_len], ids))
                .map_err(|e| infer_err("ids tensor", e))?;
            let mask_tensor = Tensor::from_array(([1usize, seq_len], mask.clone()))
                .map_err(|e| infer_err("mask tensor", e))?;
            let type_tensor = Tensor::from_array(([1usize, seq_len], type_ids))
                .map_err(|e| infer_err("type tensor", e))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| infer_err("run", e))?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| infer_err("extract output", e))?;
            let dims: Vec<i64> = shape.iter().copied().collect();

            let mut pooled = match dims.as_slice() {
                [1, _, dim] => {
                    let dim = *dim as usize;
                    let mut acc = Array1::<f32>::zeros(dim);
                    let mut weight = 0.0f32;
                    for (token, &m) in mask.iter().enumerate() {
                        if m == 0 {
                            continue;
                        }
                        weight += 1.0;
                        let row = &data[token * dim..(token + 1) * dim];
                        for (a, &x) in acc.iter_mut().zip(row) {
                            *a += x;
                        }
                    }
                    if weight == 0.0 {
                        return Err(Error::MalformedInput("empty attention mask".into()));
                    }
                    acc / weight
                }
                [1, dim] => Array1::from_vec(data[..*dim as usize].to_vec()),
                other => return Err(Error::Inference(format!("unexpected output shape {other:?}"))),
            };

            let norm = pooled.dot(&pooled).sqrt();
            if norm > 1e-12 {
                pooled /= norm;
            }
            Ok(pooled)
        }
    }

    impl EmbedderBackend for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<EmbeddingResult> {
            Ok(EmbeddingResult {
                embedding: self.infer(text)?,
                cached: false,
            })
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "onnx"
        }
    }
}

#[cfg(feature = "onnx")]
pub use inner::OnnxEmbedder;
