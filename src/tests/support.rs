//! Deterministic embedders for tests. No model download.

use crate::semantic::{Embedder, EmbeddingError};

/// Bag-of-words embedder over a fixed vocabulary.
///
/// Component `i` counts occurrences of `vocabulary[i]`; other words are ignored.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if let Some(position) = self.vocabulary.iter().position(|w| *w == token) {
                vector[position] += 1.0;
            }
        }
        vector
    }
}

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Return vectors of this length instead of the advertised one
    WrongDimension(usize),
    /// Fail every call
    Error,
    /// Return one vector fewer than asked for
    DropLast,
    /// Return NaN components
    NotANumber,
}

/// Embedder that advertises `dimensions` and misbehaves as configured.
pub struct FaultyEmbedder {
    dimensions: usize,
    fault: Fault,
}

impl FaultyEmbedder {
    pub fn new(dimensions: usize, fault: Fault) -> Self {
        Self { dimensions, fault }
    }
}

impl Embedder for FaultyEmbedder {
    fn name(&self) -> &str {
        "faulty-test"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self.fault {
            Fault::WrongDimension(len) => Ok(texts.iter().map(|_| vec![0.5; len]).collect()),
            Fault::Error => Err(EmbeddingError::EmbeddingFailed(
                "model unavailable".to_string(),
            )),
            Fault::DropLast => {
                let mut vectors: Vec<Vec<f32>> =
                    texts.iter().map(|_| vec![0.5; self.dimensions]).collect();
                vectors.pop();
                Ok(vectors)
            }
            Fault::NotANumber => Ok(texts.iter().map(|_| vec![f32::NAN; self.dimensions]).collect()),
        }
    }
}
