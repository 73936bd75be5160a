use crate::error::ModelError;

const DEFAULT: usize = 1024;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    #[default]
    Mean,
    Cls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// A loaded text-embedding model: text in, fixed-length vector out.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>, ModelError>;
}

/// Hashed character trigram model; each trigram window acts as one token.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub name: String,
    pub dimensions: usize,
}

impl CharacterNgramEmbedder {
    pub fn new(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new("character-ngram", DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl EmbeddingModel for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>, ModelError> {
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.len() < 3 {
            return Err(ModelError::Inference(format!(
                "input of {} characters is too short to embed",
                chars.len()
            )));
        }

        let mut vector = vec![0f32; self.dimensions];
        let windows = match options.pooling {
            Pooling::Mean => chars.windows(3).collect::<Vec<_>>(),
            Pooling::Cls => chars.windows(3).take(1).collect::<Vec<_>>(),
        };

        for window in &windows {
            let mut hash = 1469598103934665603u64;
            for ch in window.iter() {
                hash ^= *ch as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let token_count = windows.len() as f32;
        for value in &mut vector {
            *value /= token_count;
        }

        if options.normalize {
            let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for value in &mut vector {
                    *value /= magnitude;
                }
            }
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow", EmbedOptions::default())?;
        let second = embedder.embed("Hydraulic pressure and flow", EmbedOptions::default())?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn embedder_outputs_expected_length() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::new("tiny", 32);
        let vector = embedder.embed("abc", EmbedOptions::default())?;
        assert_eq!(vector.len(), 32);
        Ok(())
    }

    #[test]
    fn normalized_vectors_have_unit_length() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::new("tiny", 64);
        let vector = embedder.embed("the quick brown fox", EmbedOptions::default())?;
        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn mean_pooling_without_normalization_sums_to_one() -> Result<(), ModelError> {
        let embedder = CharacterNgramEmbedder::new("tiny", 64);
        let options = EmbedOptions {
            pooling: Pooling::Mean,
            normalize: false,
        };
        let vector = embedder.embed("pooling check", options)?;
        let total = vector.iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn too_short_input_fails() {
        let embedder = CharacterNgramEmbedder::new("tiny", 8);
        assert!(embedder.embed("ab", EmbedOptions::default()).is_err());
    }
}
