//! Typed tuning knobs for chunking, retrieval, and context assembly.
//!
//! One struct per concern, bundled in [`RagSettings`]. The application
//! deserializes these straight out of its TOML config and calls
//! [`RagSettings::validate`] once at startup; every component then
//! receives its section by value.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingSettings {
    /// Target chunk length in tokens.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Tokens shared between consecutive chunks. Must be `< chunk_size`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    300
}
fn default_chunk_overlap() -> usize {
    50
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum fused score for a chunk to count towards sufficiency.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// How many returned chunks must reach `score_threshold`.
    #[serde(default = "default_min_sufficient_chunks")]
    pub min_sufficient_chunks: usize,
    #[serde(default = "default_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    /// Candidates fetched from each index before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Multiplier on the fused score of feedback-origin chunks. `1.0` disables
    /// provenance weighting.
    #[serde(default = "default_feedback_weight")]
    pub feedback_weight: f64,
}

fn default_top_k() -> usize {
    10
}
fn default_score_threshold() -> f64 {
    0.5
}
fn default_min_sufficient_chunks() -> usize {
    1
}
fn default_weight() -> f64 {
    0.5
}
fn default_candidate_k() -> usize {
    50
}
fn default_feedback_weight() -> f64 {
    1.0
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            min_sufficient_chunks: default_min_sufficient_chunks(),
            lexical_weight: default_weight(),
            vector_weight: default_weight(),
            candidate_k: default_candidate_k(),
            feedback_weight: default_feedback_weight(),
        }
    }
}

impl RetrievalSettings {
    /// Candidate depth per index: never fewer than `top_k`.
    pub fn candidate_depth(&self) -> usize {
        self.candidate_k.max(self.top_k)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Zero("retrieval.top_k"));
        }
        if self.min_sufficient_chunks == 0 {
            return Err(ConfigError::Zero("retrieval.min_sufficient_chunks"));
        }
        check_range("retrieval.score_threshold", self.score_threshold, 0.0, 1.0)?;
        check_range("retrieval.lexical_weight", self.lexical_weight, 0.0, 1.0)?;
        check_range("retrieval.vector_weight", self.vector_weight, 0.0, 1.0)?;
        check_range("retrieval.feedback_weight", self.feedback_weight, 0.0, 2.0)?;
        let sum = self.lexical_weight + self.vector_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Token budget for the assembled context.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_max_tokens() -> usize {
    400
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

impl ContextSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::Zero("context.max_tokens"));
        }
        Ok(())
    }
}

/// All pipeline tuning in one place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub context: ContextSettings,
}

impl RagSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.context.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RagSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chunking.chunk_size, 300);
        assert_eq!(settings.chunking.chunk_overlap, 50);
        assert_eq!(settings.retrieval.top_k, 10);
        assert_eq!(settings.context.max_tokens, 400);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let chunking = ChunkingSettings {
            chunk_size: 50,
            chunk_overlap: 50,
        };
        assert_eq!(
            chunking.validate(),
            Err(ConfigError::OverlapTooLarge {
                size: 50,
                overlap: 50
            })
        );
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let chunking = ChunkingSettings {
            chunk_size: 0,
            chunk_overlap: 0,
        };
        assert_eq!(chunking.validate(), Err(ConfigError::ZeroChunkSize));
    }

    #[test]
    fn test_zero_context_budget_rejected() {
        let settings = RagSettings {
            context: ContextSettings { max_tokens: 0 },
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::Zero("context.max_tokens"))
        );
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let retrieval = RetrievalSettings {
            lexical_weight: 0.7,
            vector_weight: 0.7,
            ..Default::default()
        };
        assert!(matches!(
            retrieval.validate(),
            Err(ConfigError::WeightSum(_))
        ));

        let retrieval = RetrievalSettings {
            lexical_weight: 0.3,
            vector_weight: 0.7,
            ..Default::default()
        };
        assert!(retrieval.validate().is_ok());
    }

    #[test]
    fn test_weight_out_of_range() {
        let retrieval = RetrievalSettings {
            lexical_weight: -0.5,
            vector_weight: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            retrieval.validate(),
            Err(ConfigError::OutOfRange {
                field: "retrieval.lexical_weight",
                ..
            })
        ));
    }

    #[test]
    fn test_candidate_depth_covers_top_k() {
        let retrieval = RetrievalSettings {
            top_k: 80,
            candidate_k: 50,
            ..Default::default()
        };
        assert_eq!(retrieval.candidate_depth(), 80);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let settings: RagSettings =
            serde_json::from_str(r#"{"retrieval": {"top_k": 3}}"#).unwrap();
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.retrieval.score_threshold, 0.5);
        assert_eq!(settings.chunking.chunk_size, 300);
    }
}
