//! Layer results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three fixed classification stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Domain / registrar signals. No network access.
    Layer1,
    /// Publication / content heuristics over the fetched page.
    Layer2,
    /// LLM sophistication judgment.
    Layer3,
}

impl Layer {
    pub fn elimination_reason(self) -> &'static str {
        match self {
            Layer::Layer1 => "eliminated_at_layer1",
            Layer::Layer2 => "eliminated_at_layer2",
            Layer::Layer3 => "eliminated_at_layer3",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Layer::Layer1 => "layer1",
            Layer::Layer2 => "layer2",
            Layer::Layer3 => "layer3",
        };
        f.write_str(s)
    }
}

/// Output of one stage for one task. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: Layer,
    /// In [0, 1].
    pub score: f64,
    pub passed: bool,
    /// Free-form per-layer factors.
    pub factors: serde_json::Value,
    pub reasoning: String,
    pub processing_time_ms: u64,
}

impl LayerResult {
    pub fn pass(layer: Layer, score: f64, reasoning: impl Into<String>) -> Self {
        Self::new(layer, score, true, reasoning)
    }

    pub fn fail(layer: Layer, score: f64, reasoning: impl Into<String>) -> Self {
        Self::new(layer, score, false, reasoning)
    }

    fn new(layer: Layer, score: f64, passed: bool, reasoning: impl Into<String>) -> Self {
        Self {
            layer,
            score: clamp_score(score),
            passed,
            factors: serde_json::Value::Null,
            reasoning: reasoning.into(),
            processing_time_ms: 0,
        }
    }

    pub fn with_factors(mut self, factors: serde_json::Value) -> Self {
        self.factors = factors;
        self
    }

    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }
}

/// Final Layer3 classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Accepted,
    Rejected,
}

/// Non-finite scores become 0; everything else is clamped into [0, 1].
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
