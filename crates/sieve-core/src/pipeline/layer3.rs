//! Layer 3: LLM sophistication judgment.
//!
//! The model's score is sanitized (non-finite -> 0, clamped to [0, 1]) and
//! boosted by the sophistication signals it reported, capped at `boost_cap`.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::config::Layer3Config;
use crate::domain::{Classification, Layer, LayerResult, Signal, clamp_score};
use crate::ports::{LlmClassifier, LlmRequest, PageContent};

/// Layer 3 result plus what the router and the counters need.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub result: LayerResult,
    pub classification: Classification,
    /// Boosted score in [0, 1].
    pub score: f64,
    pub cost: f64,
}

pub struct SophisticationJudge {
    llm: Arc<dyn LlmClassifier>,
    config: Layer3Config,
}

impl SophisticationJudge {
    pub fn new(llm: Arc<dyn LlmClassifier>, config: Layer3Config) -> Self {
        Self { llm, config }
    }

    pub async fn judge(&self, page: &PageContent) -> Result<Judgment, Signal> {
        let request = LlmRequest {
            url: page.url.clone(),
            content: page.text.chars().take(self.config.max_content_chars).collect(),
        };
        let verdict = self.llm.classify(&request).await.map_err(Signal::from)?;

        let raw = clamp_score(verdict.score);
        let boost = self.signal_boost(&verdict.signals);
        let score = clamp_score(raw + boost);
        let classification = if score >= self.config.accept_threshold {
            Classification::Accepted
        } else {
            Classification::Rejected
        };
        debug!(
            url = %page.url,
            raw_score = raw,
            boost,
            score,
            tokens = verdict.tokens,
            cost = verdict.cost,
            "layer3 verdict"
        );

        let factors = json!({
            "raw_score": raw,
            "signal_boost": boost,
            "signals": verdict.signals,
            "tokens": verdict.tokens,
            "cost": verdict.cost,
        });
        let result = match classification {
            Classification::Accepted => LayerResult::pass(Layer::Layer3, score, verdict.reasoning),
            Classification::Rejected => LayerResult::fail(Layer::Layer3, score, verdict.reasoning),
        }
        .with_factors(factors);

        Ok(Judgment {
            result,
            classification,
            score,
            cost: verdict.cost,
        })
    }

    /// High-value signals add `high_value_boost`, medium-value ones
    /// `medium_value_boost`; a signal counts once, the total is capped.
    pub fn signal_boost(&self, signals: &[String]) -> f64 {
        let total: f64 = signals
            .iter()
            .map(|s| s.to_lowercase())
            .map(|s| {
                if contains_any(&s, &self.config.high_value_signals) {
                    self.config.high_value_boost
                } else if contains_any(&s, &self.config.medium_value_signals) {
                    self.config.medium_value_boost
                } else {
                    0.0
                }
            })
            .sum();
        total.min(self.config.boost_cap)
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(&n.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{LlmError, LlmVerdict};
    use async_trait::async_trait;

    struct Fixed(Result<LlmVerdict, LlmError>);

    #[async_trait]
    impl LlmClassifier for Fixed {
        async fn classify(&self, _request: &LlmRequest) -> Result<LlmVerdict, LlmError> {
            self.0.clone()
        }
    }

    fn judge(result: Result<LlmVerdict, LlmError>) -> SophisticationJudge {
        SophisticationJudge::new(Arc::new(Fixed(result)), Layer3Config::default())
    }

    fn verdict(score: f64, signals: &[&str]) -> LlmVerdict {
        LlmVerdict {
            score,
            reasoning: "looks fine".into(),
            signals: signals.iter().map(|s| s.to_string()).collect(),
            cost: 0.002,
            tokens: 900,
        }
    }

    fn page() -> PageContent {
        PageContent::new("https://acme.io", "content")
    }

    #[tokio::test]
    async fn accepted_at_or_above_threshold() {
        let j = judge(Ok(verdict(0.67, &[]))).judge(&page()).await.unwrap();
        assert_eq!(j.classification, Classification::Accepted);
        assert!((j.score - 0.67).abs() < 1e-9);
        assert_eq!(j.cost, 0.002);
        assert!(j.result.passed);
    }

    #[tokio::test]
    async fn rejected_below_threshold() {
        let j = judge(Ok(verdict(0.2, &[]))).judge(&page()).await.unwrap();
        assert_eq!(j.classification, Classification::Rejected);
        assert!(!j.result.passed);
    }

    #[tokio::test]
    async fn signals_boost_and_cap() {
        let j = judge(Ok(verdict(0.5, &["Write for us page", "Author bylines"])))
            .judge(&page())
            .await
            .unwrap();
        assert!((j.score - 0.54).abs() < 1e-9);

        let many = ["write for us"; 10];
        let j = judge(Ok(verdict(0.95, &many))).judge(&page()).await.unwrap();
        assert_eq!(j.score, 1.0);
    }

    #[tokio::test]
    async fn non_finite_score_is_zero() {
        let j = judge(Ok(verdict(f64::NAN, &[]))).judge(&page()).await.unwrap();
        assert_eq!(j.score, 0.0);
        assert_eq!(j.classification, Classification::Rejected);
    }

    #[tokio::test]
    async fn llm_errors_become_signals() {
        let err = judge(Err(LlmError::transient("ETIMEDOUT")))
            .judge(&page())
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::domain::SignalCode::Timeout);
    }
}
