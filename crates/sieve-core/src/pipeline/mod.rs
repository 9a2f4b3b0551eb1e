//! Three-layer classification pipeline with early exit.
//!
//! Layer1 (domain rules, free) -> fetch -> Layer2 (content heuristics, cheap)
//! -> Layer3 (LLM, expensive). A failing layer ends the run; later layers and
//! the fetch are never invoked for an eliminated URL.

pub mod layer1;
pub mod layer2;
pub mod layer3;

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::EngineConfig;
use crate::domain::{Classification, Layer, LayerResult, Signal};
use crate::ports::{ContentFetcher, LlmClassifier};

pub use layer1::DomainRules;
pub use layer2::ContentRules;
pub use layer3::{Judgment, SophisticationJudge};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// A cheap layer rejected the URL. `results` ends with the failing layer.
    Eliminated {
        layer: Layer,
        results: Vec<LayerResult>,
    },
    /// All three layers ran.
    Classified {
        classification: Classification,
        score: f64,
        results: Vec<LayerResult>,
        cost: f64,
    },
}

impl PipelineOutcome {
    pub fn results(&self) -> &[LayerResult] {
        match self {
            PipelineOutcome::Eliminated { results, .. }
            | PipelineOutcome::Classified { results, .. } => results,
        }
    }
}

pub struct LayerPipeline {
    layer1: DomainRules,
    fetcher: Arc<dyn ContentFetcher>,
    layer2: ContentRules,
    layer3: SophisticationJudge,
}

impl LayerPipeline {
    pub fn new(
        config: &EngineConfig,
        fetcher: Arc<dyn ContentFetcher>,
        llm: Arc<dyn LlmClassifier>,
    ) -> Self {
        Self {
            layer1: DomainRules::new(config.layer1.clone()),
            fetcher,
            layer2: ContentRules::new(config.layer2.clone()),
            layer3: SophisticationJudge::new(llm, config.layer3.clone()),
        }
    }

    /// Run the layers in order. Errors are collaborator failures (fetch or
    /// LLM) already normalized to a `Signal`.
    pub async fn run(&self, url: &str) -> Result<PipelineOutcome, Signal> {
        let mut results = Vec::with_capacity(3);

        let started = Instant::now();
        let l1 = self.layer1.analyze(url).with_processing_time_ms(elapsed_ms(started));
        debug!(url, passed = l1.passed, reasoning = %l1.reasoning, "layer1");
        let passed = l1.passed;
        results.push(l1);
        if !passed {
            return Ok(PipelineOutcome::Eliminated {
                layer: Layer::Layer1,
                results,
            });
        }

        let page = self.fetcher.fetch(url).await?;

        let started = Instant::now();
        let l2 = self.layer2.analyze(&page).with_processing_time_ms(elapsed_ms(started));
        debug!(url, passed = l2.passed, score = l2.score, "layer2");
        let passed = l2.passed;
        results.push(l2);
        if !passed {
            return Ok(PipelineOutcome::Eliminated {
                layer: Layer::Layer2,
                results,
            });
        }

        let started = Instant::now();
        let judgment = self.layer3.judge(&page).await?;
        results.push(judgment.result.with_processing_time_ms(elapsed_ms(started)));

        Ok(PipelineOutcome::Classified {
            classification: judgment.classification,
            score: judgment.score,
            results,
            cost: judgment.cost,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
