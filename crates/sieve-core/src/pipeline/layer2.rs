//! Layer 2: content heuristics over the fetched page.

use serde_json::json;

use crate::config::Layer2Rules;
use crate::domain::{Layer, LayerResult, clamp_score};
use crate::ports::PageContent;

pub struct ContentRules {
    rules: Layer2Rules,
}

impl ContentRules {
    pub fn new(rules: Layer2Rules) -> Self {
        Self { rules }
    }

    /// Half the score comes from publication signals, half from company
    /// pages. Passing also needs `min_publication_signals`.
    pub fn analyze(&self, page: &PageContent) -> LayerResult {
        let haystack = format!(
            "{} {}",
            page.title.as_deref().unwrap_or_default(),
            page.text
        )
        .to_lowercase();
        let length = page.text.chars().count();

        if length < self.rules.min_content_length {
            return LayerResult::fail(
                Layer::Layer2,
                0.0,
                format!(
                    "REJECT Layer 2 - Content too short ({length} < {} chars)",
                    self.rules.min_content_length
                ),
            )
            .with_factors(json!({ "content_length": length }));
        }

        let publication: Vec<&str> = matching(&self.rules.publication_keywords, &haystack);
        let company: Vec<&str> = matching(&self.rules.company_page_keywords, &haystack);

        let score = clamp_score(
            0.5 * ratio(publication.len(), self.rules.min_publication_signals)
                + 0.5 * ratio(company.len(), self.rules.required_company_pages),
        );
        let passed = publication.len() >= self.rules.min_publication_signals
            && score >= self.rules.pass_threshold;

        let factors = json!({
            "content_length": length,
            "publication_signals": publication,
            "company_pages": company,
        });

        if passed {
            LayerResult::pass(
                Layer::Layer2,
                score,
                format!(
                    "PASS Layer 2 - {} publication signals, {} company pages",
                    publication.len(),
                    company.len()
                ),
            )
            .with_factors(factors)
        } else {
            LayerResult::fail(
                Layer::Layer2,
                score,
                format!(
                    "REJECT Layer 2 - Insufficient publication signals ({} found, score {score:.2})",
                    publication.len()
                ),
            )
            .with_factors(factors)
        }
    }
}

fn matching<'a>(keywords: &'a [String], haystack: &str) -> Vec<&'a str> {
    keywords
        .iter()
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .map(String::as_str)
        .collect()
}

fn ratio(found: usize, required: usize) -> f64 {
    if required == 0 {
        return 1.0;
    }
    (found as f64 / required as f64).min(1.0)
}
