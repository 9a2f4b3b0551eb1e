//! Layer 1: domain rules. Pure, no network.
//!
//! Checks run in order: blog platform host, TLD class, traditional-business
//! host keywords, blog subdomain, excluded path patterns, negative profile
//! indicators. The first failing check eliminates the URL.
//! An unparseable URL or one without a host passes (fail-open) so a later
//! layer, or the fetcher, gets to decide.

use serde_json::json;
use url::Url;

use crate::config::Layer1Rules;
use crate::domain::{Layer, LayerResult};

pub struct DomainRules {
    rules: Layer1Rules,
}

impl DomainRules {
    pub fn new(rules: Layer1Rules) -> Self {
        Self { rules }
    }

    pub fn analyze(&self, url: &str) -> LayerResult {
        let parsed = match Url::parse(url.trim()) {
            Ok(u) => u,
            Err(e) => {
                return LayerResult::pass(
                    Layer::Layer1,
                    1.0,
                    "PASS Layer 1 - Invalid URL format, passing to next layer",
                )
                .with_factors(json!({ "parse_error": e.to_string() }));
            }
        };
        let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) else {
            return LayerResult::pass(
                Layer::Layer1,
                1.0,
                "PASS Layer 1 - URL has no host, passing to next layer",
            );
        };
        let tld = host
            .rsplit('.')
            .next()
            .map(|last| format!(".{last}"))
            .unwrap_or_default();
        let path = parsed.path().to_lowercase();
        let factors = json!({ "host": host, "tld": tld });

        if let Some(domain) = self
            .rules
            .blog_platform_domains
            .iter()
            .find(|d| host == **d || host.ends_with(&format!(".{d}")))
        {
            return reject(format!("Blog platform domain ({domain})"), factors, "blog_platform");
        }
        if self.rules.non_commercial_tlds.iter().any(|t| tld == *t) {
            return reject(format!("Non-commercial TLD ({tld})"), factors, "non_commercial_tld");
        }
        if self.rules.personal_blog_tlds.iter().any(|t| tld == *t) {
            return reject(format!("Personal blog TLD ({tld})"), factors, "personal_blog_tld");
        }
        if let Some(keyword) = self
            .rules
            .traditional_keywords
            .iter()
            .find(|k| host.contains(k.as_str()))
        {
            return reject(
                format!("Traditional business domain ({keyword})"),
                factors,
                "traditional_business",
            );
        }
        let first_label = host.split('.').next().unwrap_or_default();
        if host.contains('.') && self.rules.subdomain_blogs.iter().any(|s| s.as_str() == first_label) {
            return reject("Subdomain blog detected".to_string(), factors, "subdomain_blog");
        }
        if let Some(pattern) = self
            .rules
            .excluded_path_patterns
            .iter()
            .find(|p| path.contains(p.as_str()))
        {
            return reject(
                format!("Excluded page pattern ({pattern})"),
                factors,
                "excluded_pattern",
            );
        }
        if self
            .rules
            .negative_indicators
            .iter()
            .any(|i| path.contains(i.as_str()))
        {
            return reject(
                "Negative profile indicators detected".to_string(),
                factors,
                "negative_profile",
            );
        }

        LayerResult::pass(
            Layer::Layer1,
            1.0,
            "PASS Layer 1 - Proceeding to homepage scraping",
        )
        .with_factors(factors)
    }
}

fn reject(reason: String, mut factors: serde_json::Value, check: &str) -> LayerResult {
    factors["failed_check"] = json!(check);
    LayerResult::fail(Layer::Layer1, 0.0, format!("REJECT Layer 1 - {reason}")).with_factors(factors)
}
