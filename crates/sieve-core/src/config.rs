//! Engine configuration.
//!
//! Every section has defaults, so `{}` is a valid config file. Load with
//! `EngineConfig::from_json_str` / `from_file`; both call `validate()`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub routing: RoutingConfig,
    pub review: ReviewConfig,
    pub layer1: Layer1Rules,
    pub layer2: Layer2Rules,
    pub layer3: Layer3Config,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(invalid("worker.concurrency must be at least 1"));
        }
        if self.worker.lease_timeout_secs == 0 {
            return Err(invalid("worker.lease_timeout_secs must be non-zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier must be >= 1.0"));
        }
        self.routing.validate()?;
        if self.review.queue_size_limit == Some(0) {
            return Err(invalid("review.queue_size_limit must be non-zero when set"));
        }
        if self.review.notify_threshold == Some(0) {
            return Err(invalid("review.notify_threshold must be non-zero when set"));
        }
        if self.review.stale_after_hours == 0 {
            return Err(invalid("review.stale_after_hours must be non-zero"));
        }
        if self.review.auto_review_timeout_days == Some(0) {
            return Err(invalid("review.auto_review_timeout_days must be non-zero when set"));
        }
        if !in_unit_range(self.layer2.pass_threshold) {
            return Err(invalid("layer2.pass_threshold must be within [0, 1]"));
        }
        if !in_unit_range(self.layer3.accept_threshold) {
            return Err(invalid("layer3.accept_threshold must be within [0, 1]"));
        }
        if !in_unit_range(self.layer3.boost_cap) {
            return Err(invalid("layer3.boost_cap must be within [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn in_unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// How long one `pop` waits before re-checking shutdown.
    pub poll_interval_ms: u64,
    pub lease_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval_ms: 250,
            lease_timeout_secs: 300,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub rate_limit_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            rate_limit_delay_ms: 30_000,
        }
    }
}

/// What happens to scores in the low band (`low <= score < medium`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowBandPolicy {
    #[default]
    ManualReview,
    AutoReject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub low_band_policy: LowBandPolicy,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.5,
            low: 0.3,
            low_band_policy: LowBandPolicy::ManualReview,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [("high", self.high), ("medium", self.medium), ("low", self.low)] {
            if !in_unit_range(v) {
                return Err(ConfigError::Invalid(format!(
                    "routing.{name} must be within [0, 1], got {v}"
                )));
            }
        }
        if self.high <= self.medium || self.medium <= self.low {
            return Err(invalid("routing thresholds must satisfy high > medium > low"));
        }
        Ok(())
    }
}

/// Fallback when the review queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    AutoReject,
    AutoApprove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// `None` means unbounded.
    pub queue_size_limit: Option<usize>,
    pub stale_after_hours: u64,
    /// When set, the sweeper auto-approves entries older than this.
    pub auto_review_timeout_days: Option<u64>,
    /// Emit `queue_threshold_reached` when the active count reaches this.
    pub notify_threshold: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub sweep_interval_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            queue_size_limit: None,
            stale_after_hours: 72,
            auto_review_timeout_days: None,
            notify_threshold: None,
            overflow_policy: OverflowPolicy::AutoReject,
            sweep_interval_secs: 3600,
        }
    }
}

impl ReviewConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours as i64)
    }

    pub fn auto_review_after(&self) -> Option<chrono::Duration> {
        self.auto_review_timeout_days
            .map(|days| chrono::Duration::days(days as i64))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Domain rules for Layer 1. Matched against the lowercased host / URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layer1Rules {
    pub blog_platform_domains: Vec<String>,
    pub non_commercial_tlds: Vec<String>,
    pub personal_blog_tlds: Vec<String>,
    pub traditional_keywords: Vec<String>,
    /// First host label that marks a blog subdomain (`blog.example.com`).
    pub subdomain_blogs: Vec<String>,
    /// Path fragments for tag/category/user-content pages.
    pub excluded_path_patterns: Vec<String>,
    pub negative_indicators: Vec<String>,
}

impl Default for Layer1Rules {
    fn default() -> Self {
        Self {
            blog_platform_domains: strings(&[
                "medium.com",
                "substack.com",
                "wordpress.com",
                "blogspot.com",
                "tumblr.com",
                "ghost.io",
            ]),
            non_commercial_tlds: strings(&[".gov", ".edu", ".org", ".mil"]),
            personal_blog_tlds: strings(&[".me", ".blog", ".xyz"]),
            traditional_keywords: strings(&[
                "restaurant",
                "hotel",
                "dental",
                "plumbing",
                "realty",
                "lawfirm",
            ]),
            subdomain_blogs: strings(&["blog", "news"]),
            excluded_path_patterns: strings(&[
                "/tag/",
                "/category/",
                "/author/",
                "/user/",
                "/profile/",
                "/forum/",
            ]),
            negative_indicators: strings(&["/shop", "/store", "/checkout", "/cart"]),
        }
    }
}

/// Content heuristics for Layer 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layer2Rules {
    /// Pages shorter than this (in characters) fail.
    pub min_content_length: usize,
    pub publication_keywords: Vec<String>,
    pub min_publication_signals: usize,
    pub company_page_keywords: Vec<String>,
    pub required_company_pages: usize,
    /// Score needed to pass, in [0, 1].
    pub pass_threshold: f64,
}

impl Default for Layer2Rules {
    fn default() -> Self {
        Self {
            min_content_length: 200,
            publication_keywords: strings(&[
                "blog",
                "articles",
                "insights",
                "resources",
                "write for us",
                "guest post",
                "contributor",
            ]),
            min_publication_signals: 1,
            company_page_keywords: strings(&["about", "team", "contact"]),
            required_company_pages: 2,
            pass_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layer3Config {
    /// Boosted scores at or above this classify as accepted.
    pub accept_threshold: f64,
    pub high_value_signals: Vec<String>,
    pub medium_value_signals: Vec<String>,
    pub high_value_boost: f64,
    pub medium_value_boost: f64,
    pub boost_cap: f64,
    /// Characters of page text sent to the classifier.
    pub max_content_chars: usize,
}

impl Default for Layer3Config {
    fn default() -> Self {
        Self {
            accept_threshold: 0.5,
            high_value_signals: strings(&[
                "write for us",
                "guest post guidelines",
                "submission form",
                "contributor program",
            ]),
            medium_value_signals: strings(&[
                "author bylines",
                "schema markup",
                "structured data",
                "meta optimization",
            ]),
            high_value_boost: 0.03,
            medium_value_boost: 0.01,
            boost_cap: 0.1,
            max_content_chars: 8000,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
