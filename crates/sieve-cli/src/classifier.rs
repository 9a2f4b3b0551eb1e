//! Layer3 の LLM コラボレータ
//!
//! - `OpenAiClassifier`: chat completions (JSON mode) を reqwest で直接叩く
//! - `HeuristicClassifier`: API キーがないとき用。キーワードだけで採点する

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sieve_core::config::Layer3Config;
use sieve_core::ports::{LlmClassifier, LlmError, LlmRequest, LlmVerdict};
use tracing::debug;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
// USD per 1K tokens
const INPUT_PRICE_PER_1K: f64 = 0.0005;
const OUTPUT_PRICE_PER_1K: f64 = 0.002;

const SYSTEM_PROMPT: &str = "You review company websites and judge whether they publish \
contributed articles from outside authors. Answer with JSON only.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// The JSON object the model is asked to return.
#[derive(Debug, Deserialize)]
struct Assessment {
    score: f64,
    reasoning: String,
    #[serde(default)]
    signals: Vec<String>,
}

pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create OpenAI HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    fn prompt(request: &LlmRequest) -> String {
        format!(
            "Website URL: {url}\n\n\
             Website content:\n{content}\n\n\
             Look for: write-for-us or guest post guidelines, contributor programs, \
             submission forms, author bylines from outside writers, editorial teams.\n\n\
             Respond with a JSON object: \
             {{\"score\": number between 0 and 1, \"reasoning\": string, \
             \"signals\": array of short signal names you found}}",
            url = request.url,
            content = request.content,
        )
    }
}

#[async_trait]
impl LlmClassifier for OpenAiClassifier {
    async fn classify(&self, request: &LlmRequest) -> Result<LlmVerdict, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::prompt(request),
                },
            ],
            temperature: 0.3,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = LlmError::transient(format!("OpenAI request failed: {e}"));
                match e.status() {
                    Some(status) => err.with_status(status.as_u16()),
                    None => err,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(
                LlmError::transient(format!("OpenAI returned {status}: {detail}"))
                    .with_status(status.as_u16()),
            );
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::permanent(format!("invalid OpenAI response: {e}")))?;
        let text = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| LlmError::transient("empty response from OpenAI"))?;
        let assessment = parse_assessment(text)?;

        let usage = chat.usage.unwrap_or_default();
        let cost = (f64::from(usage.prompt_tokens) * INPUT_PRICE_PER_1K
            + f64::from(usage.completion_tokens) * OUTPUT_PRICE_PER_1K)
            / 1000.0;
        debug!(
            url = %request.url,
            score = assessment.score,
            tokens = usage.prompt_tokens + usage.completion_tokens,
            cost,
            "openai verdict"
        );

        Ok(LlmVerdict {
            score: assessment.score,
            reasoning: assessment.reasoning,
            signals: assessment.signals,
            cost,
            tokens: usage.prompt_tokens + usage.completion_tokens,
        })
    }
}

/// Accepts a bare JSON object or one wrapped in a markdown code fence.
fn parse_assessment(text: &str) -> Result<Assessment, LlmError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    let assessment: Assessment = serde_json::from_str(unfenced)
        .map_err(|e| LlmError::permanent(format!("invalid classification JSON: {e}")))?;
    if assessment.reasoning.trim().is_empty() {
        return Err(LlmError::permanent(
            "invalid classification JSON: empty reasoning",
        ));
    }
    Ok(assessment)
}

/// Keyword scorer over the same signal lists Layer3 boosts on.
pub struct HeuristicClassifier {
    high_value: Vec<String>,
    medium_value: Vec<String>,
}

impl HeuristicClassifier {
    pub fn new(config: &Layer3Config) -> Self {
        Self {
            high_value: config.high_value_signals.clone(),
            medium_value: config.medium_value_signals.clone(),
        }
    }
}

#[async_trait]
impl LlmClassifier for HeuristicClassifier {
    async fn classify(&self, request: &LlmRequest) -> Result<LlmVerdict, LlmError> {
        let haystack = request.content.to_lowercase();
        let found = |list: &[String]| -> Vec<String> {
            list.iter()
                .filter(|s| haystack.contains(&s.to_lowercase()))
                .cloned()
                .collect()
        };
        let high = found(&self.high_value);
        let medium = found(&self.medium_value);

        let score = (0.4 + 0.15 * high.len() as f64 + 0.05 * medium.len() as f64).min(1.0);
        let reasoning = format!(
            "keyword heuristic: {} high-value and {} medium-value signals",
            high.len(),
            medium.len()
        );
        Ok(LlmVerdict {
            score,
            reasoning,
            signals: high.into_iter().chain(medium).collect(),
            cost: 0.0,
            tokens: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"score\": 0.7, \"reasoning\": \"has guidelines\", \"signals\": [\"write for us\"]}\n```";
        let a = parse_assessment(text).unwrap();
        assert_eq!(a.score, 0.7);
        assert_eq!(a.signals, vec!["write for us".to_string()]);
    }

    #[test]
    fn malformed_json_is_permanent() {
        let err = parse_assessment("not json").unwrap_err();
        assert!(err.permanent);
    }

    #[test]
    fn empty_reasoning_is_rejected() {
        let err = parse_assessment(r#"{"score": 0.5, "reasoning": " "}"#).unwrap_err();
        assert!(err.permanent);
    }

    #[tokio::test]
    async fn heuristic_scores_signals() {
        let classifier = HeuristicClassifier::new(&Layer3Config::default());
        let verdict = classifier
            .classify(&LlmRequest {
                url: "https://acme.io".into(),
                content: "Write for us! Read our guest post guidelines.".into(),
            })
            .await
            .unwrap();
        assert_eq!(verdict.signals.len(), 2);
        assert!((verdict.score - 0.7).abs() < 1e-9);
        assert_eq!(verdict.cost, 0.0);
    }
}
