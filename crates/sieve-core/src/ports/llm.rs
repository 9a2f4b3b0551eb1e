//! LlmClassifier port - Layer3 のコラボレータ

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ErrorKind, Signal, SignalCode};
use crate::retry::classify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub url: String,
    pub content: String,
}

/// 1 ページに対するモデルの判定
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmVerdict {
    /// 適合度スコア [0, 1]
    pub score: f64,
    pub reasoning: String,
    /// モデルが検出したシグナル（スコアのブーストに使う）
    #[serde(default)]
    pub signals: Vec<String>,
    pub cost: f64,
    pub tokens: u32,
}

/// LlmError はコラボレータの失敗
///
/// - `permanent` か HTTP `status` で明示されない限り一時的エラー
/// - メッセージ文字列は一時的なコード（timeout, rate limit）の絞り込みにだけ使い、
///   恒久的エラーには昇格させない
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub message: String,
    pub status: Option<u16>,
    pub permanent: bool,
}

impl LlmError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            permanent: true,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<LlmError> for Signal {
    fn from(err: LlmError) -> Self {
        if err.permanent {
            return Signal::fatal(err.message);
        }
        match err.status {
            Some(status) => Signal::http(status, err.message),
            None => {
                let signal = Signal::from_message(err.message);
                if classify(&signal) == ErrorKind::Transient {
                    signal
                } else {
                    Signal::new(SignalCode::Unknown, signal.message)
                }
            }
        }
    }
}

#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(&self, request: &LlmRequest) -> Result<LlmVerdict, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_llm_errors_become_fatal_signals() {
        let signal: Signal = LlmError::permanent("model refused content policy").into();
        assert_eq!(signal.code, SignalCode::Fatal);
    }

    #[test]
    fn llm_errors_default_to_message_parsing() {
        let signal: Signal = LlmError::transient("upstream went away").into();
        assert_eq!(signal.code, SignalCode::Unknown);

        let signal: Signal = LlmError::transient("slow down").with_status(429).into();
        assert!(signal.is_rate_limited());

        let signal: Signal = LlmError::transient("request timed out").into();
        assert_eq!(signal.code, SignalCode::Timeout);
    }

    #[test]
    fn transient_llm_errors_stay_transient_despite_permanent_wording() {
        let signal: Signal =
            LlmError::transient("upstream proxy: invalid gateway response").into();
        assert_eq!(signal.code, SignalCode::Unknown);
        assert_eq!(classify(&signal), ErrorKind::Transient);
        assert_eq!(signal.message, "upstream proxy: invalid gateway response");
    }
}
