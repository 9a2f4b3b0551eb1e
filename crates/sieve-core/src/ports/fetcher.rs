//! ContentFetcher port - Layer2 / Layer3 が見るページを取得する

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Signal;

/// 取得済みページ（本文テキストに変換済み）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub text: String,
}

impl PageContent {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            title: None,
            text: text.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// 実装は自分の transport エラーを `Signal` に変換して返す
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageContent, Signal>;
}
