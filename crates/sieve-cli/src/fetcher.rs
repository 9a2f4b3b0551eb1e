//! HttpFetcher - reqwest で取得して本文テキストにする
//!
//! reqwest のエラーと HTTP ステータスはここで一度だけ Signal に変換する。

use std::error::Error as _;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Node, Selector};
use sieve_core::domain::Signal;
use sieve_core::ports::{ContentFetcher, PageContent};
use tracing::debug;

const USER_AGENT: &str = concat!("sieve/", env!("CARGO_PKG_VERSION"));

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent, Signal> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| signal_from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Signal::http(
                status.as_u16(),
                format!("HTTP {status} for {url}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| signal_from_reqwest(&e))?;
        let page = extract_page(url, status.as_u16(), &body);
        debug!(url, status = status.as_u16(), chars = page.text.len(), "fetched");
        Ok(page)
    }
}

fn signal_from_reqwest(err: &reqwest::Error) -> Signal {
    // 原因チェーンまで含めないと "connection refused" などが見えない
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if err.is_timeout() {
        return Signal::timeout(message);
    }
    match err.status() {
        Some(status) => Signal::http(status.as_u16(), message),
        None => Signal::from_message(message),
    }
}

/// Title plus visible body text, whitespace collapsed.
fn extract_page(url: &str, status: u16, html: &str) -> PageContent {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut words = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        words.extend(text.split_whitespace());
    }

    let mut page = PageContent::new(url, words.join(" "));
    page.status = status;
    if let Some(title) = title {
        page = page.with_title(title);
    }
    page
}
