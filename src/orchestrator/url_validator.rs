//! Post-stream URL validation and correction.
//!
//! During streaming, each non-code paragraph containing markdown links spawns a background
//! validation task (see [`spawn_validation`]); the stream consumer awaits all of them in bulk
//! after the primary stream drains and, if any broken URLs were found, drives a correction turn.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::Mutex;

fn markdown_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[[^\]]*\]\((https?://[^\s)]+)\)").unwrap())
}

const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlStatus {
    Valid,
    /// 4xx — permanent, counts toward the broken list.
    Broken,
    /// 5xx or a timeout — ignored, not reported as broken (may be transient).
    Temporary,
}

/// Extract every markdown link URL from a paragraph.
pub fn extract_urls(paragraph: &str) -> Vec<String> {
    markdown_link_pattern()
        .captures_iter(paragraph)
        .map(|c| c[1].to_string())
        .collect()
}

async fn check_url(client: &reqwest::Client, url: &str) -> UrlStatus {
    let result = tokio::time::timeout(VALIDATION_TIMEOUT, client.head(url).send()).await;
    match result {
        Ok(Ok(response)) => classify_status(response.status()),
        Ok(Err(_)) => UrlStatus::Temporary,
        Err(_) => UrlStatus::Temporary,
    }
}

fn classify_status(status: reqwest::StatusCode) -> UrlStatus {
    if status.is_client_error() {
        UrlStatus::Broken
    } else if status.is_server_error() {
        UrlStatus::Temporary
    } else {
        UrlStatus::Valid
    }
}

/// Spawn a background validation task for one paragraph's links, pushing any broken URL it
/// finds onto the shared accumulator. The caller awaits the returned handle in bulk once the
/// primary stream has drained.
pub fn spawn_validation(
    client: reqwest::Client,
    paragraph: String,
    broken_urls: Arc<Mutex<Vec<String>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let urls = extract_urls(&paragraph);
        for url in urls {
            if check_url(&client, &url).await == UrlStatus::Broken {
                broken_urls.lock().await.push(url);
            }
        }
    })
}

/// Build the correction prompt sent back through the same model once broken URLs were found.
pub fn build_correction_prompt(original_response: &str, last_user_message: &str, broken_urls: &[String]) -> String {
    format!(
        "The response you just gave contains broken links. Rewrite it, removing or fixing any \
         URL from this list: {}.\n\nOriginal user message:\n{}\n\nYour original response:\n{}",
        broken_urls.join(", "),
        last_user_message,
        original_response
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_markdown_links_from_a_paragraph() {
        let paragraph = "See [docs](https://example.com/docs) and [repo](https://example.com/repo).";
        let urls = extract_urls(paragraph);
        assert_eq!(urls, vec!["https://example.com/docs", "https://example.com/repo"]);
    }

    #[test]
    fn paragraph_with_no_links_yields_empty() {
        assert!(extract_urls("just plain text, no links here").is_empty());
    }

    #[test]
    fn client_errors_classify_as_broken_server_errors_as_temporary() {
        assert_eq!(classify_status(reqwest::StatusCode::NOT_FOUND), UrlStatus::Broken);
        assert_eq!(classify_status(reqwest::StatusCode::BAD_GATEWAY), UrlStatus::Temporary);
        assert_eq!(classify_status(reqwest::StatusCode::OK), UrlStatus::Valid);
    }

    #[test]
    fn correction_prompt_includes_every_broken_url() {
        let prompt = build_correction_prompt("resp", "msg", &["https://bad.test".to_string()]);
        assert!(prompt.contains("https://bad.test"));
    }
}
