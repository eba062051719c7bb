use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NewsConfig;
use crate::coordinator::{Upstream, UpstreamError};

const DEFAULT_SOURCE: &str = "Google News";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub source: String,
    pub content: Option<String>,
    pub score: i32,
    pub is_breaking: bool,
}

/// Keyword rules used to filter and rank feed entries.
#[derive(Debug, Clone)]
pub struct Relevance {
    required_terms: Vec<String>,
    alert_keywords: Vec<String>,
    breaking_keywords: Vec<String>,
}

impl Relevance {
    pub fn new(required: &[String], alerts: &[String], breaking: &[String]) -> Self {
        let lower = |words: &[String]| -> Vec<String> { words.iter().map(|w| w.to_lowercase()).collect() };
        Self {
            required_terms: lower(required),
            alert_keywords: lower(alerts),
            breaking_keywords: lower(breaking),
        }
    }

    pub fn from_config(config: &NewsConfig) -> Self {
        Self::new(
            &config.required_terms,
            &config.alert_keywords,
            &config.breaking_keywords,
        )
    }

    pub fn is_relevant(&self, title: &str, content: &str) -> bool {
        let title = title.to_lowercase();
        let content = content.to_lowercase();
        let mentions = |word: &String| title.contains(word.as_str()) || content.contains(word.as_str());

        // an empty alert list admits every entry that has the required terms
        self.required_terms.iter().all(mentions)
            && (self.alert_keywords.is_empty() || self.alert_keywords.iter().any(mentions))
    }

    pub fn is_breaking(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.breaking_keywords.iter().any(|k| title.contains(k.as_str()))
    }

    /// Keyword hits (title weighs double), a breaking bonus, and a recency bonus.
    pub fn score(
        &self,
        title: &str,
        content: &str,
        published: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> i32 {
        let lower_title = title.to_lowercase();
        let lower_content = content.to_lowercase();

        let mut score = 0;
        for keyword in &self.alert_keywords {
            if lower_title.contains(keyword.as_str()) {
                score += 2;
            }
            if lower_content.contains(keyword.as_str()) {
                score += 1;
            }
        }

        if self.is_breaking(title) {
            score += 5;
        }

        let age_hours = (now - published.unwrap_or(now)).num_minutes() as f64 / 60.0;
        if age_hours < 6.0 {
            score += 3;
        } else if age_hours < 24.0 {
            score += 2;
        } else if age_hours < 48.0 {
            score += 1;
        }

        score
    }

    pub fn rank(&self, entries: Vec<FeedEntry>, now: DateTime<Utc>, limit: usize) -> Vec<NewsArticle> {
        let mut articles: Vec<NewsArticle> = entries
            .into_iter()
            .filter(|e| self.is_relevant(&e.title, e.content.as_deref().unwrap_or("")))
            .map(|e| {
                let content = e.content.as_deref().unwrap_or("");
                NewsArticle {
                    score: self.score(&e.title, content, e.published, now),
                    is_breaking: self.is_breaking(&e.title),
                    source: source_from_title(&e.title),
                    title: e.title,
                    link: e.link,
                    published: e.published,
                    content: e.content,
                }
            })
            .collect();

        articles.sort_by_key(|a| (Reverse(a.score), Reverse(a.published.map_or(0, |p| p.timestamp()))));
        articles.truncate(limit);
        articles
    }
}

/// Plain-text view of a feed entry before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub content: Option<String>,
}

/// Google News titles end with " - Publisher".
pub fn source_from_title(title: &str) -> String {
    match title.rsplit_once(" - ") {
        Some((_, source)) if !source.trim().is_empty() => source.trim().to_string(),
        _ => DEFAULT_SOURCE.to_string(),
    }
}

/// Text content of an HTML fragment with entities decoded and whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn parse_entries(bytes: &[u8]) -> Result<Vec<FeedEntry>, UpstreamError> {
    let feed = parser::parse(bytes).map_err(|e| UpstreamError::Parse(e.to_string()))?;

    let mut entries = Vec::new();
    for entry in feed.entries {
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();

        if title.is_empty() || link.is_empty() {
            warn!("Skipping feed entry without title or link: {}", entry.id);
            continue;
        }

        let content = entry
            .summary
            .as_ref()
            .map(|s| strip_html(&s.content))
            .filter(|s| !s.is_empty());

        entries.push(FeedEntry {
            title,
            link,
            published: entry.published.or(entry.updated),
            content,
        });
    }

    Ok(entries)
}

pub struct NewsClient {
    client: Client,
    feed_url: String,
    relevance: Relevance,
    max_articles: usize,
}

impl NewsClient {
    pub fn new(config: &NewsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Newsdesk/1.0 (RSS Reader)")
            .build()?;

        Ok(Self {
            client,
            feed_url: config.feed_url.clone(),
            relevance: Relevance::from_config(config),
            max_articles: config.max_articles,
        })
    }

    pub async fn fetch_articles(&self) -> Result<Vec<NewsArticle>, UpstreamError> {
        info!("Fetching news feed: {}", self.feed_url);

        let response = self.client.get(&self.feed_url).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited { reset_at: None });
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        let entries = parse_entries(&bytes)?;
        let total = entries.len();
        let articles = self.relevance.rank(entries, Utc::now(), self.max_articles);

        info!("Kept {} of {} feed entries", articles.len(), total);
        Ok(articles)
    }
}

impl Upstream for NewsClient {
    type Item = NewsArticle;

    async fn fetch(&self) -> Result<Vec<NewsArticle>, UpstreamError> {
        self.fetch_articles().await
    }
}
