use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::cooldown::DEFAULT_COOLDOWN_SECONDS;

/// Page sizes the v2 timeline endpoint accepts.
const TIMELINE_PAGE_SIZE: RangeInclusive<u32> = 5..=100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP server listens on
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds between background refresh attempts, 0 disables them
    #[serde(default = "default_background_refresh_seconds")]
    pub background_refresh_seconds: u64,
    #[serde(default)]
    pub social: SocialConfig,
    pub news: NewsConfig,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_background_refresh_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SocialConfig {
    #[serde(default = "default_handle")]
    pub handle: String,
    /// Skips the username lookup when set
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_social_cooldown")]
    pub cooldown_seconds: i64,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            handle: default_handle(),
            user_id: None,
            api_base: default_api_base(),
            max_results: default_max_results(),
            max_pages: default_max_pages(),
            cooldown_seconds: default_social_cooldown(),
        }
    }
}

fn default_handle() -> String {
    "sidhant".to_string()
}

fn default_api_base() -> String {
    "https://api.twitter.com".to_string()
}

fn default_max_results() -> u32 {
    10
}

fn default_max_pages() -> u32 {
    1
}

fn default_social_cooldown() -> i64 {
    DEFAULT_COOLDOWN_SECONDS
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    pub feed_url: String,
    #[serde(default = "default_news_cooldown")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    /// Every term must appear in the title or content
    #[serde(default)]
    pub required_terms: Vec<String>,
    /// At least one keyword must appear; each hit adds to the score
    #[serde(default = "default_alert_keywords")]
    pub alert_keywords: Vec<String>,
    #[serde(default = "default_breaking_keywords")]
    pub breaking_keywords: Vec<String>,
}

fn default_news_cooldown() -> i64 {
    300
}

fn default_max_articles() -> usize {
    10
}

pub fn default_alert_keywords() -> Vec<String> {
    [
        "breaking",
        "alert",
        "urgent",
        "just in",
        "latest",
        "escalation",
        "attack",
        "conflict",
        "border",
        "violation",
        "military",
        "tension",
        "ceasefire",
        "fire",
        "incident",
        "war",
        "crisis",
        "missile",
        "casualties",
        "killed",
        "wounded",
        "skirmish",
        "troops",
        "movement",
        "deployment",
        "statement",
        "official",
        "minister",
        "prime minister",
        "president",
        "army",
        "air force",
        "navy",
        "loc",
        "line of control",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

pub fn default_breaking_keywords() -> Vec<String> {
    ["breaking", "alert", "urgent", "just in"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.social.cooldown_seconds < 0 || self.news.cooldown_seconds < 0 {
            anyhow::bail!("cooldown_seconds must not be negative");
        }
        if !TIMELINE_PAGE_SIZE.contains(&self.social.max_results) {
            anyhow::bail!(
                "social.max_results must be between {} and {}, got {}",
                TIMELINE_PAGE_SIZE.start(),
                TIMELINE_PAGE_SIZE.end(),
                self.social.max_results
            );
        }
        Ok(())
    }
}
