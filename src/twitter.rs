use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::SocialConfig;
use crate::coordinator::{Upstream, UpstreamError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

#[derive(Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct TimelinePage {
    #[serde(default)]
    data: Vec<Tweet>,
    meta: Option<TimelineMeta>,
}

#[derive(Deserialize)]
struct TimelineMeta {
    next_token: Option<String>,
}

/// Client for the v2 timeline of a single account.
pub struct TwitterClient {
    client: Client,
    api_base: String,
    bearer_token: Option<String>,
    handle: String,
    user_id: OnceCell<String>,
    max_results: u32,
    max_pages: u32,
}

impl TwitterClient {
    pub fn new(config: &SocialConfig, bearer_token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Newsdesk/1.0 (Dashboard)")
            .build()?;

        let user_id = OnceCell::new_with(config.user_id.clone());

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
            handle: config.handle.clone(),
            user_id,
            max_results: config.max_results,
            max_pages: config.max_pages.max(1),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.bearer_token.is_some()
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub async fn fetch_tweets(&self) -> Result<Vec<Tweet>, UpstreamError> {
        let user_id = self
            .user_id
            .get_or_try_init(|| self.lookup_user_id())
            .await?
            .clone();

        let url = format!("{}/2/users/{}/tweets", self.api_base, user_id);
        let mut tweets = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0..self.max_pages {
            let mut query = vec![
                ("max_results", self.max_results.to_string()),
                ("tweet.fields", "created_at,public_metrics".to_string()),
            ];
            if let Some(token) = &next_token {
                query.push(("pagination_token", token.clone()));
            }

            let timeline: TimelinePage = self.get_json(&url, &query).await?;
            debug!("Timeline page {} returned {} tweets", page + 1, timeline.data.len());
            tweets.extend(timeline.data);

            next_token = timeline.meta.and_then(|m| m.next_token);
            if next_token.is_none() {
                break;
            }
        }

        for tweet in &mut tweets {
            tweet.author = Some(self.handle.clone());
        }

        Ok(tweets)
    }

    async fn lookup_user_id(&self) -> Result<String, UpstreamError> {
        let url = format!("{}/2/users/by/username/{}", self.api_base, self.handle);
        let lookup: UserLookup = self.get_json(&url, &[]).await?;
        let user = lookup
            .data
            .ok_or_else(|| UpstreamError::Parse(format!("user '{}' not found", self.handle)))?;
        info!("Resolved @{} to user id {}", self.handle, user.id);
        Ok(user.id)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let token = self.bearer_token.as_deref().ok_or_else(|| {
            UpstreamError::Unconfigured("TWITTER_BEARER_TOKEN is not set".to_string())
        })?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_at = response
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            return Err(UpstreamError::RateLimited { reset_at });
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}

impl Upstream for TwitterClient {
    type Item = Tweet;

    async fn fetch(&self) -> Result<Vec<Tweet>, UpstreamError> {
        self.fetch_tweets().await
    }
}
