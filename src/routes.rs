use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cooldown::RefreshStatus;
use crate::coordinator::{Coordinator, RefreshOutcome};
use crate::mirror::format_countdown;
use crate::news::{NewsArticle, NewsClient};
use crate::twitter::{Tweet, TwitterClient};

/// Tweets shown before the "show more" fold.
const LATEST_TWEETS: usize = 3;

pub struct AppState {
    pub tweets: Arc<Coordinator<TwitterClient>>,
    pub news: Arc<Coordinator<NewsClient>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/refresh", get(refresh))
        .route("/refresh-status", get(refresh_status))
        .route("/news", get(news))
        .route("/news/refresh-status", get(news_status))
        .route("/health", get(health))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub handle: String,
    pub latest_tweets: Vec<TweetView>,
    pub older_tweets: Vec<TweetView>,
    pub tweets_error: String,
    pub rate_limited: bool,
    pub articles: Vec<ArticleView>,
    pub news_error: String,
    pub seconds_remaining: i64,
    pub countdown: String,
}

pub struct TweetView {
    pub text: String,
    pub posted: String,
    pub has_metrics: bool,
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
}

impl From<Tweet> for TweetView {
    fn from(tweet: Tweet) -> Self {
        let metrics = tweet.public_metrics.unwrap_or_default();
        Self {
            posted: format_tweet_time(tweet.created_at.as_deref()),
            has_metrics: tweet.public_metrics.is_some(),
            likes: metrics.like_count,
            retweets: metrics.retweet_count,
            replies: metrics.reply_count,
            text: tweet.text,
        }
    }
}

pub struct ArticleView {
    pub title: String,
    pub link: String,
    pub source: String,
    pub published: String,
    pub content: String,
    pub is_breaking: bool,
}

impl From<NewsArticle> for ArticleView {
    fn from(article: NewsArticle) -> Self {
        Self {
            published: format_article_date(article.published),
            content: article.content.unwrap_or_default(),
            title: article.title,
            link: article.link,
            source: article.source,
            is_breaking: article.is_breaking,
        }
    }
}

fn format_tweet_time(created_at: Option<&str>) -> String {
    created_at
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc).format("%H:%M").to_string())
        .unwrap_or_else(|| "Unknown time".to_string())
}

fn format_article_date(published: Option<DateTime<Utc>>) -> String {
    published
        .map(|d| d.format("%-m/%-d/%Y | %H:%M").to_string())
        .unwrap_or_default()
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

#[derive(Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (tweets, news) = tokio::join!(
        state.tweets.request_refresh(false),
        state.news.request_refresh(false)
    );

    let mut sorted = tweets.items;
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let older = sorted.split_off(sorted.len().min(LATEST_TWEETS));

    HtmlTemplate(IndexTemplate {
        handle: state.tweets.upstream().handle().to_string(),
        latest_tweets: sorted.into_iter().map(TweetView::from).collect(),
        older_tweets: older.into_iter().map(TweetView::from).collect(),
        tweets_error: tweets.error.unwrap_or_default(),
        rate_limited: tweets.rate_limited,
        articles: news.items.into_iter().map(ArticleView::from).collect(),
        news_error: news.error.unwrap_or_default(),
        seconds_remaining: tweets.seconds_remaining,
        countdown: format_countdown(tweets.seconds_remaining),
    })
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
) -> Json<RefreshOutcome<Tweet>> {
    Json(state.tweets.request_refresh(query.force).await)
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(state.tweets.status().await)
}

pub async fn news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
) -> Json<RefreshOutcome<NewsArticle>> {
    Json(state.news.request_refresh(query.force).await)
}

pub async fn news_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(state.news.status().await)
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
