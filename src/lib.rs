//! Newsdesk - a cooldown-gated social and news dashboard
//!
//! This crate serves a single page combining a social timeline and a filtered
//! news feed. Upstream calls are rate limited by a shared cooldown, and clients
//! mirror the remaining time locally between status polls.

pub mod config;
pub mod cooldown;
pub mod coordinator;
pub mod db;
pub mod mirror;
pub mod news;
pub mod routes;
pub mod twitter;
