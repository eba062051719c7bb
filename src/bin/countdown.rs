//! Terminal countdown mirroring a running newsdesk server's cooldown.
//!
//! Usage: `countdown [BASE_URL] [STATUS_PATH]`, defaulting to
//! `http://localhost:3000` and `/refresh-status`.

use std::io::Write;
use std::time::{Duration, Instant};

use newsdesk::cooldown::RefreshStatus;
use newsdesk::mirror::TimerMirror;
use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn fetch_status(client: &Client, url: &str) -> anyhow::Result<RefreshStatus> {
    let status = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<RefreshStatus>()
        .await?;
    Ok(status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "countdown=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let base = args
        .next()
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let status_path = args.next().unwrap_or_else(|| "/refresh-status".to_string());
    let url = format!("{}{}", base.trim_end_matches('/'), status_path);

    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

    let status = fetch_status(&client, &url).await?;
    info!("Seeded from {}: {}s remaining", url, status.seconds_remaining);
    let mut mirror = TimerMirror::new(&status, Instant::now());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }

        let now = Instant::now();
        if mirror.needs_resync(now) {
            match fetch_status(&client, &url).await {
                Ok(status) => {
                    let drift = mirror.resync(&status, Instant::now());
                    if drift != 0 {
                        info!("Resynced with server, drift {}s", drift);
                    }
                }
                Err(e) => {
                    warn!("Status poll failed, keeping local estimate: {}", e);
                    mirror.mark_attempt(now);
                }
            }
        }

        let now = Instant::now();
        let line = if mirror.can_refresh(now) {
            "refresh available".to_string()
        } else {
            format!("next refresh in {}", mirror.display(now))
        };
        print!("\r{:<32}", line);
        stdout.flush()?;
    }
}
