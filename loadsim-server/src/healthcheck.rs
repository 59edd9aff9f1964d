use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;

/// Maximum time to wait for the server to answer.
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks that the server at the configured address is ready to accept runs.
pub async fn healthcheck(config: Config) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(HEALTHCHECK_TIMEOUT)
        .build()?;
    let url = format!("http://{}/ready", config.http_addr);

    tracing::debug!("sending healthcheck request to {}", url);
    let response = client
        .get(&url)
        .send()
        .await
        .context("loadsim server is not reachable")?;
    if !response.status().is_success() {
        anyhow::bail!("Bad Status: {}", response.status());
    }

    tracing::info!("OK");
    Ok(())
}
