//! Periodic self-ping that keeps idle free-tier deployments from sleeping.

use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::KeepAliveSettings;
use crate::infra::error::InfraError;

const PING_TIMEOUT: Duration = Duration::from_secs(15);
const PING_PATH: &str = "api/cache-stats";

pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn spawn(settings: &KeepAliveSettings) -> Result<Self, InfraError> {
        let target = ping_url(&settings.url)?;
        let client = Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        let interval = settings.interval;
        let initial_delay = settings.initial_delay;

        info!(
            target = "bimvision::keep_alive",
            url = %target,
            interval_secs = interval.as_secs(),
            "keep-alive enabled"
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                ping(&client, &target).await;
            }
        });

        Ok(Self { handle })
    }

    pub fn abort(self) {
        self.handle.abort();
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn ping_url(base: &Url) -> Result<Url, InfraError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(PING_PATH)
        .map_err(|err| InfraError::configuration(format!("invalid keep_alive.url: {err}")))
}

async fn ping(client: &Client, target: &Url) {
    match client.get(target.clone()).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(
                target = "bimvision::keep_alive",
                status = response.status().as_u16(),
                "keep-alive ping succeeded"
            );
        }
        Ok(response) => {
            warn!(
                target = "bimvision::keep_alive",
                status = response.status().as_u16(),
                "keep-alive ping returned an error status"
            );
        }
        Err(err) => {
            warn!(
                target = "bimvision::keep_alive",
                error = %err,
                "keep-alive ping failed"
            );
        }
    }
}
