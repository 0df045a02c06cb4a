use std::time::Duration;

use anyhow::{Context, Result};

/// Tuning knobs for conversation discovery, polling and send reconciliation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// First conversation handle probed during discovery.
    pub probe_start: u64,
    /// Number of consecutive handles probed before giving up.
    pub probe_bound: u64,
    /// Delay between background polls of a resolved conversation.
    pub poll_interval: Duration,
    /// Pause after a send before looking for a conversation the send created.
    pub settle_delay: Duration,
    /// Discovery passes attempted after a send, with the pause doubling
    /// between passes. Always at least one.
    pub resolve_attempts: u32,
    /// Re-run discovery on this cadence while a session has no conversation.
    /// `None` leaves it to the next send or an explicit `resolve()`.
    pub rediscover_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            probe_start: 0,
            probe_bound: 1000,
            poll_interval: Duration::from_millis(3000),
            settle_delay: Duration::from_millis(500),
            resolve_attempts: 3,
            rediscover_interval: None,
        }
    }
}

impl ClientConfig {
    /// Load overrides from `PARLEY_*` environment variables (and `.env` if
    /// present). Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PARLEY_PROBE_START") {
            config.probe_start = v.parse().context("PARLEY_PROBE_START")?;
        }
        if let Some(v) = lookup("PARLEY_PROBE_BOUND") {
            config.probe_bound = v.parse().context("PARLEY_PROBE_BOUND")?;
        }
        if let Some(v) = lookup("PARLEY_POLL_INTERVAL_MS") {
            config.poll_interval = millis(&v).context("PARLEY_POLL_INTERVAL_MS")?;
        }
        if let Some(v) = lookup("PARLEY_SETTLE_DELAY_MS") {
            config.settle_delay = millis(&v).context("PARLEY_SETTLE_DELAY_MS")?;
        }
        if let Some(v) = lookup("PARLEY_RESOLVE_ATTEMPTS") {
            config.resolve_attempts = v.parse().context("PARLEY_RESOLVE_ATTEMPTS")?;
        }
        if let Some(v) = lookup("PARLEY_REDISCOVER_INTERVAL_MS") {
            config.rediscover_interval = Some(millis(&v).context("PARLEY_REDISCOVER_INTERVAL_MS")?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }
        if self.probe_start.checked_add(self.probe_bound).is_none() {
            anyhow::bail!("probe window overflows the handle space");
        }
        if self.rediscover_interval.is_some_and(|d| d.is_zero()) {
            anyhow::bail!("rediscover interval must be greater than zero");
        }
        Ok(())
    }
}

fn millis(raw: &str) -> Result<Duration> {
    Ok(Duration::from_millis(raw.trim().parse()?))
}
