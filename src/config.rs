use std::env;
use std::time::Duration;

use tracing::warn;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    // Outbound scheduler
    pub send_tick: Duration,
    pub fallback_subject: String,
    pub smtp_timeout: Duration,
    pub send_backoff_initial: Duration,
    pub send_backoff_max: Duration,

    // Inbound watchers
    /// Must stay below the server's idle-session expiry (29 min on most servers).
    pub idle_timeout: Duration,
    pub watch_backoff_initial: Duration,
    pub watch_backoff_max: Duration,
    pub watch_mailbox: String,
    pub body_excerpt_chars: usize,
    pub imap_accept_invalid_certs: bool,

    // Ingestion boundary
    pub send_interval_minutes: i64,
    pub tracking_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://mailora_outreach.db".into(),
            port: 3030,
            send_tick: Duration::from_secs(60),
            fallback_subject: "Hello".into(),
            smtp_timeout: Duration::from_secs(10),
            send_backoff_initial: Duration::from_secs(60),
            send_backoff_max: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(28 * 60),
            watch_backoff_initial: Duration::from_secs(10),
            watch_backoff_max: Duration::from_secs(3600),
            watch_mailbox: "INBOX".into(),
            body_excerpt_chars: 500,
            imap_accept_invalid_certs: false,
            send_interval_minutes: 10,
            tracking_base_url: "http://localhost:3030".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(d.database_url),
            port: parse_or("PORT", d.port),
            send_tick: nonzero_secs_or("SEND_TICK_SECS", d.send_tick),
            fallback_subject: env::var("FALLBACK_SUBJECT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(d.fallback_subject),
            smtp_timeout: nonzero_secs_or("SMTP_TIMEOUT_SECS", d.smtp_timeout),
            send_backoff_initial: nonzero_secs_or("SEND_BACKOFF_INITIAL_SECS", d.send_backoff_initial),
            send_backoff_max: nonzero_secs_or("SEND_BACKOFF_MAX_SECS", d.send_backoff_max),
            idle_timeout: nonzero_secs_or("IDLE_TIMEOUT_SECS", d.idle_timeout),
            watch_backoff_initial: nonzero_secs_or("WATCH_BACKOFF_INITIAL_SECS", d.watch_backoff_initial),
            watch_backoff_max: nonzero_secs_or("WATCH_BACKOFF_MAX_SECS", d.watch_backoff_max),
            watch_mailbox: env::var("WATCH_MAILBOX").unwrap_or(d.watch_mailbox),
            body_excerpt_chars: parse_or("BODY_EXCERPT_CHARS", d.body_excerpt_chars),
            imap_accept_invalid_certs: parse_or("IMAP_ACCEPT_INVALID_CERTS", d.imap_accept_invalid_certs),
            send_interval_minutes: parse_or("SEND_INTERVAL_MINUTES", d.send_interval_minutes),
            tracking_base_url: env::var("TRACKING_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.tracking_base_url),
        }
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(env_var = name, value = %raw, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn secs_or(name: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(name, default.as_secs()))
}

/// Like `secs_or`, but zero falls back to the default.
fn nonzero_secs_or(name: &str, default: Duration) -> Duration {
    let value = secs_or(name, default);
    if value.is_zero() {
        warn!(env_var = name, "zero is not allowed, using default");
        return default;
    }
    value
}
