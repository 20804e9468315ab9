// Application configuration
//
// Read from the environment. Durations use humantime syntax (`30s`, `1m`, `7d`).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use prbridge_bitbucket::BitbucketConfig;
use prbridge_core::{GcPolicy, LoopConfig};
use prbridge_telegram::{TelegramConfig, DEFAULT_API_URL};

const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Everything the binary needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bitbucket: BitbucketConfig,
    pub telegram: TelegramConfig,
    pub loops: LoopConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mut bitbucket = BitbucketConfig::new(
            env.required("BITBUCKET_HOST")?,
            env.required("BITBUCKET_TOKEN")?,
            env.required("BITBUCKET_PROJECT")?,
        );
        bitbucket.timeout = env.duration("BITBUCKET_TIMEOUT", bitbucket.timeout)?;
        bitbucket.insecure_tls = env.flag("BITBUCKET_INSECURE_TLS", false)?;
        bitbucket.page_limit = env.parsed("BITBUCKET_PAGE_LIMIT", bitbucket.page_limit)?;

        let mut telegram = TelegramConfig::new(env.required("TELEGRAM_TOKEN")?);
        telegram.api_url = env
            .optional("TELEGRAM_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        telegram.poll_timeout = env.duration("TELEGRAM_POLL_TIMEOUT", telegram.poll_timeout)?;

        let defaults = LoopConfig::default();
        let loops = LoopConfig {
            fetch_period: env.duration("FETCH_PERIOD", defaults.fetch_period)?,
            retry_period: env.duration("RETRY_PERIOD", defaults.retry_period)?,
            gc_period: env.duration("EVENTS_GC_PERIOD", defaults.gc_period)?,
            gc_threshold: env.duration("EVENTS_GC_THRESHOLD", defaults.gc_threshold)?,
            gc_policy: env.parsed::<GcPolicy>("EVENTS_GC_POLICY", defaults.gc_policy)?,
        };
        loops.validate()?;

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            database_max_connections: env
                .parsed("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
            bitbucket,
            telegram,
            loops,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank, trimmed
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| anyhow!("{key} environment variable is required"))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow!("invalid {key} ({raw}): {e}")),
            None => Ok(default),
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.optional(key) {
            Some(raw) => humantime::parse_duration(&raw)
                .with_context(|| format!("invalid {key} ({raw})")),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => bail!("invalid {key} ({raw}): expected true or false"),
        }
    }
}
