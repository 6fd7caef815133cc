//! Daemon configuration, read once from the environment at start-up.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use rift_domain::{BattleConfig, DomainError, RiftConfig, RolePair};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl fmt::Display) -> Self {
        Self::Invalid {
            key,
            message: message.to_string(),
        }
    }
}

/// Which workshop this daemon drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkshopKind {
    Battle,
    Rift,
}

impl WorkshopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battle => "battle",
            Self::Rift => "rift",
        }
    }
}

impl fmt::Display for WorkshopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkshopKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "battle" => Ok(Self::Battle),
            "rift" => Ok(Self::Rift),
            other => Err(format!("unknown workshop '{other}', expected battle or rift")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub url: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkshopConfig {
    pub kind: WorkshopKind,
    pub device_id: String,
    pub ws_url: Url,
    pub reconnect_delay: Duration,
    /// `None` disables generation entirely
    pub generation: Option<GenerationConfig>,
    pub debounce: Duration,
    /// Read bench commands from stdin
    pub stdin_hardware: bool,
    pub roles: RolePair,
    pub battle: BattleConfig,
    pub rift: RiftConfig,
}

impl WorkshopConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let kind: WorkshopKind = env.parse("RIFT_WORKSHOP", WorkshopKind::Battle)?;
        let device_id = env
            .get("RIFT_DEVICE_ID")
            .unwrap_or_else(|| format!("{kind}-workshop"));

        let ws_url = env.url("RIFT_WS_URL", "ws://localhost:8765/ws")?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::invalid(
                "RIFT_WS_URL",
                format!("expected a ws:// or wss:// url, got {ws_url}"),
            ));
        }

        let generation = match env.get("RIFT_GENERATION_URL") {
            Some(_) => Some(GenerationConfig {
                url: env.url("RIFT_GENERATION_URL", "")?,
                api_key: env.get("RIFT_GENERATION_API_KEY"),
                timeout: env.secs("RIFT_GENERATION_TIMEOUT_SECS", 60.0)?,
            }),
            None => None,
        };

        let roles = match env.get("RIFT_ROLES") {
            Some(list) => RolePair::parse(&list)?,
            None => RolePair::default(),
        };
        let start_part_count: u64 = env.parse("RIFT_START_PART_COUNT", 4)?;

        let battle = BattleConfig {
            roles: roles.clone(),
            start_part_count,
            initial_hp: env.parse("RIFT_INITIAL_HP", 3)?,
            generation_cooldown: env.secs("RIFT_GENERATION_COOLDOWN_SECS", 2.0)?,
            cage_uids: env.list("RIFT_CAGE_UIDS"),
            ..BattleConfig::default()
        };
        battle.validate()?;

        let rift = RiftConfig {
            part_uids: env.list("RIFT_PART_UIDS"),
            required_parts: start_part_count,
            ..RiftConfig::default()
        };
        rift.validate()?;

        Ok(Self {
            kind,
            device_id,
            ws_url,
            reconnect_delay: env.secs("RIFT_RECONNECT_DELAY_SECS", 5.0)?,
            generation,
            debounce: Duration::from_millis(env.parse("RIFT_DEBOUNCE_MS", 500)?),
            stdin_hardware: env.parse("RIFT_STDIN_HARDWARE", false)?,
            roles,
            battle,
            rift,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty, trimmed value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::invalid(key, e)),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parse(key, default)?;
        Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(key, e))
    }

    fn url(&self, key: &'static str, default: &str) -> Result<Url, ConfigError> {
        let raw = self.get(key).unwrap_or_else(|| default.to_string());
        Url::parse(&raw).map_err(|e| ConfigError::invalid(key, e))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}
