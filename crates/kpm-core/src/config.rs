use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`LockOptions::wait_timeout`] (milliseconds).
pub const LOCK_TIMEOUT_ENV: &str = "KPM_LOCK_TIMEOUT_MS";
/// Environment variable overriding [`LockOptions::max_attempts`].
pub const LOCK_ATTEMPTS_ENV: &str = "KPM_LOCK_ATTEMPTS";
/// Environment variable selecting the [`ConflictPolicy`] (`highest` or `nearest`).
pub const CONFLICT_POLICY_ENV: &str = "KPM_CONFLICT_POLICY";
/// Environment variable selecting the [`Channel`].
pub const CHANNEL_ENV: &str = "KPM_CHANNEL";

/// Runtime configuration for kpm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Channel (dev, nightly, stable) - affects data paths.
    pub channel: Channel,

    /// File lock timing.
    pub lock: LockOptions,

    /// How same-name version conflicts are settled.
    pub conflict_policy: ConflictPolicy,
}

/// Release channel for data directory namespacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Nightly,
    Dev,
}

impl Channel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Nightly => "nightly",
            Self::Dev => "dev",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "nightly" => Some(Self::Nightly),
            "dev" => Some(Self::Dev),
            _ => None,
        }
    }
}

/// Policy for choosing the accepted node among same-name candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Highest version wins; ties go to the node discovered first.
    #[default]
    Highest,
    /// Shallowest node wins; ties go to the higher version.
    Nearest,
}

impl ConflictPolicy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "highest" | "highest-version" => Some(Self::Highest),
            "nearest" | "nearest-wins" => Some(Self::Nearest),
            _ => None,
        }
    }
}

/// Timing for cross-process file locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// How long a single acquire cycle waits for a contended lock.
    pub wait_timeout: Duration,
    /// Acquire cycles before giving up with a lock timeout.
    pub max_attempts: u32,
    /// Delay between polls while waiting.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            max_attempts: 6,
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            channel: Channel::default(),
            lock: LockOptions::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Create a config for `cwd`, applying `KPM_*` environment overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env(cwd: PathBuf) -> Self {
        let mut config = Self::new(cwd);

        if let Some(ms) = env_parse::<u64>(LOCK_TIMEOUT_ENV) {
            config.lock.wait_timeout = Duration::from_millis(ms);
        }

        if let Some(attempts) = env_parse::<u32>(LOCK_ATTEMPTS_ENV).filter(|n| *n > 0) {
            config.lock.max_attempts = attempts;
        }

        if let Some(policy) = std::env::var(CONFLICT_POLICY_ENV)
            .ok()
            .and_then(|v| ConflictPolicy::parse(&v))
        {
            config.conflict_policy = policy;
        }

        if let Some(channel) = std::env::var(CHANNEL_ENV)
            .ok()
            .and_then(|v| Channel::parse(&v))
        {
            config.channel = channel;
        }

        config
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Set lock options.
    #[must_use]
    pub fn with_lock(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    /// Set the conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
