//! Environment-backed configuration.
//!
//! Every knob is read once, at construction time. Blank values count as unset, and each
//! `WEBPROBE_*` key falls back to its conventional unprefixed name where one exists.

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_either(primary: &str, fallback: &str) -> Option<String> {
    env(primary).or_else(|| env(fallback))
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    env(key).and_then(|s| parse_bool(&s)).unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    env(key)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

pub const DEFAULT_INSERTION_RATE: f64 = 0.05;
pub const DEFAULT_INSERTION_POOL: &str =
    "ADVERTISEMENT,[Sponsored],[Promoted],[Click here],[Learn more],...,***";
pub const DEFAULT_INSERTION_SEED: u64 = 42;

/// Settings for marker insertion (see [`crate::perturb::Perturber`]).
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbConfig {
    pub enabled: bool,
    /// Probability in `[0, 1]` of inserting after each word.
    pub rate: f64,
    pub pool: Vec<String>,
    pub seed: u64,
}

impl Default for PerturbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: DEFAULT_INSERTION_RATE,
            pool: parse_pool(DEFAULT_INSERTION_POOL),
            seed: DEFAULT_INSERTION_SEED,
        }
    }
}

impl PerturbConfig {
    pub fn from_env() -> Self {
        let pool = env("WEBPROBE_RANDOM_INSERTION_POOL")
            .map(|s| parse_pool(&s))
            .unwrap_or_else(|| parse_pool(DEFAULT_INSERTION_POOL));
        Self {
            enabled: env_bool("WEBPROBE_RANDOM_INSERTION", false),
            rate: env_f64("WEBPROBE_RANDOM_INSERTION_RATE", DEFAULT_INSERTION_RATE).clamp(0.0, 1.0),
            pool,
            seed: env_u64("WEBPROBE_RANDOM_INSERTION_SEED", DEFAULT_INSERTION_SEED),
        }
    }
}

/// Comma-separated marker list; entries are trimmed and blanks dropped.
pub fn parse_pool(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

pub const DEFAULT_FAULT_RATE: f64 = 0.95;
pub const FAULT_TRIGGER_SEED: u64 = 337;
pub const FAULT_MESSAGE_SEED: u64 = 1053;

/// Simulated fetch failures. Off unless explicitly enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    pub enabled: bool,
    pub rate: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: DEFAULT_FAULT_RATE,
        }
    }
}

impl FaultConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("WEBPROBE_SIMULATE_FETCH_ERRORS", false),
            rate: env_f64("WEBPROBE_SIMULATE_FETCH_ERROR_RATE", DEFAULT_FAULT_RATE).clamp(0.0, 1.0),
        }
    }
}

pub fn show_snippet_from_env() -> bool {
    env_bool("WEBPROBE_SHOW_SNIPPET", true)
}
