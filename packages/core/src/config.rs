//! Centralized configuration for Palisade Core
//!
//! Every tunable of the protocol lives here so no module hard-codes policy.
//! A process-wide instance is available through [`Config::global`]; cores
//! built with an explicit `Config` use their own copy.

use crate::crypto::EncryptionLevel;
use crate::utils::error::{PalisadeError, Result};
use std::sync::OnceLock;
use std::time::Duration;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // PROTOCOL
    // ============================================
    /// Level used by `SecureCore::send_default`
    pub default_encryption_level: EncryptionLevel,

    /// Refuse to send to Unverified peers instead of flagging them
    pub require_verification_before_send: bool,

    // ============================================
    // KEY ROTATION
    // ============================================
    /// Maximum lifetime of one session epoch
    pub key_rotation_interval: Duration,

    /// Messages encrypted under one epoch before it is rotated
    pub key_rotation_message_threshold: u64,

    /// How long an Expiring session keeps decrypting in-flight messages
    pub grace_window_duration: Duration,

    /// Establishing pairs fall back to NoSession after this long
    pub establishment_timeout: Duration,

    // ============================================
    // RATCHET / ENVELOPE
    // ============================================
    /// Largest forward gap in sequence numbers accepted on receive
    pub max_skip: u64,

    /// Largest ciphertext accepted by the codec (bytes)
    pub max_ciphertext_len: usize,

    /// Longest device id accepted by the codec
    pub max_device_id_len: usize,

    // ============================================
    // STORAGE / AUDIT
    // ============================================
    /// PBKDF2 iterations for sealing the device identity at rest
    pub pbkdf2_iterations: u32,

    /// PBKDF2 salt length (bytes)
    pub salt_length: usize,

    /// Audit entries older than this are dropped by the retention sweep
    pub audit_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_encryption_level: EncryptionLevel::Enhanced,
            require_verification_before_send: false,

            key_rotation_interval: Duration::from_secs(24 * 60 * 60), // 24h
            key_rotation_message_threshold: 10_000,
            grace_window_duration: Duration::from_secs(5 * 60), // 5 minutes
            establishment_timeout: Duration::from_secs(30),

            max_skip: 1000,
            max_ciphertext_len: 1 << 20,
            max_device_id_len: 64,

            pbkdf2_iterations: 100_000,
            salt_length: 32,
            audit_retention: Duration::from_secs(90 * 24 * 60 * 60), // 90 days
        }
    }
}

impl Config {
    /// Defaults overridden by `PALISADE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(level) = env_parse::<EncryptionLevel>("PALISADE_DEFAULT_LEVEL") {
            config.default_encryption_level = level;
        }
        if let Some(secs) = env_parse::<u64>("PALISADE_ROTATION_INTERVAL_SECS") {
            config.key_rotation_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<u64>("PALISADE_ROTATION_MESSAGE_THRESHOLD") {
            config.key_rotation_message_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("PALISADE_GRACE_WINDOW_SECS") {
            config.grace_window_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("PALISADE_ESTABLISHMENT_TIMEOUT_SECS") {
            config.establishment_timeout = Duration::from_secs(secs);
        }
        if let Some(require) = env_parse::<bool>("PALISADE_REQUIRE_VERIFICATION") {
            config.require_verification_before_send = require;
        }
        if let Some(iterations) = env_parse::<u32>("PALISADE_PBKDF2_ITERATIONS") {
            config.pbkdf2_iterations = iterations;
        }

        config
    }

    /// Reject combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.key_rotation_message_threshold == 0 {
            return Err(PalisadeError::InvalidInput(
                "key_rotation_message_threshold must be at least 1".to_string(),
            ));
        }
        if self.key_rotation_interval.is_zero() {
            return Err(PalisadeError::InvalidInput(
                "key_rotation_interval must be positive".to_string(),
            ));
        }
        if self.max_skip == 0 {
            return Err(PalisadeError::InvalidInput("max_skip must be at least 1".to_string()));
        }
        if self.max_device_id_len == 0 || self.max_device_id_len > u16::MAX as usize {
            return Err(PalisadeError::InvalidInput(
                "max_device_id_len out of range".to_string(),
            ));
        }
        if self.pbkdf2_iterations == 0 || self.salt_length < 16 {
            return Err(PalisadeError::InvalidInput(
                "pbkdf2 parameters too weak".to_string(),
            ));
        }
        Ok(())
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Initializes with defaults on first use.
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Fails if the global config was already initialized.
    pub fn init_from_env() -> std::result::Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Fails if the global config was already initialized.
    pub fn init_with(config: Config) -> std::result::Result<(), &'static str> {
        GLOBAL_CONFIG.set(config).map_err(|_| "Config already initialized")
    }

    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(target: "config", variable = name, "Ignoring unparseable value");
            None
        }
    }
}
