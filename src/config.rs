use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub idle_timeout: u64, // En segundos
    pub skip_quorum: usize,
    pub queue_page_size: usize,
    pub max_queue_size: usize,

    // Paths
    pub data_dir: PathBuf,

    // Personalidad
    pub enable_persona: bool,
    pub persona_save_interval: u64, // En segundos
    pub mood_drift_interval: u64,   // En segundos
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_source(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    fn from_source(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: var("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .parse()
                .context("APPLICATION_ID debe ser numérico")?,
            guild_id: var("GUILD_ID").and_then(|s| s.parse().ok()),

            // Audio
            default_volume: parse_or(&var, "DEFAULT_VOLUME", defaults.default_volume)?,
            idle_timeout: parse_or(&var, "IDLE_TIMEOUT", defaults.idle_timeout)?,
            skip_quorum: parse_or(&var, "SKIP_QUORUM", defaults.skip_quorum)?,
            queue_page_size: parse_or(&var, "QUEUE_PAGE_SIZE", defaults.queue_page_size)?,
            max_queue_size: parse_or(&var, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            // Paths
            data_dir: var("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),

            // Personalidad
            enable_persona: parse_or(&var, "ENABLE_PERSONA", defaults.enable_persona)?,
            persona_save_interval: parse_or(
                &var,
                "PERSONA_SAVE_INTERVAL",
                defaults.persona_save_interval,
            )?,
            mood_drift_interval: parse_or(&var, "MOOD_DRIFT_INTERVAL", defaults.mood_drift_interval)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Application and guild IDs must be non-zero
    /// - Volume must be between 0.0 and 1.0
    /// - Idle timeout, skip quorum, page size and queue size must be > 0
    /// - Persona intervals must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.application_id == 0 || self.guild_id == Some(0) {
            anyhow::bail!("Discord IDs must be non-zero");
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if self.idle_timeout == 0 {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.skip_quorum == 0 {
            anyhow::bail!("Skip quorum must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.persona_save_interval == 0 || self.mood_drift_interval == 0 {
            anyhow::bail!("Persona intervals must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the bot token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {}s idle timeout, {} votes to skip\n  \
            Queue: {} max, {} per page\n  \
            Persona: {} (save every {}s, drift every {}s) in {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.idle_timeout,
            self.skip_quorum,
            self.max_queue_size,
            self.queue_page_size,
            if self.enable_persona { "on" } else { "off" },
            self.persona_save_interval,
            self.mood_drift_interval,
            self.data_dir.display()
        )
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} tiene un valor inválido: {}", key, value)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            default_volume: 0.5,
            idle_timeout: 180,
            skip_quorum: 3,
            queue_page_size: 10,
            max_queue_size: 1000,

            // Path defaults
            data_dir: "./data".into(),

            // Persona defaults
            enable_persona: true,
            persona_save_interval: 30,
            mood_drift_interval: 1800,
        }
    }
}
