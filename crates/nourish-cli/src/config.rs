//! Configuration file management for nourish.
//!
//! Provides a TOML-based config file at `~/.config/nourish/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use nourish_core::PlannerConfig;
use nourish_db::config::DbConfig;

/// Generator used when nothing else is configured.
pub const DEFAULT_GENERATOR_CMD: &str = "claude -p";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default = "CommandSection::default_generator")]
    pub generator: CommandSection,
    /// Image analysis is optional; `nourish diary` needs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<CommandSection>,
    #[serde(default)]
    pub planner: PlannerConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

/// An external model client: program plus arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSection {
    /// Split a shell-style command line on whitespace. `None` when empty.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }

    fn default_generator() -> Self {
        Self {
            command: "claude".to_owned(),
            args: vec!["-p".to_owned()],
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the nourish config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/nourish` or `~/.config/nourish`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("nourish");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("nourish")
}

/// Return the path to the nourish config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct NourishConfig {
    pub db_config: DbConfig,
    pub generator: CommandSection,
    pub vision: Option<CommandSection>,
    pub planner: PlannerConfig,
}

impl NourishConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `NOURISH_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Generator: `cli_generator` > `NOURISH_GENERATOR_CMD` > `[generator]` > `claude -p`
    /// - Vision and planner tunables come from the file only.
    ///
    /// A missing file is fine; a file that does not parse is an error.
    pub fn resolve(cli_db_url: Option<&str>, cli_generator: Option<&str>) -> Result<Self> {
        let file_config = if config_path().exists() {
            Some(load_config()?)
        } else {
            None
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Ok(url) = std::env::var("NOURISH_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };

        let generator = if let Some(line) = cli_generator {
            parse_required(line, "--generator-cmd")?
        } else if let Ok(line) = std::env::var("NOURISH_GENERATOR_CMD") {
            parse_required(&line, "NOURISH_GENERATOR_CMD")?
        } else if let Some(ref cfg) = file_config {
            cfg.generator.clone()
        } else {
            CommandSection::default_generator()
        };

        let (vision, planner) = match file_config {
            Some(cfg) => (cfg.vision, cfg.planner),
            None => (None, PlannerConfig::default()),
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            generator,
            vision,
            planner,
        })
    }
}

fn parse_required(line: &str, source: &str) -> Result<CommandSection> {
    match CommandSection::parse(line) {
        Some(cmd) => Ok(cmd),
        None => bail!("{source} is set but empty"),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
