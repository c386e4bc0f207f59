use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use super::AppConfig;

#[derive(Parser, Clone, Default)]
#[command(name = "iam-proxy", about = "Caching proxy in front of an IAM provider")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Environment name
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Cache backend: memory or remote
    #[arg(long)]
    pub cache_kind: Option<String>,
}

/// Load configuration: defaults, `config/default.toml`, `config/{env}.toml`,
/// `APP_` environment variables, then CLI flags.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(Cli::parse())
}

pub fn load_config_from(cli: Cli) -> Result<AppConfig> {
    let env_name = cli
        .environment
        .clone()
        .unwrap_or_else(|| std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string()))
        .to_lowercase();

    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml"))
        .merge(Toml::file(format!("config/{}.toml", env_name)));

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment
        .merge(Env::prefixed("APP_").split("__"))
        .merge(Serialized::default("environment", &env_name));

    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(kind) = &cli.cache_kind {
        figment = figment.merge(Serialized::default("cache.kind", kind));
    }

    let config: AppConfig = figment
        .extract()
        .context("Invalid configuration")?;

    config.validate().context("Configuration validation failed")?;

    Ok(config)
}
