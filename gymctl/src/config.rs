use crate::db::models::policies::BookingPolicy;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command-line arguments. Everything here can also come from the
/// environment or the config file; the CLI wins.
#[derive(Debug, Parser)]
#[command(name = "gymctl", about = "Multi-tenant fitness business control service")]
pub struct Args {
    /// Path to a YAML config file
    #[arg(long, env = "GYMCTL_CONFIG")]
    pub config: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Port to listen on
    #[arg(long, env = "GYMCTL_PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by CORS; empty means same-origin only
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    /// Defaults applied to tenants without stored policy overrides
    #[serde(default)]
    pub booking: BookingPolicy,
    /// How often the reconciliation pass runs
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3200
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(600)
}

impl Config {
    /// Layered load: file, then GYMCTL_* environment variables, then CLI
    /// arguments on top.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = &args.config {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("GYMCTL_").split("__"));

        if let Some(database_url) = &args.database_url {
            figment = figment.merge(Serialized::default("database_url", database_url));
        }
        if let Some(port) = args.port {
            figment = figment.merge(Serialized::default("port", port));
        }

        Ok(figment.extract()?)
    }
}
