use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Debug, Parser)]
#[command(
    name = "tela-bridge",
    author,
    version,
    about = "Native-messaging bridge serving TELA content from a DERO node"
)]
pub struct Cli {
    /// Port for the local TELA proxy listener.
    #[arg(long = "tela-port", env = "TELA_BRIDGE_TELA_PORT", default_value_t = 4040)]
    pub tela_port: u16,

    /// Port for the Gnomon indexing API listener.
    #[arg(long = "gnomon-api", env = "TELA_BRIDGE_GNOMON_API", default_value_t = 8099)]
    pub gnomon_port: u16,

    /// Directory holding locally hosted SCID folders.
    #[arg(long = "scid-root", env = "TELA_BRIDGE_SCID_ROOT", default_value = "scids")]
    pub scid_root: PathBuf,

    /// Directory for the index database.
    #[arg(long = "data-dir", env = "TELA_BRIDGE_DATA_DIR", default_value = ".tela-bridge")]
    pub data_dir: PathBuf,

    /// Log file path. Stdout carries the messaging protocol, so logs default
    /// to stderr when no file is given.
    #[arg(long = "log-file", env = "TELA_BRIDGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log verbosity.
    #[arg(long = "log-level", env = "TELA_BRIDGE_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub tela_port: u16,
    pub gnomon_port: u16,
    pub scid_root: PathBuf,
    pub data_dir: PathBuf,
}

impl From<&Cli> for BridgeConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            tela_port: cli.tela_port,
            gnomon_port: cli.gnomon_port,
            scid_root: cli.scid_root.clone(),
            data_dir: cli.data_dir.clone(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tela_port: 4040,
            gnomon_port: 8099,
            scid_root: PathBuf::from("scids"),
            data_dir: PathBuf::from(".tela-bridge"),
        }
    }
}
