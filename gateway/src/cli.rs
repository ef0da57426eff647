use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about = "Client-side confidential-inference proxy")]
pub struct Args {
    /// Path to the gateway's TOML config file.
    #[arg(long, default_value = "gateway.toml")]
    pub config_file: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
