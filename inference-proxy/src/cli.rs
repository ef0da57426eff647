use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about = "Server-side confidential-inference proxy")]
pub struct Args {
    /// Path to the inference proxy's TOML config file.
    #[arg(long, default_value = "inference-proxy.toml")]
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
