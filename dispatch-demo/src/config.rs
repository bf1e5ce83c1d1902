use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Config {
    #[clap(long, env = "DISPATCH_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[clap(long, env = "DISPATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// One of: default, simple-priority, throughput, fair, prefetching.
    #[clap(long, env = "DISPATCH_PRESET", default_value = "default")]
    pub preset: String,

    /// How long the synthetic workload runs before shutting down, in seconds.
    #[clap(long, env = "DISPATCH_DURATION_SECONDS", default_value = "30")]
    pub duration_seconds: u64,

    /// Average milliseconds between synthetic request arrivals.
    #[clap(long, env = "DISPATCH_ARRIVAL_INTERVAL_MS", default_value = "100")]
    pub arrival_interval_ms: u64,

    /// Requests-per-minute budget for the toy fixed-window rate limiter.
    #[clap(long, env = "DISPATCH_RPM_LIMIT", default_value = "600")]
    pub rpm_limit: f64,

    /// Tokens-per-minute budget for the toy fixed-window rate limiter.
    #[clap(long, env = "DISPATCH_TPM_LIMIT", default_value = "60000")]
    pub tpm_limit: f64,
}

pub fn load_config() -> Config {
    Config::parse()
}
