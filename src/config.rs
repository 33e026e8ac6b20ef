use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for in-progress chunk storage (capability-probed).
    pub temp_dir: String,
    /// Directory assembled files are published under.
    pub output_dir: String,
    pub session_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub final_chunk_factor: u64,
    pub max_request_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked upload reassembly server")]
pub struct Args {
    /// Host to bind to (overrides CHUNKYARD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNKYARD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where chunks are kept until assembly (overrides CHUNKYARD_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<String>,

    /// Directory where assembled files are written (overrides CHUNKYARD_OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Seconds of inactivity before a session is reaped (overrides CHUNKYARD_SESSION_TIMEOUT_SECS)
    #[arg(long)]
    pub session_timeout_secs: Option<u64>,

    /// Seconds between reaper sweeps (overrides CHUNKYARD_REAP_INTERVAL_SECS)
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,

    /// Final chunk may be up to this multiple of the chunk size (overrides CHUNKYARD_FINAL_CHUNK_FACTOR)
    #[arg(long)]
    pub final_chunk_factor: Option<u64>,

    /// Largest accepted request body in bytes (overrides CHUNKYARD_MAX_REQUEST_BYTES)
    #[arg(long)]
    pub max_request_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args over the environment and defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("CHUNKYARD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("CHUNKYARD_PORT", 3000u16)?;
        let env_temp = env::var("CHUNKYARD_TEMP_DIR").unwrap_or_else(|_| "./data/chunks".into());
        let env_output =
            env::var("CHUNKYARD_OUTPUT_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_timeout = env_number("CHUNKYARD_SESSION_TIMEOUT_SECS", 3600u64)?;
        let env_interval = env_number("CHUNKYARD_REAP_INTERVAL_SECS", 300u64)?;
        let env_factor = env_number("CHUNKYARD_FINAL_CHUNK_FACTOR", 2u64)?;
        let env_max_request = env_number("CHUNKYARD_MAX_REQUEST_BYTES", 64 * 1024 * 1024usize)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            output_dir: args.output_dir.unwrap_or(env_output),
            session_timeout_secs: args.session_timeout_secs.unwrap_or(env_timeout),
            reap_interval_secs: args.reap_interval_secs.unwrap_or(env_interval),
            final_chunk_factor: args.final_chunk_factor.unwrap_or(env_factor),
            max_request_bytes: args.max_request_bytes.unwrap_or(env_max_request),
        };
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 {
            bail!("session timeout must be at least one second");
        }
        if self.reap_interval_secs == 0 {
            bail!("reap interval must be at least one second");
        }
        if self.final_chunk_factor == 0 {
            bail!("final chunk factor must be at least 1");
        }
        if self.max_request_bytes == 0 {
            bail!("max request bytes must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_args_override_defaults() {
        let cfg = AppConfig::from_args(Args {
            port: Some(8080),
            temp_dir: Some("/srv/chunks".into()),
            final_chunk_factor: Some(1),
            ..Args::default()
        })
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.temp_dir, "/srv/chunks");
        assert_eq!(cfg.final_chunk_factor, 1);
        assert!(cfg.addr().ends_with(":8080"));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let err = AppConfig::from_args(Args {
            reap_interval_secs: Some(0),
            ..Args::default()
        });
        assert!(err.is_err());

        let err = AppConfig::from_args(Args {
            final_chunk_factor: Some(0),
            ..Args::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn cli_parsing_accepts_long_flags() {
        let args = Args::try_parse_from([
            "chunkyard",
            "--session-timeout-secs",
            "60",
            "--output-dir",
            "/srv/out",
        ])
        .unwrap();
        assert_eq!(args.session_timeout_secs, Some(60));
        assert_eq!(args.output_dir.as_deref(), Some("/srv/out"));
    }
}
