//! CLI flags and subcommands (section 10.3, section 10.6). Flags override a
//! TOML config file; a handful of flags may additionally be filled from the
//! environment via [`crate::or_env`].

use std::path::PathBuf;

use crate::or_env::OrEnvExt as _;

/// The settlement engine's operator node.
#[derive(argh::FromArgs)]
pub struct NodeArgs {
    #[argh(subcommand)]
    pub command: Command,
}

#[derive(argh::FromArgs)]
#[argh(subcommand)]
pub enum Command {
    Run(RunArgs),
    CheckConfig(CheckConfigArgs),
}

/// Runs the operator HTTP surface and the queue worker.
#[derive(argh::FromArgs)]
#[argh(subcommand, name = "run")]
pub struct RunArgs {
    /// path to the TOML config file.
    ///
    /// Default: `config.toml`.
    /// Env: `CUSTODIA_CONFIG_PATH`.
    #[argh(option)]
    pub config_path: Option<PathBuf>,

    /// override the `<ip-address:port>` to listen on.
    ///
    /// Env: `CUSTODIA_LISTEN_ADDR`.
    #[argh(option)]
    pub listen_addr: Option<String>,

    /// override the Redis connection string.
    ///
    /// Env: `CUSTODIA_REDIS_URL`.
    #[argh(option)]
    pub redis_url: Option<String>,
}

impl RunArgs {
    /// Fills any unset flags from their fallback environment variables.
    pub fn or_env(&mut self) -> anyhow::Result<()> {
        self.config_path.or_env_mut("CUSTODIA_CONFIG_PATH")?;
        self.listen_addr.or_env_mut("CUSTODIA_LISTEN_ADDR")?;
        self.redis_url.or_env_mut("CUSTODIA_REDIS_URL")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

/// Loads and validates the config file, printing a summary, without
/// starting any servers. Useful for CI and pre-deploy checks.
#[derive(argh::FromArgs)]
#[argh(subcommand, name = "check-config")]
pub struct CheckConfigArgs {
    /// path to the TOML config file.
    ///
    /// Default: `config.toml`.
    #[argh(option)]
    pub config_path: Option<PathBuf>,
}

impl CheckConfigArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

/// Parses whichever subcommand was invoked without requiring the caller to
/// know which one ahead of time.
pub fn parse() -> NodeArgs {
    argh::from_env()
}
