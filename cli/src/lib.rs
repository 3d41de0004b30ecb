mod check_cmd;
mod ignore_cmd;
mod resolve_cmd;

pub use check_cmd::CheckCli;
pub use ignore_cmd::IgnoreCli;
pub use resolve_cmd::ResolveCli;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use uptick_core::PreferenceFile;
use uptick_core::UptickConfig;
use uptick_core::Version;
use uptick_core::find_uptick_home;

/// Checks installed applications for newer versions.
#[derive(Debug, Parser)]
#[command(name = "uptick", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the configured application directories for updates.
    Check(CheckCli),
    /// Stop reporting updates for a bundle identifier.
    Ignore(IgnoreCli),
    /// Report updates for a previously ignored bundle identifier again.
    Unignore(IgnoreCli),
    /// Show which package-cask entry an application resolves to.
    Resolve(ResolveCli),
}

/// Config and preferences shared by every subcommand.
pub struct Environment {
    pub config: UptickConfig,
    pub prefs: Arc<PreferenceFile>,
}

impl Environment {
    pub fn load() -> Result<Self> {
        let home = find_uptick_home()?;
        let config = UptickConfig::load(&home)
            .with_context(|| format!("failed to load config from {}", home.display()))?;
        let prefs = PreferenceFile::open(config.preferences_path()).with_context(|| {
            format!(
                "failed to open preferences at {}",
                config.preferences_path().display()
            )
        })?;
        Ok(Self {
            config,
            prefs: Arc::new(prefs),
        })
    }

    /// Configured override, otherwise the running system's version.
    pub fn os_version(&self) -> Option<Version> {
        self.config.os_version_override().or_else(|| {
            sysinfo::System::os_version()
                .map(Version::from_version)
                .filter(|version| !version.is_empty())
        })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let env = Environment::load()?;
    match cli.command {
        Command::Check(check) => check_cmd::run(check, &env).await,
        Command::Ignore(target) => ignore_cmd::run(target, &env, true),
        Command::Unignore(target) => ignore_cmd::run(target, &env, false),
        Command::Resolve(resolve) => resolve_cmd::run(resolve, &env).await,
    }
}
