use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use uptick_core::PreferenceStore;

use crate::Environment;

#[derive(Debug, Parser)]
pub struct IgnoreCli {
    /// Bundle identifier, e.g. `com.example.app`.
    #[arg(value_name = "BUNDLE_ID")]
    pub bundle_id: String,
}

pub fn run(cli: IgnoreCli, env: &Environment, ignored: bool) -> Result<()> {
    let bundle_id = cli.bundle_id.trim();
    anyhow::ensure!(!bundle_id.is_empty(), "bundle identifier must not be empty");
    env.prefs
        .set_ignored(bundle_id, ignored)
        .context("failed to update the ignore list")?;
    if ignored {
        println!("Ignoring updates for {bundle_id}");
    } else {
        println!("Reporting updates for {bundle_id} again");
    }
    Ok(())
}
