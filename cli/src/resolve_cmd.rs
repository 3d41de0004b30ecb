use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use uptick_core::PreferenceStore;
use uptick_core::discovery::read_bundle;
use uptick_core::http::build_client;
use uptick_core::repository::RepositoryLoader;
use uptick_core::repository::RepositoryProvider;
use uptick_core::repository::RepositorySources;
use uptick_core::repository::Resolution;
use uptick_core::resource::ResourceFetcher;

use crate::Environment;

#[derive(Debug, Parser)]
pub struct ResolveCli {
    /// Path to an application bundle, e.g. `/Applications/Example.app`.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

pub async fn run(cli: ResolveCli, env: &Environment) -> Result<()> {
    let bundle = read_bundle(&cli.path)
        .with_context(|| format!("failed to read {}", cli.path.display()))?
        .with_context(|| format!("{} is not an application bundle", cli.path.display()))?;

    let client = build_client(&env.config).context("failed to build http client")?;
    let prefs: Arc<dyn PreferenceStore> = env.prefs.clone();
    let fetcher = Arc::new(ResourceFetcher::from_config(client, &env.config, prefs));
    let loader = RepositoryLoader::new(fetcher, RepositorySources::from_config(&env.config));
    let catalog = loader.load().catalog().await;

    println!("{} ({}, {})", bundle.name, bundle.identifier, bundle.version);
    match catalog.resolution(&bundle) {
        Resolution::Matched(entry) => {
            println!(
                "  resolves to cask `{}` version {}",
                entry.token, entry.version
            );
            let names: Vec<&str> = entry.names.iter().map(String::as_str).collect();
            println!("  names: {}", names.join(", "));
            if !entry.bundle_ids.is_empty() {
                let ids: Vec<&str> = entry.bundle_ids.iter().map(String::as_str).collect();
                println!("  bundle ids: {}", ids.join(", "));
            }
        }
        Resolution::Excluded => println!("  excluded from package-cask checks"),
        Resolution::Ambiguous => println!("  ambiguous: several casks match equally well"),
        Resolution::NoMatch => println!("  no matching cask"),
    }
    Ok(())
}
