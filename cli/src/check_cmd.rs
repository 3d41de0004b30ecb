use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use clap::Parser;
use clap::ValueEnum;
use owo_colors::OwoColorize;
use owo_colors::Style;
use serde::Serialize;
use tracing::info;
use uptick_core::App;
use uptick_core::CheckCoordinator;
use uptick_core::DirectoryScanner;
use uptick_core::Source;
use uptick_core::UpdateAction;
use uptick_core::Version;

use crate::Environment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
pub struct CheckCli {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// List every application, not only those with an update.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

pub async fn run(cli: CheckCli, env: &Environment) -> Result<()> {
    let discovery = Arc::new(DirectoryScanner::new(env.config.application_dirs.clone()));
    let coordinator =
        CheckCoordinator::from_config(&env.config, discovery, env.prefs.clone(), env.os_version())
            .context("failed to set up update checks")?;

    let run = coordinator.run();
    tokio::pin!(run);
    tokio::select! {
        () = &mut run => {}
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                info!("interrupted, cancelling remaining checks");
                coordinator.cancel();
            }
            run.await;
        }
    }

    let store = coordinator.store();
    store.publish();
    let apps = if cli.all {
        store.snapshot()
    } else {
        store.updatable_apps()
    };
    let os_version = store.os_version();
    let reports: Vec<AppReport> = apps
        .iter()
        .map(|app| AppReport::new(app, os_version))
        .collect();

    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&reports).context("failed to encode report")?;
            println!("{json}");
        }
        OutputFormat::Text => print_text(&reports, cli.all),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Status {
    UpdateAvailable,
    Pending,
    UpToDate,
    Ignored,
    Failed,
    Unchecked,
}

#[derive(Debug, Serialize)]
struct AppReport {
    name: String,
    identifier: String,
    path: PathBuf,
    installed: Version,
    source: Source,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum_os: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<UpdateAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AppReport {
    fn new(app: &App, os_version: Option<&Version>) -> Self {
        let status = if app.ignored {
            Status::Ignored
        } else if app.has_update(os_version) {
            Status::UpdateAvailable
        } else if app.pending_check {
            Status::Pending
        } else {
            match &app.result {
                Some(Ok(_)) => Status::UpToDate,
                Some(Err(_)) => Status::Failed,
                None => Status::Unchecked,
            }
        };
        let update = app.update();
        Self {
            name: app.bundle.name.clone(),
            identifier: app.bundle.identifier.clone(),
            path: app.bundle.path.clone(),
            installed: app.bundle.version.clone(),
            source: app.bundle.source,
            status,
            remote_version: update.map(|update| update.remote_version.clone()),
            minimum_os: update.and_then(|update| update.minimum_os.clone()),
            release_date: update.and_then(|update| update.release_date),
            action: update.map(|update| update.action.clone()),
            error: app.error().map(ToString::to_string),
        }
    }
}

struct Palette {
    name: Style,
    update: Style,
    dim: Style,
    error: Style,
}

impl Palette {
    fn detect() -> Self {
        if supports_color::on(supports_color::Stream::Stdout).is_some() {
            Self {
                name: Style::new().bold(),
                update: Style::new().green(),
                dim: Style::new().dimmed(),
                error: Style::new().red(),
            }
        } else {
            Self {
                name: Style::new(),
                update: Style::new(),
                dim: Style::new(),
                error: Style::new(),
            }
        }
    }
}

fn print_text(reports: &[AppReport], all: bool) {
    if reports.is_empty() {
        if all {
            println!("No applications found.");
        } else {
            println!("All applications are up to date.");
        }
        return;
    }

    let palette = Palette::detect();
    for report in reports {
        let detail = match report.status {
            Status::UpdateAvailable => {
                let remote = report
                    .remote_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("{} -> {}", report.installed, remote)
                    .style(palette.update)
                    .to_string()
            }
            Status::Pending => format!("{} (update pending)", report.installed)
                .style(palette.update)
                .to_string(),
            Status::Failed => format!(
                "{} ({})",
                report.installed,
                report.error.as_deref().unwrap_or("check failed")
            )
            .style(palette.error)
            .to_string(),
            Status::Ignored => format!("{} (ignored)", report.installed)
                .style(palette.dim)
                .to_string(),
            Status::UpToDate | Status::Unchecked => report.installed.to_string(),
        };
        println!(
            "{}  {}  {}",
            report.name.style(palette.name),
            detail,
            format!("[{}]", report.source.label()).style(palette.dim)
        );
        if report.status == Status::UpdateAvailable {
            if let Some(UpdateAction::External { mechanism, locator }) = &report.action {
                match locator {
                    Some(locator) => println!("    via {mechanism}: {locator}"),
                    None => println!("    via {mechanism}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uptick_core::Bundle;
    use uptick_core::Update;
    use uptick_core::error::CheckError;

    fn app(result: Option<Result<Update, CheckError>>) -> App {
        let bundle = Bundle::new(
            "/Applications/Example.app",
            "Example",
            "com.example",
            Version::from_version("1.0"),
            Source::PackageCask,
        );
        App {
            bundle,
            result,
            ignored: false,
            pending_check: false,
        }
    }

    fn update(version: &str) -> Update {
        Update::new(
            Version::from_version(version),
            Source::PackageCask,
            UpdateAction::External {
                mechanism: "brew".to_string(),
                locator: Some("example".to_string()),
            },
        )
    }

    #[test]
    fn status_reflects_result() {
        let newer = AppReport::new(&app(Some(Ok(update("2.0")))), None);
        assert_eq!(newer.status, Status::UpdateAvailable);
        assert_eq!(newer.remote_version, Some(Version::from_version("2.0")));

        let same = AppReport::new(&app(Some(Ok(update("1.0")))), None);
        assert_eq!(same.status, Status::UpToDate);

        let failed = AppReport::new(&app(Some(Err(CheckError::Cancelled))), None);
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.error.as_deref(), Some("update check was cancelled"));

        let unchecked = AppReport::new(&app(None), None);
        assert_eq!(unchecked.status, Status::Unchecked);

        let mut ignored = app(Some(Ok(update("2.0"))));
        ignored.ignored = true;
        assert_eq!(AppReport::new(&ignored, None).status, Status::Ignored);
    }

    #[test]
    fn json_report_uses_kebab_case_status() {
        let report = AppReport::new(&app(Some(Ok(update("2.0")))), None);
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["status"], "update-available");
        assert_eq!(json["source"], "package-cask");
        assert_eq!(json["action"]["mechanism"], "brew");
        assert!(json.get("error").is_none());
    }
}
