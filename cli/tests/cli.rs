use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use predicates::str::contains;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use tempfile::TempDir;

fn uptick_command(uptick_home: &Path) -> Result<assert_cmd::Command> {
    let mut cmd = assert_cmd::Command::cargo_bin("uptick")?;
    cmd.env("UPTICK_HOME", uptick_home);
    cmd.env("RUST_LOG", "off");
    Ok(cmd)
}

/// Points every remote source at a closed local port.
fn write_config(uptick_home: &Path, apps_dir: &Path) -> Result<()> {
    let config = format!(
        "application_dirs = ['{}']\n\
         catalog_url = 'http://127.0.0.1:9/cask.json'\n\
         exclusion_list_url = 'http://127.0.0.1:9/unsupported.plist'\n\
         lookup_url = 'http://127.0.0.1:9/lookup'\n\
         request_timeout_secs = 5\n",
        apps_dir.display()
    );
    fs::write(uptick_home.join("config.toml"), config)?;
    Ok(())
}

fn write_app(dir: &Path, file: &str, plist_body: &str) -> Result<PathBuf> {
    let app = dir.join(file);
    fs::create_dir_all(app.join("Contents"))?;
    let plist = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <plist version=\"1.0\"><dict>{plist_body}</dict></plist>\n"
    );
    fs::write(app.join("Contents").join("Info.plist"), plist)?;
    Ok(app)
}

fn read_preferences(uptick_home: &Path) -> Result<JsonValue> {
    let contents = fs::read_to_string(uptick_home.join("preferences.json"))?;
    Ok(serde_json::from_str(&contents)?)
}

#[test]
fn ignore_and_unignore_update_preferences() -> Result<()> {
    let uptick_home = TempDir::new()?;

    uptick_command(uptick_home.path())?
        .args(["ignore", "com.example.app"])
        .assert()
        .success()
        .stdout(contains("Ignoring updates for com.example.app"));
    let prefs = read_preferences(uptick_home.path())?;
    assert_eq!(prefs["ignored"], serde_json::json!(["com.example.app"]));

    uptick_command(uptick_home.path())?
        .args(["unignore", "com.example.app"])
        .assert()
        .success();
    let prefs = read_preferences(uptick_home.path())?;
    assert_eq!(prefs["ignored"], serde_json::json!([]));

    Ok(())
}

#[test]
fn ignore_rejects_blank_identifier() -> Result<()> {
    let uptick_home = TempDir::new()?;

    uptick_command(uptick_home.path())?
        .args(["ignore", "  "])
        .assert()
        .failure()
        .stderr(contains("bundle identifier must not be empty"));

    Ok(())
}

#[test]
fn check_reports_empty_application_directory() -> Result<()> {
    let uptick_home = TempDir::new()?;
    let apps = TempDir::new()?;
    write_config(uptick_home.path(), apps.path())?;

    uptick_command(uptick_home.path())?
        .arg("check")
        .assert()
        .success()
        .stdout(contains("All applications are up to date."));

    let output = uptick_command(uptick_home.path())?
        .args(["check", "--all", "--format", "json"])
        .output()?;
    assert!(output.status.success());
    let report: JsonValue = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report, serde_json::json!([]));

    Ok(())
}

#[test]
fn check_records_failed_feed_check() -> Result<()> {
    let uptick_home = TempDir::new()?;
    let apps = TempDir::new()?;
    write_config(uptick_home.path(), apps.path())?;
    write_app(
        apps.path(),
        "Feedy.app",
        "<key>CFBundleIdentifier</key><string>com.feedy</string>\
         <key>CFBundleName</key><string>Feedy</string>\
         <key>CFBundleShortVersionString</key><string>1.0</string>\
         <key>SUFeedURL</key><string>http://127.0.0.1:9/appcast.xml</string>",
    )?;

    let output = uptick_command(uptick_home.path())?
        .args(["check", "--all", "--format", "json"])
        .output()?;
    assert!(output.status.success());
    let report: JsonValue = serde_json::from_slice(&output.stdout)?;
    let apps = report.as_array().cloned().unwrap_or_default();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0]["name"], "Feedy");
    assert_eq!(apps[0]["source"], "vendor-feed");
    assert_eq!(apps[0]["status"], "failed");
    assert!(apps[0].get("remote_version").is_none());

    Ok(())
}

#[test]
fn resolve_without_info_plist_fails() -> Result<()> {
    let uptick_home = TempDir::new()?;
    let apps = TempDir::new()?;
    let bare = apps.path().join("Bare.app");
    fs::create_dir_all(&bare)?;

    uptick_command(uptick_home.path())?
        .arg("resolve")
        .arg(&bare)
        .assert()
        .failure()
        .stderr(contains("is not an application bundle"));

    Ok(())
}

#[test]
fn resolve_reports_no_match_when_catalog_is_unreachable() -> Result<()> {
    let uptick_home = TempDir::new()?;
    let apps = TempDir::new()?;
    write_config(uptick_home.path(), apps.path())?;
    let app = write_app(
        apps.path(),
        "Example.app",
        "<key>CFBundleIdentifier</key><string>com.example</string>\
         <key>CFBundleShortVersionString</key><string>2.1</string>",
    )?;

    uptick_command(uptick_home.path())?
        .arg("resolve")
        .arg(&app)
        .assert()
        .success()
        .stdout(contains("com.example"))
        .stdout(contains("no matching cask"));

    Ok(())
}
