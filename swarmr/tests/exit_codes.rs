use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use swarmr_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn write_config(dir: &Path, name: &str, text: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn config(server: &str, scenario: &str, settings: &str) -> String {
    format!(
        "connectionSettings:
  server: {server}
scheduler:
  type: simple
  settings:
    concurrentUsers: 2
    iterations: 2
scenario:
{scenario}
settings:
  statusInterval: 0
{settings}"
    )
}

async fn run_swarmr(args: Vec<String>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_swarmr");
    tokio::task::spawn_blocking(move || Command::new(exe).args(&args).output())
        .await
        .context("spawn_blocking join")?
        .context("run swarmr binary")
}

fn describe(out: &Output) -> String {
    format!(
        "exit code {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_swarmr"))
        .arg("execute")
        .arg("-c")
        .arg("./does-not-matter.yaml")
        .arg("--summary")
        .arg("loud")
        .output()
        .context("run swarmr binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[test]
fn missing_config_exits_30() -> anyhow::Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_swarmr"))
        .args(["validate", "-c", "./no-such-config.yaml"])
        .output()
        .context("run swarmr binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("failed to read run config"),
        "{}",
        describe(&out)
    );
    Ok(())
}

#[tokio::test]
async fn successful_run_exits_0_and_prints_the_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.yaml",
        &config(
            server.ws_url(),
            "  - action: openapp\n    label: open\n    settings:\n      appId: sales\n  - action: request\n    settings:\n      method: Echo\n",
            "  summary: full\n  statistics: full\n",
        ),
    )?;

    let out = run_swarmr(vec![
        "execute".to_string(),
        "-c".to_string(),
        path.display().to_string(),
    ])
    .await?;
    let connections = server.stats().connections_total();
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));
    anyhow::ensure!(connections == 4, "expected 4 sessions, got {connections}");

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("  errors: 0"), "{}", describe(&out));
    anyhow::ensure!(stdout.contains("  sessions: 4"), "{}", describe(&out));
    anyhow::ensure!(
        stdout.contains("openapp label=open target=sales ok=4 fail=0"),
        "{}",
        describe(&out)
    );
    anyhow::ensure!(stdout.contains("Echo path=/app ok=4"), "{}", describe(&out));
    Ok(())
}

#[tokio::test]
async fn failed_actions_exit_20() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.yaml",
        &config(
            server.ws_url(),
            "  - action: request\n    settings:\n      method: Fail\n",
            "",
        ),
    )?;

    let out = run_swarmr(vec![
        "execute".to_string(),
        "-c".to_string(),
        path.display().to_string(),
        "--summary".to_string(),
        "simple".to_string(),
    ])
    .await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 20, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stdout).contains("  errors: 4"),
        "{}",
        describe(&out)
    );
    Ok(())
}

#[tokio::test]
async fn summary_none_prints_nothing() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.json",
        &format!(
            r#"{{"connectionSettings": {{"server": "{}"}},
                "scheduler": {{"settings": {{"concurrentUsers": 1}}}},
                "scenario": [{{"action": "request", "settings": {{"method": "Echo"}}}}],
                "settings": {{"summary": "none", "statusInterval": 0}}}}"#,
            server.ws_url()
        ),
    )?;

    let out = run_swarmr(vec![
        "execute".to_string(),
        "-c".to_string(),
        path.display().to_string(),
    ])
    .await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));
    anyhow::ensure!(out.stdout.is_empty(), "{}", describe(&out));
    Ok(())
}

#[test]
fn invalid_scheduler_settings_exit_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.yaml",
        "connectionSettings:\n  server: ws://127.0.0.1:9/app\nscheduler:\n  settings:\n    concurrentUsers: 0\nscenario:\n  - action: request\n    settings:\n      method: Echo\n",
    )?;

    let out = Command::new(env!("CARGO_BIN_EXE_swarmr"))
        .arg("execute")
        .arg("-c")
        .arg(&path)
        .output()
        .context("run swarmr binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("concurrentUsers"),
        "{}",
        describe(&out)
    );
    Ok(())
}

#[test]
fn unknown_action_exits_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.yaml",
        "connectionSettings:\n  server: ws://127.0.0.1:9/app\nscenario:\n  - action: teleport\n",
    )?;

    let out = Command::new(env!("CARGO_BIN_EXE_swarmr"))
        .arg("validate")
        .arg("-c")
        .arg(&path)
        .output()
        .context("run swarmr binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("teleport"),
        "{}",
        describe(&out)
    );
    Ok(())
}

#[test]
fn validate_prints_warnings_and_exits_0() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "run.yaml",
        "connectionSettings:\n  server: ws://127.0.0.1:9/app\nscheduler:\n  settings:\n    concurrentUsers: 3\n    iterations: -1\nscenario:\n  - action: thinktime\n    settings:\n      type: static\n  - action: request\n    disabled: true\n    settings:\n      method: Echo\n",
    )?;

    let out = Command::new(env!("CARGO_BIN_EXE_swarmr"))
        .arg("validate")
        .arg("-c")
        .arg(&path)
        .output()
        .context("run swarmr binary")?;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("warning:"), "{}", describe(&out));
    anyhow::ensure!(
        stdout.contains("config ok: 3 user(s), 1 action(s)"),
        "{}",
        describe(&out)
    );
    Ok(())
}
