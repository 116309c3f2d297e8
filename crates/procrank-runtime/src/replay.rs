//! `procrank replay`: feed a recorded scenario through the launcher task.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use procrank_core::LauncherConfig;
use procrank_core::launcher::{LauncherCommand, LauncherSnapshot};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::cli::ReplayOpts;
use crate::launcher_task::{self, LauncherHandle};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub description: String,
    /// Used when no config file is given on the command line.
    #[serde(default)]
    pub config: Option<LauncherConfig>,
    pub steps: Vec<ScenarioStep>,
}

/// Extra fields (such as test expectations) are ignored.
#[derive(Debug, Deserialize)]
pub struct ScenarioStep {
    pub at_ms: u64,
    pub command: LauncherCommand,
}

/// One emitted line of replay output.
#[derive(Debug, Serialize)]
pub struct StepOutput<'a> {
    pub ts: DateTime<Utc>,
    pub scenario: &'a str,
    pub step: usize,
    pub command: &'a LauncherCommand,
    pub snapshot: LauncherSnapshot,
}

pub fn parse_scenario(content: &str) -> anyhow::Result<Scenario> {
    let scenario: Scenario = serde_json::from_str(content)?;
    if let Some(i) = scenario
        .steps
        .windows(2)
        .position(|w| w[1].at_ms < w[0].at_ms)
    {
        anyhow::bail!(
            "scenario '{}': step {} goes back in time ({} < {})",
            scenario.name,
            i + 1,
            scenario.steps[i + 1].at_ms,
            scenario.steps[i].at_ms
        );
    }
    if let Some(config) = &scenario.config {
        config.validate()?;
    }
    Ok(scenario)
}

pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    parse_scenario(&content).with_context(|| format!("invalid scenario {}", path.display()))
}

/// Send every step to the launcher, handing each resulting snapshot to `emit`.
///
/// Returns the number of steps applied; a ctrl-c during a realtime wait stops
/// the replay early.
pub async fn drive(
    handle: &LauncherHandle,
    scenario: &Scenario,
    realtime: bool,
    mut emit: impl FnMut(StepOutput<'_>) -> anyhow::Result<()>,
) -> anyhow::Result<usize> {
    let mut last_at_ms = scenario.steps.first().map_or(0, |s| s.at_ms);
    let mut applied = 0;
    for (i, step) in scenario.steps.iter().enumerate() {
        if realtime && step.at_ms > last_at_ms {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(step.at_ms - last_at_ms)) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received ctrl-c, stopping replay");
                    break;
                }
            }
        }
        last_at_ms = step.at_ms;

        let snapshot = handle
            .apply(step.at_ms, step.command.clone())
            .await
            .with_context(|| format!("step {i} ({:?}) failed", step.command))?;
        emit(StepOutput {
            ts: Utc::now(),
            scenario: &scenario.name,
            step: i,
            command: &step.command,
            snapshot,
        })?;
        applied += 1;
    }
    Ok(applied)
}

fn render(output: &StepOutput<'_>, pretty: bool) -> anyhow::Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    })
}

pub async fn run_replay(config: Option<LauncherConfig>, opts: &ReplayOpts) -> anyhow::Result<()> {
    let scenario = load_scenario(&opts.scenario)?;
    let config = config
        .or_else(|| scenario.config.clone())
        .unwrap_or_default();
    tracing::info!(
        scenario = %scenario.name,
        steps = scenario.steps.len(),
        realtime = opts.realtime,
        "replay starting"
    );

    let start_ms = scenario.steps.first().map_or(0, |s| s.at_ms);
    let (handle, task) = launcher_task::spawn(config, start_ms);
    let applied = drive(&handle, &scenario, opts.realtime, |output| {
        println!("{}", render(&output, opts.pretty)?);
        Ok(())
    })
    .await?;

    let last = handle.shutdown().await?;
    task.await?;
    tracing::info!(
        scenario = %scenario.name,
        applied,
        connections = last.ranking.len(),
        tracked = last.tracked.len(),
        "replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use procrank_core::ConnectionId;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/scenarios")
            .join(name)
    }

    #[test]
    fn parses_minimal_scenario() {
        let scenario = parse_scenario(
            r#"{"name":"min","steps":[{"at_ms":0,"command":{"type":"connection_established","id":1}}]}"#,
        )
        .unwrap();
        assert_eq!(scenario.name, "min");
        assert!(scenario.config.is_none());
        assert_eq!(scenario.steps.len(), 1);
    }

    #[test]
    fn rejects_steps_going_back_in_time() {
        let err = parse_scenario(
            r#"{"name":"rewind","steps":[
                {"at_ms":10,"command":{"type":"tick"}},
                {"at_ms":5,"command":{"type":"tick"}}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("back in time"));
    }

    #[test]
    fn rejects_invalid_embedded_config() {
        let result = parse_scenario(
            r#"{"name":"bad","config":{"binding_manager":{"max_size":0}},"steps":[]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn loads_fixture_with_expectations() {
        let scenario = load_scenario(&fixture("capacity_eviction.json")).unwrap();
        assert_eq!(scenario.name, "capacity_eviction");
        assert_eq!(
            scenario.config.unwrap().binding_manager.max_size,
            Some(2)
        );
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_scenario(Path::new("/nonexistent/scenario.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scenario.json"));
    }

    #[tokio::test]
    async fn drive_emits_one_line_per_step() {
        let scenario = load_scenario(&fixture("capacity_eviction.json")).unwrap();
        let config = scenario.config.clone().unwrap();
        let (handle, task) = launcher_task::spawn(config, 0);

        let mut lines = Vec::new();
        let mut last = None;
        let applied = drive(&handle, &scenario, false, |output| {
            lines.push(render(&output, false)?);
            last = Some(output.snapshot);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(applied, scenario.steps.len());
        assert_eq!(lines.len(), scenario.steps.len());
        assert!(lines.iter().all(|l| !l.contains('\n')));
        let last = last.unwrap();
        assert_eq!(last.tracked, vec![ConnectionId(2)]);
        assert_eq!(last.waived, Some(ConnectionId(2)));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
