//! Results folder: one JSON artifact per prompt plus `report.html`

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use eval_core::RunArtifact;

pub const REPORT_FILE: &str = "report.html";

/// Folder name for a run started at `started` (`YYYY-MM-DD_HH-MM`, UTC)
pub fn folder_name(started: DateTime<Utc>) -> String {
    started.format("%Y-%m-%d_%H-%M").to_string()
}

/// Create `<base>/<YYYY-MM-DD_HH-MM>` and return its path
pub fn create_run_dir(base: &Path, started: DateTime<Utc>) -> anyhow::Result<PathBuf> {
    let dir = base.join(folder_name(started));
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create results folder {}", dir.display()))?;
    Ok(dir)
}

/// Write an artifact as `<slug>.json`
pub fn save_artifact(dir: &Path, artifact: &RunArtifact) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{}.json", artifact.prompt.slug));
    let json = serde_json::to_string_pretty(artifact)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Result saved");
    Ok(path)
}

/// Read every `*.json` artifact in `dir`, ordered by file name.
///
/// Files that do not parse as an artifact are skipped with a warning.
pub fn load_artifacts(dir: &Path) -> anyhow::Result<Vec<RunArtifact>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read results folder {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<RunArtifact>(&raw).map_err(anyhow::Error::from));
        match parsed {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable result file"),
        }
    }
    Ok(artifacts)
}

/// Write the rendered report as `report.html`
pub fn save_report(dir: &Path, html: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(REPORT_FILE);
    std::fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Report saved");
    Ok(path)
}
