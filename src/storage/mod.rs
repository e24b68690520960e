//! Run artifacts on disk
//!
//! A finished run produces the best system prompt, the final critique
//! prompt, the full JSON report and a markdown summary, all sharing one
//! timestamp. Runs that did not complete get a `partial_` file name prefix.
//! Every file is written to a temporary sibling and renamed into place.

use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{InputFiles, OutputSettings};
use crate::optimizer::report::RunReport;
use crate::optimizer::state::OptimizationState;
use crate::optimizer::RunObserver;
use crate::{Error, Result};

const PARTIAL_PREFIX: &str = "partial_";

/// Paths written by [`ArtifactStore::save_report`]
#[derive(Debug, Clone, PartialEq)]
pub struct SavedArtifacts {
    pub system_prompt: PathBuf,
    pub critique_prompt: PathBuf,
    pub results: PathBuf,
    pub summary: PathBuf,
}

impl SavedArtifacts {
    pub fn all(&self) -> [&Path; 4] {
        [
            self.system_prompt.as_path(),
            self.critique_prompt.as_path(),
            self.results.as_path(),
            self.summary.as_path(),
        ]
    }
}

#[derive(Serialize)]
struct Snapshot<'a> {
    iteration: u32,
    score: Option<u32>,
    best_score: Option<u32>,
    iterations_since_improvement: u32,
    evaluated_system_prompt: Option<&'a str>,
    current_system_prompt: &'a str,
    current_critique_prompt: &'a str,
    timestamp: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    directory: PathBuf,
    prefix: String,
    timestamp: String,
}

impl ArtifactStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn from_settings(settings: &OutputSettings) -> Self {
        Self::new(&settings.directory, &settings.prefix)
    }

    /// Pin the timestamp used in file names
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persist the final artifacts of a run, partial or not
    pub fn save_report(&self, report: &RunReport) -> Result<SavedArtifacts> {
        fs::create_dir_all(&self.directory)?;
        let ts = &self.timestamp;
        let partial = if report.is_partial() { PARTIAL_PREFIX } else { "" };

        let saved = SavedArtifacts {
            system_prompt: self.path(format!("{partial}improved_system_prompt_{ts}.txt")),
            critique_prompt: self.path(format!("{partial}improved_critique_prompt_{ts}.txt")),
            results: self.path(format!("{partial}{}_results_{ts}.json", self.prefix)),
            summary: self.path(format!("{partial}summary_report_{ts}.md")),
        };

        write_atomic(&saved.system_prompt, &report.best_system_prompt().text)?;
        write_atomic(&saved.critique_prompt, &report.final_critique_prompt().text)?;
        write_atomic(&saved.results, &serde_json::to_string_pretty(report)?)?;
        write_atomic(&saved.summary, &report.summary_markdown())?;

        info!("💾 Saved run artifacts to {}", self.directory.display());
        Ok(saved)
    }

    /// Persist the state after one loop pass
    pub fn save_snapshot(&self, state: &OptimizationState) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path(format!(
            "intermediate_result_iter_{}_{}.json",
            state.iteration_count, self.timestamp
        ));

        let snapshot = Snapshot {
            iteration: state.iteration_count,
            score: state.latest_score(),
            best_score: state.best_score(),
            iterations_since_improvement: state.iterations_since_improvement,
            evaluated_system_prompt: state.latest_evaluation().map(|r| r.system_prompt.as_str()),
            current_system_prompt: &state.system_prompt.current.text,
            current_critique_prompt: &state.critique_prompt.current.text,
            timestamp: Local::now().to_rfc3339(),
        };
        write_atomic(&path, &serde_json::to_string_pretty(&snapshot)?)?;
        Ok(path)
    }

    fn path(&self, name: String) -> PathBuf {
        self.directory.join(name)
    }
}

/// Writes an intermediate snapshot after every loop pass.
///
/// Snapshot failures are logged and never stop the run.
pub struct SnapshotObserver {
    store: ArtifactStore,
}

impl SnapshotObserver {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

impl RunObserver for SnapshotObserver {
    fn on_iteration(&self, state: &OptimizationState) {
        if let Err(e) = self.store.save_snapshot(state) {
            warn!(
                "Failed to save snapshot for iteration {}: {e}",
                state.iteration_count
            );
        }
    }
}

/// The three texts a run starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub task: String,
    pub system_prompt: String,
    pub critique_prompt: String,
}

impl RunInputs {
    /// Read every input file, reporting all unreadable or empty ones at once
    pub fn read(files: &InputFiles) -> Result<Self> {
        let mut problems = Vec::new();
        let mut read = |label: &str, path: &Path| match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => {
                problems.push(format!("{label} file {} is empty", path.display()));
                String::new()
            }
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                problems.push(format!("Cannot read {label} file {}: {e}", path.display()));
                String::new()
            }
        };

        let inputs = Self {
            task: read("task", &files.task),
            system_prompt: read("system prompt", &files.system_prompt),
            critique_prompt: read("critique prompt", &files.critique_prompt),
        };

        if problems.is_empty() {
            Ok(inputs)
        } else {
            Err(Error::Configuration(problems))
        }
    }
}

/// Write to a temporary sibling, then rename over `path`
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp, contents)?;
    fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::optimizer::decision::{Phase, StopReason};
    use crate::optimizer::report::Termination;
    use crate::testing::fixtures::{state_with_scores, write_inputs, TASK};
    use tempfile::TempDir;

    fn report(termination: Termination) -> RunReport {
        RunReport::new(
            state_with_scores(&[60, 80, 70]),
            termination,
            &OptimizerConfig::default(),
        )
    }

    #[test]
    fn test_completed_run_file_names() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path(), "exp").with_timestamp("20250101_120000");
        let saved = store
            .save_report(&report(Termination::Completed {
                stop: StopReason::MaxIterations { limit: 3 },
            }))
            .unwrap();

        assert!(saved
            .results
            .ends_with("exp_results_20250101_120000.json"));
        assert!(saved.all().iter().all(|p| p.exists()));

        // the best prompt, not the last one
        let best = fs::read_to_string(&saved.system_prompt).unwrap();
        assert!(best.ends_with("(revision 1)"));
    }

    #[test]
    fn test_partial_run_is_marked() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path().join("out"), "exp").with_timestamp("ts");
        let saved = store
            .save_report(&report(Termination::Aborted {
                phase: Phase::RefiningSystem,
            }))
            .unwrap();

        for path in saved.all() {
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("partial_"), "{name}");
        }
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&saved.results).unwrap()).unwrap();
        assert_eq!(json["partial"], true);
    }

    #[test]
    fn test_snapshot_contents() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path(), "exp").with_timestamp("ts");
        let state = state_with_scores(&[55, 65]);

        let path = store.save_snapshot(&state).unwrap();
        assert!(path.ends_with("intermediate_result_iter_2_ts.json"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["iteration"], 2);
        assert_eq!(json["score"], 65);
        assert_eq!(json["best_score"], 65);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.txt");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_inputs() {
        let temp = TempDir::new().unwrap();
        let files = write_inputs(temp.path()).unwrap().as_input_files();
        let inputs = RunInputs::read(&files).unwrap();
        assert_eq!(inputs.task, TASK);
    }

    #[test]
    fn test_read_inputs_reports_every_problem() {
        let temp = TempDir::new().unwrap();
        let set = write_inputs(temp.path()).unwrap();
        fs::write(&set.system_prompt, "\n").unwrap();
        fs::remove_file(&set.critique_prompt).unwrap();

        match RunInputs::read(&set.as_input_files()) {
            Err(Error::Configuration(problems)) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("is empty"));
                assert!(problems[1].starts_with("Cannot read critique prompt file"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
