use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, PersistenceError};
use crate::metrics::{StatisticsExport, write_statistics};
use crate::model::Benchmark;

use super::run::RunReport;

/// Everything written for a finished run, detached from controller state
/// so it can be persisted on a blocking thread.
#[derive(Debug)]
pub(super) struct FinalizeJob {
    pub(super) dir: PathBuf,
    pub(super) benchmark: Benchmark,
    pub(super) statistics: Option<StatisticsExport>,
    pub(super) report: RunReport,
}

impl FinalizeJob {
    /// Write `benchmark.json`, `stats/` and `report.json` under the run
    /// directory. Every artifact is attempted; the first failure is
    /// returned after the rest were written.
    pub(super) fn persist(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            AppError::persistence(PersistenceError::CreateDir {
                path: self.dir.clone(),
                source: err,
            })
        })?;
        let benchmark = write_json(&self.dir.join("benchmark.json"), &self.benchmark, "benchmark");
        let statistics = match self.statistics.as_ref() {
            Some(export) => write_statistics(export, &self.dir.join("stats")),
            None => {
                warn!("Run {} has no statistics to write", self.report.run_id);
                Ok(())
            }
        };
        let report = write_json(&self.dir.join("report.json"), &self.report, "run report");
        let mut first_error = None;
        for result in [benchmark, statistics, report] {
            if let Err(err) = result {
                warn!("Run {}: {}", self.report.run_id, err);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                info!(
                    "Run {} persisted to {}",
                    self.report.run_id,
                    self.dir.display()
                );
                Ok(())
            }
        }
    }
}

/// A benchmark uploaded through the admin surface, stored verbatim so the
/// next controller start loads it from the benchmark directory.
#[derive(Debug)]
pub(super) struct DefinitionWrite {
    pub(super) path: PathBuf,
    pub(super) content: String,
}

impl DefinitionWrite {
    /// Never replaces an existing file.
    pub(super) fn persist(&self) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|err| {
                AppError::persistence(PersistenceError::CreateDir {
                    path: dir.to_path_buf(),
                    source: err,
                })
            })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|err| {
                AppError::persistence(PersistenceError::Write {
                    path: self.path.clone(),
                    source: err,
                })
            })?;
        file.write_all(self.content.as_bytes()).map_err(|err| {
            AppError::persistence(PersistenceError::Write {
                path: self.path.clone(),
                source: err,
            })
        })?;
        info!("Stored benchmark definition {}", self.path.display());
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, context: &'static str) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|err| {
        AppError::persistence(PersistenceError::Serialize {
            context,
            source: err,
        })
    })?;
    std::fs::write(path, json).map_err(|err| {
        AppError::persistence(PersistenceError::Write {
            path: path.to_path_buf(),
            source: err,
        })
    })
}
