use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppError, AppResult, ConfigError};
use crate::model::Benchmark;

use super::benchmark::build_benchmark;
use super::types::BenchmarkFile;

/// Reads and validates one benchmark definition. A file without a `name`
/// takes its file stem.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or the
/// definition is invalid.
pub fn load_benchmark_file(path: &Path) -> AppResult<Benchmark> {
    let mut file = parse_benchmark_file(path)?;
    if file.name.is_none() {
        file.name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_owned);
    }
    let benchmark = build_benchmark(file).map_err(AppError::definition)?;
    debug!(
        "Loaded benchmark '{}' from {} ({} phases)",
        benchmark.name,
        path.display(),
        benchmark.phases.len()
    );
    Ok(benchmark)
}

/// Loads every `*.toml` and `*.json` file of `dir`, in file name order.
///
/// # Errors
///
/// Returns an error when the directory cannot be listed or any definition
/// fails to load.
pub fn load_benchmark_dir(dir: &Path) -> AppResult<Vec<Benchmark>> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        AppError::config(ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source: err,
        })
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            AppError::config(ConfigError::ReadDir {
                path: dir.to_path_buf(),
                source: err,
            })
        })?;
        let path = entry.path();
        let is_definition = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("toml" | "json")
        );
        if path.is_file() && is_definition {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|path| load_benchmark_file(path)).collect()
}

/// Loads the benchmark directory (if any) followed by the individual files.
/// Directories given as files are loaded like the benchmark directory.
///
/// # Errors
///
/// Returns an error when a definition fails to load or two definitions
/// share a name.
pub fn load_benchmarks(dir: Option<&Path>, files: &[PathBuf]) -> AppResult<Vec<Benchmark>> {
    let mut benchmarks = match dir {
        Some(dir) => load_benchmark_dir(dir)?,
        None => Vec::new(),
    };
    for path in files {
        if path.is_dir() {
            benchmarks.extend(load_benchmark_dir(path)?);
        } else {
            benchmarks.push(load_benchmark_file(path)?);
        }
    }

    let mut names = BTreeSet::new();
    for benchmark in &benchmarks {
        if !names.insert(benchmark.name.as_str()) {
            return Err(AppError::config(ConfigError::DuplicateBenchmark {
                name: benchmark.name.clone(),
            }));
        }
    }
    info!("Loaded {} benchmark definitions", benchmarks.len());
    Ok(benchmarks)
}

/// Serialization of a benchmark definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Toml,
    Json,
}

impl DefinitionFormat {
    /// A JSON media type selects JSON; anything else is read as TOML.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(value) if value.to_ascii_lowercase().contains("json") => Self::Json,
            Some(_) | None => Self::Toml,
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }

    fn from_path(path: &Path) -> AppResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
                ext: ext.to_owned(),
            })),
            None => Err(AppError::config(ConfigError::MissingExtension)),
        }
    }
}

/// Parses and validates a definition that did not come from a file, such
/// as an upload to the admin surface. The definition must carry a `name`.
///
/// # Errors
///
/// Returns an error when the text cannot be parsed or the definition is
/// invalid.
pub fn parse_benchmark_definition(content: &str, format: DefinitionFormat) -> AppResult<Benchmark> {
    let file = parse_definition(content, format, Path::new("<upload>"))?;
    build_benchmark(file).map_err(AppError::definition)
}

pub(crate) fn parse_benchmark_file(path: &Path) -> AppResult<BenchmarkFile> {
    let format = DefinitionFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    parse_definition(&content, format, path)
}

fn parse_definition(content: &str, format: DefinitionFormat, origin: &Path) -> AppResult<BenchmarkFile> {
    match format {
        DefinitionFormat::Toml => toml::from_str(content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: origin.to_path_buf(),
                source: err,
            })
        }),
        DefinitionFormat::Json => serde_json::from_str(content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: origin.to_path_buf(),
                source: err,
            })
        }),
    }
}
