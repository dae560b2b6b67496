//! Benchmark definition loading: TOML/JSON files are parsed into the raw
//! `types` structs, then checked and turned into `model::Benchmark`.
mod benchmark;
mod loader;
mod parse;
pub mod types;


pub use benchmark::build_benchmark;
pub use loader::{
    DefinitionFormat, load_benchmark_dir, load_benchmark_file, load_benchmarks,
    parse_benchmark_definition,
};

pub(crate) use parse::parse_duration_value;
