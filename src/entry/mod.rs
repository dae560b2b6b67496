mod plan;

use clap::Parser;

use crate::args::FleetArgs;
use crate::error::AppResult;
use plan::{build_plan, execute_plan};

/// Binary entry point: parse the command line, install logging and drive the
/// selected role on a multi-threaded runtime.
///
/// # Errors
///
/// Returns an error when the runtime cannot be built or the selected role
/// fails. Invalid arguments exit through clap.
pub fn run() -> AppResult<()> {
    let args = FleetArgs::parse();

    crate::logger::init_logging(args.verbose, args.no_color);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args))
}

async fn run_async(args: FleetArgs) -> AppResult<()> {
    let plan = build_plan(args)?;
    execute_plan(plan).await
}
