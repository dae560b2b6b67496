mod io;
mod stats;
mod types;

pub(in crate::distributed) use io::{read_message, send_message};
pub(in crate::distributed) use stats::WireStatistics;
pub(in crate::distributed) use types::*;
