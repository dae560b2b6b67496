use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::DefinitionFormat;
use crate::error::DistributedError;

use super::http::AdminRequest;

/// Administrative operations, one per route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ControlRequest {
    ListBenchmarks,
    CreateBenchmark {
        definition: String,
        format: DefinitionFormat,
    },
    GetBenchmark { name: String },
    StartBenchmark { name: String },
    ListAgents,
    ListRuns,
    GetRun { run_id: String },
    KillRun { run_id: String },
}

#[derive(Debug)]
pub(super) struct ControlError {
    pub(super) status: u16,
    pub(super) message: String,
}

impl ControlError {
    pub(super) fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<DistributedError> for ControlError {
    fn from(err: DistributedError) -> Self {
        let status = if matches!(
            err,
            DistributedError::BenchmarkNotFound { .. } | DistributedError::RunNotFound { .. }
        ) {
            404
        } else if matches!(
            err,
            DistributedError::BenchmarkExists { .. }
                | DistributedError::NoAgents { .. }
                | DistributedError::NotEnoughAgents { .. }
        ) {
            409
        } else {
            400
        };
        Self::new(status, err.to_string())
    }
}

pub(super) type ControlReply = Result<Value, ControlError>;

pub(super) struct ControlCommand {
    pub(super) request: ControlRequest,
    pub(super) respond_to: oneshot::Sender<ControlReply>,
}

/// Map a request onto a control request. Reads are `GET`; starting and
/// killing also accept `POST`; `POST /benchmark` uploads a definition.
pub(super) fn route(request: &AdminRequest) -> Option<ControlRequest> {
    let method = request.method.as_str();
    let path = request
        .path
        .split_once('?')
        .map_or(request.path.as_str(), |(path, _query)| path);
    let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    let control = match (method, segments.as_slice()) {
        ("POST", ["benchmark"]) => ControlRequest::CreateBenchmark {
            definition: request.body.clone(),
            format: DefinitionFormat::from_content_type(request.content_type()),
        },
        ("GET", ["benchmark"]) => ControlRequest::ListBenchmarks,
        ("GET", ["benchmark", name]) => ControlRequest::GetBenchmark {
            name: (*name).to_owned(),
        },
        ("GET" | "POST", ["benchmark", name, "start"]) => ControlRequest::StartBenchmark {
            name: (*name).to_owned(),
        },
        ("GET", ["agents"]) => ControlRequest::ListAgents,
        ("GET", ["run"]) => ControlRequest::ListRuns,
        ("GET", ["run", run_id]) => ControlRequest::GetRun {
            run_id: (*run_id).to_owned(),
        },
        ("GET" | "POST", ["run", run_id, "kill"]) => ControlRequest::KillRun {
            run_id: (*run_id).to_owned(),
        },
        _ => return None,
    };
    Some(control)
}
