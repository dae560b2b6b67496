use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Remote error: {message}")]
    Remote { message: String },
    #[error("Registration rejected by controller: {message}")]
    RegistrationRejected { message: String },
    #[error("Agent already present")]
    AgentAlreadyPresent,
    #[error("Agent already initialized")]
    AgentAlreadyInitialized,
    #[error("Timed out waiting for agent hello.")]
    AgentHelloTimeout,
    #[error("Expected hello from agent.")]
    ExpectedHelloFromAgent,
    #[error("Timed out waiting for controller registration.")]
    RegistrationTimeout,
    #[error("Invalid auth token.")]
    InvalidAuthToken,
    #[error("Unexpected message from controller.")]
    UnexpectedMessageFromController,
    #[error("Controller connection closed.")]
    ControllerConnectionClosed,
    #[error("Control channel closed.")]
    ControlChannelClosed,
    #[error("Agent event channel closed.")]
    AgentEventChannelClosed,
    #[error("Benchmark '{name}' not found.")]
    BenchmarkNotFound { name: String },
    #[error("Run '{run_id}' not found.")]
    RunNotFound { run_id: String },
    #[error("Benchmark '{name}' already exists.")]
    BenchmarkExists { name: String },
    #[error("Benchmark name '{name}' cannot be stored; use letters, digits, '-', '_' and '.'.")]
    InvalidBenchmarkName { name: String },
    #[error("No registered agents available to run '{benchmark}'.")]
    NoAgents { benchmark: String },
    #[error("Benchmark '{benchmark}' needs {required} agents, {available} available.")]
    NotEnoughAgents {
        benchmark: String,
        required: usize,
        available: usize,
    },
    #[error("Run '{run_id}' was killed: {reason}")]
    RunKilled { run_id: String, reason: String },
    #[error("Controller stopped before the run completed.")]
    ControllerStopped,
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
