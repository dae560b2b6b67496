use crate::error::AppError;

use crate::distributed::protocol::{ControlMessage, InitMessage};

pub(super) enum AgentCommand {
    Registered,
    Init(Box<InitMessage>),
    Control(ControlMessage),
    Error(AppError),
    Disconnected(AppError),
}
