use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::info;

use crate::error::{AppError, AppResult, DistributedError};

use super::super::protocol::{ErrorMessage, HelloMessage, WireMessage, read_message, send_message};

pub(super) struct AgentConn {
    pub(super) hello: HelloMessage,
    pub(super) reader: BufReader<OwnedReadHalf>,
    pub(super) writer: OwnedWriteHalf,
}

const AGENT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Read the agent's hello and check its auth token.
pub(super) async fn accept_agent(
    stream: TcpStream,
    auth_token: Option<&str>,
) -> AppResult<AgentConn> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let hello = match timeout(AGENT_HELLO_TIMEOUT, read_message(&mut reader)).await {
        Ok(result) => match result? {
            WireMessage::Hello(message) => message,
            WireMessage::Error(message) => {
                return Err(AppError::distributed(DistributedError::Remote {
                    message: message.message,
                }));
            }
            WireMessage::Registered(_)
            | WireMessage::Init(_)
            | WireMessage::InitAck(_)
            | WireMessage::InitFailed(_)
            | WireMessage::Control(_)
            | WireMessage::Status(_)
            | WireMessage::Stats(_)
            | WireMessage::Heartbeat(_) => {
                return Err(AppError::distributed(
                    DistributedError::ExpectedHelloFromAgent,
                ));
            }
        },
        Err(_) => {
            return Err(AppError::distributed(DistributedError::AgentHelloTimeout));
        }
    };

    if let Some(expected) = auth_token {
        let provided = hello.auth_token.as_deref().unwrap_or("");
        if provided != expected {
            send_message(
                &mut write_half,
                &WireMessage::Error(ErrorMessage {
                    message: "Invalid auth token.".to_owned(),
                }),
            )
            .await?;
            return Err(AppError::distributed(DistributedError::InvalidAuthToken));
        }
    }

    info!("Hello from agent {} at {}", hello.agent_id, peer);
    Ok(AgentConn {
        hello,
        reader,
        writer: write_half,
    })
}
