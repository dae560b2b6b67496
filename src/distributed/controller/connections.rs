use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::agent::accept_agent;
use super::control::ControlCommand;
use super::control_http::handle_control_connection;
use super::events::{AgentRef, AgentStatistics, ControllerEvent};
use crate::distributed::protocol::{ErrorMessage, RegisteredMessage, WireMessage, read_message, send_message};

pub(super) async fn accept_agents(
    listener: TcpListener,
    auth_token: Option<String>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
) {
    let connections = Arc::new(AtomicU64::new(0));
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept agent: {}", err);
                continue;
            }
        };
        let connection = connections.fetch_add(1, Ordering::Relaxed);
        let event_tx = event_tx.clone();
        let auth_token = auth_token.clone();
        tokio::spawn(async move {
            register_agent(stream, connection, auth_token.as_deref(), event_tx).await;
        });
    }
}

/// Handshake with one agent, then pump its messages into the controller
/// loop until the socket closes.
async fn register_agent(
    stream: TcpStream,
    connection: u64,
    auth_token: Option<&str>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
) {
    if let Ok(peer) = stream.peer_addr() {
        info!("Agent connection from {}", peer);
    }
    let conn = match accept_agent(stream, auth_token).await {
        Ok(conn) => conn,
        Err(err) => {
            warn!("Agent rejected: {}", err);
            return;
        }
    };
    let agent = AgentRef {
        agent_id: conn.hello.agent_id.clone(),
        connection,
    };
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let (respond_to, registration) = oneshot::channel();
    if event_tx
        .send(ControllerEvent::Connected {
            agent: agent.clone(),
            hello: conn.hello,
            sender: out_tx,
            respond_to,
        })
        .is_err()
    {
        return;
    }

    let mut writer = conn.writer;
    let reply = match registration.await {
        Ok(Ok(())) => WireMessage::Registered(RegisteredMessage {
            agent_id: agent.agent_id.clone(),
        }),
        Ok(Err(err)) => {
            warn!("Agent {} rejected: {}", agent.agent_id, err);
            WireMessage::Error(ErrorMessage {
                message: err.to_string(),
            })
        }
        Err(_) => return,
    };
    let accepted = matches!(reply, WireMessage::Registered(_));
    if send_message(&mut writer, &reply).await.is_err() || !accepted {
        return;
    }

    let event_tx_writer = event_tx.clone();
    let agent_writer = agent.clone();
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(err) = send_message(&mut writer, &message).await {
                if event_tx_writer
                    .send(ControllerEvent::Disconnected {
                        agent: agent_writer.clone(),
                        message: err.to_string(),
                    })
                    .is_err()
                {
                    // Controller loop is gone; nothing left to notify.
                }
                break;
            }
        }
    });

    let mut reader = conn.reader;
    loop {
        let message = match read_message(&mut reader).await {
            Ok(message) => message,
            Err(err) => {
                if event_tx
                    .send(ControllerEvent::Disconnected {
                        agent: agent.clone(),
                        message: err.to_string(),
                    })
                    .is_err()
                {
                    // Controller loop is gone; nothing left to notify.
                }
                break;
            }
        };
        let event = into_event(&agent, message);
        if event_tx.send(event).is_err() {
            break;
        }
    }
}

fn into_event(agent: &AgentRef, message: WireMessage) -> ControllerEvent {
    let agent = agent.clone();
    match message {
        WireMessage::Heartbeat(_) => ControllerEvent::Heartbeat { agent },
        WireMessage::InitAck(message) => ControllerEvent::InitAck {
            agent,
            run_id: message.run_id,
        },
        WireMessage::InitFailed(message) => ControllerEvent::InitFailed {
            agent,
            run_id: message.run_id,
            message: message.message,
        },
        WireMessage::Status(message) => ControllerEvent::Status {
            agent,
            run_id: message.run_id,
            phase: message.phase,
            status: message.status,
        },
        WireMessage::Stats(message) => {
            let message = *message;
            match message.statistics.into_snapshot() {
                Ok(snapshot) => ControllerEvent::Stats {
                    agent,
                    statistics: Box::new(AgentStatistics {
                        run_id: message.run_id,
                        phase: message.phase,
                        sequence: message.sequence,
                        report_seq: message.report_seq,
                        snapshot,
                    }),
                },
                Err(err) => ControllerEvent::Error {
                    agent,
                    message: format!("Invalid statistics payload: {err}"),
                },
            }
        }
        WireMessage::Error(message) => ControllerEvent::Error {
            agent,
            message: message.message,
        },
        WireMessage::Hello(_)
        | WireMessage::Registered(_)
        | WireMessage::Init(_)
        | WireMessage::Control(_) => ControllerEvent::Error {
            agent,
            message: "Unexpected message from agent.".to_owned(),
        },
    }
}

pub(super) async fn accept_control_connections(
    listener: TcpListener,
    auth_token: Option<String>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
) {
    loop {
        let (socket, _) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept control connection: {}", err);
                continue;
            }
        };
        let control_tx = control_tx.clone();
        let auth_token = auth_token.clone();
        tokio::spawn(async move {
            handle_control_connection(socket, auth_token.as_deref(), control_tx).await;
        });
    }
}
