use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, DistributedError};
use crate::session::RuntimeFactory;

use super::AgentOptions;
use super::command::AgentCommand;
use super::run_exec::{ActiveRun, RunContext, handle_init, next_run_signal};
use super::wire::{build_agent_id, build_hello, send_wire};
use crate::distributed::protocol::{HeartbeatMessage, WireMessage, read_message, send_message};
use crate::distributed::utils::current_time_ms;

pub(super) async fn run_agent_session(
    options: &AgentOptions,
    factory: &Arc<dyn RuntimeFactory>,
) -> AppResult<()> {
    let join = options.join.as_str();
    info!("Connecting to controller {}", join);
    let stream = TcpStream::connect(join).await.map_err(|err| {
        AppError::distributed(DistributedError::Connection {
            addr: join.to_owned(),
            source: err,
        })
    })?;
    info!("Connected to controller {}", join);
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if send_message(&mut write_half, &message).await.is_err() {
                break;
            }
        }
    });
    let mut reader = BufReader::new(read_half);

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<AgentCommand>();
    let reader_handle = tokio::spawn(async move {
        loop {
            let message = match read_message(&mut reader).await {
                Ok(message) => message,
                Err(err) => {
                    drop(cmd_tx.send(AgentCommand::Disconnected(err)));
                    break;
                }
            };

            let command = match message {
                WireMessage::Registered(_) => AgentCommand::Registered,
                WireMessage::Init(message) => AgentCommand::Init(message),
                WireMessage::Control(message) => AgentCommand::Control(message),
                WireMessage::Error(message) => {
                    AgentCommand::Error(AppError::distributed(DistributedError::Remote {
                        message: message.message,
                    }))
                }
                WireMessage::Heartbeat(_) => continue,
                WireMessage::Hello(_)
                | WireMessage::InitAck(_)
                | WireMessage::InitFailed(_)
                | WireMessage::Status(_)
                | WireMessage::Stats(_) => AgentCommand::Error(AppError::distributed(
                    DistributedError::UnexpectedMessageFromController,
                )),
            };

            if cmd_tx.send(command).is_err() {
                break;
            }
        }
    });

    let agent_id = build_agent_id(options);
    let hello = build_hello(options, &agent_id);
    send_wire(&out_tx, WireMessage::Hello(hello))?;
    debug!("Sent hello as {}", agent_id);

    let session_result = match tokio::time::timeout(
        options.registration_timeout,
        wait_for_registration(&mut cmd_rx),
    )
    .await
    {
        Ok(Ok(())) => {
            info!("Registered with controller as {}", agent_id);
            let heartbeat_handle = spawn_heartbeat(options, out_tx.clone());
            let ctx = RunContext {
                agent_id: &agent_id,
                out_tx: &out_tx,
                factory: factory.as_ref(),
                scheduling_tick: options.scheduling_tick,
                statistics_period: options.statistics_period,
            };
            let result = serve_controller(&ctx, &mut cmd_rx).await;
            heartbeat_handle.abort();
            result
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AppError::distributed(DistributedError::RegistrationTimeout)),
    };

    drop(out_tx);
    drop(writer_handle.await);
    reader_handle.abort();
    session_result
}

fn spawn_heartbeat(
    options: &AgentOptions,
    heartbeat_tx: mpsc::UnboundedSender<WireMessage>,
) -> tokio::task::JoinHandle<()> {
    let heartbeat_interval = options.heartbeat_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let message = WireMessage::Heartbeat(HeartbeatMessage {
                sent_at_ms: current_time_ms(),
            });
            if send_wire(&heartbeat_tx, message).is_err() {
                break;
            }
        }
    })
}

async fn wait_for_registration(
    cmd_rx: &mut mpsc::UnboundedReceiver<AgentCommand>,
) -> AppResult<()> {
    while let Some(command) = cmd_rx.recv().await {
        match command {
            AgentCommand::Registered => return Ok(()),
            AgentCommand::Error(err) => {
                return Err(AppError::distributed(
                    DistributedError::RegistrationRejected {
                        message: err.to_string(),
                    },
                ));
            }
            AgentCommand::Disconnected(err) => return Err(err),
            AgentCommand::Init(_) | AgentCommand::Control(_) => {
                return Err(AppError::distributed(
                    DistributedError::UnexpectedMessageFromController,
                ));
            }
        }
    }
    Err(AppError::distributed(
        DistributedError::ControllerConnectionClosed,
    ))
}

/// Serve init and control requests until the controller goes away.
async fn serve_controller(
    ctx: &RunContext<'_>,
    cmd_rx: &mut mpsc::UnboundedReceiver<AgentCommand>,
) -> AppResult<()> {
    let mut active: Option<ActiveRun> = None;
    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else {
                    return Err(AppError::distributed(
                        DistributedError::ControllerConnectionClosed,
                    ));
                };
                match command {
                    AgentCommand::Init(init) => handle_init(&mut active, *init, ctx)?,
                    AgentCommand::Control(control) => match active.as_mut() {
                        Some(run) => run.handle_control(&control, ctx)?,
                        None => warn!(
                            "Ignoring {} for phase '{}': no run initialized",
                            control.command, control.phase
                        ),
                    },
                    AgentCommand::Registered => debug!("Duplicate registration reply"),
                    AgentCommand::Error(err) => warn!("Controller error: {}", err),
                    AgentCommand::Disconnected(err) => {
                        if matches!(err, AppError::Distributed(DistributedError::ConnectionClosed)) {
                            info!("Controller closed the connection");
                            return Ok(());
                        }
                        return Err(err);
                    }
                }
            }
            signal = next_run_signal(&mut active) => {
                if let Some(run) = active.as_mut() {
                    run.handle_signal(signal, ctx)?;
                }
            }
        }
    }
}
