use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::control::{ControlCommand, ControlError, ControlReply, ControlRequest, route};
use super::http::{read_admin_request, write_reply};

const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one admin request: authorize, route, ask the event loop, reply.
pub(super) async fn handle_control_connection(
    socket: TcpStream,
    auth_token: Option<&str>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
) {
    let mut stream = BufReader::new(socket);
    let reply = match read_admin_request(&mut stream).await {
        Ok(request) if !request.is_authorized(auth_token) => {
            Err(ControlError::new(401, "Unauthorized"))
        }
        Ok(request) => match route(&request) {
            Some(control) => dispatch(&control_tx, control).await,
            None => Err(ControlError::new(
                404,
                format!("No route for {} {}", request.method, request.path),
            )),
        },
        Err(err) => Err(err),
    };
    if let Err(err) = write_reply(stream.get_mut(), reply).await {
        debug!("Admin client went away: {}", err);
    }
}

async fn dispatch(
    control_tx: &mpsc::UnboundedSender<ControlCommand>,
    request: ControlRequest,
) -> ControlReply {
    let unavailable = || ControlError::new(503, "Controller unavailable");
    let (respond_to, response_rx) = oneshot::channel();
    control_tx
        .send(ControlCommand {
            request,
            respond_to,
        })
        .map_err(|_closed| unavailable())?;
    match tokio::time::timeout(CONTROL_REPLY_TIMEOUT, response_rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_dropped)) => Err(unavailable()),
        Err(_elapsed) => Err(ControlError::new(504, "Controller response timed out")),
    }
}
