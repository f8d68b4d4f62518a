//! IPC request handler for the daemon
//!
//! Runs on its own OS thread because the socket API is blocking. Requests are
//! translated into [`EngineCommand`]s for the engine task; queries wait on a
//! oneshot reply.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::runtime::EngineCommand;
use crate::ipc::{EngineClient, EngineRequest, EngineResponse, EngineServer};

/// Spawn IPC listener thread to handle CLI requests
pub fn spawn_ipc_listener(
    server: EngineServer,
    commands: mpsc::Sender<EngineCommand>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_ipc_loop(&server, &commands) {
            error!(error = ?e, "IPC listener thread crashed");
        }
    })
}

fn run_ipc_loop(server: &EngineServer, commands: &mpsc::Sender<EngineCommand>) -> Result<()> {
    info!(socket = ?server.path(), "IPC listener started");

    loop {
        let mut client = server.accept().context("Failed to accept IPC connection")?;
        debug!("CLI connected");

        if !serve_client(&mut client, commands) {
            info!("Engine has stopped, IPC listener exiting");
            break Ok(());
        }
        debug!("CLI disconnected");
    }
}

/// Answer requests until the peer hangs up; false once the engine is gone
fn serve_client(client: &mut EngineClient, commands: &mpsc::Sender<EngineCommand>) -> bool {
    loop {
        let request = match client.recv_request() {
            Ok(Some(request)) => request,
            Ok(None) => return !commands.is_closed(),
            Err(e) => {
                warn!(error = ?e, "Dropping misbehaving IPC client");
                return !commands.is_closed();
            }
        };

        let shutting_down = request == EngineRequest::Shutdown;
        let response = handle_request(request, commands);
        if let Err(e) = client.send_response(&response) {
            warn!(error = ?e, "Failed to send IPC response");
            return !commands.is_closed();
        }
        if shutting_down {
            return false;
        }
    }
}

fn handle_request(request: EngineRequest, commands: &mpsc::Sender<EngineCommand>) -> EngineResponse {
    match request {
        EngineRequest::Ping => EngineResponse::Pong,
        EngineRequest::Start => forward(commands, EngineCommand::Start),
        EngineRequest::Stop => forward(commands, EngineCommand::Stop),
        EngineRequest::ReloadRules => {
            info!("Reload requested via IPC");
            forward(commands, EngineCommand::ReloadRules)
        }
        EngineRequest::TestOutput(text) => forward(commands, EngineCommand::TestOutput(text)),
        EngineRequest::Shutdown => {
            info!("Received shutdown request via IPC");
            forward(commands, EngineCommand::Shutdown)
        }
        EngineRequest::Status => query(commands, EngineCommand::Status).map_or_else(|e| e, EngineResponse::Status),
        EngineRequest::RecentActivity => {
            query(commands, EngineCommand::RecentActivity).map_or_else(|e| e, EngineResponse::Activity)
        }
    }
}

fn engine_gone() -> EngineResponse {
    EngineResponse::Error("engine is not running".to_string())
}

fn forward(commands: &mpsc::Sender<EngineCommand>, command: EngineCommand) -> EngineResponse {
    match commands.blocking_send(command) {
        Ok(()) => EngineResponse::Ready,
        Err(_) => engine_gone(),
    }
}

fn query<T>(
    commands: &mpsc::Sender<EngineCommand>,
    make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
) -> Result<T, EngineResponse> {
    let (reply_tx, reply_rx) = oneshot::channel();
    commands.blocking_send(make(reply_tx)).map_err(|_| engine_gone())?;
    reply_rx.blocking_recv().map_err(|_| engine_gone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ping_answered_locally() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(handle_request(EngineRequest::Ping, &tx), EngineResponse::Pong);
    }

    #[test]
    fn test_commands_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        assert_eq!(handle_request(EngineRequest::Stop, &tx), EngineResponse::Ready);
        assert_eq!(
            handle_request(EngineRequest::TestOutput("abc".to_string()), &tx),
            EngineResponse::Ready
        );
        assert!(matches!(rx.blocking_recv(), Some(EngineCommand::Stop)));
        assert!(matches!(rx.blocking_recv(), Some(EngineCommand::TestOutput(t)) if t == "abc"));
    }

    #[test]
    fn test_query_waits_for_reply() {
        let (tx, mut rx) = mpsc::channel(1);
        let engine = thread::spawn(move || {
            if let Some(EngineCommand::RecentActivity(reply)) = rx.blocking_recv() {
                reply.send(Vec::new()).unwrap();
            }
        });
        assert_eq!(
            handle_request(EngineRequest::RecentActivity, &tx),
            EngineResponse::Activity(Vec::new())
        );
        engine.join().unwrap();
    }

    #[test]
    fn test_engine_gone_is_error_response() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(matches!(handle_request(EngineRequest::Start, &tx), EngineResponse::Error(_)));
        assert!(matches!(handle_request(EngineRequest::Status, &tx), EngineResponse::Error(_)));
    }
}
