//! Daemon process: builds the collaborators and runs the engine

mod ipc_handler;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::constants::daemon::SHUTDOWN_GRACE_MS;
use crate::constants::ipc::COMMAND_QUEUE;
use crate::coordinates::CoordinateStore;
use crate::engine::AutomationEngine;
use crate::engine::runtime::{Collaborators, EngineCommand, EngineRuntime};
use crate::ipc::EngineServer;
use crate::persistence::{FileStore, KeyValueStore};
use crate::platform::{
    CommandRecognizer, NoTextInjection, TextInjector, X11FocusProbe, X11TapDispatcher, YdotoolInjector,
};
use crate::rules::RuleStore;

fn build_injector(settings: &Settings) -> Arc<dyn TextInjector> {
    let input = &settings.input;
    if !input.text_injection {
        return Arc::new(NoTextInjection);
    }

    let focus = if input.injection_windows.is_empty() {
        None
    } else {
        X11FocusProbe::connect()
            .inspect_err(|e| warn!(error = ?e, "Focus probe unavailable, text injection will fall back to taps"))
            .ok()
    };
    info!(windows = ?input.injection_windows, "Direct text injection enabled");
    Arc::new(YdotoolInjector::new(input, focus))
}

/// Run the automation daemon until shutdown
pub fn run_daemon(settings: Settings, start_paused: bool) -> Result<()> {
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::open(FileStore::default_dir()).context("Failed to open data directory")?);
    let rules = RuleStore::open(kv.clone());
    let coordinates = CoordinateStore::open(kv);

    let dispatcher = Arc::new(X11TapDispatcher::connect().context("Failed to initialize tap dispatcher")?);
    let injector = build_injector(&settings);
    let recognizer = Arc::new(CommandRecognizer::new(settings.recognizer.command.clone()));

    let mut engine_settings = settings.engine.clone();
    engine_settings.start_paused |= start_paused;
    let engine = AutomationEngine::new(
        &engine_settings,
        settings.input.tap_duration(),
        rules,
        coordinates,
        injector.clone(),
    );
    let runtime = EngineRuntime::new(
        engine,
        Collaborators {
            recognizer,
            dispatcher,
            injector,
        },
        engine_settings.frame_interval(),
        engine_settings.recognition_timeout(),
    );

    let server = EngineServer::bind().context("Failed to start IPC server")?;
    let socket_path = server.path().to_path_buf();
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let _ipc_thread = ipc_handler::spawn_ipc_listener(server, commands_tx.clone());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    rt.block_on(async move {
        let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = terminate.recv() => info!("Received SIGTERM"),
            }
            let _ = commands_tx.send(EngineCommand::Shutdown).await;
        });

        runtime.run(commands_rx).await;
        Ok::<(), anyhow::Error>(())
    })?;
    // A tap stuck in the blocking pool must not hold the process open
    rt.shutdown_timeout(Duration::from_millis(SHUTDOWN_GRACE_MS));

    // The listener thread may still be parked in accept(); remove the socket ourselves
    if let Err(e) = std::fs::remove_file(&socket_path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %socket_path.display(), error = %e, "Failed to remove IPC socket");
    }
    info!("Daemon exited");
    Ok(())
}
