//! Async driver around [`AutomationEngine`]
//!
//! One task owns the engine and serializes every state change. Recognition
//! runs under a timeout that drops the call when it expires, due actions go
//! to a single dispatch worker in order, and commands arrive over an mpsc
//! channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::activity::ActivityEntry;
use super::scheduler::{ActionKind, PlanId, ScheduledAction};
use super::throttle::CycleTicket;
use super::{AutomationEngine, EngineStatus, RecognitionOutcome};
use crate::platform::{DispatchError, Recognizer, TapDispatcher, TextInjector};

/// Typed commands accepted by the running engine
#[derive(Debug)]
pub enum EngineCommand {
    Start,
    Stop,
    ReloadRules,
    Status(oneshot::Sender<EngineStatus>),
    RecentActivity(oneshot::Sender<Vec<ActivityEntry>>),
    TestOutput(String),
    Shutdown,
}

/// Side-effecting collaborators the runtime calls into
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn Recognizer>,
    pub dispatcher: Arc<dyn TapDispatcher>,
    pub injector: Arc<dyn TextInjector>,
}

struct DispatchJob {
    epoch: u64,
    action: ScheduledAction,
}

/// A due action that did not reach the screen
struct DispatchFailure {
    plan: PlanId,
    action: String,
    error: DispatchError,
}

pub struct EngineRuntime {
    engine: AutomationEngine,
    collaborators: Collaborators,
    frame_interval: Duration,
    recognition_timeout: Duration,
}

impl EngineRuntime {
    pub fn new(
        engine: AutomationEngine,
        collaborators: Collaborators,
        frame_interval: Duration,
        recognition_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            collaborators,
            frame_interval,
            recognition_timeout,
        }
    }

    /// Run until `Shutdown` arrives or every command sender is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut recognitions: JoinSet<(CycleTicket, RecognitionOutcome)> = JoinSet::new();

        // Bumped on stop/shutdown so already-queued jobs are dropped
        let epoch = Arc::new(AtomicU64::new(0));
        let (job_tx, job_rx) = mpsc::unbounded_channel::<DispatchJob>();
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<DispatchFailure>();
        let worker = tokio::spawn(dispatch_worker(
            job_rx,
            failure_tx,
            epoch.clone(),
            self.collaborators.dispatcher.clone(),
            self.collaborators.injector.clone(),
        ));

        info!(
            frame_interval_ms = self.frame_interval.as_millis() as u64,
            recognition_timeout_ms = self.recognition_timeout.as_millis() as u64,
            running = self.engine.is_running(),
            "Engine runtime started"
        );

        loop {
            let deadline = self.engine.next_deadline();
            let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(
                deadline.unwrap_or_else(Instant::now),
            ));

            tokio::select! {
                _ = frames.tick() => {
                    if let Some(ticket) = self.engine.try_start_cycle(Instant::now()) {
                        self.spawn_recognition(&mut recognitions, ticket);
                    }
                }

                Some(joined) = recognitions.join_next() => {
                    match joined {
                        Ok((ticket, outcome)) => {
                            self.engine.complete_cycle(ticket, outcome, Instant::now());
                        }
                        Err(e) => {
                            error!(error = %e, "Recognition task died, releasing cycle");
                            self.engine.abandon_cycle();
                        }
                    }
                }

                _ = sleep, if deadline.is_some() => {
                    let current = epoch.load(Ordering::SeqCst);
                    for action in self.engine.take_due(Instant::now()) {
                        if job_tx.send(DispatchJob { epoch: current, action }).is_err() {
                            error!("Dispatch worker is gone, dropping action");
                        }
                    }
                }

                Some(failure) = failure_rx.recv() => {
                    self.engine.dispatch_failed(failure.plan, &failure.action, &failure.error);
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("Command channel closed, shutting down engine");
                        break;
                    };
                    match command {
                        EngineCommand::Start => self.engine.start(),
                        EngineCommand::Stop => {
                            epoch.fetch_add(1, Ordering::SeqCst);
                            self.engine.stop();
                        }
                        EngineCommand::ReloadRules => self.engine.reload(),
                        EngineCommand::Status(reply) => {
                            if reply.send(self.engine.status()).is_err() {
                                debug!("Status requester went away");
                            }
                        }
                        EngineCommand::RecentActivity(reply) => {
                            if reply.send(self.engine.recent_activity()).is_err() {
                                debug!("Activity requester went away");
                            }
                        }
                        EngineCommand::TestOutput(output) => {
                            self.engine.fire_output(&output, Instant::now());
                        }
                        EngineCommand::Shutdown => {
                            info!("Shutdown requested");
                            break;
                        }
                    }
                }
            }
        }

        epoch.fetch_add(1, Ordering::SeqCst);
        self.engine.shutdown();
        recognitions.abort_all();
        drop(job_tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Dispatch worker ended abnormally");
        }
        info!("Engine runtime stopped");
    }

    fn spawn_recognition(&self, set: &mut JoinSet<(CycleTicket, RecognitionOutcome)>, ticket: CycleTicket) {
        let recognizer = self.collaborators.recognizer.clone();
        let timeout = self.recognition_timeout;
        set.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, recognizer.recognize()).await {
                Ok(Ok(text)) => RecognitionOutcome::Text(text),
                Ok(Err(e)) => RecognitionOutcome::Failed(format!("{:#}", e)),
                Err(_) => {
                    warn!(cycle = ticket.id(), timeout_ms = timeout.as_millis() as u64, "Recognition timed out");
                    RecognitionOutcome::TimedOut
                }
            };
            (ticket, outcome)
        });
    }
}

fn describe(kind: &ActionKind) -> String {
    match kind {
        ActionKind::Tap { character, point, .. } => {
            format!("Tap '{}' at ({:.0}, {:.0})", character, point.x, point.y)
        }
        ActionKind::Inject { text } => format!("Text injection of {} character(s)", text.chars().count()),
    }
}

/// Failed plans remembered by the worker; older ones have long been aborted
const FAILED_PLAN_MEMORY: usize = 16;

/// Runs due actions one at a time, in the order they became due
async fn dispatch_worker(
    mut jobs: mpsc::UnboundedReceiver<DispatchJob>,
    failures: mpsc::UnboundedSender<DispatchFailure>,
    epoch: Arc<AtomicU64>,
    dispatcher: Arc<dyn TapDispatcher>,
    injector: Arc<dyn TextInjector>,
) {
    let mut failed_plans: VecDeque<PlanId> = VecDeque::with_capacity(FAILED_PLAN_MEMORY);

    while let Some(job) = jobs.recv().await {
        let plan = job.action.plan;
        if job.epoch != epoch.load(Ordering::SeqCst) {
            let action = describe(&job.action.kind);
            debug!(plan = plan.0, action = %action, "Dropping action cancelled while queued");
            // The engine loop may already be gone during shutdown
            let _ = failures.send(DispatchFailure {
                plan,
                action,
                error: DispatchError::Cancelled,
            });
            continue;
        }
        if failed_plans.contains(&plan) {
            debug!(plan = plan.0, "Skipping action of failed plan");
            continue;
        }

        let description = describe(&job.action.kind);
        let dispatcher = dispatcher.clone();
        let injector = injector.clone();
        let kind = job.action.kind;
        let result = tokio::task::spawn_blocking(move || match kind {
            ActionKind::Tap { point, duration, .. } => dispatcher.tap(point, duration),
            ActionKind::Inject { text } => injector.inject_text(&text),
        })
        .await
        .unwrap_or_else(|e| Err(DispatchError::Failed(format!("dispatch task panicked: {}", e))));

        match result {
            Ok(()) => debug!(plan = plan.0, action = %description, "Dispatched"),
            Err(error) => {
                warn!(plan = plan.0, action = %description, error = %error, "Dispatch failed");
                if failed_plans.len() == FAILED_PLAN_MEMORY {
                    failed_plans.pop_front();
                }
                failed_plans.push_back(plan);
                let failure = DispatchFailure {
                    plan,
                    action: description,
                    error,
                };
                if failures.send(failure).is_err() {
                    break;
                }
            }
        }
    }
}
