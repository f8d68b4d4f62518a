//! Trigger-driven automation engine
//!
//! [`AutomationEngine`] is the synchronous core: it owns the throttle,
//! matcher, debounce state and executor and is driven with explicit `now`
//! values. [`runtime`] wraps it in the async loop that talks to the real
//! recognizer and input primitives.

pub mod activity;
pub mod debounce;
pub mod executor;
pub mod matcher;
pub mod runtime;
pub mod scheduler;
pub mod throttle;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::{EngineSettings, FireMode};
use crate::coordinates::CoordinateStore;
use crate::platform::{DispatchError, TextInjector};
use crate::rules::RuleStore;
use activity::{ActivityEntry, ActivityLog, ActivityTag};
use debounce::{DebounceState, DebounceStateMachine, Transition};
use executor::{ActionExecutor, ExecutionSummary};
use matcher::{MatchIdentifier, TriggerMatcher};
use scheduler::{PlanId, ScheduledAction};
use throttle::{CycleTicket, RecognitionThrottle};

/// How a recognition cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Text(String),
    Failed(String),
    TimedOut,
}

/// What the engine did with a completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// The cycle had already been released; its result was ignored
    Stale,
    /// Recognition failed or timed out; debounce state untouched
    Failed,
    Evaluated {
        identifier: MatchIdentifier,
        transition: Transition,
        execution: Option<ExecutionSummary>,
    },
}

impl CycleReport {
    pub fn fired(&self) -> bool {
        matches!(self, CycleReport::Evaluated { transition, .. } if transition.should_fire())
    }
}

/// Point-in-time view of the engine, as reported over IPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub debounce_state: DebounceState,
    pub last_identifier: String,
    pub consecutive_empty: u32,
    pub empty_threshold: u32,
    pub recognition_in_flight: bool,
    pub pending_actions: usize,
    pub rules_loaded: usize,
    pub rules_enabled: usize,
    pub calibrated_characters: usize,
    pub cycles_completed: u64,
    pub fires: u64,
    pub fire_mode: FireMode,
}

pub struct AutomationEngine {
    fire_mode: FireMode,
    rules: RuleStore,
    coordinates: CoordinateStore,
    throttle: RecognitionThrottle,
    matcher: TriggerMatcher,
    debounce: DebounceStateMachine,
    executor: ActionExecutor,
    activity: ActivityLog,
    running: bool,
    cycles_completed: u64,
    fires: u64,
}

impl AutomationEngine {
    pub fn new(
        settings: &EngineSettings,
        tap_duration: std::time::Duration,
        rules: RuleStore,
        coordinates: CoordinateStore,
        injector: Arc<dyn TextInjector>,
    ) -> Self {
        let mut engine = Self {
            fire_mode: settings.fire_mode,
            rules,
            coordinates,
            throttle: RecognitionThrottle::new(settings.min_cycle_interval()),
            matcher: TriggerMatcher::new(),
            debounce: DebounceStateMachine::new(settings.empty_reset_threshold),
            executor: ActionExecutor::new(settings.inter_character_delay(), tap_duration, injector),
            activity: ActivityLog::new(),
            running: !settings.start_paused,
            cycles_completed: 0,
            fires: 0,
        };
        let state = if engine.running { "running" } else { "paused" };
        engine.activity.record(
            ActivityTag::Engine,
            format!(
                "Engine ready ({}): {} rules, {} calibrated characters",
                state,
                engine.rules.len(),
                engine.coordinates.len()
            ),
        );
        engine
    }

    /// Ask for a recognition cycle; `None` means drop this frame
    pub fn try_start_cycle(&mut self, now: Instant) -> Option<CycleTicket> {
        if !self.running {
            return None;
        }
        self.throttle.try_start_cycle(now)
    }

    /// Feed the result of the cycle identified by `ticket`
    ///
    /// Always ends the cycle first so the throttle is released on every path.
    pub fn complete_cycle(&mut self, ticket: CycleTicket, outcome: RecognitionOutcome, now: Instant) -> CycleReport {
        if !self.throttle.end_cycle(ticket) {
            return CycleReport::Stale;
        }
        self.cycles_completed += 1;

        let text = match outcome {
            RecognitionOutcome::Text(text) => text,
            RecognitionOutcome::Failed(reason) => {
                self.activity
                    .record(ActivityTag::Recognition, format!("Recognition failed: {}", reason));
                return CycleReport::Failed;
            }
            RecognitionOutcome::TimedOut => {
                self.activity.record(ActivityTag::Recognition, "Recognition timed out");
                return CycleReport::Failed;
            }
        };

        let matched = self.matcher.match_text(&text, self.rules.all());
        let transition = self.debounce.on_match(&matched.identifier);
        debug!(
            cycle = ticket.id(),
            identifier = %matched.identifier,
            transition = ?transition,
            "Cycle evaluated"
        );

        let execution = match &transition {
            Transition::Fire { identifier } => {
                self.fires += 1;
                let summary = match self.fire_mode {
                    FireMode::AllInOrder => self.executor.execute_all(&matched.rules, &self.coordinates, now),
                    FireMode::HighestPriority => match matched.rules.first() {
                        Some(rule) => self.executor.execute(rule, &self.coordinates, now),
                        None => self.executor.execute_all(&[], &self.coordinates, now),
                    },
                };
                self.activity.record(
                    ActivityTag::Fire,
                    format!(
                        "Fired '{}': {} action(s) scheduled, {} character(s) skipped",
                        identifier, summary.scheduled, summary.skipped
                    ),
                );
                Some(summary)
            }
            Transition::Reset { cleared } => {
                self.activity
                    .record(ActivityTag::Reset, format!("'{}' left the screen, re-armed", cleared));
                None
            }
            _ => None,
        };

        CycleReport::Evaluated {
            identifier: matched.identifier,
            transition,
            execution,
        }
    }

    /// Release the in-flight cycle when its result can no longer be delivered
    pub fn abandon_cycle(&mut self) {
        self.throttle.force_release();
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledAction> {
        self.executor.take_due(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.executor.next_deadline()
    }

    /// Record a failed dispatch and drop the rest of its plan
    ///
    /// Cancelled actions were queued before a stop; their plans are already gone.
    pub fn dispatch_failed(&mut self, plan: PlanId, action: &str, error: &DispatchError) {
        match error {
            DispatchError::Cancelled => {
                self.activity
                    .record(ActivityTag::Dispatch, format!("{} cancelled before dispatch", action));
            }
            DispatchError::Failed(_) => {
                let dropped = self.executor.abort(plan);
                self.activity.record(
                    ActivityTag::Dispatch,
                    format!("{} failed: {}; dropped {} remaining action(s)", action, error, dropped),
                );
            }
        }
    }

    /// Fire `output` now, bypassing matching and debounce
    pub fn fire_output(&mut self, output: &str, now: Instant) -> ExecutionSummary {
        let summary = self.executor.execute_output("test", output, &self.coordinates, now);
        self.activity.record(
            ActivityTag::Test,
            format!("Test output '{}': {} action(s) scheduled", output, summary.scheduled),
        );
        summary
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.debounce.reset();
        self.activity.record(ActivityTag::Engine, "Engine started");
    }

    /// Pause recognition, cancel pending actions and clear debounce state
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.halt();
        self.activity.record(ActivityTag::Engine, "Engine stopped");
    }

    pub fn reload(&mut self) {
        self.rules.reload();
        self.coordinates.reload();
        self.activity.record(
            ActivityTag::Engine,
            format!(
                "Reloaded {} rules and {} calibrated characters",
                self.rules.len(),
                self.coordinates.len()
            ),
        );
    }

    pub fn shutdown(&mut self) {
        self.running = false;
        self.halt();
        self.activity.record(ActivityTag::Engine, "Engine shut down");
    }

    fn halt(&mut self) {
        let cancelled = self.executor.cancel_all();
        if cancelled > 0 {
            debug!(cancelled = cancelled, "Cancelled pending actions");
        }
        self.debounce.reset();
        self.throttle.force_release();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.activity.recent()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running,
            debounce_state: self.debounce.state(),
            last_identifier: self.debounce.last_match().to_string(),
            consecutive_empty: self.debounce.consecutive_empty(),
            empty_threshold: self.debounce.threshold(),
            recognition_in_flight: self.throttle.is_busy(),
            pending_actions: self.executor.pending(),
            rules_loaded: self.rules.len(),
            rules_enabled: self.rules.all().iter().filter(|r| r.enabled).count(),
            calibrated_characters: self.coordinates.len(),
            cycles_completed: self.cycles_completed,
            fires: self.fires,
            fire_mode: self.fire_mode,
        }
    }
}
