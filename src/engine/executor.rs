//! Turns a fired rule's output into timed actions
//!
//! Two strategies: when the focused target accepts text, the whole output is
//! one injection; otherwise each calibrated character becomes a tap at
//! `index * inter_character_delay` after the fire. Uncalibrated characters
//! are skipped without shifting the others.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::scheduler::{ActionKind, ActionScheduler, PlanId, ScheduledAction};
use crate::coordinates::{CoordinateStore, Point};
use crate::platform::TextInjector;
use crate::rules::Rule;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTap {
    pub character: char,
    pub point: Point,
    pub offset: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionPlan {
    /// Nothing to do (empty output, or no usable target)
    Empty,
    Inject { text: String },
    Taps(Vec<PlannedTap>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    DirectInjection,
    TapSequence,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub plan: Option<PlanId>,
    pub strategy: Strategy,
    pub scheduled: usize,
    pub skipped: usize,
}

impl ExecutionSummary {
    fn noop() -> Self {
        Self {
            plan: None,
            strategy: Strategy::None,
            scheduled: 0,
            skipped: 0,
        }
    }
}

pub struct ActionExecutor {
    inter_character_delay: Duration,
    tap_duration: Duration,
    injector: Arc<dyn TextInjector>,
    scheduler: ActionScheduler,
    next_plan: u64,
}

impl ActionExecutor {
    pub fn new(
        inter_character_delay: Duration,
        tap_duration: Duration,
        injector: Arc<dyn TextInjector>,
    ) -> Self {
        Self {
            inter_character_delay,
            tap_duration,
            injector,
            scheduler: ActionScheduler::new(),
            next_plan: 0,
        }
    }

    /// Build the plan for `output` without scheduling it
    pub fn plan(&self, output: &str, coords: &CoordinateStore) -> ActionPlan {
        if output.is_empty() {
            return ActionPlan::Empty;
        }
        if self.injector.can_inject_text() {
            return ActionPlan::Inject {
                text: output.to_string(),
            };
        }
        if coords.is_empty() {
            return ActionPlan::Empty;
        }

        let taps = output
            .chars()
            .enumerate()
            .filter_map(|(index, character)| match coords.get(character) {
                Some(point) => Some(PlannedTap {
                    character,
                    point,
                    offset: self.inter_character_delay * index as u32,
                }),
                None => {
                    debug!(character = %character, index = index, "No calibration for character, skipping");
                    None
                }
            })
            .collect();
        ActionPlan::Taps(taps)
    }

    /// Execute one rule's output
    pub fn execute(&mut self, rule: &Rule, coords: &CoordinateStore, now: Instant) -> ExecutionSummary {
        self.execute_output(&rule.trigger, &rule.output, coords, now)
    }

    /// Execute several rules back to back as one contiguous plan
    pub fn execute_all(&mut self, rules: &[Rule], coords: &CoordinateStore, now: Instant) -> ExecutionSummary {
        let label = rules
            .iter()
            .map(|r| r.trigger.as_str())
            .collect::<Vec<_>>()
            .join("+");
        let output: String = rules.iter().map(|r| r.output.as_str()).collect();
        self.execute_output(&label, &output, coords, now)
    }

    /// Plan `output` and schedule it relative to `now`
    pub fn execute_output(
        &mut self,
        label: &str,
        output: &str,
        coords: &CoordinateStore,
        now: Instant,
    ) -> ExecutionSummary {
        match self.plan(output, coords) {
            ActionPlan::Empty => {
                if output.is_empty() {
                    debug!(rule = %label, "Empty output, nothing to execute");
                } else {
                    warn!(rule = %label, "No text target and no calibrated coordinates, skipping output");
                }
                ExecutionSummary::noop()
            }
            ActionPlan::Inject { text } => {
                let plan = self.allocate_plan();
                let length = text.chars().count();
                self.scheduler.schedule(plan, now, ActionKind::Inject { text });
                info!(rule = %label, plan = plan.0, chars = length, "Scheduled direct text injection");
                ExecutionSummary {
                    plan: Some(plan),
                    strategy: Strategy::DirectInjection,
                    scheduled: 1,
                    skipped: 0,
                }
            }
            ActionPlan::Taps(taps) => {
                let skipped = output.chars().count() - taps.len();
                if taps.is_empty() {
                    warn!(rule = %label, skipped = skipped, "No character of the output is calibrated");
                    return ExecutionSummary {
                        plan: None,
                        strategy: Strategy::TapSequence,
                        scheduled: 0,
                        skipped,
                    };
                }

                let plan = self.allocate_plan();
                let scheduled = taps.len();
                for tap in taps {
                    self.scheduler.schedule(
                        plan,
                        now + tap.offset,
                        ActionKind::Tap {
                            character: tap.character,
                            point: tap.point,
                            duration: self.tap_duration,
                        },
                    );
                }
                info!(rule = %label, plan = plan.0, taps = scheduled, skipped = skipped, "Scheduled tap sequence");
                ExecutionSummary {
                    plan: Some(plan),
                    strategy: Strategy::TapSequence,
                    scheduled,
                    skipped,
                }
            }
        }
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledAction> {
        self.scheduler.pop_due(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Drop what is left of a plan after a dispatch failure
    pub fn abort(&mut self, plan: PlanId) -> usize {
        self.scheduler.cancel_plan(plan)
    }

    pub fn cancel_all(&mut self) -> usize {
        self.scheduler.cancel_all()
    }

    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    fn allocate_plan(&mut self) -> PlanId {
        self.next_plan += 1;
        PlanId(self.next_plan)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::platform::{DispatchError, NoTextInjection};
    use std::sync::atomic::{AtomicBool, Ordering};

    const DELAY: Duration = Duration::from_millis(150);
    const TAP: Duration = Duration::from_millis(50);

    /// Injector whose availability can be flipped from a test
    #[derive(Default)]
    pub(crate) struct SwitchInjector {
        pub available: AtomicBool,
    }

    impl TextInjector for SwitchInjector {
        fn can_inject_text(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        fn inject_text(&self, _text: &str) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn coords(entries: &[(char, f32, f32)]) -> CoordinateStore {
        let mut store = CoordinateStore::open(Arc::new(MemoryStore::new()));
        for &(c, x, y) in entries {
            store.save(c, Point::new(x, y)).unwrap();
        }
        store
    }

    fn tap_executor() -> ActionExecutor {
        ActionExecutor::new(DELAY, TAP, Arc::new(NoTextInjection))
    }

    fn due_chars(actions: &[ScheduledAction]) -> Vec<char> {
        actions
            .iter()
            .filter_map(|a| match a.kind {
                ActionKind::Tap { character, .. } => Some(character),
                ActionKind::Inject { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_plan_skips_uncalibrated_characters() {
        let executor = tap_executor();
        let store = coords(&[('a', 1.0, 1.0), ('c', 3.0, 3.0)]);

        let plan = executor.plan("abc", &store);
        assert_eq!(
            plan,
            ActionPlan::Taps(vec![
                PlannedTap { character: 'a', point: Point::new(1.0, 1.0), offset: Duration::ZERO },
                PlannedTap { character: 'c', point: Point::new(3.0, 3.0), offset: DELAY * 2 },
            ])
        );
    }

    #[test]
    fn test_empty_output_is_noop() {
        let mut executor = tap_executor();
        let store = coords(&[('a', 1.0, 1.0)]);
        assert_eq!(executor.plan("", &store), ActionPlan::Empty);

        let summary = executor.execute(&Rule::new("t", ""), &store, Instant::now());
        assert_eq!(summary.strategy, Strategy::None);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_no_target_at_all_is_noop() {
        let mut executor = tap_executor();
        let store = coords(&[]);
        let summary = executor.execute(&Rule::new("t", "abc"), &store, Instant::now());
        assert_eq!(summary, ExecutionSummary::noop());
    }

    #[test]
    fn test_injection_preferred_when_available() {
        let injector = Arc::new(SwitchInjector::default());
        injector.available.store(true, Ordering::SeqCst);
        let mut executor = ActionExecutor::new(DELAY, TAP, injector.clone());
        let store = coords(&[('y', 1.0, 1.0)]);

        let now = Instant::now();
        let summary = executor.execute(&Rule::new("OK", "yes"), &store, now);
        assert_eq!(summary.strategy, Strategy::DirectInjection);
        let due = executor.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, ActionKind::Inject { text: "yes".to_string() });

        // Without a text target the same rule falls back to taps
        injector.available.store(false, Ordering::SeqCst);
        let summary = executor.execute(&Rule::new("OK", "yes"), &store, now);
        assert_eq!(summary.strategy, Strategy::TapSequence);
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_taps_come_due_in_output_order() {
        let mut executor = tap_executor();
        let store = coords(&[('y', 10.0, 10.0), ('e', 20.0, 10.0), ('s', 30.0, 10.0)]);
        let t0 = Instant::now();

        executor.execute(&Rule::new("OK", "yes"), &store, t0);
        assert_eq!(executor.pending(), 3);
        assert_eq!(due_chars(&executor.take_due(t0)), vec!['y']);
        assert_eq!(executor.next_deadline(), Some(t0 + DELAY));
        assert_eq!(due_chars(&executor.take_due(t0 + DELAY)), vec!['e']);
        assert_eq!(due_chars(&executor.take_due(t0 + DELAY * 2)), vec!['s']);
    }

    #[test]
    fn test_execute_all_continues_offsets() {
        let mut executor = tap_executor();
        let store = coords(&[('a', 1.0, 1.0), ('b', 2.0, 2.0)]);
        let t0 = Instant::now();

        let rules = vec![Rule::new("x", "ab"), Rule::new("y", "ba")];
        let summary = executor.execute_all(&rules, &store, t0);
        assert_eq!(summary.scheduled, 4);

        let all = executor.take_due(t0 + DELAY * 10);
        let offsets: Vec<Duration> = all.iter().map(|a| a.due - t0).collect();
        assert_eq!(offsets, vec![Duration::ZERO, DELAY, DELAY * 2, DELAY * 3]);
        assert_eq!(due_chars(&all), vec!['a', 'b', 'b', 'a']);
    }

    #[test]
    fn test_abort_drops_remaining_taps_of_plan() {
        let mut executor = tap_executor();
        let store = coords(&[('a', 1.0, 1.0), ('b', 2.0, 2.0)]);
        let t0 = Instant::now();

        let first = executor.execute(&Rule::new("x", "ab"), &store, t0);
        let second = executor.execute(&Rule::new("y", "ab"), &store, t0);
        assert_ne!(first.plan, second.plan);

        let due = executor.take_due(t0);
        assert_eq!(due.len(), 2);
        assert_eq!(executor.abort(first.plan.unwrap()), 1);
        assert_eq!(executor.pending(), 1);
        assert_eq!(executor.cancel_all(), 1);
    }
}
