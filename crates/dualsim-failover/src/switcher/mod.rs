//! # Switch Orchestrator
//!
//! Moves mobile data to a target slot by walking the strategy chain until
//! one attempt is verified. Verification is a fresh read of the active slot;
//! an attempt whose call succeeded but whose read-back disagrees counts as a
//! failure and the chain moves on. There is no rollback: whatever the last
//! failed attempt wrote stays written.
//!
//! Calls are serialized: an explicit switch from the caller and an automatic
//! failover on the worker never interleave their writes.

pub mod strategy;

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use dualsim_common::models::{LinkId, SlotIndex, StrategyKind};

use crate::error::{AttemptFailure, FailoverError, PlatformError};
use crate::metrics::FailoverMetrics;
use crate::platform::current_data_slot;

pub use strategy::{
    default_chain, PrivilegedServiceCall, ReflectiveApiCall, SettingsWrite, SwitchContext,
    SwitchStrategy,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(AttemptFailure),
}

/// One strategy attempt within an `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchAttempt {
    pub strategy: StrategyKind,
    pub target: SlotIndex,
    pub outcome: AttemptOutcome,
}

impl SwitchAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    /// The strategy never touched the platform.
    pub fn skipped(&self) -> bool {
        matches!(&self.outcome, AttemptOutcome::Failed(f) if f.is_skip())
    }
}

/// A verified switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchSuccess {
    pub target: SlotIndex,
    /// Slot carrying data before the switch, if it could be read.
    pub previous: Option<SlotIndex>,
    /// `None` when the target was already active and nothing ran.
    pub strategy: Option<StrategyKind>,
    pub attempts: Vec<SwitchAttempt>,
}

impl SwitchSuccess {
    /// The target was already active.
    pub fn was_noop(&self) -> bool {
        self.strategy.is_none()
    }
}

pub struct SwitchOrchestrator {
    ctx: SwitchContext,
    chain: Vec<Box<dyn SwitchStrategy>>,
    metrics: Arc<FailoverMetrics>,
    serial: Mutex<()>,
}

impl SwitchOrchestrator {
    pub fn new(ctx: SwitchContext, metrics: Arc<FailoverMetrics>) -> Self {
        Self::with_chain(ctx, default_chain(), metrics)
    }

    pub fn with_chain(
        ctx: SwitchContext,
        chain: Vec<Box<dyn SwitchStrategy>>,
        metrics: Arc<FailoverMetrics>,
    ) -> Self {
        SwitchOrchestrator {
            ctx,
            chain,
            metrics,
            serial: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SwitchContext {
        &self.ctx
    }

    /// Whether at least one strategy has the access it needs.
    pub fn can_switch(&self) -> bool {
        self.chain.iter().any(|s| s.is_available(&self.ctx))
    }

    /// Slot currently carrying mobile data.
    pub fn current_slot(&self) -> Result<SlotIndex, PlatformError> {
        current_data_slot(
            self.ctx.settings.as_ref(),
            self.ctx.registry.as_ref(),
            &self.ctx.config.active_key,
        )
    }

    /// Switch mobile data to `target`.
    ///
    /// Fails with `TargetInactive` before any strategy runs if the registry
    /// does not list `target`. Succeeds immediately if `target` is already
    /// active.
    pub fn execute(&self, target: SlotIndex) -> Result<SwitchSuccess, FailoverError> {
        let _serial = self.serial.lock().unwrap_or_else(|e| e.into_inner());

        let active = self.ctx.registry.list_active_slots()?;
        if !active.contains(&target) {
            warn!(slot = %target, "switch target has no active link");
            return Err(FailoverError::TargetInactive(target));
        }

        let previous = self.current_slot().ok();
        if previous == Some(target) {
            debug!(slot = %target, "already on target slot");
            return Ok(SwitchSuccess {
                target,
                previous,
                strategy: None,
                attempts: Vec::new(),
            });
        }

        let link_id = self.ctx.registry.resolve_link_id(target)?;
        let mut attempts = Vec::with_capacity(self.chain.len());

        for strategy in &self.chain {
            let kind = strategy.kind();
            let outcome = self.attempt(strategy.as_ref(), target, link_id);
            let success = outcome == AttemptOutcome::Success;
            attempts.push(SwitchAttempt {
                strategy: kind,
                target,
                outcome,
            });
            if success {
                info!(
                    from = ?previous,
                    to = %target,
                    strategy = %kind,
                    attempts = attempts.len(),
                    "switch verified"
                );
                return Ok(SwitchSuccess {
                    target,
                    previous,
                    strategy: Some(kind),
                    attempts,
                });
            }
        }

        warn!(slot = %target, attempts = attempts.len(), "all switch strategies failed");
        Err(FailoverError::AllStrategiesFailed { target, attempts })
    }

    fn attempt(
        &self,
        strategy: &dyn SwitchStrategy,
        target: SlotIndex,
        link_id: LinkId,
    ) -> AttemptOutcome {
        let kind = strategy.kind();

        let applied = strategy.apply(&self.ctx, target, link_id);
        if let Err(failure) = &applied {
            if failure.is_skip() {
                debug!(strategy = %kind, reason = %failure, "strategy skipped");
                self.metrics.record_attempt_skip(kind);
                return AttemptOutcome::Failed(failure.clone());
            }
        }

        self.metrics.record_attempt(kind);
        let verified = applied.and_then(|()| {
            self.ctx.verify(target).inspect_err(|_| {
                let mismatch = FailoverError::VerificationMismatch {
                    strategy: kind,
                    expected: target,
                };
                warn!(error = %mismatch, "treating as failed attempt");
            })
        });

        match verified {
            Ok(()) => {
                self.metrics.record_attempt_success(kind);
                AttemptOutcome::Success
            }
            Err(failure) => {
                warn!(strategy = %kind, reason = %failure, "switch attempt failed");
                self.metrics.record_attempt_failure(kind);
                AttemptOutcome::Failed(failure)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::SwitchConfig;
    use crate::platform::{PrivilegedExecutor, ReflectiveApi, SettingsStore, SubscriptionRegistry};

    /// Link ids are `10 + slot`.
    struct Registry {
        active: BTreeSet<SlotIndex>,
    }

    impl SubscriptionRegistry for Registry {
        fn resolve_link_id(&self, slot: SlotIndex) -> Result<LinkId, PlatformError> {
            Ok(LinkId(10 + slot.get() as i64))
        }

        fn resolve_slot(&self, link_id: LinkId) -> Result<SlotIndex, PlatformError> {
            SlotIndex::new((link_id.0 - 10) as u8)
                .map_err(|e| PlatformError::Unavailable(e.to_string()))
        }

        fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError> {
            Ok(self.active.clone())
        }
    }

    /// Holds only the active key; writes go through the scripted strategies.
    struct Settings(Arc<Mutex<i64>>);

    impl SettingsStore for Settings {
        fn get_int(&self, _key: &str, _default: i64) -> Result<i64, PlatformError> {
            Ok(*self.0.lock().unwrap())
        }

        fn put_int(&self, _key: &str, _value: i64) -> Result<bool, PlatformError> {
            Ok(false)
        }
    }

    struct NoRoot;

    impl PrivilegedExecutor for NoRoot {
        fn run_elevated(&self, _command: &str) -> Result<i32, PlatformError> {
            Err(PlatformError::PermissionDenied("no su".into()))
        }

        fn is_elevated_available(&self) -> bool {
            false
        }
    }

    struct NoReflection;

    impl ReflectiveApi for NoReflection {
        fn set_default_data_link(&self, _link_id: LinkId) -> Result<(), PlatformError> {
            Err(PlatformError::Unsupported("test"))
        }

        fn is_supported(&self) -> bool {
            false
        }
    }

    /// Returns a scripted result and, if `takes_effect`, moves the active
    /// key to the requested link.
    struct Scripted {
        kind: StrategyKind,
        result: Result<(), AttemptFailure>,
        takes_effect: bool,
        cell: Arc<Mutex<i64>>,
        calls: Arc<AtomicUsize>,
    }

    impl SwitchStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn is_available(&self, _ctx: &SwitchContext) -> bool {
            !matches!(&self.result, Err(f) if f.is_skip())
        }

        fn apply(
            &self,
            _ctx: &SwitchContext,
            _target: SlotIndex,
            link_id: LinkId,
        ) -> Result<(), AttemptFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.takes_effect {
                *self.cell.lock().unwrap() = link_id.0;
            }
            self.result.clone()
        }
    }

    type Step = (StrategyKind, Result<(), AttemptFailure>, bool);

    struct Fixture {
        orchestrator: SwitchOrchestrator,
        calls: Arc<AtomicUsize>,
        metrics: Arc<FailoverMetrics>,
    }

    fn fixture(current: i64, active: &[SlotIndex], steps: Vec<Step>) -> Fixture {
        let cell = Arc::new(Mutex::new(current));
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(FailoverMetrics::new());
        let ctx = SwitchContext {
            config: SwitchConfig::default(),
            registry: Arc::new(Registry {
                active: active.iter().copied().collect(),
            }),
            settings: Arc::new(Settings(cell.clone())),
            executor: Arc::new(NoRoot),
            reflective: Arc::new(NoReflection),
        };
        let chain: Vec<Box<dyn SwitchStrategy>> = steps
            .into_iter()
            .map(|(kind, result, takes_effect)| {
                Box::new(Scripted {
                    kind,
                    result,
                    takes_effect,
                    cell: cell.clone(),
                    calls: calls.clone(),
                }) as Box<dyn SwitchStrategy>
            })
            .collect();
        Fixture {
            orchestrator: SwitchOrchestrator::with_chain(ctx, chain, metrics.clone()),
            calls,
            metrics,
        }
    }

    const BOTH: [SlotIndex; 2] = SlotIndex::ALL;

    // ─── Preconditions ──────────────────────────────────────────────────

    #[test]
    fn inactive_target_runs_no_strategy() {
        let fx = fixture(
            10,
            &[SlotIndex::FIRST],
            vec![(StrategyKind::SettingsWrite, Ok(()), true)],
        );
        let err = fx.orchestrator.execute(SlotIndex::SECOND).unwrap_err();
        assert_eq!(err, FailoverError::TargetInactive(SlotIndex::SECOND));
        assert_eq!(err.code(), "TARGET_INACTIVE");
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn current_slot_is_noop_success() {
        let fx = fixture(11, &BOTH, vec![(StrategyKind::SettingsWrite, Ok(()), true)]);
        let ok = fx.orchestrator.execute(SlotIndex::SECOND).unwrap();
        assert!(ok.was_noop());
        assert!(ok.attempts.is_empty());
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    // ─── Chain ──────────────────────────────────────────────────────────

    #[test]
    fn first_verified_strategy_wins() {
        let fx = fixture(
            10,
            &BOTH,
            vec![
                (StrategyKind::SettingsWrite, Ok(()), true),
                (StrategyKind::ReflectiveApiCall, Ok(()), true),
            ],
        );
        let ok = fx.orchestrator.execute(SlotIndex::SECOND).unwrap();
        assert_eq!(ok.strategy, Some(StrategyKind::SettingsWrite));
        assert_eq!(ok.previous, Some(SlotIndex::FIRST));
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.orchestrator.current_slot().unwrap(), SlotIndex::SECOND);
    }

    #[test]
    fn call_success_without_effect_is_not_credited() {
        let fx = fixture(10, &BOTH, vec![(StrategyKind::SettingsWrite, Ok(()), false)]);
        let err = fx.orchestrator.execute(SlotIndex::SECOND).unwrap_err();
        match err {
            FailoverError::AllStrategiesFailed { target, attempts } => {
                assert_eq!(target, SlotIndex::SECOND);
                assert_eq!(attempts.len(), 1);
                assert!(matches!(
                    attempts[0].outcome,
                    AttemptOutcome::Failed(AttemptFailure::VerificationMismatch { .. })
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.metrics.snapshot().strategy_failures, [1, 0, 0]);
    }

    #[test]
    fn mismatch_then_skip_then_reflective_success() {
        let fx = fixture(
            10,
            &BOTH,
            vec![
                (StrategyKind::SettingsWrite, Ok(()), false),
                (
                    StrategyKind::PrivilegedServiceCall,
                    Err(AttemptFailure::NotElevated),
                    false,
                ),
                (StrategyKind::ReflectiveApiCall, Ok(()), true),
            ],
        );
        let ok = fx.orchestrator.execute(SlotIndex::SECOND).unwrap();
        assert_eq!(ok.strategy, Some(StrategyKind::ReflectiveApiCall));
        assert_eq!(ok.attempts.len(), 3);
        assert!(!ok.attempts[0].succeeded());
        assert!(ok.attempts[1].skipped());
        assert!(ok.attempts[2].succeeded());

        let snap = fx.metrics.snapshot();
        assert_eq!(snap.strategy_attempts, [1, 0, 1]);
        assert_eq!(snap.strategy_skips, [0, 1, 0]);
        assert_eq!(snap.strategy_successes, [0, 0, 1]);
    }

    #[test]
    fn can_switch_reflects_strategy_access() {
        let fx = fixture(
            10,
            &BOTH,
            vec![(
                StrategyKind::PrivilegedServiceCall,
                Err(AttemptFailure::NotElevated),
                false,
            )],
        );
        assert!(!fx.orchestrator.can_switch());
    }

    #[test]
    fn registry_errors_surface() {
        struct Broken;

        impl SubscriptionRegistry for Broken {
            fn resolve_link_id(&self, _slot: SlotIndex) -> Result<LinkId, PlatformError> {
                Err(PlatformError::Unavailable("no subscription".into()))
            }

            fn resolve_slot(&self, _link_id: LinkId) -> Result<SlotIndex, PlatformError> {
                Err(PlatformError::Unavailable("no subscription".into()))
            }

            fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError> {
                Err(PlatformError::PermissionDenied("READ_PHONE_STATE".into()))
            }
        }

        let mut fx = fixture(10, &BOTH, vec![]);
        fx.orchestrator.ctx.registry = Arc::new(Broken);
        let err = fx.orchestrator.execute(SlotIndex::SECOND).unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Platform(PlatformError::PermissionDenied(_))
        ));
    }
}
