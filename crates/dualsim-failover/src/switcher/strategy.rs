//! Link-activation strategies, least invasive first.
//!
//! A strategy only issues its platform call. Verification happens in the
//! orchestrator, identically for every strategy, except that the settings
//! write also verifies per key so it knows whether to try the next one.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use dualsim_common::models::{LinkId, SlotIndex, StrategyKind};

use crate::config::SwitchConfig;
use crate::error::AttemptFailure;
use crate::platform::{
    current_data_slot, PrivilegedExecutor, ReflectiveApi, SettingsStore, SubscriptionRegistry,
};

/// Collaborators and knobs shared by every strategy.
#[derive(Clone)]
pub struct SwitchContext {
    pub config: SwitchConfig,
    pub registry: Arc<dyn SubscriptionRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub executor: Arc<dyn PrivilegedExecutor>,
    pub reflective: Arc<dyn ReflectiveApi>,
}

impl SwitchContext {
    /// Re-read the active slot and compare it with `expected`.
    pub fn verify(&self, expected: SlotIndex) -> Result<(), AttemptFailure> {
        let found = current_data_slot(
            self.settings.as_ref(),
            self.registry.as_ref(),
            &self.config.active_key,
        )
        .ok();
        if found == Some(expected) {
            Ok(())
        } else {
            Err(AttemptFailure::VerificationMismatch { expected, found })
        }
    }
}

pub trait SwitchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether the strategy has the access it needs to run at all.
    fn is_available(&self, ctx: &SwitchContext) -> bool;

    /// Issue the activation call for `target`. `Ok` means the platform
    /// accepted it, not that it took effect.
    fn apply(
        &self,
        ctx: &SwitchContext,
        target: SlotIndex,
        link_id: LinkId,
    ) -> Result<(), AttemptFailure>;
}

/// Writes the link id into each configured settings key in turn.
#[derive(Debug, Default)]
pub struct SettingsWrite;

impl SwitchStrategy for SettingsWrite {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SettingsWrite
    }

    fn is_available(&self, ctx: &SwitchContext) -> bool {
        ctx.settings.can_write()
    }

    fn apply(
        &self,
        ctx: &SwitchContext,
        target: SlotIndex,
        link_id: LinkId,
    ) -> Result<(), AttemptFailure> {
        let mut last_failure = AttemptFailure::NoKeyAccepted;

        for key in &ctx.config.settings_keys {
            match ctx.settings.put_int(key, link_id.0) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(key, "settings write not acknowledged");
                    continue;
                }
                Err(e) => {
                    debug!(key, error = %e, "settings write failed");
                    last_failure = e.into();
                    continue;
                }
            }

            thread::sleep(ctx.config.settle);

            let found = match ctx.settings.get_int(key, -1) {
                Ok(v) => v,
                Err(e) => {
                    last_failure = e.into();
                    continue;
                }
            };
            if found != link_id.0 {
                debug!(key, found, expected = link_id.0, "read-back mismatch");
                last_failure = AttemptFailure::ReadbackMismatch {
                    key: key.clone(),
                    expected: link_id.0,
                    found,
                };
                continue;
            }

            match ctx.verify(target) {
                Ok(()) => {
                    debug!(key, slot = %target, "settings key took effect");
                    return Ok(());
                }
                Err(failure) => last_failure = failure,
            }
        }

        Err(last_failure)
    }
}

/// `service call phone <code>` through the privileged executor.
#[derive(Debug, Default)]
pub struct PrivilegedServiceCall;

impl PrivilegedServiceCall {
    pub fn command(code: u32, target: SlotIndex) -> String {
        format!("service call phone {code} i32 {} i32 1", target.get())
    }
}

impl SwitchStrategy for PrivilegedServiceCall {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PrivilegedServiceCall
    }

    fn is_available(&self, ctx: &SwitchContext) -> bool {
        ctx.executor.is_elevated_available()
    }

    fn apply(
        &self,
        ctx: &SwitchContext,
        target: SlotIndex,
        _link_id: LinkId,
    ) -> Result<(), AttemptFailure> {
        if !ctx.executor.is_elevated_available() {
            return Err(AttemptFailure::NotElevated);
        }

        let codes = &ctx.config.service_call_codes;
        for &code in codes {
            let command = Self::command(code, target);
            match ctx.executor.run_elevated(&command) {
                Ok(0) => {
                    debug!(code, "service call accepted");
                    thread::sleep(ctx.config.privileged_settle);
                    return Ok(());
                }
                Ok(status) => debug!(code, status, "service call rejected"),
                Err(e) => warn!(code, error = %e, "service call failed to run"),
            }
        }

        Err(AttemptFailure::ServiceCallFailed { tried: codes.len() })
    }
}

/// Direct call into the private default-data-link API.
#[derive(Debug, Default)]
pub struct ReflectiveApiCall;

impl SwitchStrategy for ReflectiveApiCall {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReflectiveApiCall
    }

    fn is_available(&self, ctx: &SwitchContext) -> bool {
        ctx.reflective.is_supported()
    }

    fn apply(
        &self,
        ctx: &SwitchContext,
        _target: SlotIndex,
        link_id: LinkId,
    ) -> Result<(), AttemptFailure> {
        if !ctx.reflective.is_supported() {
            return Err(AttemptFailure::Unsupported("reflective data-link API"));
        }
        ctx.reflective.set_default_data_link(link_id)?;
        thread::sleep(ctx.config.reflective_settle);
        Ok(())
    }
}

/// The fixed priority chain.
pub fn default_chain() -> Vec<Box<dyn SwitchStrategy>> {
    vec![
        Box::new(SettingsWrite),
        Box::new(PrivilegedServiceCall),
        Box::new(ReflectiveApiCall),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::Mutex;

    use crate::error::PlatformError;

    /// Link ids are `100 + slot`.
    struct Registry;

    impl SubscriptionRegistry for Registry {
        fn resolve_link_id(&self, slot: SlotIndex) -> Result<LinkId, PlatformError> {
            Ok(LinkId(100 + slot.get() as i64))
        }

        fn resolve_slot(&self, link_id: LinkId) -> Result<SlotIndex, PlatformError> {
            SlotIndex::new((link_id.0 - 100) as u8)
                .map_err(|e| PlatformError::Unavailable(e.to_string()))
        }

        fn list_active_slots(&self) -> Result<BTreeSet<SlotIndex>, PlatformError> {
            Ok(SlotIndex::ALL.into_iter().collect())
        }
    }

    #[derive(Default)]
    struct Settings {
        values: Mutex<HashMap<String, i64>>,
        /// Keys whose writes are acknowledged but silently dropped.
        ignored: HashSet<String>,
        writes: Mutex<Vec<String>>,
    }

    impl SettingsStore for Settings {
        fn get_int(&self, key: &str, default: i64) -> Result<i64, PlatformError> {
            Ok(*self.values.lock().unwrap().get(key).unwrap_or(&default))
        }

        fn put_int(&self, key: &str, value: i64) -> Result<bool, PlatformError> {
            self.writes.lock().unwrap().push(key.to_string());
            if !self.ignored.contains(key) {
                self.values.lock().unwrap().insert(key.to_string(), value);
            }
            Ok(true)
        }
    }

    struct Executor {
        elevated: bool,
        exit_codes: HashMap<u32, i32>,
        commands: Mutex<Vec<String>>,
    }

    impl PrivilegedExecutor for Executor {
        fn run_elevated(&self, command: &str) -> Result<i32, PlatformError> {
            self.commands.lock().unwrap().push(command.to_string());
            let code: u32 = command.split_whitespace().nth(3).unwrap().parse().unwrap();
            Ok(*self.exit_codes.get(&code).unwrap_or(&1))
        }

        fn is_elevated_available(&self) -> bool {
            self.elevated
        }
    }

    fn ctx(settings: Settings, executor: Executor) -> (SwitchContext, Arc<Settings>, Arc<Executor>) {
        let mut config = SwitchConfig::default();
        config.settle = std::time::Duration::ZERO;
        config.privileged_settle = std::time::Duration::ZERO;
        let settings = Arc::new(settings);
        let executor = Arc::new(executor);
        let ctx = SwitchContext {
            config,
            registry: Arc::new(Registry),
            settings: settings.clone(),
            executor: executor.clone(),
            reflective: Arc::new(crate::platform::UnsupportedReflectiveApi),
        };
        (ctx, settings, executor)
    }

    fn executor(elevated: bool, accept: &[u32]) -> Executor {
        Executor {
            elevated,
            exit_codes: accept.iter().map(|&c| (c, 0)).collect(),
            commands: Mutex::new(Vec::new()),
        }
    }

    // ─── Settings Write ─────────────────────────────────────────────────

    #[test]
    fn settings_write_stops_at_first_effective_key() {
        let (ctx, settings, _) = ctx(Settings::default(), executor(false, &[]));
        SettingsWrite
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap();
        assert_eq!(*settings.writes.lock().unwrap(), vec!["multi_sim_data_call"]);
        assert!(ctx.verify(SlotIndex::SECOND).is_ok());
    }

    #[test]
    fn settings_write_reports_readback_mismatch() {
        let ignored = ctx_keys();
        let (ctx, settings, _) = ctx(
            Settings {
                ignored,
                ..Default::default()
            },
            executor(false, &[]),
        );
        let err = SettingsWrite
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap_err();
        assert!(matches!(err, AttemptFailure::ReadbackMismatch { .. }));
        assert_eq!(settings.writes.lock().unwrap().len(), 5);
    }

    #[test]
    fn settings_write_tries_alternate_keys_until_active_matches() {
        // Every key but the active one sticks, so read-back passes but the
        // active slot never changes.
        let ignored: HashSet<String> = ["multi_sim_data_call".to_string()].into_iter().collect();
        let (ctx, _, _) = ctx(
            Settings {
                ignored,
                ..Default::default()
            },
            executor(false, &[]),
        );
        let err = SettingsWrite
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap_err();
        assert!(matches!(
            err,
            AttemptFailure::VerificationMismatch {
                expected: SlotIndex::SECOND,
                ..
            }
        ));
    }

    fn ctx_keys() -> HashSet<String> {
        SwitchConfig::default().settings_keys.into_iter().collect()
    }

    // ─── Privileged Service Call ────────────────────────────────────────

    #[test]
    fn service_call_skipped_without_elevation() {
        let (ctx, _, exec) = ctx(Settings::default(), executor(false, &[193]));
        let err = PrivilegedServiceCall
            .apply(&ctx, SlotIndex::FIRST, LinkId(100))
            .unwrap_err();
        assert_eq!(err, AttemptFailure::NotElevated);
        assert!(err.is_skip());
        assert!(exec.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn service_call_walks_codes_until_one_succeeds() {
        let (ctx, _, exec) = ctx(Settings::default(), executor(true, &[27]));
        PrivilegedServiceCall
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap();
        let commands = exec.commands.lock().unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[2], "service call phone 27 i32 1 i32 1");
    }

    #[test]
    fn service_call_fails_when_no_code_succeeds() {
        let (ctx, _, _) = ctx(Settings::default(), executor(true, &[]));
        let err = PrivilegedServiceCall
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap_err();
        assert_eq!(err, AttemptFailure::ServiceCallFailed { tried: 5 });
    }

    // ─── Reflective ─────────────────────────────────────────────────────

    #[test]
    fn reflective_unsupported_is_a_skip() {
        let (ctx, _, _) = ctx(Settings::default(), executor(false, &[]));
        assert!(!ReflectiveApiCall.is_available(&ctx));
        let err = ReflectiveApiCall
            .apply(&ctx, SlotIndex::SECOND, LinkId(101))
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn default_chain_order() {
        let kinds: Vec<_> = default_chain().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, StrategyKind::ALL.to_vec());
    }
}
