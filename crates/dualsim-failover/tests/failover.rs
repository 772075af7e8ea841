//! End-to-end failover against the simulated device.
//!
//! The polling interval is set far out so ticks never fire on their own;
//! each test drives probes with `check_now` and waits for the runtime to go
//! idle. Cooldowns run on a mocked clock.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Mock};

use dualsim_common::models::{DetectorState, Quality, SlotIndex, StrategyKind};
use dualsim_common::protocol::FailoverEvent;
use dualsim_failover::config::FailoverConfig;
use dualsim_failover::policy::SkipReason;
use dualsim_failover::{Controller, FailoverError};
use dualsim_sim::{LinkCondition, RecordingSink, SimDevice};

const S0: SlotIndex = SlotIndex::FIRST;
const S1: SlotIndex = SlotIndex::SECOND;
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    device: Arc<SimDevice>,
    sink: RecordingSink,
    controller: Controller,
    mock: Arc<Mock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: FailoverConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let device = Arc::new(SimDevice::new());
        let sink = RecordingSink::new();
        let platform = device.platform(Arc::new(sink.clone()));
        let (clock, mock) = Clock::mock();
        let controller = Controller::with_clock(config, platform, clock);
        Harness {
            device,
            sink,
            controller,
            mock,
        }
    }

    fn settle(&self) {
        assert!(self.controller.wait_idle(WAIT), "runtime did not go idle");
    }

    fn probe(&self) {
        self.controller.check_now();
        self.settle();
    }

    fn auto_switches(&self, events: &[FailoverEvent]) -> Vec<(SlotIndex, SlotIndex)> {
        events
            .iter()
            .filter_map(|e| match e {
                FailoverEvent::AutoSwitched { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

fn test_config() -> FailoverConfig {
    let mut cfg = FailoverConfig::immediate();
    cfg.monitor.check_interval = Duration::from_secs(3600);
    cfg.probe.timeout = Duration::from_millis(500);
    cfg
}

// ─── Automatic failover ─────────────────────────────────────────────────────

#[test]
fn three_losses_trigger_exactly_one_switch() {
    let h = Harness::new();
    h.device.script_qualities(
        S0,
        &[
            Quality::Excellent,
            Quality::Excellent,
            Quality::None,
            Quality::None,
            Quality::None,
        ],
    );

    // First probe runs on start.
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    for _ in 0..3 {
        h.probe();
        assert!(h.auto_switches(&h.sink.drain()).is_empty());
    }
    h.probe();

    let events = h.sink.drain();
    assert_eq!(h.auto_switches(&events), vec![(S0, S1)]);
    assert_eq!(h.device.data_slot(), Some(S1));

    let status = h.controller.status().unwrap();
    assert_eq!(status.current_slot, Some(S1));
    assert_eq!(status.loss_count, 0);
    assert_eq!(status.detector_state, DetectorState::Lost);
    assert_eq!(status.last_switch_ms_ago, Some(0));

    let m = h.controller.metrics().snapshot();
    assert_eq!(m.auto_switches, 1);
    assert_eq!(m.lost_transitions, 1);
    assert_eq!(m.samples, 5);
    assert_eq!(m.successes_for(StrategyKind::SettingsWrite), 1);
}

#[test]
fn healthy_probe_after_switch_restores() {
    let h = Harness::new();
    h.device
        .script_qualities(S0, &[Quality::Good, Quality::None, Quality::None, Quality::None]);

    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    for _ in 0..3 {
        h.probe();
    }
    assert_eq!(h.device.data_slot(), Some(S1));
    h.sink.drain();

    // Slot 1 is healthy by default.
    h.probe();
    let events = h.sink.drain();
    assert!(
        matches!(events.as_slice(), [FailoverEvent::NetworkRestored { slot, .. }] if *slot == S1),
        "unexpected events: {events:?}"
    );
    assert_eq!(
        h.controller.status().unwrap().detector_state,
        DetectorState::Healthy
    );
}

#[test]
fn cooldown_blocks_second_switch_until_elapsed() {
    let h = Harness::new();
    h.device.script_qualities(S0, &[Quality::None; 3]);
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.probe();
    h.probe();
    assert_eq!(h.device.data_slot(), Some(S1));

    // Slot 1 fails straight away: the switch back is inside the cooldown.
    h.device.script_qualities(S1, &[Quality::None; 6]);
    for _ in 0..3 {
        h.probe();
    }
    assert_eq!(h.device.data_slot(), Some(S1));
    let m = h.controller.metrics().snapshot();
    assert_eq!(
        m.policy_skips_for(&SkipReason::Cooldown {
            remaining: Duration::ZERO
        }),
        1
    );

    h.mock.increment(Duration::from_secs(10));
    for _ in 0..3 {
        h.probe();
    }
    assert_eq!(h.device.data_slot(), Some(S0));
    assert_eq!(h.auto_switches(&h.sink.drain()), vec![(S0, S1), (S1, S0)]);
}

#[test]
fn black_hole_link_counts_as_lost() {
    let h = Harness::new();
    h.device.set_condition(S0, LinkCondition::black_hole());
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.probe();
    h.probe();
    assert_eq!(h.device.data_slot(), Some(S1));
}

#[test]
fn poor_signal_alone_never_fails_over() {
    let h = Harness::new();
    h.device.set_condition(S0, LinkCondition::for_quality(Quality::Poor));
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    for _ in 0..5 {
        h.probe();
    }
    assert_eq!(h.device.data_slot(), Some(S0));
    assert_eq!(h.controller.metrics().snapshot().lost_transitions, 0);
}

#[test]
fn push_loss_drives_failover() {
    let h = Harness::new();
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    assert!(h.device.push_registered());

    for _ in 0..3 {
        h.device.push_lost();
    }
    h.settle();
    assert_eq!(h.device.data_slot(), Some(S1));
    assert_eq!(h.controller.metrics().snapshot().push_events, 3);

    h.controller.stop_monitoring().unwrap();
    assert!(!h.device.push_registered());
}

#[test]
fn failed_switch_keeps_monitoring() {
    let h = Harness::new();
    h.device.script_qualities(S0, &[Quality::None; 3]);
    h.device
        .freeze_all_keys(&FailoverConfig::default().switch.settings_keys);
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.probe();
    h.probe();

    assert_eq!(h.device.data_slot(), Some(S0));
    let status = h.controller.status().unwrap();
    assert!(status.is_monitoring);
    assert_eq!(h.controller.metrics().snapshot().switch_failures, 1);
    assert!(h.auto_switches(&h.sink.drain()).is_empty());
}

#[test]
fn inactive_fallback_is_skipped() {
    let h = Harness::new();
    h.device.set_active(S1, false);
    h.device.script_qualities(S0, &[Quality::None; 3]);
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.probe();
    h.probe();

    assert_eq!(h.device.data_slot(), Some(S0));
    let m = h.controller.metrics().snapshot();
    assert_eq!(m.policy_skips_for(&SkipReason::TargetInactive), 1);
    assert_eq!(m.strategy_attempts.iter().sum::<u64>(), 0);
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[test]
fn stop_discards_in_flight_probe_and_is_idempotent() {
    let h = Harness::new();
    h.device.set_reachability_delay(Duration::from_millis(200));
    h.device.set_condition(S0, LinkCondition::black_hole());

    h.controller.start_monitoring(0, 1).unwrap();
    h.controller.stop_monitoring().unwrap();
    h.controller.stop_monitoring().unwrap();
    std::thread::sleep(Duration::from_millis(600));
    h.settle();

    let status = h.controller.status().unwrap();
    assert!(!status.is_monitoring);
    assert_eq!(status.loss_count, 0);
    let m = h.controller.metrics().snapshot();
    assert_eq!(m.samples, 0);
    assert_eq!(m.stale_results, 1);

    // Ticks are ignored while stopped.
    h.probe();
    assert_eq!(h.controller.metrics().snapshot().samples, 0);
}

#[test]
fn restart_resets_counters() {
    let h = Harness::new();
    h.device.script_qualities(S0, &[Quality::None, Quality::None]);
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.probe();
    assert_eq!(h.controller.status().unwrap().loss_count, 2);

    h.controller.start_monitoring(1, 0).unwrap();
    h.settle();
    let status = h.controller.status().unwrap();
    assert_eq!(status.loss_count, 0);
    assert_eq!(status.primary, Some(S1));
    assert_eq!(status.fallback, Some(S0));
}

#[test]
fn invalid_pairs_are_rejected() {
    let h = Harness::new();
    assert!(matches!(
        h.controller.start_monitoring(0, 0),
        Err(FailoverError::InvalidPair(_))
    ));
    assert!(matches!(
        h.controller.start_monitoring(0, 2),
        Err(FailoverError::InvalidSlot(_))
    ));
    assert!(!h.controller.status().unwrap().is_monitoring);
}

// ─── Explicit switching ─────────────────────────────────────────────────────

#[test]
fn switch_to_current_slot_is_a_noop() {
    let h = Harness::new();
    let success = h.controller.switch_to(0).unwrap();
    assert!(success.was_noop());
    assert!(success.attempts.is_empty());
    assert!(h.device.writes().is_empty());
    assert!(h.device.commands().is_empty());
    assert_eq!(h.controller.status().unwrap().last_switch_ms_ago, None);
}

#[test]
fn switch_to_emits_sim_switched_and_starts_cooldown() {
    let h = Harness::new();
    let success = h.controller.switch_to(1).unwrap();
    assert_eq!(success.strategy, Some(StrategyKind::SettingsWrite));
    assert_eq!(success.previous, Some(S0));
    assert_eq!(h.device.data_slot(), Some(S1));

    let events = h.sink.drain();
    assert!(matches!(events.as_slice(), [FailoverEvent::SimSwitched { slot, .. }] if *slot == S1));

    h.mock.increment(Duration::from_millis(1500));
    assert_eq!(h.controller.status().unwrap().last_switch_ms_ago, Some(1500));
    assert_eq!(h.controller.metrics().snapshot().manual_switches, 1);
}

#[test]
fn manual_switch_counts_against_auto_cooldown() {
    let h = Harness::new();
    h.controller.start_monitoring(0, 1).unwrap();
    h.settle();
    h.controller.switch_to(1).unwrap();
    h.device.script_qualities(S1, &[Quality::None; 3]);
    for _ in 0..3 {
        h.probe();
    }

    assert_eq!(h.device.data_slot(), Some(S1));
    let m = h.controller.metrics().snapshot();
    assert_eq!(
        m.policy_skips_for(&SkipReason::Cooldown {
            remaining: Duration::ZERO
        }),
        1
    );
}

#[test]
fn chain_falls_through_to_reflective_api() {
    let h = Harness::new();
    h.device
        .freeze_all_keys(&FailoverConfig::default().switch.settings_keys);
    h.device.set_reflective(true, true);

    let success = h.controller.switch_to(1).unwrap();
    assert_eq!(success.strategy, Some(StrategyKind::ReflectiveApiCall));
    let kinds: Vec<_> = success.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(
        kinds,
        [
            StrategyKind::SettingsWrite,
            StrategyKind::PrivilegedServiceCall,
            StrategyKind::ReflectiveApiCall
        ]
    );
    assert!(success.attempts[1].skipped());
    assert_eq!(h.device.data_slot(), Some(S1));
}

#[test]
fn privileged_service_call_tries_codes_in_order() {
    let h = Harness::new();
    h.device.set_settings_writable(false);
    h.device.set_elevated(true);
    h.device.accept_service_codes(&[27], true);

    let success = h.controller.switch_to(1).unwrap();
    assert_eq!(success.strategy, Some(StrategyKind::PrivilegedServiceCall));
    assert_eq!(
        h.device.commands(),
        [
            "service call phone 193 i32 1 i32 1",
            "service call phone 194 i32 1 i32 1",
            "service call phone 27 i32 1 i32 1",
        ]
    );
    assert!(h.controller.is_elevated());
}

#[test]
fn no_capability_is_permission_denied() {
    let h = Harness::new();
    h.device.set_settings_writable(false);

    assert!(!h.controller.can_switch());
    let err = h.controller.switch_to(1).unwrap_err();
    assert_eq!(err.code(), "PERMISSION_DENIED");
    // Already on the target: nothing to do, nothing denied.
    assert!(h.controller.switch_to(0).unwrap().was_noop());
}

#[test]
fn switch_to_inactive_slot_fails() {
    let h = Harness::new();
    h.device.set_active(S1, false);
    assert_eq!(
        h.controller.switch_to(1).unwrap_err(),
        FailoverError::TargetInactive(S1)
    );
    assert!(h.device.writes().is_empty());
}

#[test]
fn exhausted_chain_reports_every_attempt() {
    let h = Harness::new();
    h.device
        .freeze_all_keys(&FailoverConfig::default().switch.settings_keys);
    h.device.set_elevated(true);
    h.device.set_reflective(true, false);

    match h.controller.switch_to(1) {
        Err(FailoverError::AllStrategiesFailed { target, attempts }) => {
            assert_eq!(target, S1);
            assert_eq!(attempts.len(), 3);
            assert!(attempts.iter().all(|a| !a.succeeded()));
        }
        other => panic!("expected AllStrategiesFailed, got {other:?}"),
    }
    assert!(h.sink.drain().is_empty());
    assert_eq!(h.controller.metrics().snapshot().manual_switches, 0);
}

// ─── Queries ────────────────────────────────────────────────────────────────

#[test]
fn quality_and_info_reflect_active_link() {
    let h = Harness::new();
    h.device.set_condition(S0, LinkCondition::good());
    assert_eq!(h.controller.network_quality(), Quality::Good);

    let info = h.controller.network_info().unwrap();
    assert!(info.has_network && info.is_validated);
    assert_eq!(info.signal_level, Some(2));
    assert_eq!(info.current_slot, Some(S0));
    assert_eq!(info.active_slots, vec![S0, S1]);

    h.device.set_condition(S0, LinkCondition::dead());
    assert_eq!(h.controller.network_quality(), Quality::None);
}

#[test]
fn status_reports_legacy_keys() {
    let h = Harness::new();
    h.device.set_raw_setting("mobile_data", 1);
    h.device.set_raw_setting("mobile_data1", -1);

    let status = h.controller.status().unwrap();
    assert_eq!(
        status.legacy_keys,
        vec![
            ("mobile_data".to_string(), Some(1)),
            ("mobile_data0".to_string(), None),
            ("mobile_data1".to_string(), None),
        ]
    );
    assert_eq!(status.current_link_id.map(|id| id.0), Some(1));
    assert_eq!(status.active_slots, vec![S0, S1]);
    assert!(!status.is_monitoring);
}

#[test]
fn metrics_endpoint_reports_switches() {
    let mut h = Harness::new();
    h.controller.switch_to(1).unwrap();
    let addr = h
        .controller
        .start_metrics_server("127.0.0.1:0".parse().unwrap())
        .unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).unwrap();
    assert!(body.contains("dualsim_manual_switches_total 1"));
    assert!(body.contains("dualsim_strategy_successes_total{strategy=\"settings_write\"} 1"));

    h.controller.shutdown();
    h.controller.shutdown();
    assert!(matches!(h.controller.status(), Err(FailoverError::Shutdown)));
}
