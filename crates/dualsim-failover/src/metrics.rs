//! # Prometheus Metrics
//!
//! In-memory failover counters, rendered in Prometheus text exposition
//! format and optionally served over HTTP for scraping.

use std::fmt::Write;
use std::io::{Read, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dualsim_common::models::StrategyKind;

use crate::policy::SkipReason;

const SKIP_REASONS: [&str; 3] = ["already_target", "target_inactive", "cooldown"];

fn strategy_index(kind: StrategyKind) -> usize {
    match kind {
        StrategyKind::SettingsWrite => 0,
        StrategyKind::PrivilegedServiceCall => 1,
        StrategyKind::ReflectiveApiCall => 2,
    }
}

fn skip_index(reason: &SkipReason) -> usize {
    match reason {
        SkipReason::AlreadyTarget => 0,
        SkipReason::TargetInactive => 1,
        SkipReason::Cooldown { .. } => 2,
    }
}

/// Counters shared between the coordinator, the worker and callers.
#[derive(Debug, Default)]
pub struct FailoverMetrics {
    samples: AtomicU64,
    loss_signals: AtomicU64,
    push_events: AtomicU64,
    lost_transitions: AtomicU64,
    restores: AtomicU64,
    policy_skips: [AtomicU64; 3],
    auto_switches: AtomicU64,
    manual_switches: AtomicU64,
    switch_failures: AtomicU64,
    stale_results: AtomicU64,
    strategy_attempts: [AtomicU64; 3],
    strategy_successes: [AtomicU64; 3],
    strategy_failures: [AtomicU64; 3],
    strategy_skips: [AtomicU64; 3],
}

/// Plain copy of [`FailoverMetrics`] at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples: u64,
    pub loss_signals: u64,
    pub push_events: u64,
    pub lost_transitions: u64,
    pub restores: u64,
    pub policy_skips: [u64; 3],
    pub auto_switches: u64,
    pub manual_switches: u64,
    pub switch_failures: u64,
    pub stale_results: u64,
    pub strategy_attempts: [u64; 3],
    pub strategy_successes: [u64; 3],
    pub strategy_failures: [u64; 3],
    pub strategy_skips: [u64; 3],
}

impl MetricsSnapshot {
    pub fn policy_skips_for(&self, reason: &SkipReason) -> u64 {
        self.policy_skips[skip_index(reason)]
    }

    pub fn attempts_for(&self, kind: StrategyKind) -> u64 {
        self.strategy_attempts[strategy_index(kind)]
    }

    pub fn successes_for(&self, kind: StrategyKind) -> u64 {
        self.strategy_successes[strategy_index(kind)]
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load3(counters: &[AtomicU64; 3]) -> [u64; 3] {
    [
        counters[0].load(Ordering::Relaxed),
        counters[1].load(Ordering::Relaxed),
        counters[2].load(Ordering::Relaxed),
    ]
}

impl FailoverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&self) {
        bump(&self.samples);
    }

    pub fn record_loss_signal(&self) {
        bump(&self.loss_signals);
    }

    pub fn record_push(&self) {
        bump(&self.push_events);
    }

    pub fn record_lost(&self) {
        bump(&self.lost_transitions);
    }

    pub fn record_restored(&self) {
        bump(&self.restores);
    }

    pub fn record_skip(&self, reason: &SkipReason) {
        bump(&self.policy_skips[skip_index(reason)]);
    }

    pub fn record_auto_switch(&self) {
        bump(&self.auto_switches);
    }

    pub fn record_manual_switch(&self) {
        bump(&self.manual_switches);
    }

    pub fn record_switch_failure(&self) {
        bump(&self.switch_failures);
    }

    pub fn record_stale_result(&self) {
        bump(&self.stale_results);
    }

    pub fn record_attempt(&self, kind: StrategyKind) {
        bump(&self.strategy_attempts[strategy_index(kind)]);
    }

    pub fn record_attempt_success(&self, kind: StrategyKind) {
        bump(&self.strategy_successes[strategy_index(kind)]);
    }

    pub fn record_attempt_failure(&self, kind: StrategyKind) {
        bump(&self.strategy_failures[strategy_index(kind)]);
    }

    pub fn record_attempt_skip(&self, kind: StrategyKind) {
        bump(&self.strategy_skips[strategy_index(kind)]);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            loss_signals: self.loss_signals.load(Ordering::Relaxed),
            push_events: self.push_events.load(Ordering::Relaxed),
            lost_transitions: self.lost_transitions.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
            policy_skips: load3(&self.policy_skips),
            auto_switches: self.auto_switches.load(Ordering::Relaxed),
            manual_switches: self.manual_switches.load(Ordering::Relaxed),
            switch_failures: self.switch_failures.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            strategy_attempts: load3(&self.strategy_attempts),
            strategy_successes: load3(&self.strategy_successes),
            strategy_failures: load3(&self.strategy_failures),
            strategy_skips: load3(&self.strategy_skips),
        }
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn write_labeled(
    out: &mut String,
    name: &str,
    help: &str,
    label: &str,
    values: &[u64; 3],
    label_values: [&str; 3],
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (value, label_value) in values.iter().zip(label_values) {
        let _ = writeln!(out, "{name}{{{label}=\"{label_value}\"}} {value}");
    }
}

/// Render counters as Prometheus text exposition format.
pub fn render_prometheus(m: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(2048);
    let strategies = StrategyKind::ALL.map(StrategyKind::as_str);

    // ── Detection ───────────────────────────────────────────────

    write_counter(&mut out, "dualsim_samples_total", "Quality probes completed.", m.samples);
    write_counter(
        &mut out,
        "dualsim_loss_signals_total",
        "Negative samples and lost push events.",
        m.loss_signals,
    );
    write_counter(&mut out, "dualsim_push_events_total", "OS push notifications received.", m.push_events);
    write_counter(
        &mut out,
        "dualsim_lost_transitions_total",
        "Times the loss threshold was reached.",
        m.lost_transitions,
    );
    write_counter(&mut out, "dualsim_restores_total", "Network restored events.", m.restores);
    write_labeled(
        &mut out,
        "dualsim_policy_skips_total",
        "Failover decisions that did not switch.",
        "reason",
        &m.policy_skips,
        SKIP_REASONS,
    );

    // ── Switching ───────────────────────────────────────────────

    write_counter(&mut out, "dualsim_auto_switches_total", "Verified automatic switches.", m.auto_switches);
    write_counter(
        &mut out,
        "dualsim_manual_switches_total",
        "Verified explicit switches.",
        m.manual_switches,
    );
    write_counter(
        &mut out,
        "dualsim_switch_failures_total",
        "Switches where every strategy failed.",
        m.switch_failures,
    );
    write_counter(
        &mut out,
        "dualsim_stale_results_total",
        "Worker results discarded after monitoring stopped or restarted.",
        m.stale_results,
    );
    write_labeled(
        &mut out,
        "dualsim_strategy_attempts_total",
        "Strategy attempts started.",
        "strategy",
        &m.strategy_attempts,
        strategies,
    );
    write_labeled(
        &mut out,
        "dualsim_strategy_successes_total",
        "Strategy attempts that passed verification.",
        "strategy",
        &m.strategy_successes,
        strategies,
    );
    write_labeled(
        &mut out,
        "dualsim_strategy_failures_total",
        "Strategy attempts that failed.",
        "strategy",
        &m.strategy_failures,
        strategies,
    );
    write_labeled(
        &mut out,
        "dualsim_strategy_skips_total",
        "Strategies skipped for lack of access or support.",
        "strategy",
        &m.strategy_skips,
        strategies,
    );

    out
}

/// A lightweight HTTP server that serves `/metrics` for Prometheus scraping.
pub struct MetricsServer {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn start(bind_addr: SocketAddr, metrics: Arc<FailoverMetrics>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = thread::Builder::new()
            .name("dualsim-metrics".into())
            .spawn(move || serve_loop(listener, metrics, running_clone))
            .map_err(std::io::Error::other)?;

        tracing::info!(%addr, "metrics server listening");
        Ok(MetricsServer {
            running,
            handle: Some(handle),
            addr,
        })
    }

    /// The address the server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(listener: TcpListener, metrics: Arc<FailoverMetrics>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, &metrics.snapshot()),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => thread::sleep(Duration::from_millis(100)),
        }
    }
}

fn handle_connection(mut stream: TcpStream, snapshot: &MetricsSnapshot) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    if request.starts_with("GET /metrics") {
        let body = render_prometheus(snapshot);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    } else {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let _ = stream.write_all(response.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = FailoverMetrics::new();
        m.record_sample();
        m.record_sample();
        m.record_skip(&SkipReason::Cooldown {
            remaining: Duration::from_secs(1),
        });
        m.record_attempt(StrategyKind::ReflectiveApiCall);
        m.record_attempt_success(StrategyKind::ReflectiveApiCall);

        let snap = m.snapshot();
        assert_eq!(snap.samples, 2);
        assert_eq!(snap.policy_skips_for(&SkipReason::AlreadyTarget), 0);
        assert_eq!(snap.policy_skips, [0, 0, 1]);
        assert_eq!(snap.attempts_for(StrategyKind::ReflectiveApiCall), 1);
        assert_eq!(snap.successes_for(StrategyKind::SettingsWrite), 0);
    }

    #[test]
    fn render_prometheus_contains_help_lines() {
        let out = render_prometheus(&MetricsSnapshot::default());
        assert!(out.contains("# HELP dualsim_samples_total"));
        assert!(out.contains("# TYPE dualsim_samples_total counter"));
        assert!(out.contains("# HELP dualsim_strategy_attempts_total"));
        assert!(out.contains("# HELP dualsim_policy_skips_total"));
    }

    #[test]
    fn render_prometheus_labels() {
        let snap = MetricsSnapshot {
            auto_switches: 4,
            strategy_failures: [2, 0, 0],
            policy_skips: [0, 0, 7],
            ..Default::default()
        };
        let out = render_prometheus(&snap);
        assert!(out.contains("dualsim_auto_switches_total 4"));
        assert!(out.contains("dualsim_strategy_failures_total{strategy=\"settings_write\"} 2"));
        assert!(out.contains("dualsim_policy_skips_total{reason=\"cooldown\"} 7"));
    }

    #[test]
    fn metrics_server_serves_and_stops() {
        let metrics = Arc::new(FailoverMetrics::new());
        metrics.record_lost();
        let mut server =
            MetricsServer::start("127.0.0.1:0".parse().unwrap(), metrics.clone()).unwrap();

        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.write_all(b"GET /metrics HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("dualsim_lost_transitions_total 1"));

        server.stop();
    }

    #[test]
    fn metrics_server_404_for_other_paths() {
        let metrics = Arc::new(FailoverMetrics::new());
        let server = MetricsServer::start("127.0.0.1:0".parse().unwrap(), metrics).unwrap();
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("HTTP/1.1 404"));
    }
}
