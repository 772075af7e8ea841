//! # Coordinator Runtime
//!
//! Two threads:
//!
//! - **coordinator**: owns the [`Monitor`]; receives commands, push events,
//!   timer ticks and worker results on one channel and applies them in
//!   order. It never blocks on I/O.
//! - **worker**: runs the blocking jobs (probes, failovers, explicit
//!   switches) one at a time and posts results back to the coordinator.
//!
//! The current epoch is mirrored into an atomic so the worker can drop a
//! queued job that went stale before it started. Results that go stale
//! while running are discarded by the coordinator on arrival.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{never, select, tick, unbounded, Receiver, Sender};
use quanta::Clock;
use tracing::{debug, warn};

use dualsim_common::models::SlotIndex;

use crate::error::FailoverError;
use crate::health::QualityProbe;
use crate::metrics::FailoverMetrics;
use crate::monitor::{Action, FailoverJob, FailoverOutcome, Input, Monitor, MonitorView};
use crate::platform::EventSink;
use crate::policy::{Decision, FailoverPolicy, PolicyInput};
use crate::switcher::{SwitchOrchestrator, SwitchSuccess};

type SwitchReply = Sender<Result<SwitchSuccess, FailoverError>>;

/// Control messages to the coordinator thread.
pub(crate) enum Command {
    Start {
        primary: SlotIndex,
        fallback: SlotIndex,
        reply: Sender<()>,
    },
    Stop {
        reply: Sender<()>,
    },
    CheckNow,
    Input(Input),
    Switch {
        slot: SlotIndex,
        reply: SwitchReply,
    },
    SwitchDone {
        result: Result<SwitchSuccess, FailoverError>,
        reply: SwitchReply,
    },
    View {
        reply: Sender<MonitorView>,
    },
    WaitIdle {
        reply: Sender<()>,
    },
    Shutdown,
}

enum Job {
    Probe { epoch: u64 },
    Failover { epoch: u64, job: FailoverJob },
    Switch { slot: SlotIndex, reply: SwitchReply },
    Shutdown,
}

/// Handed to a [`PushSource`](crate::platform::PushSource) so OS callbacks
/// can reach the coordinator from any thread.
#[derive(Clone)]
pub struct PushHandle {
    tx: Sender<Command>,
}

impl PushHandle {
    /// The OS reported a network as available.
    pub fn network_available(&self) {
        self.push(true);
    }

    /// The OS reported the active network as lost.
    pub fn network_lost(&self) {
        self.push(false);
    }

    fn push(&self, available: bool) {
        if self
            .tx
            .send(Command::Input(Input::Push { available }))
            .is_err()
        {
            debug!(available, "push event after shutdown");
        }
    }
}

impl std::fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHandle").finish_non_exhaustive()
    }
}

/// Everything the runtime threads need.
pub struct RuntimeParts {
    pub monitor: Monitor,
    pub check_interval: Duration,
    pub probe: Arc<QualityProbe>,
    pub orchestrator: Arc<SwitchOrchestrator>,
    pub policy: FailoverPolicy,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<FailoverMetrics>,
    pub clock: Clock,
}

/// Handle to the coordinator and worker threads.
///
/// Dropping the runtime shuts both threads down.
pub struct FailoverRuntime {
    cmd_tx: Sender<Command>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FailoverRuntime {
    pub fn spawn(parts: RuntimeParts) -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let epoch = Arc::new(AtomicU64::new(parts.monitor.epoch()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            probe: parts.probe,
            orchestrator: parts.orchestrator,
            policy: parts.policy,
            clock: parts.clock.clone(),
            epoch: epoch.clone(),
            metrics: parts.metrics,
            results: cmd_tx.clone(),
        };
        let worker_handle = thread::Builder::new()
            .name("dualsim-worker".into())
            .spawn(move || worker.run(job_rx))
            .expect("failed to spawn failover worker");

        let coordinator = Coordinator {
            monitor: parts.monitor,
            check_interval: parts.check_interval,
            clock: parts.clock,
            events: parts.events,
            epoch,
            jobs: job_tx,
            ticker: None,
            idle_waiters: Vec::new(),
        };
        let handle = thread::Builder::new()
            .name("dualsim-coordinator".into())
            .spawn(move || coordinator.run(cmd_rx, worker_handle))
            .expect("failed to spawn failover coordinator");

        FailoverRuntime {
            cmd_tx,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn start(&self, primary: SlotIndex, fallback: SlotIndex) -> Result<(), FailoverError> {
        self.request(|reply| Command::Start {
            primary,
            fallback,
            reply,
        })
    }

    pub fn stop(&self) -> Result<(), FailoverError> {
        self.request(|reply| Command::Stop { reply })
    }

    /// Run a probe now instead of waiting for the next tick. Ignored when
    /// not monitoring or while a probe is already running.
    pub fn check_now(&self) {
        let _ = self.cmd_tx.send(Command::CheckNow);
    }

    /// Explicit switch, serialized with automatic failovers on the worker.
    pub fn switch(&self, slot: SlotIndex) -> Result<SwitchSuccess, FailoverError> {
        self.request(|reply| Command::Switch { slot, reply })?
    }

    pub fn view(&self) -> Result<MonitorView, FailoverError> {
        self.request(|reply| Command::View { reply })
    }

    /// Block until nothing is in flight, or `timeout` passes. Returns
    /// whether the runtime went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let (reply, rx) = crossbeam_channel::bounded(1);
        if self.cmd_tx.send(Command::WaitIdle { reply }).is_err() {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }

    pub fn push_handle(&self) -> PushHandle {
        PushHandle {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Stops both threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, FailoverError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(FailoverError::Shutdown);
        }
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(make(reply))
            .map_err(|_| FailoverError::Shutdown)?;
        rx.recv().map_err(|_| FailoverError::Shutdown)
    }
}

impl Drop for FailoverRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Coordinator {
    monitor: Monitor,
    check_interval: Duration,
    clock: Clock,
    events: Arc<dyn EventSink>,
    epoch: Arc<AtomicU64>,
    jobs: Sender<Job>,
    ticker: Option<Receiver<std::time::Instant>>,
    idle_waiters: Vec<Sender<()>>,
}

impl Coordinator {
    fn run(mut self, cmd_rx: Receiver<Command>, worker: thread::JoinHandle<()>) {
        loop {
            let ticks = self.ticker.clone().unwrap_or_else(never);
            let next = select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => None,
                    Ok(cmd) => Some(self.on_command(cmd)),
                },
                recv(ticks) -> _ => Some(self.monitor.handle(Input::Tick, self.clock.now())),
            };
            let Some(actions) = next else {
                break;
            };
            self.perform(actions);
            if self.monitor.is_idle() {
                for waiter in self.idle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }

        self.monitor.stop();
        self.epoch.store(self.monitor.epoch(), Ordering::Release);
        // Dropping the receiver discards queued commands and their reply
        // senders, so blocked callers see a disconnect.
        drop(cmd_rx);
        let _ = self.jobs.send(Job::Shutdown);
        let _ = worker.join();
        debug!("coordinator exited");
    }

    fn on_command(&mut self, cmd: Command) -> Vec<Action> {
        let now = self.clock.now();
        match cmd {
            Command::Start {
                primary,
                fallback,
                reply,
            } => {
                let actions = self.monitor.start(primary, fallback);
                self.epoch.store(self.monitor.epoch(), Ordering::Release);
                self.ticker = Some(tick(self.check_interval));
                let _ = reply.send(());
                actions
            }
            Command::Stop { reply } => {
                self.monitor.stop();
                self.epoch.store(self.monitor.epoch(), Ordering::Release);
                self.ticker = None;
                let _ = reply.send(());
                Vec::new()
            }
            Command::CheckNow => self.monitor.handle(Input::Tick, now),
            Command::Input(input) => self.monitor.handle(input, now),
            Command::Switch { slot, reply } => {
                self.monitor.handle(Input::ManualStarted, now);
                // On failure the reply sender is dropped with the job.
                if self.jobs.send(Job::Switch { slot, reply }).is_err() {
                    self.monitor.handle(Input::ManualFinished, now);
                }
                Vec::new()
            }
            Command::SwitchDone { result, reply } => {
                let mut actions = Vec::new();
                if let Ok(success) = &result {
                    actions = self.monitor.handle(Input::ManualSwitched(success.clone()), now);
                }
                self.monitor.handle(Input::ManualFinished, now);
                let _ = reply.send(result);
                actions
            }
            Command::View { reply } => {
                let _ = reply.send(self.monitor.view());
                Vec::new()
            }
            Command::WaitIdle { reply } => {
                self.idle_waiters.push(reply);
                Vec::new()
            }
            Command::Shutdown => Vec::new(),
        }
    }

    fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::StartProbe { epoch } => self.submit(Job::Probe { epoch }),
                Action::StartFailover { epoch, job } => self.submit(Job::Failover { epoch, job }),
                Action::Emit(event) => self.events.emit(event),
            }
        }
    }

    fn submit(&mut self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("failover worker is gone");
        }
    }
}

struct Worker {
    probe: Arc<QualityProbe>,
    orchestrator: Arc<SwitchOrchestrator>,
    policy: FailoverPolicy,
    clock: Clock,
    epoch: Arc<AtomicU64>,
    metrics: Arc<FailoverMetrics>,
    results: Sender<Command>,
}

impl Worker {
    fn run(self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            match job {
                Job::Shutdown => break,
                Job::Probe { epoch } => {
                    if self.is_stale(epoch) {
                        continue;
                    }
                    let report = self.probe.probe();
                    let current_slot = self.orchestrator.current_slot().ok();
                    self.post(Command::Input(Input::ProbeDone {
                        epoch,
                        report,
                        current_slot,
                    }));
                }
                Job::Failover { epoch, job } => {
                    if self.is_stale(epoch) {
                        continue;
                    }
                    let outcome = self.run_failover(job);
                    self.post(Command::Input(Input::FailoverDone { epoch, outcome }));
                }
                Job::Switch { slot, reply } => {
                    let result = self.orchestrator.execute(slot);
                    self.post(Command::SwitchDone { result, reply });
                }
            }
        }
        debug!("worker exited");
    }

    fn is_stale(&self, epoch: u64) -> bool {
        let stale = epoch != self.epoch.load(Ordering::Acquire);
        if stale {
            debug!(epoch, "dropping stale job before start");
            self.metrics.record_stale_result();
        }
        stale
    }

    fn run_failover(&self, job: FailoverJob) -> FailoverOutcome {
        let current = self.orchestrator.current_slot().ok().or(job.current);
        let active = match self.orchestrator.context().registry.list_active_slots() {
            Ok(active) => active,
            Err(e) => return FailoverOutcome::Failed(e.into()),
        };
        let input = PolicyInput {
            current,
            primary: job.primary,
            fallback: job.fallback,
            active_slots: active,
            last_switch_at: job.last_switch_at,
            now: self.clock.now(),
        };
        match self.policy.decide(&input) {
            Decision::Skip(reason) => FailoverOutcome::Skipped { reason, current },
            Decision::Switch(target) => match self.orchestrator.execute(target) {
                Ok(success) => FailoverOutcome::Switched(success),
                Err(e) => FailoverOutcome::Failed(e),
            },
        }
    }

    fn post(&self, cmd: Command) {
        if self.results.send(cmd).is_err() {
            debug!("coordinator gone, dropping result");
        }
    }
}
