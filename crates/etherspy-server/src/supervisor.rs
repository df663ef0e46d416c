//! Decoding-engine process supervisor and restart coordinator.
//!
//! The supervisor owns the engine subprocess for its entire life:
//!
//! ```text
//! Idle -> Launching -> Running -> Draining -> Idle
//!                                     \-> ShuttingDown (terminal)
//! ```
//!
//! - Every launch reads a fresh settings snapshot and builds a new command.
//! - Engine stdout and stderr are read line by line and handed to the
//!   `StreamDemultiplexer`.
//! - Any exit (clean, crash, spawn failure, requested restart) is followed
//!   by a fixed backoff before the next launch. The supervisor never gives
//!   up.
//! - A requested restart sends SIGTERM, waits for the grace period, then
//!   kills.
//!
//! The only way into a running instance from outside is the
//! `RestartHandle`. It shares a single control slot with the supervision
//! loop; the slot holds a stop sender only while an instance is launching
//! or running.

use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

use etherspy_core::{CommandBuilder, LaunchSpec};

use crate::demux::StreamDemultiplexer;
use crate::shutdown::Shutdown;
use crate::stats::StatisticsCollector;
use crate::store::SettingsStore;

const OUTPUT_BUFFER: usize = 256;

/// Lifecycle state of the supervised engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    Draining,
    ShuttingDown,
}

/// Supervisor timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between an exit and the next launch.
    pub backoff: Duration,
    /// How long a terminated engine gets before it is killed.
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
        }
    }
}

type ControlSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Requests engine restarts and observes supervisor state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RestartHandle {
    control: ControlSlot,
    state: watch::Receiver<SupervisorState>,
}

impl RestartHandle {
    /// Ask the running engine to stop so the next launch picks up the
    /// current settings.
    ///
    /// Returns `true` if a running or launching instance was signalled.
    /// With no instance (idle, backing off, already draining) this is a
    /// no-op.
    pub async fn request_restart(&self) -> bool {
        let mut slot = self.control.lock().await;
        match slot.take() {
            Some(stop) => stop.send(()).is_ok(),
            None => {
                debug!("Restart requested with no engine running");
                false
            }
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }
}

/// How one engine instance ended.
enum InstanceEnd {
    Exited,
    Restarted,
    Shutdown,
    Failed,
}

/// What woke the supervision loop.
enum Event {
    Line(Option<String>),
    Exited(std::io::Result<ExitStatus>),
    Stop,
    /// The stop sender was dropped without a request.
    Disarmed,
    Shutdown,
}

/// Supervises the decoding-engine subprocess.
pub struct ProcessSupervisor {
    builder: CommandBuilder,
    settings: Arc<dyn SettingsStore>,
    demux: StreamDemultiplexer,
    stats: Arc<StatisticsCollector>,
    config: SupervisorConfig,
    control: ControlSlot,
    state_tx: watch::Sender<SupervisorState>,
}

impl ProcessSupervisor {
    pub fn new(
        builder: CommandBuilder,
        settings: Arc<dyn SettingsStore>,
        demux: StreamDemultiplexer,
        stats: Arc<StatisticsCollector>,
        config: SupervisorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        Self {
            builder,
            settings,
            demux,
            stats,
            config,
            control: Arc::new(Mutex::new(None)),
            state_tx,
        }
    }

    /// Handle for the restart coordinator.
    pub fn restart_handle(&self) -> RestartHandle {
        RestartHandle {
            control: self.control.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    /// Run until shutdown. The first launch is immediate.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!(engine = %self.builder.program(), "Engine supervisor started");

        while !shutdown.is_triggered() {
            if let InstanceEnd::Shutdown = self.run_instance(&mut shutdown).await {
                break;
            }

            self.set_state(SupervisorState::Idle);
            debug!("Next engine launch in {:?}", self.config.backoff);
            tokio::select! {
                _ = tokio::time::sleep(self.config.backoff) => {}
                _ = shutdown.wait() => break,
            }
        }

        self.control.lock().await.take();
        self.set_state(SupervisorState::ShuttingDown);
        info!("Engine supervisor stopped");
    }

    async fn run_instance(&self, shutdown: &mut Shutdown) -> InstanceEnd {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.control.lock().await = Some(stop_tx);
        self.set_state(SupervisorState::Launching);

        let end = self.launch_and_supervise(&mut stop_rx, shutdown).await;

        self.control.lock().await.take();
        end
    }

    async fn launch_and_supervise(
        &self,
        stop_rx: &mut oneshot::Receiver<()>,
        shutdown: &mut Shutdown,
    ) -> InstanceEnd {
        let settings = match self.settings.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load settings, engine not launched: {}", e);
                return InstanceEnd::Failed;
            }
        };

        let spec = self.builder.build(&settings);
        info!("Launching engine: {}", spec.redacted());
        self.stats.record_launch();

        let mut child = match spawn(&spec) {
            Ok(child) => child,
            Err(e) => {
                error!(engine = %spec.program, "FATAL: engine failed to start: {}", e);
                self.stats.record_crash();
                return InstanceEnd::Failed;
            }
        };
        let pid = child.id();
        self.set_state(SupervisorState::Running);
        debug!(pid, "Engine running");

        let (line_tx, mut lines) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut output_open = true;
        let mut stop_armed = true;
        loop {
            let event = tokio::select! {
                line = lines.recv(), if output_open => Event::Line(line),
                status = child.wait(), if !output_open => Event::Exited(status),
                stop = &mut *stop_rx, if stop_armed => match stop {
                    Ok(()) => Event::Stop,
                    Err(_) => Event::Disarmed,
                },
                _ = shutdown.wait() => Event::Shutdown,
            };

            match event {
                Event::Line(Some(line)) => {
                    self.demux.dispatch(&line).await;
                }
                Event::Line(None) => output_open = false,
                Event::Disarmed => stop_armed = false,
                Event::Exited(status) => {
                    self.enter_draining().await;
                    self.report_exit(pid, status);
                    return InstanceEnd::Exited;
                }
                Event::Stop => {
                    self.enter_draining().await;
                    info!(pid, "Restarting engine");
                    terminate(&mut child, self.config.grace_period).await;
                    return InstanceEnd::Restarted;
                }
                Event::Shutdown => {
                    self.control.lock().await.take();
                    self.set_state(SupervisorState::ShuttingDown);
                    info!(pid, "Stopping engine");
                    terminate(&mut child, self.config.grace_period).await;
                    return InstanceEnd::Shutdown;
                }
            }
        }
    }

    /// Close the control slot so restarts during draining are no-ops.
    async fn enter_draining(&self) {
        self.control.lock().await.take();
        self.set_state(SupervisorState::Draining);
    }

    fn report_exit(&self, pid: Option<u32>, status: std::io::Result<ExitStatus>) {
        match status {
            Ok(status) if status.success() => {
                info!(pid, %status, "Engine exited");
            }
            Ok(status) => {
                error!(pid, %status, "FATAL: engine exited abnormally");
                self.stats.record_crash();
            }
            Err(e) => {
                error!(pid, "FATAL: failed to reap engine: {}", e);
                self.stats.record_crash();
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        self.state_tx.send_replace(state);
    }
}

fn spawn(spec: &LaunchSpec) -> std::io::Result<Child> {
    Command::new(&spec.program)
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Forward output lines until EOF or until the receiver is gone.
/// Invalid UTF-8 is replaced, not dropped.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Engine output read failed: {}", e);
                break;
            }
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    if send_sigterm(pid) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, %status, "Engine stopped");
                return;
            }
            Ok(Err(e)) => warn!(pid, "Failed to wait for engine: {}", e),
            Err(_) => warn!(pid, "Engine ignored SIGTERM for {:?}, killing", grace),
        }
    }

    if let Err(e) = child.kill().await {
        warn!(pid, "Failed to kill engine: {}", e);
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!(pid, "Failed to send SIGTERM: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}
