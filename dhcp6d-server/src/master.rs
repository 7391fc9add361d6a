//! The master: listeners in, queue, workers out
//!
//! The master owns the sockets, the bounded work queue and the worker pool.
//! It never touches packet contents; its jobs are lifecycle: privilege drop
//! before workers start, the crash watchdog, reload by respawning workers
//! from a freshly built plan, and orderly shutdown.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use dhcp6d_core::{Error, PipelinePlan, Result};

use crate::config::ServerConfig;
use crate::control::{ControlCommand, ControlServer};
use crate::listeners;
use crate::privileges::drop_privileges;
use crate::stats::{StatsRegistry, WorkerCounters};
use crate::worker::{PacketQueue, Worker};

/// Worker crashes tolerated within the watchdog window
const WATCHDOG_LIMIT: usize = 5;
const WATCHDOG_WINDOW: Duration = Duration::from_secs(10);

/// How long workers get to drain at shutdown
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// One set of workers running one plan. Replaced wholesale on reload.
struct WorkerGeneration {
    plan: PipelinePlan,
    retire: Arc<AtomicBool>,
    tasks: JoinSet<()>,
    counters: Vec<Arc<WorkerCounters>>,
    next_id: usize,
}

impl WorkerGeneration {
    fn spawn(
        plan: PipelinePlan,
        count: usize,
        queue: &PacketQueue,
        deadline: Duration,
    ) -> Result<Self> {
        let mut generation = Self {
            plan,
            retire: Arc::new(AtomicBool::new(false)),
            tasks: JoinSet::new(),
            counters: Vec::new(),
            next_id: 0,
        };
        for _ in 0..count {
            generation.spawn_worker(queue, deadline)?;
        }
        Ok(generation)
    }

    fn spawn_worker(&mut self, queue: &PacketQueue, deadline: Duration) -> Result<()> {
        let counters = Arc::new(WorkerCounters::default());
        let worker = Worker::new(
            self.next_id,
            &self.plan,
            queue.clone(),
            counters.clone(),
            deadline,
            self.retire.clone(),
        )?;
        self.next_id += 1;
        self.counters.push(counters);
        self.tasks.spawn(worker.run());
        Ok(())
    }

    /// Let the current workers finish their bundles and exit
    fn retire(&mut self) {
        self.retire.store(true, Ordering::Relaxed);
        // Detach instead of abort: in-flight bundles complete under the old
        // pipeline
        std::mem::take(&mut self.tasks).detach_all();
    }
}

pub struct Master {
    config_path: PathBuf,
    config: ServerConfig,
}

impl Master {
    pub fn new(config_path: PathBuf, config: ServerConfig) -> Self {
        Self {
            config_path,
            config,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let stats = Arc::new(StatsRegistry::new());
        let master_counters = Arc::new(WorkerCounters::default());
        stats.add_counters(master_counters.clone());
        for limiter in &self.config.rate_limiters {
            stats.add_rate_limiter(limiter.clone());
        }

        // The bounded work queue: listeners drop on overflow, workers pull
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_size);
        let queue: PacketQueue = Arc::new(Mutex::new(queue_rx));

        // Sockets first: port 547 needs the privileges we are about to drop
        let listener_tasks = listeners::spawn_all(
            &self.config.listeners,
            queue_tx.clone(),
            master_counters.clone(),
        )
        .await?;

        write_pid_file(&self.config.pid_file)?;

        let (command_tx, mut command_rx) = mpsc::channel(4);
        let control = ControlServer::bind(&self.config.control_socket, command_tx, stats.clone())?;
        let control_path = control.path().to_path_buf();
        let control_task = control.spawn();

        drop_privileges(self.config.user.as_deref(), self.config.group.as_deref())?;

        let deadline = Duration::from_secs(self.config.message_deadline_secs);
        let mut generation = WorkerGeneration::spawn(
            self.config.plan.clone(),
            self.config.workers,
            &queue,
            deadline,
        )?;
        self.publish_worker_counters(&stats, &master_counters, &generation);

        info!(
            workers = self.config.workers,
            listeners = self.config.listeners.len(),
            "server running"
        );

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut crashes: VecDeque<Instant> = VecDeque::new();

        let exit = loop {
            tokio::select! {
                _ = sighup.recv() => {
                    self.reload(&stats, &master_counters, &queue, deadline, &mut generation);
                }
                _ = sigterm.recv() => break Ok(()),
                _ = sigint.recv() => break Ok(()),
                command = command_rx.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break Ok(()),
                    Some(ControlCommand::Reload) => {
                        self.reload(&stats, &master_counters, &queue, deadline, &mut generation);
                    }
                },
                Some(result) = generation.tasks.join_next() => {
                    match result {
                        Ok(()) => {
                            // Normal worker exit only happens at queue close
                            warn!("worker exited unexpectedly, replacing it");
                        }
                        Err(join_error) => {
                            error!(%join_error, "worker crashed");
                        }
                    }

                    let now = Instant::now();
                    crashes.push_back(now);
                    while let Some(first) = crashes.front() {
                        if now.duration_since(*first) > WATCHDOG_WINDOW {
                            crashes.pop_front();
                        } else {
                            break;
                        }
                    }
                    if crashes.len() > WATCHDOG_LIMIT {
                        break Err(Error::handler(format!(
                            "more than {} worker crashes within {:?}",
                            WATCHDOG_LIMIT, WATCHDOG_WINDOW
                        )));
                    }
                    if let Err(error) = generation.spawn_worker(&queue, deadline) {
                        break Err(error);
                    }
                    self.publish_worker_counters(&stats, &master_counters, &generation);
                }
            }
        };

        info!("shutting down");
        for task in listener_tasks {
            task.abort();
        }
        drop(queue_tx);

        // Give workers a chance to drain, then cut them off
        let drain = async {
            while generation.tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
            warn!("drain deadline expired, aborting remaining workers");
            generation.tasks.abort_all();
        }

        control_task.abort();
        let _ = std::fs::remove_file(&control_path);
        let _ = std::fs::remove_file(&self.config.pid_file);

        exit
    }

    /// Rebuild the configuration; a failure leaves everything running as-is
    fn reload(
        &mut self,
        stats: &Arc<StatsRegistry>,
        master_counters: &Arc<WorkerCounters>,
        queue: &PacketQueue,
        deadline: Duration,
        generation: &mut WorkerGeneration,
    ) {
        info!(path = %self.config_path.display(), "reloading configuration");
        let new_config = match ServerConfig::load(&self.config_path) {
            Ok(config) => config,
            Err(error) => {
                error!(%error, "reload failed, keeping running configuration");
                return;
            }
        };

        // Listener changes need a restart; everything else swaps in
        if new_config.listeners.len() != self.config.listeners.len() {
            warn!("listener changes are ignored until restart");
        }

        for limiter in &new_config.rate_limiters {
            stats.add_rate_limiter(limiter.clone());
        }

        let new_generation = match WorkerGeneration::spawn(
            new_config.plan.clone(),
            new_config.workers,
            queue,
            deadline,
        ) {
            Ok(generation) => generation,
            Err(error) => {
                error!(%error, "could not start workers for new configuration");
                return;
            }
        };

        generation.retire();
        *generation = new_generation;
        self.config = new_config;
        self.publish_worker_counters(stats, master_counters, generation);
        info!("configuration reloaded, workers replaced");
    }

    fn publish_worker_counters(
        &self,
        stats: &Arc<StatsRegistry>,
        master_counters: &Arc<WorkerCounters>,
        generation: &WorkerGeneration,
    ) {
        let mut all = vec![master_counters.clone()];
        all.extend(generation.counters.iter().cloned());
        stats.reset_workers(all);
    }
}

fn write_pid_file(path: &std::path::Path) -> Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|e| Error::config(format!("pid file {}: {}", path.display(), e)))
}
