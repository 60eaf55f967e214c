//! Single-worker demo harness for the memcpy stressor.
//!
//! Configuration comes from the environment:
//! - `COPYSTRESS_METHOD`      — engine selector (default `all`)
//! - `COPYSTRESS_TASKSET`     — CPU list, e.g. `0,2-4`; absent = unrestricted
//! - `COPYSTRESS_CHANGE_CPU`  — set to `1` to rotate CPUs during the run
//! - `COPYSTRESS_VERIFY`      — set to `1` to check every engine call
//! - `COPYSTRESS_OPS`         — stop after N sequences
//! - `COPYSTRESS_TIMEOUT_SECS`— stop after this many seconds (default 10)

use std::cell::Cell;
use std::process;
use std::time::Duration;

use minstant::Instant;

use copystress::affinity::{AffinityController, CpuHint};
use copystress::methods::MemcpyMethod;
use copystress::runtime::WorkerStats;
use copystress::stressor::{self, MemcpyConfig, RunStatus, StressContext};

/// How many sequences pass between opportunistic CPU rotations.
const CHANGE_CPU_INTERVAL: u64 = 1024;

struct EnvWorker {
    name: &'static str,
    instance: u32,
    stats: WorkerStats,
    ops_budget: Option<u64>,
    started: Instant,
    timeout: Option<Duration>,
    affinity: AffinityController,
    cpu_slot: Cell<CpuHint>,
}

impl StressContext for EnvWorker {
    fn name(&self) -> &str {
        self.name
    }

    fn instance(&self) -> u32 {
        self.instance
    }

    fn inc_counter(&self) {
        self.stats.bogo_ops.inc();
    }

    fn keep_stressing(&self) -> bool {
        let done = self.stats.bogo_ops.load();
        if let Some(budget) = self.ops_budget {
            if done >= budget {
                return false;
            }
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() >= timeout {
                return false;
            }
        }
        if done % CHANGE_CPU_INTERVAL == 0 {
            self.cpu_slot
                .set(self.affinity.change_cpu(self.cpu_slot.get()));
        }
        true
    }
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true") | Ok("yes"))
}

fn main() {
    env_logger::init();

    let method = match std::env::var("COPYSTRESS_METHOD") {
        Ok(name) => match MemcpyMethod::parse(&name) {
            Ok(method) => method,
            Err(err) => {
                eprintln!("{}", err);
                process::exit(2);
            }
        },
        Err(_) => MemcpyMethod::All,
    };

    let mut affinity = AffinityController::new(env_flag("COPYSTRESS_CHANGE_CPU"));
    if let Ok(spec) = std::env::var("COPYSTRESS_TASKSET") {
        // A bad CPU list is a setup defect, not a runtime condition.
        if let Err(err) = affinity.parse_and_apply(&spec) {
            eprintln!("taskset: {}", err);
            process::exit(1);
        }
        log::info!("affinity restricted to {:?}", affinity.applied());
    }

    let ops_budget = std::env::var("COPYSTRESS_OPS")
        .ok()
        .and_then(|v| v.parse().ok());
    let timeout_secs: u64 = std::env::var("COPYSTRESS_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let timeout = if ops_budget.is_some() {
        None
    } else {
        Some(Duration::from_secs(timeout_secs))
    };

    let worker = EnvWorker {
        name: "memcpy",
        instance: 0,
        stats: WorkerStats::new(),
        ops_budget,
        started: Instant::now(),
        timeout,
        affinity,
        cpu_slot: Cell::new(CpuHint::Current),
    };

    let cfg = MemcpyConfig {
        method,
        verify: env_flag("COPYSTRESS_VERIFY"),
    };

    let started = Instant::now();
    let status = stressor::stress_memcpy(&worker, &cfg, &worker.stats);
    let elapsed = started.elapsed();

    log::info!(
        "{}: {} bogo ops in {:.2}s, {} verification failures",
        worker.name,
        worker.stats.bogo_ops.load(),
        elapsed.as_secs_f64(),
        worker.stats.verify_failures.load()
    );

    process::exit(match status {
        RunStatus::Success => 0,
        RunStatus::NoResource => 3,
    });
}
