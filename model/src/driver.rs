// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The verification driver: enumerates (invariant, connection-combination)
//! pairs, forks one worker per pair bounded by `max_jobs`, reaps children,
//! and propagates violations back to the parent through `SIGUSR1`.

use crate::explorer::{self, Verdict};
use crate::invariants::Invariant;
use crate::{ModelCtx, ModelError};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, getppid, ForkResult, Pid};
use stats::Stats;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Set by the parent's `SIGUSR1` handler when a worker reports a violation.
static VIOLATED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigusr1(_: libc::c_int) {
    VIOLATED.store(true, Ordering::SeqCst);
}

pub struct VerifierConfig {
    pub out_dir: PathBuf,
    pub max_jobs: usize,
    pub verbose: bool,
}

pub struct Verifier {
    config: VerifierConfig,
    children: HashSet<Pid>,
}

impl Verifier {
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            children: HashSet::new(),
        }
    }

    /// Verify every invariant over every connection combination. Returns
    /// `Violated` as soon as any worker reports one.
    pub fn run(
        &mut self,
        ctx: &mut ModelCtx,
        invariants: &mut [Invariant],
    ) -> Result<Verdict, ModelError> {
        // seed the partition before computing any connection matrix
        ctx.ecs
            .compute_initial_ecs(&ctx.network, ctx.openflow.routes().collect::<Vec<_>>());

        unsafe {
            let handler = signal::SigHandler::Handler(on_sigusr1);
            signal::signal(Signal::SIGUSR1, handler)
                .map_err(|e| ModelError::System(e.to_string()))?;
        }

        for idx in 0..invariants.len() {
            invariants[idx].compute_conn_matrix(&mut ctx.ecs);
            info!(
                "invariant {}: {} connection combinations",
                idx,
                invariants[idx].num_conn_ecs()
            );

            while invariants[idx].set_conns() {
                if VIOLATED.load(Ordering::SeqCst) {
                    break;
                }
                self.throttle()?;

                match unsafe { fork() }.map_err(|e| ModelError::System(e.to_string()))? {
                    ForkResult::Child => {
                        let verdict = self.run_worker(ctx, &mut invariants[idx]);
                        // the worker never returns to the enumeration loop
                        std::process::exit(match verdict {
                            Ok(Verdict::Verified) => 0,
                            Ok(Verdict::Violated) => 2,
                            Err(_) => 1,
                        });
                    }
                    ForkResult::Parent { child } => {
                        info!("spawned worker {child}");
                        self.children.insert(child);
                    }
                }
            }

            if VIOLATED.load(Ordering::SeqCst) {
                break;
            }
        }

        self.reap_all();
        if VIOLATED.load(Ordering::SeqCst) {
            info!("*** invariant violated ***");
            Ok(Verdict::Violated)
        } else {
            info!("all invariants hold");
            Ok(Verdict::Verified)
        }
    }

    /// Block until a worker slot is free, reaping finished children.
    fn throttle(&mut self) -> Result<(), ModelError> {
        while self.children.len() >= self.config.max_jobs.max(1) {
            if !self.reap_one(true)? {
                break;
            }
            if VIOLATED.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(())
    }

    fn reap_one(&mut self, block: bool) -> Result<bool, ModelError> {
        let flags = if block {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };
        match waitpid(None, flags) {
            Ok(WaitStatus::Exited(pid, code)) => {
                self.children.remove(&pid);
                info!("joined worker {pid}");
                if code == 2 {
                    VIOLATED.store(true, Ordering::SeqCst);
                } else if code != 0 {
                    warn!("worker {pid} failed with status {code}");
                }
                Ok(true)
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                self.children.remove(&pid);
                warn!("worker {pid} killed by {sig}");
                Ok(true)
            }
            Ok(WaitStatus::StillAlive) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(true), // SIGUSR1 arrived
            Err(nix::errno::Errno::ECHILD) => Ok(false),
            Err(e) => Err(ModelError::System(e.to_string())),
        }
    }

    /// Wait for (or, after a violation, terminate) every remaining worker.
    fn reap_all(&mut self) {
        if VIOLATED.load(Ordering::SeqCst) {
            for pid in &self.children {
                let _ = signal::kill(*pid, Signal::SIGTERM);
            }
        }
        while !self.children.is_empty() {
            match self.reap_one(true) {
                Ok(true) => {}
                _ => break,
            }
            if VIOLATED.load(Ordering::SeqCst) {
                for pid in &self.children {
                    let _ = signal::kill(*pid, Signal::SIGTERM);
                }
            }
        }
    }

    /// The forked worker: scoped logging, its own stats, one exhaustive
    /// exploration, and a `SIGUSR1` to the parent on violation.
    fn run_worker(
        &self,
        ctx: &mut ModelCtx,
        invariant: &mut Invariant,
    ) -> Result<Verdict, ModelError> {
        let pid = getpid();
        let log_path = self.config.out_dir.join(format!("{pid}.log"));
        let log_file = std::fs::File::create(&log_path)
            .map_err(|e| ModelError::System(e.to_string()))?;

        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .with_max_level(if self.config.verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            })
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            info!("worker {pid} starting verification");
            info!("invariant: {invariant}");
            Stats::get().reset();
            Stats::get().start_verification();

            let verdict = explorer::explore(invariant, ctx);

            Stats::get().stop_verification();
            if let Err(e) = Stats::get().write_csv(&self.config.out_dir, pid.as_raw()) {
                warn!("failed to write stats: {e}");
            }
            ctx.emu_mgr.teardown_all();

            match &verdict {
                Ok(Verdict::Verified) => info!("*** invariant holds ***"),
                Ok(Verdict::Violated) => {
                    info!("*** invariant violated ***");
                    let _ = signal::kill(getppid(), Signal::SIGUSR1);
                }
                Err(e) => error!("worker failed: {e}"),
            }
            verdict
        });
        result
    }
}
