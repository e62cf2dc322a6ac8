// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

mod args;

use args::CmdArgs;
use clap::Parser;
use emulation::dropmon::DropMon;
use model::driver::{Verifier, VerifierConfig};
use model::{ModelCtx, Verdict};
use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Writer sending every log line to `main.log` and, when verbose, to the
/// console as well.
#[derive(Clone)]
struct LogWriter {
    file: Arc<Mutex<File>>,
    console: bool,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            io::stderr().write_all(buf)?;
        }
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.flush()
    }
}

fn run(args: &CmdArgs) -> Result<Verdict, Box<dyn std::error::Error>> {
    info!("loading network configurations from {}", args.input.display());
    let loaded = config::load(&args.input)?;

    let mut ctx = ModelCtx::new(loaded.network, loaded.openflow, args.max_jobs);
    match DropMon::init() {
        Ok(mon) => {
            if let Err(e) = mon.start() {
                warn!("drop monitor start failed: {e}");
            } else {
                ctx.dropmon = Some(Arc::new(mon));
            }
        }
        Err(e) => warn!("drop monitor unavailable, timeouts count as implicit drops: {e}"),
    }
    ctx.drop_timeout.adjust_by_ntasks(args.max_jobs);

    let mut invariants = loaded.invariants;
    let mut verifier = Verifier::new(VerifierConfig {
        out_dir: args.output_dir.clone(),
        max_jobs: args.max_jobs,
        verbose: args.verbose,
    });
    Ok(verifier.run(&mut ctx, &mut invariants)?)
}

fn main() -> ExitCode {
    let args = CmdArgs::parse();

    if args.force && args.output_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&args.output_dir) {
            eprintln!("failed to remove {}: {e}", args.output_dir.display());
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        eprintln!("failed to create {}: {e}", args.output_dir.display());
        return ExitCode::FAILURE;
    }

    let log_file = match File::create(args.output_dir.join("main.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open main.log: {e}");
            return ExitCode::FAILURE;
        }
    };
    let writer = LogWriter {
        file: Arc::new(Mutex::new(log_file)),
        console: args.verbose,
    };
    tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match run(&args) {
        Ok(Verdict::Verified) => ExitCode::SUCCESS,
        Ok(Verdict::Violated) => {
            info!("verification failed: an invariant was violated");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
