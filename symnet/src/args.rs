// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "symnet")]
#[command(about = "Hybrid symbolic network verifier", long_about = None)]
pub struct CmdArgs {
    /// Path to the TOML network/invariant configuration
    #[arg(short = 'i', long = "input", value_name = "INPUT")]
    pub input: PathBuf,

    /// Directory for logs, statistics and results
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Maximum number of parallel verification workers
    #[arg(short = 'j', long = "jobs", value_name = "N", default_value_t = 1)]
    pub max_jobs: usize,

    /// Verbose console logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Remove the output directory first if it exists
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_and_default_args() {
        let args = CmdArgs::parse_from(["symnet", "-i", "net.toml", "-o", "out"]);
        assert_eq!(args.input, PathBuf::from("net.toml"));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.max_jobs, 1);
        assert!(!args.verbose);

        let args = CmdArgs::parse_from(["symnet", "-i", "a", "-o", "b", "-j", "8", "-v", "-f"]);
        assert_eq!(args.max_jobs, 8);
        assert!(args.verbose);
        assert!(args.force);
    }
}
