// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The middlebox emulation layer: real containerised appliances whose
//! observable packet behavior is folded back into the symbolic search.
//!
//! An [`emulation::Emulation`] couples a container driver with two collector
//! threads (received packets, kernel drop events), per-endpoint seq/port
//! offset normalisation, and the rewind protocol that brings a live instance
//! to an arbitrary packet history. Instances are pooled by the
//! [`manager::EmulationMgr`] and injection outcomes are memoised by the
//! [`cache::InjectionCache`].

pub mod cache;
pub mod driver;
pub mod dropmon;
pub mod droptimeout;
pub mod emulation;
pub mod manager;
pub mod result;

pub use cache::InjectionCache;
pub use driver::Driver;
pub use emulation::Emulation;
pub use manager::{EmuId, EmulationMgr, HistKey};
pub use result::{InjectionResult, InjectionResults};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulationError {
    #[error("driver command failed: {0}")]
    DriverCommand(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("emulation is not initialised")]
    NotInitialised,

    #[error(transparent)]
    Net(#[from] net::NetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
