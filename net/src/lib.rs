// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Packet-level primitives shared by the whole verifier: IPv4 address
//! arithmetic, the protocol-state automaton, the located representative
//! packet, per-node packet histories, and the raw-Ethernet wire codec used
//! when talking to emulated middleboxes.

pub mod hist;
pub mod index;
pub mod ip;
pub mod packet;
pub mod payload;
pub mod proto;
pub mod wire;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefixLength(u8),

    #[error("invalid network (host bits set): {0}")]
    NotANetwork(String),

    #[error("invalid IP range: {0}")]
    InvalidRange(String),

    #[error("range is not a power-of-two aligned network: {0}")]
    NotConvertibleToNetwork(String),

    #[error("failed to build wire packet: {0}")]
    WireBuild(String),

    #[error("failed to parse wire packet: {0}")]
    WireParse(String),
}
