// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay Ticket - Bandwidth Metering Core
//!
//! Devices consume relayed bandwidth from fleet-operated relay servers and
//! periodically issue signed tickets acknowledging cumulative usage. The
//! relay validates and counter-signs each ticket, keeps the current one per
//! `(device, server)` pair, and later settles accepted tickets against the
//! fleet contract. This crate is the deterministic heart of that exchange:
//! encode, sign, verify, validate, account, store.
//!
//! ## Modules
//!
//! - `ticket` - the two-phase-signed usage record and its lifecycle
//! - `codec` - deterministic blob encoding both signatures cover
//! - `signing` - secp256k1 over keccak-256 prehashes, PEM key loading
//! - `epoch` - 30-day accounting windows derived from block timestamps
//! - `validator` - relay-side staged acceptance checks
//! - `oracle` - block hash/time resolution (JSON-RPC and static)
//! - `store` - current-ticket persistence (in-memory and redb)
//! - `raw` - settlement tuple and `SubmitTicketRaw` calldata

pub mod codec;
pub mod epoch;
pub mod error;
pub mod oracle;
pub mod raw;
pub mod signing;
pub mod store;
pub mod ticket;
pub mod validator;

pub use error::TicketError;
pub use oracle::{ChainOracle, RpcChainOracle, StaticChainOracle};
pub use raw::RawTicket;
pub use store::{MemoryTicketStore, StoreError, TicketDatabase, TicketStore};
pub use ticket::{ChainAnchor, Ticket};
pub use validator::{Acceptance, TicketValidator};
