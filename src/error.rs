// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for ticket encoding, signing and validation.
//!
//! Every rejection a relay can issue maps onto exactly one variant, so
//! callers can route outcomes (and flag repeat offenders as a fraud signal)
//! by matching on the kind instead of parsing messages.

use alloy::primitives::{Address, B256};

use crate::store::StoreError;

/// Errors produced by ticket operations and relay-side validation.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    /// The chain oracle could not resolve the anchor block.
    #[error("block {block_number} on chain {chain_id} could not be resolved: {reason}")]
    ChainResolution {
        chain_id: u64,
        block_number: u64,
        reason: String,
    },

    /// An RPC endpoint URL could not be parsed.
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    /// The operation requires a device signature and none is attached.
    #[error("ticket carries no device signature")]
    MissingDeviceSignature,

    /// A counter-signature check was run on a ticket no server has signed.
    #[error("ticket carries no server signature")]
    MissingServerSignature,

    /// The device signature is present but does not verify.
    #[error("device signature does not verify against the ticket")]
    InvalidDeviceSignature,

    /// The counter-signature does not recover to the ticket's server id.
    #[error("server signature does not recover to server {0}")]
    InvalidServerSignature(Address),

    /// A usage counter regressed relative to the stored current ticket.
    #[error(
        "usage regressed: connections {prev_connections} -> {connections}, \
         bytes {prev_bytes} -> {bytes}"
    )]
    NonMonotonicUsage {
        prev_connections: u64,
        connections: u64,
        prev_bytes: u64,
        bytes: u64,
    },

    /// The anchor block's timestamp falls outside the currently open epoch.
    #[error("ticket epoch {ticket_epoch} is not the open epoch {current_epoch}")]
    StaleEpoch {
        ticket_epoch: u64,
        current_epoch: u64,
    },

    /// The ticket names a different relay as its server.
    #[error("ticket addressed to server {presented}, this relay is {expected}")]
    ServerMismatch {
        presented: Address,
        expected: Address,
    },

    /// The fleet contract is not in this relay's served set.
    #[error("fleet contract {0} is not served by this relay")]
    UnauthorizedFleet(Address),

    /// The presented block hash differs from the chain record.
    #[error("block hash {presented} does not match chain record {resolved}")]
    ChainAnchorMismatch { presented: B256, resolved: B256 },

    /// secp256k1 public-key recovery failed.
    #[error("address recovery failed: {0}")]
    AddressRecovery(#[from] alloy::primitives::SignatureError),

    /// The signing backend refused or failed to sign a digest.
    #[error("signing failed: {0}")]
    Signer(#[from] alloy::signers::Error),

    /// PEM key material could not be parsed into a secp256k1 key.
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Ticket store failure.
    #[error("ticket store error: {0}")]
    Store(#[from] StoreError),
}
