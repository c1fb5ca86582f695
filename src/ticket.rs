// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The two-phase-signed usage ticket.
//!
//! ## Lifecycle
//!
//! A device meters its relayed traffic locally and periodically issues a
//! ticket: cumulative counters anchored to a recent block, signed with the
//! device key. The relay validates the ticket, counter-signs it, and stores
//! it as the current one for the `(device, server)` pair. Within an epoch
//! each new ticket supersedes the previous one; only the latest is settled.
//!
//! The device identity is never a stored field. Whoever's key produced
//! `device_signature` is the device, recovered on demand. Tampering with a
//! signed field therefore does not "break" a ticket so much as turn it into
//! a claim by a key nobody holds.
//!
//! Signatures can only be attached through [`Ticket::device_sign`] and
//! [`Ticket::server_sign`] (or the explicit wire-rebuild setters); the
//! payload is immutable once constructed.

use alloy::{
    primitives::{Address, Bytes, Signature, B256},
    signers::SignerSync,
};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::epoch::epoch_of;
use crate::error::TicketError;
use crate::oracle::ChainOracle;
use crate::raw::RawTicket;
use crate::signing;

/// The chain view a ticket is bound to.
///
/// Resolved through a [`ChainOracle`] before construction; there is no
/// placeholder-hash fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAnchor {
    /// Chain the ticket settles on.
    pub chain_id: u64,
    /// Anchor block height.
    pub block_number: u64,
    /// Hash of the anchor block.
    pub block_hash: B256,
}

/// Cumulative usage record issued by a device to a relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    anchor: ChainAnchor,
    fleet_contract: Address,
    server_id: Address,
    total_connections: u64,
    total_bytes: u64,
    local_address: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_signature: Option<Signature>,
}

impl Ticket {
    /// Build an unsigned ticket from a resolved anchor and current counters.
    pub fn new(
        anchor: ChainAnchor,
        fleet_contract: Address,
        server_id: Address,
        total_connections: u64,
        total_bytes: u64,
        local_address: impl Into<Bytes>,
    ) -> Self {
        Self {
            anchor,
            fleet_contract,
            server_id,
            total_connections,
            total_bytes,
            local_address: local_address.into(),
            device_signature: None,
            server_signature: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The anchor binding this ticket to a chain view.
    pub fn anchor(&self) -> ChainAnchor {
        self.anchor
    }

    /// Chain the ticket settles on.
    pub fn chain_id(&self) -> u64 {
        self.anchor.chain_id
    }

    /// Anchor block height.
    pub fn block_number(&self) -> u64 {
        self.anchor.block_number
    }

    /// Hash of the anchor block.
    pub fn block_hash(&self) -> B256 {
        self.anchor.block_hash
    }

    /// Fleet contract the device belongs to.
    pub fn fleet_contract(&self) -> Address {
        self.fleet_contract
    }

    /// On-chain identity of the relay being paid.
    pub fn server_id(&self) -> Address {
        self.server_id
    }

    /// Cumulative connections this epoch.
    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }

    /// Cumulative relayed bytes this epoch.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Opaque device endpoint identifier (hashed before signing).
    pub fn local_address(&self) -> &Bytes {
        &self.local_address
    }

    /// First-phase signature, if attached.
    pub fn device_signature(&self) -> Option<Signature> {
        self.device_signature
    }

    /// Second-phase counter-signature, if attached.
    pub fn server_signature(&self) -> Option<Signature> {
        self.server_signature
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// First phase: sign the device digest and attach the signature.
    ///
    /// Re-signing replaces the device signature and clears any server
    /// signature, since the counter-signature covers the device signature
    /// bytes.
    pub fn device_sign(mut self, signer: &impl SignerSync) -> Result<Self, TicketError> {
        let digest = codec::device_digest(&self);
        self.device_signature = Some(signing::sign_digest(signer, digest)?);
        self.server_signature = None;
        Ok(self)
    }

    /// Second phase: counter-sign the server digest.
    ///
    /// Fails with [`TicketError::MissingDeviceSignature`] when called before
    /// the device has signed.
    pub fn server_sign(mut self, signer: &impl SignerSync) -> Result<Self, TicketError> {
        let digest = codec::server_digest(&self)?;
        self.server_signature = Some(signing::sign_digest(signer, digest)?);
        Ok(self)
    }

    /// Reattach a device signature when rebuilding a ticket from the wire.
    pub fn with_device_signature(mut self, signature: Signature) -> Self {
        self.device_signature = Some(signature);
        self
    }

    /// Reattach a server signature when rebuilding a ticket from the wire.
    pub fn with_server_signature(mut self, signature: Signature) -> Self {
        self.server_signature = Some(signature);
        self
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Recover the device identity from the device signature.
    pub fn device_address(&self) -> Result<Address, TicketError> {
        let sig = self
            .device_signature
            .ok_or(TicketError::MissingDeviceSignature)?;
        signing::recover_address(codec::device_digest(self), &sig)
    }

    /// Verify the device signature against a known public key, without
    /// recovery. Returns `false` on an unsigned ticket.
    pub fn device_signature_matches(&self, key: &VerifyingKey) -> bool {
        match self.device_signature {
            Some(sig) => signing::verify_prehash(key, codec::device_digest(self), &sig),
            None => false,
        }
    }

    /// Device-side check of the relay's counter-signature: it must verify
    /// over the server digest and recover to this ticket's `server_id`.
    pub fn verify_server_signature(&self) -> Result<(), TicketError> {
        let sig = self
            .server_signature
            .ok_or(TicketError::MissingServerSignature)?;
        let recovered = signing::recover_address(codec::server_digest(self)?, &sig)?;
        if recovered != self.server_id {
            return Err(TicketError::InvalidServerSignature(self.server_id));
        }
        Ok(())
    }

    // =========================================================================
    // Derived views
    // =========================================================================

    /// Accounting epoch of the anchor block.
    pub async fn epoch(&self, oracle: &impl ChainOracle) -> Result<u64, TicketError> {
        let time = oracle
            .block_time(self.anchor.chain_id, self.anchor.block_number)
            .await?;
        Ok(epoch_of(time))
    }

    /// Settlement encoding of this ticket.
    pub fn to_raw(&self) -> Result<RawTicket, TicketError> {
        RawTicket::from_ticket(self)
    }
}
