// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay-side ticket acceptance.
//!
//! ## Validation Stages
//!
//! Checks run in a fixed order and fail fast; every rejection carries the
//! specific [`TicketError`] kind:
//!
//! 1. **Signature** - a device signature must be present and recover to an
//!    address. The recovered address *is* the device identity; there is no
//!    separate identity claim to cross-check.
//! 2. **Usage** - counters must not regress against the stored current
//!    ticket for the same `(device, server)` pair, and the anchor block's
//!    timestamp must fall in the currently open epoch.
//! 3. **Authorization** - the ticket must name this relay, a served fleet
//!    contract, and the anchor hash the chain actually has.
//!
//! The oracle is consulted once per validation (hash and timestamp in a
//! single round trip); that is the only step that leaves the process.

use std::collections::HashSet;

use alloy::{primitives::Address, signers::SignerSync};

use crate::epoch;
use crate::error::TicketError;
use crate::oracle::ChainOracle;
use crate::store::TicketStore;
use crate::ticket::Ticket;

/// Outcome of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceptance {
    /// Device identity recovered from the device signature.
    pub device_address: Address,
    /// Accounting epoch of the anchor block.
    pub epoch: u64,
}

/// Staged acceptance checks a relay runs before counter-signing.
pub struct TicketValidator<O> {
    oracle: O,
    server_id: Address,
    fleets: HashSet<Address>,
}

impl<O: ChainOracle> TicketValidator<O> {
    /// A validator for the relay identified by `server_id`, serving the
    /// given fleet contracts.
    pub fn new(oracle: O, server_id: Address, fleets: impl IntoIterator<Item = Address>) -> Self {
        Self {
            oracle,
            server_id,
            fleets: fleets.into_iter().collect(),
        }
    }

    /// The relay identity tickets must be addressed to.
    pub fn server_id(&self) -> Address {
        self.server_id
    }

    /// Validate against the wall clock.
    pub async fn validate(
        &self,
        ticket: &Ticket,
        previous: Option<&Ticket>,
    ) -> Result<Acceptance, TicketError> {
        self.validate_at(ticket, previous, epoch::unix_now()).await
    }

    /// Run the full check sequence with an explicit current time.
    ///
    /// `previous` is the stored current ticket for the same
    /// `(device, server)` pair; the caller looks it up by the recovered
    /// device address.
    pub async fn validate_at(
        &self,
        ticket: &Ticket,
        previous: Option<&Ticket>,
        now: u64,
    ) -> Result<Acceptance, TicketError> {
        // Stage 1: signature.
        let device_address = checked_device_address(ticket)?;

        // Single oracle round trip serving stages 2 and 3.
        let (resolved_hash, block_time) = self
            .oracle
            .block_info(ticket.chain_id(), ticket.block_number())
            .await?;

        // Stage 2: usage.
        if let Some(prev) = previous {
            if ticket.total_connections() < prev.total_connections()
                || ticket.total_bytes() < prev.total_bytes()
            {
                return Err(TicketError::NonMonotonicUsage {
                    prev_connections: prev.total_connections(),
                    connections: ticket.total_connections(),
                    prev_bytes: prev.total_bytes(),
                    bytes: ticket.total_bytes(),
                });
            }
        }

        let ticket_epoch = epoch::epoch_of(block_time);
        let current_epoch = epoch::epoch_of(now);
        if ticket_epoch != current_epoch {
            return Err(TicketError::StaleEpoch {
                ticket_epoch,
                current_epoch,
            });
        }

        // Stage 3: authorization.
        if ticket.server_id() != self.server_id {
            return Err(TicketError::ServerMismatch {
                presented: ticket.server_id(),
                expected: self.server_id,
            });
        }
        if !self.fleets.contains(&ticket.fleet_contract()) {
            return Err(TicketError::UnauthorizedFleet(ticket.fleet_contract()));
        }
        if ticket.block_hash() != resolved_hash {
            return Err(TicketError::ChainAnchorMismatch {
                presented: ticket.block_hash(),
                resolved: resolved_hash,
            });
        }

        Ok(Acceptance {
            device_address,
            epoch: ticket_epoch,
        })
    }

    /// The full relay flow: look up the stored current ticket, validate,
    /// counter-sign and persist. Returns the fully signed ticket.
    pub async fn accept(
        &self,
        ticket: Ticket,
        signer: &impl SignerSync,
        store: &impl TicketStore,
    ) -> Result<Ticket, TicketError> {
        let device_address = checked_device_address(&ticket)?;
        let previous = store.get_current(device_address, ticket.server_id())?;

        match self.validate(&ticket, previous.as_ref()).await {
            Ok(acceptance) => {
                let signed = ticket.server_sign(signer)?;
                store.put(&signed)?;
                tracing::debug!(
                    device = %acceptance.device_address,
                    epoch = acceptance.epoch,
                    connections = signed.total_connections(),
                    bytes = signed.total_bytes(),
                    "ticket accepted"
                );
                Ok(signed)
            }
            Err(e) => {
                tracing::warn!(
                    device = %device_address,
                    server = %ticket.server_id(),
                    error = %e,
                    "ticket rejected"
                );
                Err(e)
            }
        }
    }
}

/// Stage-one signature check. A missing signature keeps its own kind; a
/// present signature that cannot recover is reported as invalid.
fn checked_device_address(ticket: &Ticket) -> Result<Address, TicketError> {
    match ticket.device_address() {
        Ok(address) => Ok(address),
        Err(TicketError::AddressRecovery(_)) => Err(TicketError::InvalidDeviceSignature),
        Err(e) => Err(e),
    }
}
