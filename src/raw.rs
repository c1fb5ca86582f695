// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement encoding of accepted tickets.
//!
//! The fleet registry settles tickets through `SubmitTicketRaw(bytes32[])`,
//! which takes the ticket as a flat word tuple. The contract re-derives the
//! signed blob itself (resolving the block hash from the submitted height),
//! so the tuple carries the block *number* where the signed blob carried the
//! hash.
//!
//! ## Word Order
//!
//! ```text
//! [ chain_id, block_number, fleet_contract, server_id,
//!   total_connections, total_bytes, keccak256(local_address),
//!   r, s, recovery_id ]
//! ```
//!
//! `r`, `s` and `recovery_id` come from the device signature; the recovery
//! id is the raw `0`/`1` parity in the last word. Transaction assembly and
//! submission are the caller's concern.

use alloy::{
    primitives::{keccak256, Bytes, B256},
    sol,
    sol_types::SolCall,
};

use crate::codec;
use crate::error::TicketError;
use crate::ticket::Ticket;

sol! {
    /// Settlement entry point on the fleet registry.
    interface IFleetRegistry {
        function SubmitTicketRaw(bytes32[] calldata ticket) external;
    }
}

/// Number of words in the raw settlement tuple.
pub const RAW_WORDS: usize = 10;

/// Settlement-ready encoding of a device-signed ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTicket {
    words: [B256; RAW_WORDS],
}

impl RawTicket {
    /// Re-order a device-signed ticket into the settlement tuple.
    pub fn from_ticket(ticket: &Ticket) -> Result<Self, TicketError> {
        let sig = ticket
            .device_signature()
            .ok_or(TicketError::MissingDeviceSignature)?;

        let words = [
            codec::uint_word(ticket.chain_id()),
            codec::uint_word(ticket.block_number()),
            ticket.fleet_contract().into_word(),
            ticket.server_id().into_word(),
            codec::uint_word(ticket.total_connections()),
            codec::uint_word(ticket.total_bytes()),
            keccak256(ticket.local_address()),
            B256::from(sig.r().to_be_bytes::<32>()),
            B256::from(sig.s().to_be_bytes::<32>()),
            codec::uint_word(sig.v() as u64),
        ];
        Ok(Self { words })
    }

    /// The ten settlement words in submission order.
    pub fn words(&self) -> &[B256; RAW_WORDS] {
        &self.words
    }

    /// Full `SubmitTicketRaw` calldata, selector included.
    pub fn call_data(&self) -> Bytes {
        IFleetRegistry::SubmitTicketRawCall {
            ticket: self.words.to_vec(),
        }
        .abi_encode()
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::signer_from_hex;
    use crate::ticket::ChainAnchor;
    use alloy::primitives::Address;

    const DEVICE_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    const FLEET: Address = Address::repeat_byte(0xf1);
    const SERVER: Address = Address::repeat_byte(0x5e);
    const LOCAL: &[u8] = b"device.local:41046";

    fn signed_ticket() -> Ticket {
        Ticket::new(
            ChainAnchor {
                chain_id: 1,
                block_number: 100,
                block_hash: B256::repeat_byte(0x42),
            },
            FLEET,
            SERVER,
            1,
            512,
            LOCAL,
        )
        .device_sign(&signer_from_hex(DEVICE_KEY).unwrap())
        .unwrap()
    }

    #[test]
    fn raw_words_come_out_in_submission_order() {
        let ticket = signed_ticket();
        let sig = ticket.device_signature().unwrap();
        let raw = ticket.to_raw().unwrap();
        let words = raw.words();

        assert_eq!(words[0], codec::uint_word(1));
        assert_eq!(words[1], codec::uint_word(100), "block number, not hash");
        assert_eq!(words[2], FLEET.into_word());
        assert_eq!(words[3], SERVER.into_word());
        assert_eq!(words[4], codec::uint_word(1));
        assert_eq!(words[5], codec::uint_word(512));
        assert_eq!(words[6], keccak256(LOCAL));
        assert_eq!(words[7], B256::from(sig.r().to_be_bytes::<32>()));
        assert_eq!(words[8], B256::from(sig.s().to_be_bytes::<32>()));

        // Recovery id: 31 zero bytes then a raw 0/1 parity.
        assert!(words[9][..31].iter().all(|b| *b == 0));
        assert!(words[9][31] <= 1);
    }

    #[test]
    fn unsigned_tickets_cannot_be_encoded() {
        let unsigned = Ticket::new(
            ChainAnchor {
                chain_id: 1,
                block_number: 100,
                block_hash: B256::repeat_byte(0x42),
            },
            FLEET,
            SERVER,
            1,
            512,
            LOCAL,
        );
        let err = RawTicket::from_ticket(&unsigned).unwrap_err();
        assert!(matches!(err, TicketError::MissingDeviceSignature));
    }

    #[test]
    fn call_data_has_the_conventional_selector_and_shape() {
        let raw = signed_ticket().to_raw().unwrap();
        let data = raw.call_data();

        let selector = &keccak256(b"SubmitTicketRaw(bytes32[])")[..4];
        assert_eq!(&data[..4], selector);

        // selector + offset word + length word + ten payload words
        assert_eq!(data.len(), 4 + 32 * (2 + RAW_WORDS));

        // The length word announces ten entries.
        let len_word = &data[4 + 32..4 + 64];
        assert_eq!(len_word[31], RAW_WORDS as u8);
        assert!(len_word[..31].iter().all(|b| *b == 0));
    }
}
