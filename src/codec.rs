// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic blob encoding for ticket signing.
//!
//! ## Wire Format
//!
//! Both parties must hash byte-identical input, so every field is encoded as
//! a 32-byte big-endian word: integers are zero-padded on the left, addresses
//! are left-padded to a full word, hashes pass through as-is. There is no
//! length-prefixing and no padding ambiguity.
//!
//! The device blob is seven words (224 bytes), in order:
//!
//! ```text
//! chain_id | block_hash | fleet_contract | server_id
//!          | total_connections | total_bytes | keccak256(local_address)
//! ```
//!
//! The server blob is the device blob followed by the 65-byte device
//! signature (289 bytes), so the counter-signature attests to both the usage
//! fields and the device's own attestation.

use alloy::primitives::{keccak256, Address, B256, U256};

use crate::error::TicketError;
use crate::signing;
use crate::ticket::Ticket;

/// Bytes in one encoded word.
pub const WORD: usize = 32;

/// Encoded length of the device-signed blob.
pub const DEVICE_BLOB_LEN: usize = 7 * WORD;

/// Encoded length of the server-signed blob.
pub const SERVER_BLOB_LEN: usize = DEVICE_BLOB_LEN + 65;

/// A `u64` as a left-padded 32-byte big-endian word.
pub(crate) fn uint_word(value: u64) -> B256 {
    B256::from(U256::from(value))
}

/// An address as a left-padded 32-byte word.
pub(crate) fn address_word(address: Address) -> B256 {
    address.into_word()
}

/// The byte string covered by the device signature.
pub fn device_blob(ticket: &Ticket) -> [u8; DEVICE_BLOB_LEN] {
    let words = [
        uint_word(ticket.chain_id()),
        ticket.block_hash(),
        address_word(ticket.fleet_contract()),
        address_word(ticket.server_id()),
        uint_word(ticket.total_connections()),
        uint_word(ticket.total_bytes()),
        keccak256(ticket.local_address()),
    ];

    let mut out = [0u8; DEVICE_BLOB_LEN];
    for (i, word) in words.iter().enumerate() {
        out[i * WORD..(i + 1) * WORD].copy_from_slice(word.as_slice());
    }
    out
}

/// The byte string covered by the server counter-signature.
pub fn server_blob(ticket: &Ticket) -> Result<[u8; SERVER_BLOB_LEN], TicketError> {
    let device_sig = ticket
        .device_signature()
        .ok_or(TicketError::MissingDeviceSignature)?;

    let mut out = [0u8; SERVER_BLOB_LEN];
    out[..DEVICE_BLOB_LEN].copy_from_slice(&device_blob(ticket));
    out[DEVICE_BLOB_LEN..].copy_from_slice(&signing::signature_bytes(&device_sig));
    Ok(out)
}

/// keccak-256 digest the device signs.
pub fn device_digest(ticket: &Ticket) -> B256 {
    keccak256(device_blob(ticket))
}

/// keccak-256 digest the server counter-signs.
pub fn server_digest(ticket: &Ticket) -> Result<B256, TicketError> {
    Ok(keccak256(server_blob(ticket)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::signer_from_hex;
    use crate::ticket::ChainAnchor;

    const DEVICE_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn sample_ticket() -> Ticket {
        Ticket::new(
            ChainAnchor {
                chain_id: 15,
                block_number: 100,
                block_hash: B256::repeat_byte(0xab),
            },
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            3,
            1024,
            b"test:1234".as_slice(),
        )
    }

    #[test]
    fn device_blob_word_layout() {
        let blob = device_blob(&sample_ticket());
        assert_eq!(blob.len(), DEVICE_BLOB_LEN);

        assert_eq!(&blob[..32], uint_word(15).as_slice());
        assert_eq!(&blob[32..64], B256::repeat_byte(0xab).as_slice());
        assert_eq!(&blob[64..96], Address::repeat_byte(0x11).into_word().as_slice());
        assert_eq!(&blob[96..128], Address::repeat_byte(0x22).into_word().as_slice());
        assert_eq!(&blob[128..160], uint_word(3).as_slice());
        assert_eq!(&blob[160..192], uint_word(1024).as_slice());
        assert_eq!(&blob[192..224], keccak256(b"test:1234").as_slice());
    }

    #[test]
    fn local_address_is_hashed_not_embedded() {
        let blob = device_blob(&sample_ticket());
        let raw = b"test:1234";
        assert!(
            !blob.windows(raw.len()).any(|w| w == raw),
            "raw local address must never appear in the signed blob"
        );
    }

    #[test]
    fn device_blob_is_byte_stable() {
        let ticket = sample_ticket();
        assert_eq!(device_blob(&ticket), device_blob(&ticket));
        assert_eq!(device_digest(&ticket), device_digest(&ticket));
    }

    #[test]
    fn integer_words_are_big_endian() {
        let word = uint_word(0x0102);
        assert_eq!(word[30], 0x01);
        assert_eq!(word[31], 0x02);
        assert!(word[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn server_blob_requires_a_device_signature() {
        let err = server_blob(&sample_ticket()).unwrap_err();
        assert!(matches!(err, TicketError::MissingDeviceSignature));
    }

    #[test]
    fn server_blob_appends_the_device_signature() {
        let signer = signer_from_hex(DEVICE_KEY).unwrap();
        let ticket = sample_ticket().device_sign(&signer).unwrap();

        let blob = server_blob(&ticket).unwrap();
        assert_eq!(blob.len(), SERVER_BLOB_LEN);
        assert_eq!(&blob[..DEVICE_BLOB_LEN], device_blob(&ticket).as_slice());

        let sig = ticket.device_signature().unwrap();
        assert_eq!(
            &blob[DEVICE_BLOB_LEN..],
            signing::signature_bytes(&sig).as_slice()
        );
    }
}
