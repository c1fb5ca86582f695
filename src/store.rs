// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Current-ticket persistence per `(device, server)` pair.
//!
//! ## Table Layout
//!
//! - `current_tickets`: composite key `device_address ‖ server_id` (40
//!   bytes) → serialized Ticket (JSON bytes)
//!
//! The device half of the key is always recovered from the device
//! signature, never read from a claimed field. `put` is a compare-and-swap:
//! within one epoch a replacement ticket must not regress either usage
//! counter, equal counters replace idempotently. At epoch close the relay
//! settles and removes entries, so a stored current ticket always belongs
//! to the open epoch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use alloy::primitives::Address;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::ticket::Ticket;

/// Primary table: `device ‖ server` → serialized Ticket (JSON bytes).
const CURRENT_TICKETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("current_tickets");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("ticket has no usable device signature: {0}")]
    Unsigned(String),

    #[error(
        "stored ticket would regress: connections {prev_connections} -> {connections}, \
         bytes {prev_bytes} -> {bytes}"
    )]
    UsageRegression {
        prev_connections: u64,
        connections: u64,
        prev_bytes: u64,
        bytes: u64,
    },

    #[error("store mutex poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Store Interface
// =============================================================================

/// Keeps the current ticket per `(device, server)` pair.
pub trait TicketStore {
    /// The stored current ticket, if any.
    fn get_current(&self, device: Address, server: Address) -> StoreResult<Option<Ticket>>;

    /// Replace the current ticket. Compare and swap are atomic per key: a
    /// ticket whose counters regress is refused, equal counters replace
    /// idempotently.
    fn put(&self, ticket: &Ticket) -> StoreResult<()>;
}

/// Storage key for a ticket: recovered device address plus server id.
fn derive_key(ticket: &Ticket) -> StoreResult<(Address, Address)> {
    let device = ticket
        .device_address()
        .map_err(|e| StoreError::Unsigned(e.to_string()))?;
    Ok((device, ticket.server_id()))
}

/// Composite redb key: `device ‖ server`.
fn ticket_key(device: Address, server: Address) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..20].copy_from_slice(device.as_slice());
    key[20..].copy_from_slice(server.as_slice());
    key
}

fn check_supersedes(previous: &Ticket, next: &Ticket) -> StoreResult<()> {
    if next.total_connections() < previous.total_connections()
        || next.total_bytes() < previous.total_bytes()
    {
        return Err(StoreError::UsageRegression {
            prev_connections: previous.total_connections(),
            connections: next.total_connections(),
            prev_bytes: previous.total_bytes(),
            bytes: next.total_bytes(),
        });
    }
    Ok(())
}

// =============================================================================
// In-memory store
// =============================================================================

/// Mutex-guarded map store; the lock spans compare and swap.
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<(Address, Address), Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(device, server)` pairs with a current ticket.
    pub fn len(&self) -> usize {
        self.tickets.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TicketStore for MemoryTicketStore {
    fn get_current(&self, device: Address, server: Address) -> StoreResult<Option<Ticket>> {
        let tickets = self.tickets.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tickets.get(&(device, server)).cloned())
    }

    fn put(&self, ticket: &Ticket) -> StoreResult<()> {
        let key = derive_key(ticket)?;
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(previous) = tickets.get(&key) {
            check_supersedes(previous, ticket)?;
        }
        tickets.insert(key, ticket.clone());
        Ok(())
    }
}

// =============================================================================
// Persistent store
// =============================================================================

/// Embedded ACID ticket database.
///
/// redb serializes write transactions, which is exactly the per-key
/// atomicity `put` needs.
pub struct TicketDatabase {
    db: Database,
}

impl TicketDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CURRENT_TICKETS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Every stored current ticket, for settlement sweeps at epoch close.
    pub fn all_current(&self) -> StoreResult<Vec<Ticket>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CURRENT_TICKETS)?;

        let mut tickets = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            tickets.push(serde_json::from_slice(entry.1.value())?);
        }
        Ok(tickets)
    }

    /// Remove and return the current ticket for a pair (after settlement).
    pub fn remove(&self, device: Address, server: Address) -> StoreResult<Option<Ticket>> {
        let key = ticket_key(device, server);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CURRENT_TICKETS)?;

            // The removal guard borrows the table; copy the bytes out so
            // the guard is gone before the table is.
            let removed_bytes = match table.remove(key.as_slice())? {
                Some(value) => Some(value.value().to_vec()),
                None => None,
            };
            match removed_bytes {
                Some(bytes) => Some(serde_json::from_slice::<Ticket>(&bytes)?),
                None => None,
            }
        };
        write_txn.commit()?;

        if removed.is_some() {
            tracing::debug!(device = %device, server = %server, "removed settled ticket");
        }
        Ok(removed)
    }
}

impl TicketStore for TicketDatabase {
    fn get_current(&self, device: Address, server: Address) -> StoreResult<Option<Ticket>> {
        let key = ticket_key(device, server);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CURRENT_TICKETS)?;
        match table.get(key.as_slice())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put(&self, ticket: &Ticket) -> StoreResult<()> {
        let (device, server) = derive_key(ticket)?;
        let key = ticket_key(device, server);
        let json = serde_json::to_vec(ticket)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CURRENT_TICKETS)?;

            // Read existing value and deserialize before mutating; a
            // regression error drops the transaction unchanged.
            let existing_bytes = match table.get(key.as_slice())? {
                Some(value) => Some(value.value().to_vec()),
                None => None,
            };
            if let Some(bytes) = &existing_bytes {
                let previous: Ticket = serde_json::from_slice(bytes)?;
                check_supersedes(&previous, ticket)?;
            }

            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::signer_from_hex;
    use crate::ticket::ChainAnchor;
    use alloy::primitives::B256;
    use alloy::signers::local::PrivateKeySigner;

    const DEVICE_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const OTHER_DEVICE_KEY: &str =
        "8b3a350cf5c34c9194ca85829a2df0ec3153be0318b5e2d3348e872092edffba";

    const SERVER: Address = Address::repeat_byte(0x5e);

    fn device() -> PrivateKeySigner {
        signer_from_hex(DEVICE_KEY).unwrap()
    }

    fn signed_ticket(signer: &PrivateKeySigner, connections: u64, bytes: u64) -> Ticket {
        Ticket::new(
            ChainAnchor {
                chain_id: 1,
                block_number: 100,
                block_hash: B256::repeat_byte(0x42),
            },
            Address::repeat_byte(0xf1),
            SERVER,
            connections,
            bytes,
            b"device.local:41046".as_slice(),
        )
        .device_sign(signer)
        .unwrap()
    }

    fn temp_db() -> (TicketDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = TicketDatabase::open(&dir.path().join("tickets.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn memory_store_supersedes_monotonically() {
        let store = MemoryTicketStore::new();
        let signer = device();
        let address = signer.address();

        store.put(&signed_ticket(&signer, 5, 1000)).unwrap();
        assert_eq!(store.len(), 1);

        // Replay of the current ticket is idempotent.
        store.put(&signed_ticket(&signer, 5, 1000)).unwrap();
        assert_eq!(store.len(), 1);

        let err = store.put(&signed_ticket(&signer, 4, 1000)).unwrap_err();
        assert!(matches!(err, StoreError::UsageRegression { .. }));
        let err = store.put(&signed_ticket(&signer, 5, 999)).unwrap_err();
        assert!(matches!(err, StoreError::UsageRegression { .. }));

        store.put(&signed_ticket(&signer, 6, 1500)).unwrap();
        let current = store.get_current(address, SERVER).unwrap().unwrap();
        assert_eq!(current.total_connections(), 6);
        assert_eq!(current.total_bytes(), 1500);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unsigned_tickets_cannot_be_stored() {
        let store = MemoryTicketStore::new();
        let unsigned = Ticket::new(
            ChainAnchor {
                chain_id: 1,
                block_number: 100,
                block_hash: B256::repeat_byte(0x42),
            },
            Address::repeat_byte(0xf1),
            SERVER,
            1,
            1,
            b"x".as_slice(),
        );
        let err = store.put(&unsigned).unwrap_err();
        assert!(matches!(err, StoreError::Unsigned(_)));
    }

    #[test]
    fn keys_are_recovered_not_claimed() {
        let store = MemoryTicketStore::new();
        let first = device();
        let second = signer_from_hex(OTHER_DEVICE_KEY).unwrap();

        store.put(&signed_ticket(&first, 1, 10)).unwrap();
        store.put(&signed_ticket(&second, 1, 10)).unwrap();
        assert_eq!(store.len(), 2, "distinct devices get distinct entries");

        assert!(store
            .get_current(first.address(), SERVER)
            .unwrap()
            .is_some());
        assert!(store
            .get_current(second.address(), SERVER)
            .unwrap()
            .is_some());
        assert!(store
            .get_current(Address::repeat_byte(0xaa), SERVER)
            .unwrap()
            .is_none());
    }

    #[test]
    fn database_round_trips_tickets() {
        let (db, _dir) = temp_db();
        let signer = device();

        db.put(&signed_ticket(&signer, 2, 256)).unwrap();
        let current = db.get_current(signer.address(), SERVER).unwrap().unwrap();
        assert_eq!(current.total_bytes(), 256);
        assert_eq!(current.device_address().unwrap(), signer.address());
    }

    #[test]
    fn database_refuses_regressions() {
        let (db, _dir) = temp_db();
        let signer = device();

        db.put(&signed_ticket(&signer, 5, 1000)).unwrap();
        let err = db.put(&signed_ticket(&signer, 4, 1000)).unwrap_err();
        assert!(matches!(err, StoreError::UsageRegression { .. }));

        // The refused put must not have replaced the stored ticket.
        let current = db.get_current(signer.address(), SERVER).unwrap().unwrap();
        assert_eq!(current.total_connections(), 5);
    }

    #[test]
    fn database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.redb");
        let signer = device();

        {
            let db = TicketDatabase::open(&path).unwrap();
            db.put(&signed_ticket(&signer, 3, 300)).unwrap();
        }

        let db = TicketDatabase::open(&path).unwrap();
        let current = db.get_current(signer.address(), SERVER).unwrap().unwrap();
        assert_eq!(current.total_connections(), 3);
    }

    #[test]
    fn remove_returns_the_stored_ticket_intact() {
        let (db, _dir) = temp_db();
        let signer = device();
        let stored = signed_ticket(&signer, 9, 4096);

        db.put(&stored).unwrap();
        let removed = db.remove(signer.address(), SERVER).unwrap().unwrap();
        assert_eq!(removed, stored);
        assert_eq!(removed.device_address().unwrap(), signer.address());
        assert!(db.get_current(signer.address(), SERVER).unwrap().is_none());
    }

    #[test]
    fn settlement_sweep_lists_and_removes() {
        let (db, _dir) = temp_db();
        let first = device();
        let second = signer_from_hex(OTHER_DEVICE_KEY).unwrap();

        db.put(&signed_ticket(&first, 1, 100)).unwrap();
        db.put(&signed_ticket(&second, 2, 200)).unwrap();
        assert_eq!(db.all_current().unwrap().len(), 2);

        let removed = db.remove(first.address(), SERVER).unwrap().unwrap();
        assert_eq!(removed.total_bytes(), 100);
        assert_eq!(db.all_current().unwrap().len(), 1);
        assert!(db.remove(first.address(), SERVER).unwrap().is_none());
        assert!(db.get_current(first.address(), SERVER).unwrap().is_none());
    }
}
