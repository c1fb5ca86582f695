// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Epoch accounting windows.
//!
//! Usage counters are cumulative within an epoch and start over in the next
//! one. An epoch is a fixed 30-day window derived from block timestamps, so
//! devices, relays and the settlement contract all agree on the window
//! without coordinating.

/// Width of one accounting window in seconds (30 days).
pub const EPOCH_LENGTH_SECS: u64 = 2_592_000;

/// Epoch number containing `timestamp` (seconds since the Unix epoch).
pub fn epoch_of(timestamp: u64) -> u64 {
    timestamp / EPOCH_LENGTH_SECS
}

/// First second of `epoch`.
pub fn epoch_start(epoch: u64) -> u64 {
    epoch * EPOCH_LENGTH_SECS
}

/// First second after `epoch` ends (exclusive upper boundary).
pub fn epoch_end(epoch: u64) -> u64 {
    (epoch + 1) * EPOCH_LENGTH_SECS
}

/// Fraction of the window elapsed at `timestamp`, in `[0.0, 1.0)`.
pub fn epoch_progress(timestamp: u64) -> f64 {
    (timestamp % EPOCH_LENGTH_SECS) as f64 / EPOCH_LENGTH_SECS as f64
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// The epoch currently open by wall-clock time.
pub fn current_epoch() -> u64 {
    epoch_of(unix_now())
}
