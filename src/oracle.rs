// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain oracle: block hash and timestamp resolution for ticket anchors.
//!
//! Anchors bind tickets to a chain view, so both ticket construction and
//! validation need to ask "what is block N on chain C?". The oracle answers
//! exactly that. A block that cannot be resolved is an error, never a
//! placeholder hash.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use alloy::{
    eips::BlockNumberOrTag,
    network::Ethereum,
    primitives::B256,
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
};
use lru::LruCache;

use crate::error::TicketError;
use crate::ticket::ChainAnchor;

/// HTTP provider type (with all fillers).
pub type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Resolves block hashes and timestamps for anchored tickets.
///
/// Implementations are queried with an explicit `(chain_id, block_number)`
/// pair; callers own timeouts and cancellation.
#[allow(async_fn_in_trait)]
pub trait ChainOracle: Send + Sync {
    /// Hash of `block_number` on `chain_id`.
    async fn block_hash(&self, chain_id: u64, block_number: u64) -> Result<B256, TicketError>;

    /// Timestamp of `block_number` on `chain_id`.
    async fn block_time(&self, chain_id: u64, block_number: u64) -> Result<u64, TicketError>;

    /// Hash and timestamp together. Implementations that can serve both
    /// from one fetch should override this.
    async fn block_info(
        &self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(B256, u64), TicketError> {
        let hash = self.block_hash(chain_id, block_number).await?;
        let time = self.block_time(chain_id, block_number).await?;
        Ok((hash, time))
    }

    /// Resolve a construction-ready anchor for `block_number`.
    async fn anchor(&self, chain_id: u64, block_number: u64) -> Result<ChainAnchor, TicketError> {
        let (block_hash, _) = self.block_info(chain_id, block_number).await?;
        Ok(ChainAnchor {
            chain_id,
            block_number,
            block_hash,
        })
    }
}

fn unresolved(chain_id: u64, block_number: u64, reason: impl Into<String>) -> TicketError {
    TicketError::ChainResolution {
        chain_id,
        block_number,
        reason: reason.into(),
    }
}

// =============================================================================
// RPC-backed oracle
// =============================================================================

/// Blocks cached per oracle. Anchors cluster around the chain head, so a
/// small window covers the working set.
const BLOCK_CACHE_SIZE: usize = 1024;

/// JSON-RPC backed oracle with one HTTP endpoint per served chain.
pub struct RpcChainOracle {
    providers: HashMap<u64, HttpProvider>,
    /// (chain_id, block_number) → (hash, timestamp)
    cache: Mutex<LruCache<(u64, u64), (B256, u64)>>,
}

impl RpcChainOracle {
    /// Create an oracle with no configured chains.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BLOCK_CACHE_SIZE).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    /// Register an RPC endpoint for a chain.
    pub fn with_chain(mut self, chain_id: u64, rpc_url: &str) -> Result<Self, TicketError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| TicketError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);
        self.providers.insert(chain_id, provider);
        Ok(self)
    }

    /// Chain ids this oracle can answer for.
    pub fn chains(&self) -> Vec<u64> {
        self.providers.keys().copied().collect()
    }

    fn cached(&self, chain_id: u64, block_number: u64) -> Option<(B256, u64)> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(&(chain_id, block_number)).copied()
    }

    fn remember(&self, chain_id: u64, block_number: u64, info: (B256, u64)) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put((chain_id, block_number), info);
        }
    }

    async fn fetch(&self, chain_id: u64, block_number: u64) -> Result<(B256, u64), TicketError> {
        if let Some(info) = self.cached(chain_id, block_number) {
            return Ok(info);
        }

        let provider = self.providers.get(&chain_id).ok_or_else(|| {
            unresolved(chain_id, block_number, "no RPC endpoint configured for chain")
        })?;

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .map_err(|e| unresolved(chain_id, block_number, e.to_string()))?
            .ok_or_else(|| unresolved(chain_id, block_number, "block not found"))?;

        let info = (block.header.hash, block.header.timestamp);
        self.remember(chain_id, block_number, info);
        tracing::debug!(chain_id, block_number, hash = %info.0, "resolved anchor block");
        Ok(info)
    }
}

impl std::fmt::Debug for RpcChainOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainOracle")
            .field("chains", &self.chains())
            .finish_non_exhaustive()
    }
}

impl Default for RpcChainOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainOracle for RpcChainOracle {
    async fn block_hash(&self, chain_id: u64, block_number: u64) -> Result<B256, TicketError> {
        Ok(self.fetch(chain_id, block_number).await?.0)
    }

    async fn block_time(&self, chain_id: u64, block_number: u64) -> Result<u64, TicketError> {
        Ok(self.fetch(chain_id, block_number).await?.1)
    }

    async fn block_info(
        &self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(B256, u64), TicketError> {
        self.fetch(chain_id, block_number).await
    }
}

// =============================================================================
// Static oracle
// =============================================================================

/// Fixed-view oracle backed by an in-memory table.
///
/// Used in tests and in deployments where the chain view is fed in from
/// elsewhere (e.g. a local light client).
#[derive(Debug, Default)]
pub struct StaticChainOracle {
    /// (chain_id, block_number) → (hash, timestamp)
    blocks: HashMap<(u64, u64), (B256, u64)>,
}

impl StaticChainOracle {
    /// Create an empty oracle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block. Overwrites any earlier entry.
    pub fn insert(&mut self, chain_id: u64, block_number: u64, hash: B256, timestamp: u64) {
        self.blocks.insert((chain_id, block_number), (hash, timestamp));
    }

    fn lookup(&self, chain_id: u64, block_number: u64) -> Result<(B256, u64), TicketError> {
        self.blocks
            .get(&(chain_id, block_number))
            .copied()
            .ok_or_else(|| unresolved(chain_id, block_number, "block not in static view"))
    }
}

impl ChainOracle for StaticChainOracle {
    async fn block_hash(&self, chain_id: u64, block_number: u64) -> Result<B256, TicketError> {
        Ok(self.lookup(chain_id, block_number)?.0)
    }

    async fn block_time(&self, chain_id: u64, block_number: u64) -> Result<u64, TicketError> {
        Ok(self.lookup(chain_id, block_number)?.1)
    }

    async fn block_info(
        &self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(B256, u64), TicketError> {
        self.lookup(chain_id, block_number)
    }
}
