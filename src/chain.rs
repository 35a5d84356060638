//! Per-pipe (or, after welding, per-chain) shared state: the two
//! stream buffers, the ordered endpoint list, and the lifecycle state
//! machine.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::buf::StreamBuffer;
use crate::endpoint::EndpointHandle;

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a pipe/chain, as observed from an endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PipeState {
    /// Both outer endpoints (Alice and Bob) are still alive.
    Open,
    /// One outer endpoint has been freed; the other is still alive.
    /// There is no way back to `Open`.
    Broken,
}

/// Outcome of releasing one outer endpoint's slot in [`EndpointCount`].
pub(crate) enum Release {
    /// The other outer endpoint is still alive; the chain is now `Broken`.
    NowBroken,
    /// Both outer endpoints are gone; the chain is ready for teardown.
    FullyReleased,
}

/// Counts down from both outer endpoints alive: a first `release`
/// reports `NowBroken`, a second reports `FullyReleased`. Panics on a
/// third release, since the precondition checks in
/// [`crate::EndpointSide::free`] should make that unreachable.
pub(crate) struct EndpointCount(AtomicU8);

impl EndpointCount {
    fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn release(&self) -> Release {
        let previous = self.0.fetch_add(1, Ordering::AcqRel);
        match previous {
            0 => Release::NowBroken,
            1 => Release::FullyReleased,
            _ => unreachable!("outer endpoint released more than twice"),
        }
    }
}

/// Shared state co-owned by every live endpoint of a pipe or pipe
/// chain. Freed automatically once the last endpoint handle referring
/// to it is dropped.
pub(crate) struct Chain {
    pub(crate) id: u64,
    pub(crate) alice_to_bob: Arc<StreamBuffer>,
    pub(crate) bob_to_alice: Arc<StreamBuffer>,
    /// Ordered `[cAlice, j1, j2, ..., cBob]`. Weak so that the chain
    /// does not keep endpoints alive by itself — liveness is governed
    /// by whoever holds the matching `EndpointSide`.
    pub(crate) endpoints: Vec<Weak<EndpointHandle>>,
    pub(crate) state: PipeState,
    outer_count: EndpointCount,
}

impl Chain {
    pub(crate) fn new(alice_to_bob: Arc<StreamBuffer>, bob_to_alice: Arc<StreamBuffer>) -> Self {
        Self {
            id: NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed),
            alice_to_bob,
            bob_to_alice,
            endpoints: Vec::new(),
            state: PipeState::Open,
            outer_count: EndpointCount::new(),
        }
    }

    /// Remove the endpoint with the given identity from the ordered
    /// list, if present.
    pub(crate) fn remove_endpoint(&mut self, id: u64) {
        self.endpoints.retain(|weak| match weak.upgrade() {
            Some(handle) => handle.id != id,
            None => false,
        });
    }

    /// Release one outer endpoint's slot, transitioning `Open ->
    /// Broken` on the first call. There is no call that moves state
    /// back to `Open`.
    pub(crate) fn release_outer(&mut self) -> Release {
        let release = self.outer_count.release();
        if matches!(release, Release::NowBroken) {
            self.state = PipeState::Broken;
        }
        release
    }
}
