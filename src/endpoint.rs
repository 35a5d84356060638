//! The user-visible handle to one end of a pipe or pipe chain.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::buf::StreamBuffer;
use crate::chain::{Chain, PipeState, Release};
use crate::error::AllocError;
use crate::event::EventLink;
use crate::settings::DirectionSettings;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(0);

/// Which of the two roles, or the fused interior role, an endpoint
/// currently holds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    Alice,
    Bob,
    /// Fused into a chain by a weld; performs no I/O of its own.
    Joint,
}

/// The settings a pipe was originally allocated with, kept on each
/// endpoint so that a future unweld can restore independent buffers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OriginSettings {
    pub(crate) to_alice: DirectionSettings,
    pub(crate) to_bob: DirectionSettings,
}

pub(crate) struct EndpointInner {
    pub(crate) role: Role,
    pub(crate) sending: Option<Arc<StreamBuffer>>,
    pub(crate) receiving: Option<Arc<StreamBuffer>>,
    pub(crate) chain: Arc<Mutex<Chain>>,
    pub(crate) origin: OriginSettings,
    pub(crate) weldable: bool,
    /// Set by `weld` on both endpoints it fuses, pointing at each
    /// other; consulted by `unweld` to find the matching Joint to
    /// split back out. `None` for an endpoint that has never been
    /// through a weld.
    pub(crate) weld_sibling: Option<Weak<EndpointHandle>>,
    /// This endpoint's own readable/writable notification objects,
    /// handed out to a subscriber via [`EndpointSide::link_for`].
    pub(crate) self_readable: Arc<EventLink>,
    pub(crate) self_writable: Arc<EventLink>,
    /// The peer's readable/writable links, kept here so a send/receive
    /// on this endpoint can wake the peer directly without walking the
    /// chain again.
    pub(crate) peer_readable: Arc<EventLink>,
    pub(crate) peer_writable: Arc<EventLink>,
}

/// Backing handle shared (via `Arc`) between the [`EndpointSide`] the
/// caller owns and the `Weak` reference kept in the chain's endpoint
/// list for the weld engine to walk.
pub(crate) struct EndpointHandle {
    pub(crate) id: u64,
    lock: ReentrantMutex<RefCell<EndpointInner>>,
}

impl EndpointHandle {
    pub(crate) fn guard(&self) -> ReentrantMutexGuard<'_, RefCell<EndpointInner>> {
        self.lock.lock()
    }
}

/// One end (Alice, Bob, or an interior Joint) of a pipe or pipe chain.
///
/// Obtained from [`allocate`] or [`allocate_ex`], or from
/// [`crate::weld::unweld`]. Consumed by [`EndpointSide::free`].
pub struct EndpointSide {
    pub(crate) handle: Arc<EndpointHandle>,
}

/// Create a symmetric bidirectional pipe: both directions get the
/// same `capacity`/`trigger_level`, and the pipe is weldable.
#[track_caller]
pub fn allocate(capacity: u32, trigger_level: u32) -> Result<(EndpointSide, EndpointSide), AllocError> {
    let settings = DirectionSettings::new(capacity, trigger_level);
    allocate_ex(settings, settings, true)
}

/// Create a bidirectional pipe with independent settings per
/// direction, and explicit control over whether it may ever be welded.
pub fn allocate_ex(
    settings_to_alice: DirectionSettings,
    settings_to_bob: DirectionSettings,
    weldable: bool,
) -> Result<(EndpointSide, EndpointSide), AllocError> {
    if settings_to_alice.capacity == 0 || settings_to_bob.capacity == 0 {
        return Err(AllocError::ZeroCapacity);
    }

    let alice_to_bob = Arc::new(StreamBuffer::new(settings_to_bob));
    let bob_to_alice = Arc::new(StreamBuffer::new(settings_to_alice));
    let chain = Arc::new(Mutex::new(Chain::new(alice_to_bob.clone(), bob_to_alice.clone())));

    let origin = OriginSettings {
        to_alice: settings_to_alice,
        to_bob: settings_to_bob,
    };

    let alice_readable = Arc::new(EventLink::new());
    let alice_writable = Arc::new(EventLink::new());
    let bob_readable = Arc::new(EventLink::new());
    let bob_writable = Arc::new(EventLink::new());

    let alice = new_handle(EndpointInner {
        role: Role::Alice,
        sending: Some(alice_to_bob.clone()),
        receiving: Some(bob_to_alice.clone()),
        chain: chain.clone(),
        origin,
        weldable,
        weld_sibling: None,
        self_readable: alice_readable.clone(),
        self_writable: alice_writable.clone(),
        peer_readable: bob_readable.clone(),
        peer_writable: bob_writable.clone(),
    });
    let bob = new_handle(EndpointInner {
        role: Role::Bob,
        sending: Some(bob_to_alice),
        receiving: Some(alice_to_bob),
        chain: chain.clone(),
        origin,
        weldable,
        weld_sibling: None,
        self_readable: bob_readable,
        self_writable: bob_writable,
        peer_readable: alice_readable,
        peer_writable: alice_writable,
    });

    {
        let mut chain = chain.lock();
        chain.endpoints.push(Arc::downgrade(&alice));
        chain.endpoints.push(Arc::downgrade(&bob));
    }

    log::debug!(
        "allocated pipe chain {} (capacity to_alice={} to_bob={}, weldable={weldable})",
        chain.lock().id,
        settings_to_alice.capacity,
        settings_to_bob.capacity,
    );

    Ok((EndpointSide { handle: alice }, EndpointSide { handle: bob }))
}

fn new_handle(inner: EndpointInner) -> Arc<EndpointHandle> {
    Arc::new(EndpointHandle {
        id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
        lock: ReentrantMutex::new(RefCell::new(inner)),
    })
}

impl EndpointSide {
    pub(crate) fn downgrade(&self) -> Weak<EndpointHandle> {
        Arc::downgrade(&self.handle)
    }

    pub(crate) fn id(&self) -> u64 {
        self.handle.id
    }

    /// This endpoint's current role.
    pub fn role(&self) -> Role {
        self.handle.guard().borrow().role
    }

    /// Whether this endpoint was created with welding capability.
    pub fn is_weldable(&self) -> bool {
        self.handle.guard().borrow().weldable
    }

    /// Current lifecycle state of the chain this endpoint belongs to.
    /// Joint endpoints always report `Open` — they are interior, and
    /// never see the chain's outer endpoints come and go.
    pub fn state(&self) -> PipeState {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        if matches!(inner.role, Role::Joint) {
            return PipeState::Open;
        }
        inner.chain.lock().state
    }

    /// Send up to `bytes.len()` bytes, blocking up to `timeout` (or
    /// forever if `None`) for at least one byte of space. Returns the
    /// number of bytes actually accepted; 0 immediately for a Joint.
    pub fn send(&self, bytes: &[u8], timeout: Option<Duration>) -> usize {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        let Some(sending) = inner.sending.clone() else {
            log::trace!("send on Joint endpoint {} is a no-op", self.handle.id);
            return 0;
        };
        let peer_readable = inner.peer_readable.clone();
        drop(inner);

        let outcome = sending.send(bytes, timeout);
        if outcome.crossed_trigger {
            peer_readable.notify();
        }
        outcome.written
    }

    /// Receive up to `out.len()` bytes, blocking up to `timeout` (or
    /// forever if `None`) until at least `trigger_level` bytes are
    /// available. Returns the number of bytes copied; 0 immediately
    /// for a Joint.
    pub fn receive(&self, out: &mut [u8], timeout: Option<Duration>) -> usize {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        let Some(receiving) = inner.receiving.clone() else {
            log::trace!("receive on Joint endpoint {} is a no-op", self.handle.id);
            return 0;
        };
        let peer_writable = inner.peer_writable.clone();
        drop(inner);

        let n = receiving.receive(out, timeout);
        if n > 0 {
            peer_writable.notify();
        }
        n
    }

    /// Copy up to `out.len()` currently-buffered bytes without
    /// consuming them. Never blocks; 0 immediately for a Joint.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        match &inner.receiving {
            Some(receiving) => receiving.peek(out),
            None => 0,
        }
    }

    /// Bytes currently queued for this endpoint to receive; 0 for a Joint.
    pub fn bytes_available(&self) -> usize {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        inner.receiving.as_ref().map_or(0, |b| b.bytes_available())
    }

    /// Free space currently available for this endpoint to send into; 0 for a Joint.
    pub fn spaces_available(&self) -> usize {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        inner.sending.as_ref().map_or(0, |b| b.spaces_available())
    }

    /// Current readiness for the given event kind. Readable tracks
    /// `bytes_available() >= trigger_level`, mirroring the condition
    /// that unblocks a pending `receive`; Writable tracks any space
    /// at all being free.
    pub fn level(&self, event: crate::event::Event) -> bool {
        use crate::event::Event;
        let guard = self.handle.guard();
        let inner = guard.borrow();
        match event {
            Event::Readable => match &inner.receiving {
                Some(buf) => buf.bytes_available() >= buf.trigger_level(),
                None => false,
            },
            Event::Writable => match &inner.sending {
                Some(buf) => buf.spaces_available() > 0,
                None => false,
            },
        }
    }

    /// The readable/writable notification objects an event loop
    /// subscribes to in order to watch this endpoint.
    pub fn link_for(&self) -> (Arc<EventLink>, Arc<EventLink>) {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        (inner.self_readable.clone(), inner.self_writable.clone())
    }

    /// Free this endpoint.
    ///
    /// # Panics
    /// Panics if this is a Joint endpoint (it must be unwelded first),
    /// or if an event loop is still subscribed to its readable or
    /// writable link.
    #[track_caller]
    pub fn free(self) {
        let guard = self.handle.guard();
        let inner = guard.borrow();
        assert!(
            !matches!(inner.role, Role::Joint),
            "cannot free a Joint endpoint; unweld it first"
        );
        assert!(
            !inner.self_readable.is_subscribed() && !inner.self_writable.is_subscribed(),
            "cannot free an endpoint that is still subscribed to an event loop"
        );
        let chain = inner.chain.clone();
        let id = self.handle.id;
        drop(inner);
        drop(guard);

        let mut chain = chain.lock();
        chain.remove_endpoint(id);
        match chain.release_outer() {
            Release::NowBroken => {
                log::info!("endpoint {id} freed; chain {} is now Broken", chain.id);
            }
            Release::FullyReleased => {
                log::info!("endpoint {id} freed; chain {} fully torn down", chain.id);
            }
        }
    }
}
