//! Bidirectional, bounded byte pipe with weldable endpoints
//!
//! This crate is a userland stand-in for the kind of IPC primitive an
//! embedded RTOS kernel hands out: two symmetric endpoints, Alice and
//! Bob, connected by a pair of fixed-capacity byte buffers, one per
//! direction. Either side can [`EndpointSide::send`] into its own
//! direction and [`EndpointSide::receive`] from the other's, with
//! ordinary blocking and timed semantics.
//!
//! ```
//! use std::time::Duration;
//! use weldpipe::allocate;
//!
//! let (alice, bob) = allocate(64, 1).unwrap();
//! assert_eq!(alice.send(b"ping", None), 4);
//! let mut buf = [0u8; 4];
//! assert_eq!(bob.receive(&mut buf, Some(Duration::from_millis(100))), 4);
//! assert_eq!(&buf, b"ping");
//! # alice.free();
//! # bob.free();
//! ```
//!
//! # Flow control
//!
//! Each direction has its own [`DirectionSettings`]: a `capacity` the
//! buffer never exceeds, and a `trigger_level` — the minimum number of
//! buffered bytes required to unblock a pending `receive` and to raise
//! a "readable" event-loop notification. A `trigger_level` of 1 gives
//! the usual "wake up on any byte" behaviour; a higher value lets a
//! consumer wait for, say, a whole protocol header before being woken.
//!
//! # Welding
//!
//! [`weld::weld`] fuses one pipe's Bob end onto another pipe's Alice
//! end, splicing them into a single longer chain with no intermediate
//! copy: bytes already in flight at the weld point are migrated once,
//! under lock, and the two endpoints that were spliced together become
//! interior [`Role::Joint`] endpoints that no longer do I/O of their
//! own. [`weld::unweld`] is this crate's documented answer to the
//! inverse operation: it is only permitted once the weld point has
//! drained to zero bytes in both directions, since there is no
//! sensible way to split in-flight data between the two resulting
//! chains.
//!
//! # Lifecycle
//!
//! A pipe (or chain) is `Open` while both of its outer endpoints are
//! alive. [`EndpointSide::free`] on one makes the chain `Broken`;
//! freeing the other tears the shared state down. There is no way
//! back from `Broken` to `Open`. A `Joint` endpoint must be unwelded
//! before it can be freed.
//!
//! # Event-loop integration
//!
//! This crate does not ship an event loop. Instead, each endpoint
//! exposes a pair of [`event::EventLink`] objects — readable and
//! writable — that a cooperative, single-threaded event loop can
//! subscribe a callback to via [`EndpointSide::link_for`]. `send` and
//! `receive` notify the relevant link on the peer whenever they cross
//! a readiness edge.
//!
//! # Logging
//!
//! Lifecycle events (allocation, weld, unweld, free) are logged
//! through the `log` facade at `debug`/`info`, and per-call detail at
//! `trace`, for whichever logger the host application installs.

mod buf;
mod chain;
mod endpoint;
mod error;
mod event;
mod settings;
pub mod stdio;
pub mod weld;

pub use chain::PipeState;
pub use endpoint::{allocate, allocate_ex, EndpointSide, Role};
pub use error::{AllocError, UnweldError};
pub use event::{Event, EventLink};
pub use settings::DirectionSettings;
