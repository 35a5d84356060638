use thiserror::Error;

/// Failure allocating a new pipe or pipe chain.
///
/// In this crate's heap-backed implementation this only arises from
/// the degenerate zero-capacity request, but the `Result` shape is
/// kept so a future `static`-backed variant has somewhere to report a
/// real out-of-memory condition.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AllocError {
    /// A direction's capacity was zero, so no usable ring could be built.
    #[error("pipe capacity must be non-zero")]
    ZeroCapacity,
}

/// Failure splitting a welded chain back apart with [`crate::weld::unweld`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum UnweldError {
    /// The weld point still has bytes in flight on one or both
    /// directions, and this crate declines to guess how to partition
    /// them between the two resulting chains.
    #[error("cannot unweld: {0} byte(s) of residual data at the weld point")]
    ResidualData(usize),
}
