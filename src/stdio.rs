//! Narrow boundary to a host thread/scheduler that wants to install a
//! pipe endpoint as a thread's `stdin`/`stdout`.
//!
//! The scheduler itself is out of scope here — there is no thread to
//! install onto in a plain host-process unit test — so this module
//! only supplies the trait a scheduler would implement and the glue
//! that wires it to an [`EndpointSide`].

use std::time::Duration;

use crate::endpoint::EndpointSide;

/// Host thread/scheduler hooks for redirecting a thread's console I/O.
///
/// A real implementation lives in the scheduler; this crate only
/// describes the shape of the boundary.
pub trait ThreadStdio {
    /// Register a callback to be invoked with every byte the thread
    /// would otherwise have written to its stdout.
    fn install_stdout(&mut self, on_write: Box<dyn FnMut(&[u8]) + Send>);

    /// Register a callback the thread calls whenever it wants up to
    /// `max_len` bytes of stdin, blocking up to `timeout`. Returns the
    /// bytes actually read.
    fn install_stdin(&mut self, on_read: Box<dyn FnMut(usize, Option<Duration>) -> Vec<u8> + Send>);
}

/// Wire `endpoint` up as `hooks`' stdout and stdin source.
///
/// Stdout bytes are forwarded with [`EndpointSide::send`] using no
/// timeout (block until they fit); stdin requests are served with
/// [`EndpointSide::receive`] using the caller-supplied timeout.
/// Disconnecting — e.g. when the thread exits — is the caller's
/// responsibility; this function does not itself watch `state()`.
pub fn install_as_stdio(endpoint: EndpointSide, hooks: &mut dyn ThreadStdio) {
    use std::sync::Arc;

    let endpoint = Arc::new(endpoint);

    let stdout_endpoint = endpoint.clone();
    hooks.install_stdout(Box::new(move |bytes| {
        stdout_endpoint.send(bytes, None);
    }));

    let stdin_endpoint = endpoint;
    hooks.install_stdin(Box::new(move |max_len, timeout| {
        let mut buf = vec![0u8; max_len];
        let n = stdin_endpoint.receive(&mut buf, timeout);
        buf.truncate(n);
        buf
    }));
}
