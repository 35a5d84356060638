//! Fusing two pipe chains end-to-end with no intermediate copy, and
//! splitting a welded chain back apart.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::buf::StreamBuffer;
use crate::chain::Chain;
use crate::endpoint::{EndpointHandle, EndpointSide, OriginSettings, Role};
use crate::error::UnweldError;

/// Fuse `alice_side`'s chain onto `bob_side`'s chain into a single
/// longer chain, with no intermediate copy of in-flight bytes.
///
/// Both arguments become interior `Joint` endpoints and stop doing I/O
/// of their own; the two chains' outer endpoints now talk straight
/// through them.
///
/// # Panics
/// Panics if either endpoint is not weldable, is already a Joint, if
/// `alice_side` is not in the Alice role or `bob_side` is not in the
/// Bob role, or if both endpoints already belong to the same chain.
#[track_caller]
pub fn weld(alice_side: &EndpointSide, bob_side: &EndpointSide) {
    let i_a = alice_side.handle.clone();
    let i_b = bob_side.handle.clone();

    let (left, right) = {
        let guard_a = i_a.guard();
        let inner_a = guard_a.borrow();
        let guard_b = i_b.guard();
        let inner_b = guard_b.borrow();

        assert!(inner_a.weldable && inner_b.weldable, "both endpoints must be weldable");
        assert!(
            !matches!(inner_a.role, Role::Joint) && !matches!(inner_b.role, Role::Joint),
            "cannot weld an endpoint that is already a Joint"
        );
        assert_eq!(inner_a.role, Role::Alice, "first argument to weld must be in the Alice role");
        assert_eq!(inner_b.role, Role::Bob, "second argument to weld must be in the Bob role");
        assert!(
            !Arc::ptr_eq(&inner_a.chain, &inner_b.chain),
            "cannot weld the two ends of the same chain"
        );

        // L = iB's chain (Bob end is being fused), R = iA's chain (Alice end is being fused).
        (inner_b.chain.clone(), inner_a.chain.clone())
    };

    // Lock the two chain records in address order so two concurrent
    // welds touching an overlapping pair of chains can't deadlock.
    let (mut left_guard, right_guard) = lock_pair(&left, &right);

    // Every endpoint in both chains gets its per-endpoint lock held for
    // the duration of the splice, in a fixed global order. iA and iB
    // are themselves members of R's and L's endpoint lists respectively,
    // which is exactly why the per-endpoint lock has to be reentrant.
    let mut all_handles: Vec<Arc<EndpointHandle>> = left_guard
        .endpoints
        .iter()
        .chain(right_guard.endpoints.iter())
        .filter_map(Weak::upgrade)
        .collect();
    all_handles.sort_by_key(|h| Arc::as_ptr(h) as usize);
    all_handles.dedup_by_key(|h| Arc::as_ptr(h) as usize);
    let _endpoint_guards: Vec<_> = all_handles.iter().map(|h| h.guard()).collect();

    // Residual migration: bytes already in flight keep going the way
    // they were headed, just through the new owning buffer.
    let left_residual = left_guard.alice_to_bob.drain_all();
    right_guard.alice_to_bob.append_unchecked(&left_residual);

    let right_residual = right_guard.bob_to_alice.drain_all();
    left_guard.bob_to_alice.append_unchecked(&right_residual);

    // Chain concatenation: L's endpoints, then R's, in order.
    let left_order = left_guard.endpoints.clone();
    let right_order = right_guard.endpoints.clone();
    for weak in &right_order {
        if let Some(handle) = weak.upgrade() {
            handle.guard().borrow_mut().chain = left.clone();
        }
    }
    left_guard.endpoints = left_order.iter().chain(right_order.iter()).cloned().collect();

    // Buffer collapse: L's old alice_to_bob and R's old bob_to_alice
    // are now redundant; R's alice_to_bob becomes the chain's single
    // surviving alice_to_bob, and L's bob_to_alice survives as-is.
    let adopted_alice_to_bob = right_guard.alice_to_bob.clone();
    left_guard.alice_to_bob = adopted_alice_to_bob.clone();
    let surviving_bob_to_alice = left_guard.bob_to_alice.clone();

    // Endpoint relabeling: iA and iB become interior Joints, remember
    // each other, and stop doing I/O.
    {
        let mut inner_a = i_a.guard().borrow_mut();
        inner_a.role = Role::Joint;
        inner_a.sending = None;
        inner_a.receiving = None;
        inner_a.weld_sibling = Some(Arc::downgrade(&i_b));
    }
    {
        let mut inner_b = i_b.guard().borrow_mut();
        inner_b.role = Role::Joint;
        inner_b.sending = None;
        inner_b.receiving = None;
        inner_b.weld_sibling = Some(Arc::downgrade(&i_a));
    }

    // The chain's two remaining outer endpoints now send into the
    // adopted buffers (their `receiving` sides were already correct,
    // since those buffer identities never changed).
    let outer_alice = left_guard.endpoints.first().and_then(Weak::upgrade);
    let outer_bob = left_guard.endpoints.last().and_then(Weak::upgrade);
    if let Some(outer_alice) = &outer_alice {
        outer_alice.guard().borrow_mut().sending = Some(adopted_alice_to_bob.clone());
    }
    if let Some(outer_bob) = &outer_bob {
        outer_bob.guard().borrow_mut().sending = Some(surviving_bob_to_alice.clone());
    }
    // The two outer endpoints used to notify iA/iB (their former
    // direct peers); now that iA/iB are interior Joints, they must
    // notify each other instead, or a subscriber on either outer
    // endpoint would never be woken again.
    if let (Some(outer_alice), Some(outer_bob)) = (&outer_alice, &outer_bob) {
        pair_links(outer_alice, outer_bob);
    }

    log::info!(
        "welded chain {} ({} endpoints) onto chain {}; combined chain now has {} endpoints",
        right_guard.id,
        right_order.len(),
        left_guard.id,
        left_guard.endpoints.len(),
    );

    drop(_endpoint_guards);
    drop(right_guard);
    drop(left_guard);
    // `right` (the old R chain Arc) now has no remaining strong
    // references once this function returns: every endpoint that used
    // to point at it was rewritten above.
}

/// Split a previously-welded pair of Joint endpoints back into two
/// independent pipe chains.
///
/// `e` must be a `Joint` produced by [`weld`]. Succeeds only if both
/// directions have zero bytes in flight through the weld point at the
/// moment of the call; otherwise the residual count is returned and
/// nothing is changed.
///
/// # Panics
/// Panics if `e` is not a Joint, or was never produced by a weld.
#[track_caller]
pub fn unweld(e: &EndpointSide) -> Result<(EndpointSide, EndpointSide), UnweldError> {
    let this = e.handle.clone();
    let sibling = {
        let guard = this.guard();
        let inner = guard.borrow();
        assert!(matches!(inner.role, Role::Joint), "unweld requires a Joint endpoint");
        inner
            .weld_sibling
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("Joint endpoint has no weld sibling; it was not produced by weld")
    };

    // Figure out which of the pair was originally Bob (the left side's
    // old outer end) versus originally Alice (the right side's), using
    // each endpoint's own captured origin settings: the one whose
    // `origin.to_bob` sizes the chain's surviving alice_to_bob buffer
    // (via its own prior allocation as a Bob) restores as the new Bob.
    // In practice this is just "whichever of `this`/`sibling` sits
    // earlier in the chain's endpoint list".
    let chain = this.guard().borrow().chain.clone();
    let chain_guard = chain.lock();

    let idx_this = index_of(&chain_guard.endpoints, &this);
    let idx_sibling = index_of(&chain_guard.endpoints, &sibling);
    let (j_bob, idx_bob, j_alice, idx_alice) = if idx_this < idx_sibling {
        (this.clone(), idx_this, sibling.clone(), idx_sibling)
    } else {
        (sibling.clone(), idx_sibling, this.clone(), idx_this)
    };
    assert_eq!(idx_alice, idx_bob + 1, "weld siblings must be adjacent in the chain");

    let residual = chain_guard.alice_to_bob.bytes_available() + chain_guard.bob_to_alice.bytes_available();
    if residual > 0 {
        return Err(UnweldError::ResidualData(residual));
    }

    let left_origin = j_bob.guard().borrow().origin;
    let right_origin = j_alice.guard().borrow().origin;

    let left_endpoints: Vec<Weak<EndpointHandle>> = chain_guard.endpoints[..=idx_bob].to_vec();
    let right_endpoints: Vec<Weak<EndpointHandle>> = chain_guard.endpoints[idx_alice..].to_vec();

    let left_chain = build_chain(left_origin, &left_endpoints);
    let right_chain = build_chain(right_origin, &right_endpoints);

    restore_outer_roles(&left_chain, &left_endpoints, &right_chain, &right_endpoints, &j_bob, &j_alice);

    log::info!(
        "unwelded chain {} back into chains {} ({} endpoints) and {} ({} endpoints)",
        chain_guard.id,
        left_chain.lock().id,
        left_endpoints.len(),
        right_chain.lock().id,
        right_endpoints.len(),
    );

    drop(chain_guard);

    Ok((EndpointSide { handle: j_bob }, EndpointSide { handle: j_alice }))
}

/// Cross-wire two endpoints' peer notification links to point at each
/// other's own readable/writable links, so each one's `send`/`receive`
/// wakes the other rather than whatever it used to be paired with.
fn pair_links(a: &Arc<EndpointHandle>, b: &Arc<EndpointHandle>) {
    let (a_self_readable, a_self_writable) = {
        let inner = a.guard().borrow();
        (inner.self_readable.clone(), inner.self_writable.clone())
    };
    let (b_self_readable, b_self_writable) = {
        let inner = b.guard().borrow();
        (inner.self_readable.clone(), inner.self_writable.clone())
    };
    let mut inner_a = a.guard().borrow_mut();
    inner_a.peer_readable = b_self_readable;
    inner_a.peer_writable = b_self_writable;
    drop(inner_a);
    let mut inner_b = b.guard().borrow_mut();
    inner_b.peer_readable = a_self_readable;
    inner_b.peer_writable = a_self_writable;
}

fn index_of(endpoints: &[Weak<EndpointHandle>], target: &Arc<EndpointHandle>) -> usize {
    endpoints
        .iter()
        .position(|weak| weak.upgrade().is_some_and(|h| Arc::ptr_eq(&h, target)))
        .expect("endpoint must be present in its own chain's endpoint list")
}

fn build_chain(origin: OriginSettings, endpoints: &[Weak<EndpointHandle>]) -> Arc<Mutex<Chain>> {
    let alice_to_bob = Arc::new(StreamBuffer::new(origin.to_bob));
    let bob_to_alice = Arc::new(StreamBuffer::new(origin.to_alice));
    let mut chain = Chain::new(alice_to_bob, bob_to_alice);
    chain.endpoints = endpoints.to_vec();
    let chain = Arc::new(Mutex::new(chain));
    for weak in endpoints {
        if let Some(handle) = weak.upgrade() {
            handle.guard().borrow_mut().chain = chain.clone();
        }
    }
    chain
}

fn restore_outer_roles(
    left_chain: &Arc<Mutex<Chain>>,
    left_endpoints: &[Weak<EndpointHandle>],
    right_chain: &Arc<Mutex<Chain>>,
    right_endpoints: &[Weak<EndpointHandle>],
    j_bob: &Arc<EndpointHandle>,
    j_alice: &Arc<EndpointHandle>,
) {
    let (left_alice_to_bob, left_bob_to_alice) = {
        let c = left_chain.lock();
        (c.alice_to_bob.clone(), c.bob_to_alice.clone())
    };
    let (right_alice_to_bob, right_bob_to_alice) = {
        let c = right_chain.lock();
        (c.alice_to_bob.clone(), c.bob_to_alice.clone())
    };

    // The chain's far outer Alice endpoint (leftmost of left_endpoints)
    // keeps the Alice role but now points at freshly split buffers.
    if let Some(outer_alice) = left_endpoints.first().and_then(Weak::upgrade) {
        let mut inner = outer_alice.guard().borrow_mut();
        inner.sending = Some(left_alice_to_bob.clone());
        inner.receiving = Some(left_bob_to_alice.clone());
    }
    {
        let mut inner = j_bob.guard().borrow_mut();
        inner.role = Role::Bob;
        inner.sending = Some(left_bob_to_alice);
        inner.receiving = Some(left_alice_to_bob);
        inner.weld_sibling = None;
    }

    {
        let mut inner = j_alice.guard().borrow_mut();
        inner.role = Role::Alice;
        inner.sending = Some(right_alice_to_bob.clone());
        inner.receiving = Some(right_bob_to_alice.clone());
        inner.weld_sibling = None;
    }
    // The chain's far outer Bob endpoint (rightmost of right_endpoints)
    // keeps the Bob role, repointed the same way.
    if let Some(outer_bob) = right_endpoints.last().and_then(Weak::upgrade) {
        let mut inner = outer_bob.guard().borrow_mut();
        inner.sending = Some(right_bob_to_alice);
        inner.receiving = Some(right_alice_to_bob);
    }

    // Each side's outer endpoint and its newly-restored Bob/Alice must
    // notify each other directly again, undoing the cross-wiring weld
    // put in place between the two chains' former outer endpoints.
    if let Some(outer_alice) = left_endpoints.first().and_then(Weak::upgrade) {
        pair_links(&outer_alice, j_bob);
    }
    if let Some(outer_bob) = right_endpoints.last().and_then(Weak::upgrade) {
        pair_links(j_alice, &outer_bob);
    }
}

fn lock_pair<'a>(
    left: &'a Mutex<Chain>,
    right: &'a Mutex<Chain>,
) -> (MutexGuard<'a, Chain>, MutexGuard<'a, Chain>) {
    if (left as *const Mutex<Chain> as usize) <= (right as *const Mutex<Chain> as usize) {
        let l = left.lock();
        let r = right.lock();
        (l, r)
    } else {
        let r = right.lock();
        let l = left.lock();
        (l, r)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::allocate;
    use std::time::Duration;

    #[test]
    fn weld_straight_through_forwards_bytes() {
        let (p_alice, p_bob) = allocate(8, 1).unwrap();
        let (q_alice, q_bob) = allocate(8, 1).unwrap();

        weld(&q_alice, &p_bob);

        assert_eq!(p_bob.role(), Role::Joint);
        assert_eq!(q_alice.role(), Role::Joint);
        assert_eq!(p_bob.send(b"x", Some(Duration::ZERO)), 0);

        assert_eq!(p_alice.send(b"abcdef", None), 6);
        let mut out = [0u8; 8];
        let n = q_bob.receive(&mut out, None);
        assert_eq!(&out[..n], b"abcdef");

        p_alice.free();
        q_bob.free();
    }

    #[test]
    fn weld_migrates_residual_bytes_in_order() {
        let (p_alice, p_bob) = allocate(8, 1).unwrap();
        let (q_alice, q_bob) = allocate(8, 1).unwrap();

        assert_eq!(p_alice.send(b"12", None), 2);
        assert_eq!(q_bob.send(b"9", None), 1);

        weld(&q_alice, &p_bob);

        let mut out = [0u8; 8];
        let n = receive_with_timeout(&q_bob, &mut out);
        assert_eq!(&out[..n], b"12");

        let n = receive_with_timeout(&p_alice, &mut out);
        assert_eq!(&out[..n], b"9");

        p_alice.free();
        q_bob.free();
    }

    fn receive_with_timeout(side: &EndpointSide, out: &mut [u8]) -> usize {
        side.receive(out, Some(Duration::from_millis(10)))
    }

    #[test]
    fn weld_rewires_outer_endpoints_notifications() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (p_alice, p_bob) = allocate(8, 1).unwrap();
        let (q_alice, q_bob) = allocate(8, 1).unwrap();

        weld(&q_alice, &p_bob);

        let (q_bob_readable, _) = q_bob.link_for();
        let woken = Arc::new(AtomicBool::new(false));
        let woken2 = woken.clone();
        q_bob_readable.subscribe(move || woken2.store(true, Ordering::SeqCst));

        // p_alice's peer used to be p_bob (now an interior Joint with
        // no subscriber); after the weld it must be q_bob instead.
        assert_eq!(p_alice.send(b"hi", None), 2);
        assert!(woken.load(Ordering::SeqCst), "outer Bob's subscriber was never woken across the weld");

        let (p_alice_writable, _) = p_alice.link_for();
        let woken_write = Arc::new(AtomicBool::new(false));
        let woken_write2 = woken_write.clone();
        p_alice_writable.subscribe(move || woken_write2.store(true, Ordering::SeqCst));

        let mut out = [0u8; 8];
        q_bob.receive(&mut out, None);
        assert!(
            woken_write.load(Ordering::SeqCst),
            "outer Alice's writable subscriber was never woken across the weld"
        );

        q_bob_readable.unsubscribe();
        p_alice_writable.unsubscribe();
        p_alice.free();
        q_bob.free();
    }

    #[test]
    #[should_panic(expected = "same chain")]
    fn weld_rejects_self_loop() {
        let (alice, bob) = allocate(8, 1).unwrap();
        weld(&alice, &bob);
    }

    #[test]
    #[should_panic(expected = "Alice role")]
    fn weld_rejects_two_bobs() {
        let (_a1, b1) = allocate(8, 1).unwrap();
        let (_a2, b2) = allocate(8, 1).unwrap();
        weld(&b1, &b2);
    }

    #[test]
    fn unweld_restores_two_independent_chains() {
        let (p_alice, p_bob) = allocate(8, 1).unwrap();
        let (q_alice, q_bob) = allocate(8, 1).unwrap();
        weld(&q_alice, &p_bob);

        let (restored_bob, restored_alice) = unweld(&p_bob).unwrap();
        assert_eq!(restored_bob.role(), Role::Bob);
        assert_eq!(restored_alice.role(), Role::Alice);

        assert_eq!(p_alice.send(b"hi", None), 2);
        let mut out = [0u8; 8];
        let n = restored_bob.receive(&mut out, None);
        assert_eq!(&out[..n], b"hi");

        p_alice.free();
        restored_bob.free();
        restored_alice.free();
        q_bob.free();
    }

    #[test]
    fn unweld_refuses_with_residual_data() {
        let (p_alice, p_bob) = allocate(8, 1).unwrap();
        let (q_alice, q_bob) = allocate(8, 1).unwrap();
        weld(&q_alice, &p_bob);

        assert_eq!(p_alice.send(b"stuck", None), 5);
        let err = unweld(&p_bob).unwrap_err();
        assert_eq!(err, UnweldError::ResidualData(5));

        let mut out = [0u8; 8];
        q_bob.receive(&mut out, None);
        p_alice.free();
        q_bob.free();
    }
}
