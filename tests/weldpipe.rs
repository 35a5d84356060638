//! End-to-end scenarios exercising a freshly allocated pipe or chain
//! the way a caller outside the crate would: through `allocate`,
//! `weld`, and the public `EndpointSide` methods only.

use std::time::Duration;

use weldpipe::weld::weld;
use weldpipe::{allocate, allocate_ex, DirectionSettings, PipeState, Role};

/// Run with `--nocapture` and `RUST_LOG=weldpipe=trace` to see the
/// lifecycle/blocking logging these scenarios exercise.
fn init() {
    let _ = env_logger::try_init();
}

#[test]
fn simple_round_trip() {
    init();
    let (alice, bob) = allocate(16, 1).unwrap();
    assert_eq!(alice.send(b"hello", None), 5);

    let mut out = [0u8; 16];
    let n = bob.receive(&mut out, Some(Duration::from_millis(100)));
    assert_eq!(n, 5);
    assert_eq!(&out[..n], b"hello");

    alice.free();
    bob.free();
}

#[test]
fn back_pressure_accepts_only_what_fits() {
    init();
    let (alice, bob) = allocate(4, 1).unwrap();

    let n = alice.send(b"abcdefgh", Some(Duration::ZERO));
    assert_eq!(n, 4);

    let mut out = [0u8; 2];
    let n = bob.receive(&mut out, Some(Duration::from_millis(50)));
    assert_eq!(n, 2);
    assert_eq!(&out, b"ab");

    let n = alice.send(b"efgh", Some(Duration::ZERO));
    assert_eq!(n, 2);

    alice.free();
    bob.free();
}

#[test]
fn broken_pipe_is_observable_and_tears_down_on_last_free() {
    init();
    let (alice, bob) = allocate(8, 1).unwrap();
    assert_eq!(bob.send(b"xyz", None), 3);

    alice.free();
    assert_eq!(bob.state(), PipeState::Broken);

    // The buffer may still silently accept writes; no observer will
    // ever drain them, but the call itself does not error.
    let n = bob.send(b"more", Some(Duration::ZERO));
    assert!(n <= 4);

    bob.free();
}

#[test]
fn weld_straight_through_forwards_bytes_and_relabels_joints() {
    init();
    let (p_alice, p_bob) = allocate(8, 1).unwrap();
    let (q_alice, q_bob) = allocate(8, 1).unwrap();

    weld(&q_alice, &p_bob);
    assert_eq!(p_bob.role(), Role::Joint);
    assert_eq!(q_alice.role(), Role::Joint);
    assert_eq!(p_bob.send(b"nope", Some(Duration::ZERO)), 0);
    assert_eq!(q_alice.receive(&mut [0u8; 4], Some(Duration::ZERO)), 0);

    assert_eq!(p_alice.send(b"abcdef", None), 6);
    let mut out = [0u8; 8];
    let n = q_bob.receive(&mut out, Some(Duration::from_millis(100)));
    assert_eq!(&out[..n], b"abcdef");

    p_alice.free();
    q_bob.free();
}

#[test]
fn weld_migrates_residual_bytes_before_new_traffic() {
    init();
    let (p_alice, p_bob) = allocate(8, 1).unwrap();
    let (q_alice, q_bob) = allocate(8, 1).unwrap();

    assert_eq!(p_alice.send(b"12", None), 2);
    assert_eq!(q_bob.send(b"9", None), 1);

    weld(&q_alice, &p_bob);

    let mut out = [0u8; 8];
    let n = q_bob.receive(&mut out, Some(Duration::from_millis(50)));
    assert_eq!(&out[..n], b"12");

    let n = p_alice.receive(&mut out, Some(Duration::from_millis(50)));
    assert_eq!(&out[..n], b"9");

    p_alice.free();
    q_bob.free();
}

#[test]
#[should_panic(expected = "Alice role")]
fn illegal_weld_of_two_bobs_panics() {
    init();
    let (_a1, b1) = allocate(8, 1).unwrap();
    let (_a2, b2) = allocate(8, 1).unwrap();
    weld(&b1, &b2);
}

#[test]
#[should_panic(expected = "same chain")]
fn illegal_weld_of_a_pipes_own_two_ends_panics() {
    init();
    let (alice, bob) = allocate(8, 1).unwrap();
    weld(&alice, &bob);
}

#[test]
fn asymmetric_direction_settings_are_independent() {
    init();
    let to_alice = DirectionSettings::new(4, 4);
    let to_bob = DirectionSettings::new(16, 1);
    let (alice, bob) = allocate_ex(to_alice, to_bob, true).unwrap();

    // alice -> bob direction has a low trigger, so a single byte unblocks bob.
    assert_eq!(alice.send(b"x", None), 1);
    let mut out = [0u8; 16];
    assert_eq!(bob.receive(&mut out, Some(Duration::from_millis(50))), 1);

    // bob -> alice direction needs 4 bytes buffered before alice's receive unblocks.
    assert_eq!(bob.send(b"abc", None), 3);
    let mut out = [0u8; 4];
    assert_eq!(
        alice.receive(&mut out, Some(Duration::from_millis(20))),
        0,
        "must not unblock below trigger_level"
    );
    assert_eq!(bob.send(b"d", None), 1);
    assert_eq!(alice.receive(&mut out, Some(Duration::from_millis(50))), 4);
    assert_eq!(&out, b"abcd");

    alice.free();
    bob.free();
}

#[test]
fn three_pipe_chain_carries_traffic_end_to_end() {
    init();
    let (a_alice, a_bob) = allocate(8, 1).unwrap();
    let (b_alice, b_bob) = allocate(8, 1).unwrap();
    let (c_alice, c_bob) = allocate(8, 1).unwrap();

    weld(&b_alice, &a_bob);
    weld(&c_alice, &b_bob);

    assert_eq!(a_alice.send(b"hop", None), 3);
    let mut out = [0u8; 8];
    let n = c_bob.receive(&mut out, Some(Duration::from_millis(100)));
    assert_eq!(&out[..n], b"hop");

    assert_eq!(c_bob.send(b"back", None), 4);
    let n = a_alice.receive(&mut out, Some(Duration::from_millis(100)));
    assert_eq!(&out[..n], b"back");

    a_alice.free();
    c_bob.free();
}
