use super::*;

#[test]
fn test_generated_ids_carry_broker_and_increase() {
    let generator = SessionIdGenerator::with_start(7, 1_700_000_000_000);
    let a = generator.next_id();
    let b = generator.next_id();

    assert_eq!(b, a + 1);
    assert_ne!(a, 0);
    assert_eq!(SessionIdGenerator::broker_of(a), 7);
    assert_eq!(SessionIdGenerator::broker_of(b), 7);
}

#[test]
fn test_ids_of_different_brokers_do_not_collide() {
    let g1 = SessionIdGenerator::with_start(1, 1_700_000_000_000);
    let g2 = SessionIdGenerator::with_start(2, 1_700_000_000_000);
    assert_ne!(g1.next_id(), g2.next_id());
}

#[test]
fn test_touch_never_moves_last_seen_backwards() {
    let mut session = Session::new(42, 1, 3000);
    let seen = session.last_seen;

    session.touch(seen - 1000);
    assert_eq!(session.last_seen, seen);

    session.touch(seen + 500);
    assert_eq!(session.last_seen, seen + 500);
    assert_eq!(session.uuid.len(), 21);
}
