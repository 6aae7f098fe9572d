use std::time::Instant;

use checkin_core::{Event, Request, NO_PROCESS};
use checkin_ipc::worker::ack_delay;
use checkin_ipc::Error;
use checkin_tests::{own_pid, FailingWrites, TestCtxBuilder};
use eyre::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

const CLIENT: i32 = 1000;

#[test]
fn search_resolves_first_matching_slot() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let request = Request::new(1000004, "pass_4", CLIENT)?;

    let (index, stored) = ctx.worker().search(&request)?;
    assert_eq!(index, 3);
    assert_eq!(stored.name, "Name4 Surname4");
    assert_eq!(stored.flight_number, "TAP004");
    Ok(())
}

#[test]
fn search_stops_at_first_tax_id_match() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    // A second slot for passenger 1000001 with a different password.
    let mut twin = ctx.store.get(0)?;
    twin.password = "other".into();
    ctx.store.put(4, &twin)?;

    let request = Request::new(1000001, "other", CLIENT)?;
    assert!(matches!(
        ctx.worker().search(&request),
        Err(Error::WrongPassword(1000001))
    ));
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn successful_session_acknowledges_once_and_releases_slot() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let before = ctx.slots()?;
    let request = Request::new(1000004, "pass_4", CLIENT)?;

    let started = Instant::now();
    ctx.worker().serve(request)?;
    assert!(started.elapsed().as_secs() >= 1, "acknowledgement comes after a delay");

    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientAccepted]);
    assert_eq!(ctx.notifier.sent().len(), 1);

    let after = ctx.slots()?;
    assert_eq!(after, before, "a closed session leaves the slot as it was seeded");
    assert!(after[3].is_free());
    Ok(())
}

#[test]
fn reserve_attaches_worker_and_copies_metadata() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let worker = ctx.worker();
    let request = Request::new(1000002, "pass_2", CLIENT)?;

    let (index, stored) = worker.search(&request)?;
    let session = request.check_in(&stored, worker.pid().as_raw());
    worker.reserve(index, &session)?;

    let slot = ctx.store.get(index)?;
    assert_eq!(slot, session);
    assert_eq!(slot.name, "Name2 Surname2");
    assert_eq!(slot.flight_number, "TAP002");
    assert_eq!(slot.client_pid, CLIENT);
    assert_eq!(slot.worker_pid, own_pid());

    let released = worker.close(index, session.clone())?;
    let slot = ctx.store.get(index)?;
    assert_eq!(slot, released);
    assert_eq!((slot.client_pid, slot.worker_pid), (NO_PROCESS, NO_PROCESS));
    assert_eq!(slot.name, session.name);
    assert_eq!(slot.flight_number, session.flight_number);
    assert_eq!(slot.password, session.password);

    assert!(ctx.notifier.sent().is_empty(), "reserve and close send nothing");
    Ok(())
}

#[test]
fn close_is_idempotent() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let before = ctx.slots()?;
    let closed = ctx.store.get(1)?;

    ctx.worker().close(1, closed.clone())?;
    ctx.worker().close(1, closed)?;
    assert_eq!(ctx.slots()?, before);
    Ok(())
}

#[test]
fn wrong_password_rejects_without_writing() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let before = ctx.slots()?;
    let request = Request::new(1000002, "pass_3", CLIENT)?;

    let err = ctx.worker().serve(request).unwrap_err();
    assert!(matches!(err, Error::WrongPassword(1000002)), "{err}");
    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientRejected]);
    assert_eq!(ctx.slots()?, before);
    Ok(())
}

#[test]
fn unknown_passenger_is_rejected_once() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let request = Request::new(2000000, "pass_1", CLIENT)?;

    let err = ctx.worker().serve(request).unwrap_err();
    assert!(matches!(err, Error::NotFound(2000000)), "{err}");
    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientRejected]);
    assert_eq!(ctx.notifier.sent().len(), 1);
    Ok(())
}

#[test]
fn missing_database_is_rejected_once() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    std::fs::remove_file(ctx.store.path())?;
    let request = Request::new(1000001, "pass_1", CLIENT)?;

    let err = ctx.worker().serve(request).unwrap_err();
    assert!(matches!(err, Error::StoreOpen { .. }), "{err}");
    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientRejected]);
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn failed_reservation_write_rejects_and_still_closes() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let before = ctx.slots()?;
    let slots = FailingWrites::new(&ctx.store, 1);
    let request = Request::new(1000001, "pass_1", CLIENT)?;

    ctx.worker_on(&slots).serve(request)?;
    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientRejected]);
    assert_eq!(ctx.notifier.sent().len(), 1, "no acknowledgement after a rejection");

    let puts = slots.puts();
    assert_eq!(puts.len(), 2, "reservation then close");
    assert_eq!(puts[0].0, 0);
    assert_eq!(puts[0].1.worker_pid, own_pid());
    assert_eq!(puts[1].0, 0);
    assert!(puts[1].1.is_free());
    assert_eq!(ctx.slots()?, before);
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn failed_close_after_failed_reservation_is_reported_once() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let slots = FailingWrites::new(&ctx.store, 2);
    let request = Request::new(1000002, "pass_2", CLIENT)?;

    let err = ctx.worker_on(&slots).serve(request).unwrap_err();
    assert!(matches!(err, Error::StoreWrite { index: 1, .. }), "{err}");
    assert_eq!(ctx.notifier.sent_to(CLIENT), [Event::ClientRejected]);
    assert_eq!(slots.puts().len(), 2);
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn failed_close_is_not_reported_to_the_client() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let worker = ctx.worker();
    let request = Request::new(1000003, "pass_3", CLIENT)?;

    let (index, stored) = worker.search(&request)?;
    let session = request.check_in(&stored, worker.pid().as_raw());
    worker.reserve(index, &session)?;
    std::fs::remove_file(ctx.store.path())?;

    assert!(matches!(
        worker.close(index, session),
        Err(Error::StoreOpen { .. })
    ));
    assert!(ctx.notifier.sent().is_empty());
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn unreachable_client_does_not_fail_the_session() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    ctx.notifier.make_unreachable(CLIENT);
    let request = Request::new(1000001, "pass_1", CLIENT)?;

    ctx.worker().serve(request)?;
    assert!(ctx.store.get(0)?.is_free());
    Ok(())
}

#[test]
fn ack_delay_stays_within_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for max_wait in [1, 2, 5] {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let secs = ack_delay(max_wait, &mut rng).as_secs();
            assert!((1..=max_wait as u64).contains(&secs), "{secs} outside 1..={max_wait}");
            seen.insert(secs);
        }
        assert_eq!(seen.len(), max_wait as usize, "every delay gets drawn");
    }
}
