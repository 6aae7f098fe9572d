use std::thread;
use std::time::{Duration, Instant};

use checkin_core::Event;
use checkin_ipc::dispatcher::{broadcast_terminate, reap_workers};
use checkin_ipc::Error;
use checkin_tests::TestCtxBuilder;
use eyre::Result;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult, Pid};

#[test]
fn shutdown_targets_only_active_workers() -> Result<()> {
    let ctx = TestCtxBuilder::new().with_worker(3, 2003).build()?;

    let notified = broadcast_terminate(&ctx.store, &ctx.notifier)?;
    assert_eq!(notified, [Pid::from_raw(2003)]);
    assert_eq!(
        ctx.notifier.sent(),
        [(Pid::from_raw(2003), Event::WorkerTerminate)]
    );
    Ok(())
}

#[test]
fn shutdown_visits_slots_in_order_and_skips_unreachable() -> Result<()> {
    let ctx = TestCtxBuilder::new()
        .with_passengers(6)
        .with_worker(4, 3004)
        .with_worker(0, 3000)
        .with_worker(2, 3002)
        .build()?;
    ctx.notifier.make_unreachable(3002);

    let notified = broadcast_terminate(&ctx.store, &ctx.notifier)?;
    assert_eq!(notified, [Pid::from_raw(3000), Pid::from_raw(3004)]);
    Ok(())
}

#[test]
fn shutdown_does_not_touch_the_database() -> Result<()> {
    let ctx = TestCtxBuilder::new().with_worker(1, 2001).build()?;
    let before = ctx.slots()?;

    broadcast_terminate(&ctx.store, &ctx.notifier)?;
    assert_eq!(ctx.slots()?, before);
    Ok(())
}

#[test]
fn shutdown_scan_fails_without_database() -> Result<()> {
    let ctx = TestCtxBuilder::new().with_worker(0, 2000).build()?;
    std::fs::remove_file(ctx.store.path())?;

    let err = broadcast_terminate(&ctx.store, &ctx.notifier).unwrap_err();
    assert!(matches!(err, Error::StoreOpen { .. }), "{err}");
    assert!(ctx.notifier.sent().is_empty());
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn finished_workers_are_reaped_with_their_status() -> Result<()> {
    // SAFETY: the child only calls the async-signal-safe `_exit`.
    let child = match unsafe { fork() }? {
        ForkResult::Child => unsafe { nix::libc::_exit(3) },
        ForkResult::Parent { child } => child,
    };

    let mut reaped = Vec::new();
    let started = Instant::now();
    while !reaped.contains(&WaitStatus::Exited(child, 3)) {
        assert!(started.elapsed() < Duration::from_secs(5), "{reaped:?}");
        reaped.extend(reap_workers());
        thread::sleep(Duration::from_millis(10));
    }

    // Nothing is left to collect and the call does not block.
    assert!(reap_workers().is_empty());
    Ok(())
}
