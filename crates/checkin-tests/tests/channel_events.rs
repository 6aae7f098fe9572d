//! Request channel behaviour around signals and pending events

use std::fs::{OpenOptions, Permissions};
use std::io::{ErrorKind, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::thread;
use std::time::Duration;

use checkin_core::{Event, Request};
use checkin_ipc::client::CLIENT_EVENTS;
use checkin_ipc::dispatcher::DISPATCHER_EVENTS;
use checkin_ipc::signals::{Inbox, Waiter};
use checkin_ipc::{Error, RequestChannel};
use checkin_tests::TestCtxBuilder;
use crossbeam::channel;
use eyre::Result;
use nix::libc;
use nix::sys::pthread::{pthread_kill, pthread_self};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Uid;

extern "C" fn ignore(_: libc::c_int) {}

#[test]
#[ntest::timeout(10_000)]
fn signals_while_waiting_do_not_cost_the_request() -> Result<()> {
    // No SA_RESTART: every delivery interrupts whatever the reader blocks in.
    let action = SigAction::new(SigHandler::Handler(ignore), SaFlags::empty(), SigSet::empty());
    // SAFETY: the handler does nothing.
    unsafe { sigaction(Signal::SIGUSR1, &action) }?;

    let ctx = TestCtxBuilder::new().build()?;
    let chan = RequestChannel::create(&ctx.config.fifo)?;
    let (thread_tx, thread_rx) = channel::bounded(1);
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
        let _ = thread_tx.send(pthread_self());
        let _ = tx.send(chan.read_request());
    });
    let reader = thread_rx.recv_timeout(Duration::from_secs(5))?;

    // Opening blocks until the reader holds the channel open.
    let mut writer = OpenOptions::new().write(true).open(&ctx.config.fifo)?;
    for _ in 0..3 {
        pthread_kill(reader, Signal::SIGUSR1)?;
        thread::sleep(Duration::from_millis(50));
    }
    let request = Request::new(1000002, "pass_2", 4242)?;
    writer.write_all(request.encode().as_bytes())?;
    drop(writer);

    let received = rx.recv_timeout(Duration::from_secs(5))??;
    assert_eq!(received, request);
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn event_pending_before_the_wait_ends_it() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let chan = RequestChannel::create(&ctx.config.fifo)?;
    let mut inbox = Inbox::arm(&DISPATCHER_EVENTS)?;

    // Delivered before anybody waits for it.
    pthread_kill(pthread_self(), Signal::SIGCHLD)?;
    pthread_kill(pthread_self(), Signal::SIGCHLD)?;

    assert!(matches!(
        chan.read_request_until(inbox.as_fd()),
        Err(Error::Interrupted)
    ));
    assert_eq!(inbox.take()?, [Event::ChildExited]);
    assert!(inbox.take()?.is_empty());
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn sender_without_reader_gives_way_to_events() -> Result<()> {
    let ctx = TestCtxBuilder::new().build()?;
    let chan = RequestChannel::create(&ctx.config.fifo)?;
    let mut waiter = Waiter::arm(&CLIENT_EVENTS)?;
    let request = Request::new(1000001, "pass_1", 4242)?;

    pthread_kill(pthread_self(), Signal::SIGHUP)?;
    assert!(matches!(
        chan.send_until(&request, waiter.as_fd()),
        Err(Error::Interrupted)
    ));
    assert_eq!(waiter.try_take()?, Some(Event::ClientRejected));
    assert_eq!(waiter.try_take()?, None);
    Ok(())
}

#[test]
#[ntest::timeout(10_000)]
fn sending_without_write_permission_fails() -> Result<()> {
    if Uid::effective().is_root() {
        eprintln!("skipped: file permissions do not apply to root");
        return Ok(());
    }
    let ctx = TestCtxBuilder::new().build()?;
    let chan = RequestChannel::create(&ctx.config.fifo)?;
    std::fs::set_permissions(&ctx.config.fifo, Permissions::from_mode(0o000))?;
    let request = Request::new(1000001, "pass_1", 4242)?;

    match chan.send(&request) {
        Err(Error::ChannelIo { source, .. }) => {
            assert_eq!(source.kind(), ErrorKind::PermissionDenied)
        }
        other => panic!("expected a permission error, got {other:?}"),
    }
    Ok(())
}
