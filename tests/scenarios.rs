//! End-to-end scenarios S1-S6 from spec.md §8, run against a real Linux
//! epoll reactor (no mocked OS layer).
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fibra::fd::FdManager;
use fibra::fiber::Fiber;
use fibra::hook;
use fibra::hook::stream::{CoListener, CoStream};
use fibra::io_manager::IOManager;
use fibra::net::Address;
use fibra::scheduler::Scheduler;
use fibra::timer::TimerManager;

/// `hook::set_hook_enabled` and the `IOManager`/`TimerManager`/`FdManager`
/// singletons these scenarios exercise are process-wide; serialize the
/// tests that touch them so one test's teardown can't race another's setup.
static TEST_SERIAL: Mutex<()> = Mutex::new(());

fn enable_hooks() -> std::sync::MutexGuard<'static, ()> {
    let guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    hook::set_hook_enabled(true);
    guard
}

fn disable_hooks() {
    hook::set_hook_enabled(false);
}

/// S1 - Echo server: accept one connection, echo 13 bytes back, close.
#[test]
fn s1_echo_server_round_trips_bytes() {
    let _guard = enable_hooks();
    let scheduler = Scheduler::new("s1", 2, false);
    scheduler.start();

    let listener = CoListener::bind(&Address::new("127.0.0.1:0".parse().unwrap())).unwrap();
    let port = local_port(&listener);

    scheduler.spawn(Fiber::new("s1-accept", move || {
        let (mut stream, _peer) = listener.accept().unwrap();
        let mut buf = [0u8; 13];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    }));

    std::thread::sleep(Duration::from_millis(50));
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let payload = b"hello world\n\0";
    client.write_all(payload).unwrap();
    let mut echoed = [0u8; 13];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, payload);

    scheduler.stop();
    disable_hooks();
}

/// S2 - Sleep fan-out: 100 fibers sleep 20ms then increment a shared
/// counter; total wall-clock proves concurrency with bounded parallelism.
#[test]
fn s2_sleep_fan_out_all_fibers_complete_concurrently() {
    let _guard = enable_hooks();
    let scheduler = Scheduler::new("s2", 4, false);
    scheduler.start();
    let counter = Arc::new(Mutex::new(0u32));

    let start = Instant::now();
    for _ in 0..100 {
        let counter = counter.clone();
        scheduler.spawn(Fiber::new("sleeper", move || {
            hook::sleep(Duration::from_millis(20));
            *counter.lock().unwrap() += 1;
        }));
    }

    let deadline = Instant::now() + Duration::from_millis(500);
    while *counter.lock().unwrap() < 100 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let elapsed = start.elapsed();

    assert_eq!(*counter.lock().unwrap(), 100);
    assert!(elapsed >= Duration::from_millis(20));
    assert!(elapsed <= Duration::from_millis(200));

    scheduler.stop();
    disable_hooks();
}

/// S3 - Receive timeout: a 50ms recv_timeout fires ETIMEDOUT when the peer
/// never writes.
#[test]
fn s3_receive_timeout_fires_etimedout() {
    let _guard = enable_hooks();
    let scheduler = Scheduler::new("s3", 1, false);
    scheduler.start();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let _silent_peer = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        drop(stream);
    });

    let result: Arc<Mutex<Option<std::io::Result<usize>>>> = Arc::new(Mutex::new(None));
    let result2 = result.clone();
    scheduler.spawn(Fiber::new("s3-client", move || {
        let fd = hook::socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        let addr = Address::new(format!("127.0.0.1:{}", port).parse().unwrap());
        let (storage, len) = addr.to_sockaddr();
        hook::connect(fd, &storage as *const _ as *const libc::sockaddr, len, Some(Duration::from_millis(100))).unwrap();
        FdManager::get_or_create(fd).set_recv_timeout(Some(Duration::from_millis(50)));
        let mut buf = [0u8; 1];
        let start = Instant::now();
        let r = hook::read(fd, &mut buf);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40) && elapsed <= Duration::from_millis(150));
        *result2.lock().unwrap() = Some(r);
        let _ = hook::close(fd);
    }));

    std::thread::sleep(Duration::from_millis(400));
    scheduler.stop();

    let outcome = result.lock().unwrap().take().expect("fiber did not complete");
    let err = outcome.unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ETIMEDOUT));
    disable_hooks();
}

/// S4 - Cancel-during-pending-read: a pending hooked read resolves with
/// ECANCELED as soon as `cancel_all` runs.
#[test]
fn s4_cancel_during_pending_read_resolves_promptly() {
    let _guard = enable_hooks();
    let scheduler = Scheduler::new("s4", 1, false);
    scheduler.start();

    let mut fds = [0; 2];
    assert_eq!(
        unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
        0
    );
    let (a, b) = (fds[0], fds[1]);
    unsafe {
        let flags = libc::fcntl(a, libc::F_GETFL);
        libc::fcntl(a, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    FdManager::get_or_create(a);

    let result: Arc<Mutex<Option<std::io::Result<usize>>>> = Arc::new(Mutex::new(None));
    let result2 = result.clone();
    let started = Arc::new(Mutex::new(false));
    let started2 = started.clone();
    scheduler.spawn(Fiber::new("s4-reader", move || {
        *started2.lock().unwrap() = true;
        let mut buf = [0u8; 1];
        let r = hook::read(a, &mut buf);
        *result2.lock().unwrap() = Some(r);
    }));

    while !*started.lock().unwrap() {
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(20));
    IOManager::global().cancel_all(a);
    std::thread::sleep(Duration::from_millis(50));
    scheduler.stop();

    let outcome = result.lock().unwrap().take().expect("fiber did not complete");
    let err = outcome.unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ECANCELED));

    unsafe {
        libc::close(a);
        libc::close(b);
    }
    disable_hooks();
}

/// S5 - Timer cancel: cancelling before expiry prevents the callback from
/// ever running and leaves the timer set empty.
#[test]
fn s5_timer_cancel_prevents_callback() {
    let mgr = TimerManager::new();
    let fired = Arc::new(AtomicU32::new(0));
    let f = fired.clone();
    let id = mgr.add_timer(Duration::from_millis(1000), move || {
        f.fetch_add(1, Ordering::SeqCst);
    });
    std::thread::sleep(Duration::from_millis(500));
    assert!(mgr.cancel(id));
    std::thread::sleep(Duration::from_millis(700));
    mgr.collect_expired();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(mgr.is_empty());
}

/// S6 - Connect timeout: a 100ms hooked connect to an unreachable address
/// times out within 100 +/- 20ms.
#[test]
fn s6_connect_timeout_fires_etimedout() {
    let _guard = enable_hooks();
    let scheduler = Scheduler::new("s6", 1, false);
    scheduler.start();

    let result: Arc<Mutex<Option<fibra::error::Result<()>>>> = Arc::new(Mutex::new(None));
    let result2 = result.clone();
    scheduler.spawn(Fiber::new("s6-connect", move || {
        let fd = hook::socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        // 192.0.2.1 is reserved (TEST-NET-1); nothing listens there, and
        // the destination route never sends a RST, so the connect stays
        // pending until the timeout fires instead of failing immediately.
        let addr = Address::new("192.0.2.1:81".parse().unwrap());
        let (storage, len) = addr.to_sockaddr();
        let start = Instant::now();
        let r = hook::connect(fd, &storage as *const _ as *const libc::sockaddr, len, Some(Duration::from_millis(100)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80) && elapsed <= Duration::from_millis(300));
        *result2.lock().unwrap() = Some(r);
        let _ = hook::close(fd);
    }));

    std::thread::sleep(Duration::from_millis(400));
    scheduler.stop();

    let outcome = result.lock().unwrap().take().expect("fiber did not complete");
    assert!(outcome.unwrap_err().is_timed_out());
    disable_hooks();
}

fn local_port(listener: &CoListener) -> u16 {
    use std::os::unix::io::AsRawFd;
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(
            listener.as_raw_fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };
    assert_eq!(rc, 0);
    Address::from_sockaddr_storage(&storage).unwrap().to_std().unwrap().port()
}
