//! Ownership check over the C surface.
//!
//! Kept to a single test: the live buffer counter is process-wide.

use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use replog::ffi::*;
use replog::StatusCode;

const PEER: ReplogPeer = ReplogPeer { addr: [0x11; 32] };

/// Frames pushed through the callback, as (length, address).
type Inbox = Mutex<Vec<(u32, usize)>>;

extern "C" fn collect(ctx: *mut c_void, peer: ReplogPeer, msg: ReplogMsg) {
    assert_eq!(peer, PEER);
    let inbox = unsafe { &*(ctx as *const Inbox) };
    inbox.lock().unwrap().push((msg.length, msg.data as usize));
}

/// Where the loopback callback sends each frame, and the statuses it got.
struct Wire {
    to: AtomicU32,
    statuses: Mutex<Vec<i32>>,
}

impl Wire {
    const fn new() -> Self {
        Self {
            to: AtomicU32::new(0),
            statuses: Mutex::new(Vec::new()),
        }
    }
}

extern "C" fn loopback(ctx: *mut c_void, peer: ReplogPeer, msg: ReplogMsg) {
    let wire = unsafe { &*(ctx as *const Wire) };
    let to = ReplogHandle {
        ticket: wire.to.load(Ordering::SeqCst),
    };
    let status = unsafe { replog_handle_msg_push(to, &peer, msg) };
    wire.statuses.lock().unwrap().push(status);
}

fn empty() -> ReplogMsg {
    ReplogMsg {
        length: 0,
        data: ptr::null_mut(),
    }
}

fn create(name: &str, deliver: Option<(ReplogDeliverFn, *mut c_void)>) -> ReplogHandle {
    let name = CString::new(name).unwrap();
    let mut handle = ReplogHandle { ticket: 0 };
    let (deliver, ctx) = match deliver {
        Some((func, ctx)) => (Some(func), ctx),
        None => (None, ptr::null_mut()),
    };
    let status = unsafe { replog_create_handle(name.as_ptr(), deliver, ctx, &mut handle) };
    assert_eq!(status, 0);
    assert_ne!(handle.ticket, 0);
    handle
}

/// Copy `bytes` into a library buffer, as a transport would on receipt.
fn receive(bytes: &[u8]) -> ReplogMsg {
    let msg = replog_msg_alloc(bytes.len() as u32);
    unsafe { std::slice::from_raw_parts_mut(msg.data, bytes.len()) }.copy_from_slice(bytes);
    msg
}

fn next_pushed(inbox: &Inbox) -> ReplogMsg {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some((length, data)) = inbox.lock().unwrap().pop() {
            return ReplogMsg {
                length,
                data: data as *mut u8,
            };
        }
        assert!(Instant::now() < deadline, "no frame delivered");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn buffers_are_released_exactly_once() {
    unsafe {
        assert_eq!(replog_configure(ptr::null()), 0);
        replog_init_logging(ptr::null());

        // Poll mode: each reply is handed straight to the other side.
        let log1 = create("log1", None);
        let log2 = create("log2", None);

        let mut msg = empty();
        assert_eq!(replog_init_sync(log1, &PEER, &mut msg), 0);
        assert_eq!(replog_live_buffers(), 1);

        let mut statuses = Vec::new();
        let mut target = log2;
        while !msg.data.is_null() {
            let mut reply = empty();
            statuses.push(replog_handle_msg(target, &PEER, msg, &mut reply));
            msg = reply;
            target = if target == log1 { log2 } else { log1 };
        }
        assert_eq!(statuses, vec![0, 0, 1, 1]);
        assert_eq!(replog_live_buffers(), 0);

        // Closed session: the input is still consumed.
        let mut reply = empty();
        let late = receive(&[0, 2, 0, 0, 0, 9, 0, 0, 0, 0]);
        assert_eq!(
            replog_handle_msg(log1, &PEER, late, &mut reply),
            StatusCode::SessionClosed.code()
        );
        assert!(reply.data.is_null());

        // Garbage is consumed too.
        let garbage = receive(b"not a frame");
        assert_eq!(
            replog_handle_msg(log2, &PEER, garbage, &mut reply),
            StatusCode::MalformedFrame.code()
        );
        assert_eq!(replog_live_buffers(), 0);

        // Push mode: frames arrive through the callback and are copied
        // across as a transport would, then released by the receiver.
        static INBOX: Inbox = Mutex::new(Vec::new());
        let pusher = create(
            "pusher",
            Some((collect as ReplogDeliverFn, &INBOX as *const Inbox as *mut c_void)),
        );
        let puller = create("puller", None);

        assert_eq!(replog_init_sync_push(pusher, &PEER), 0);
        let pushed = next_pushed(&INBOX);
        let bytes = std::slice::from_raw_parts(pushed.data, pushed.length as usize).to_vec();
        replog_msg_release(pushed);

        let mut reply = empty();
        assert_eq!(replog_handle_msg(puller, &PEER, receive(&bytes), &mut reply), 0);
        assert_eq!(replog_handle_msg_push(pusher, &PEER, reply), 0);
        replog_msg_release(next_pushed(&INBOX));

        assert_eq!(replog_live_buffers(), 0);

        // Loopback: each callback feeds its frame into the other handle from
        // the delivery thread.
        static TO_RIGHT: Wire = Wire::new();
        static TO_LEFT: Wire = Wire::new();
        let left = create(
            "left",
            Some((loopback as ReplogDeliverFn, &TO_RIGHT as *const Wire as *mut c_void)),
        );
        let right = create(
            "right",
            Some((loopback as ReplogDeliverFn, &TO_LEFT as *const Wire as *mut c_void)),
        );
        TO_RIGHT.to.store(right.ticket, Ordering::SeqCst);
        TO_LEFT.to.store(left.ticket, Ordering::SeqCst);

        assert_eq!(replog_init_sync_push(left, &PEER), 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while TO_LEFT.statuses.lock().unwrap().len() < 2 {
            assert!(Instant::now() < deadline, "loopback exchange stalled");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*TO_RIGHT.statuses.lock().unwrap(), vec![0, 1]);
        assert_eq!(*TO_LEFT.statuses.lock().unwrap(), vec![0, 1]);
        assert_eq!(replog_live_buffers(), 0);

        // Blocking calls from a runtime thread are refused, not fatal.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(
            runtime.block_on(async { replog_release_handle(left) }),
            StatusCode::Internal.code()
        );

        for handle in [log1, log2, pusher, puller, left, right] {
            assert_eq!(replog_release_handle(handle), 0);
        }
        assert_eq!(
            replog_release_handle(log1),
            StatusCode::InvalidHandle.code()
        );
    }
}
