//! C-compatible surface.
//!
//! Buffer ownership: every `ReplogMsg` with a non-null `data` pointer was
//! allocated by this library and must be released exactly once with
//! [`replog_msg_release`]. Bytes arriving from a transport are copied into a
//! buffer from [`replog_msg_alloc`] before being handed to
//! [`replog_handle_msg`], which always consumes its input.
//!
//! Status codes are the values of [`StatusCode`]: `0` means a frame was
//! produced and must be delivered, `1` means the session converged (a final
//! frame may still be present), negative values are errors.
//!
//! Delivery callbacks run on a library thread that is not part of the async
//! runtime, so they may call back into any function here. Calls made from a
//! runtime worker thread return `Internal`.

use std::ffi::{c_char, c_void, CStr};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::runtime::Runtime;

use replog_core::PeerId;
use replog_sync::Verdict;

use crate::bridge::{Bridge, Delivery, WireMsg};
use crate::config::{RegistryConfig, StorageBackend};
use crate::error::{ReplogError, StatusCode};
use crate::registry::LogHandle;

/// Handle ticket as seen by C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplogHandle {
    pub ticket: u32,
}

/// Fixed-width peer address.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplogPeer {
    pub addr: [u8; 32],
}

/// One frame: `length` bytes at `data`.
#[repr(C)]
#[derive(Debug)]
pub struct ReplogMsg {
    pub length: u32,
    pub data: *mut u8,
}

impl ReplogMsg {
    const EMPTY: Self = Self {
        length: 0,
        data: std::ptr::null_mut(),
    };
}

/// Outgoing-message callback. The callee owns `msg` and must release it.
pub type ReplogDeliverFn = extern "C" fn(ctx: *mut c_void, peer: ReplogPeer, msg: ReplogMsg);

static LIVE_BUFFERS: AtomicUsize = AtomicUsize::new(0);
static CONFIG: OnceLock<RegistryConfig> = OnceLock::new();
static CONTEXT: OnceLock<Option<Context>> = OnceLock::new();

struct Context {
    runtime: Runtime,
    bridge: Bridge,
}

fn context() -> Result<&'static Context, StatusCode> {
    CONTEXT
        .get_or_init(|| {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .ok()?;
            let config = CONFIG.get().cloned().unwrap_or_default();
            Some(Context {
                runtime,
                bridge: Bridge::new(config),
            })
        })
        .as_ref()
        .ok_or(StatusCode::Internal)
}

/// Drive one bridge call to completion on the library runtime.
fn run<T, F, Fut>(call: F) -> Result<T, StatusCode>
where
    F: FnOnce(&'static Bridge) -> Fut,
    Fut: Future<Output = Result<T, ReplogError>>,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        tracing::warn!("Foreign call refused: caller is on an async runtime thread");
        return Err(StatusCode::Internal);
    }
    let cx = context()?;
    cx.runtime.block_on(call(&cx.bridge)).map_err(|e| {
        tracing::debug!("Foreign call failed: {}", e);
        e.status()
    })
}

fn status_of(result: Result<StatusCode, StatusCode>) -> i32 {
    match result {
        Ok(status) | Err(status) => status.code(),
    }
}

fn verdict_status(verdict: Verdict) -> StatusCode {
    match verdict {
        Verdict::Continue => StatusCode::Continue,
        Verdict::Converged => StatusCode::Converged,
        Verdict::Diverged { .. } => StatusCode::Diverged,
    }
}

fn msg_from_wire(msg: WireMsg) -> ReplogMsg {
    let bytes = msg.into_bytes();
    let length = bytes.len() as u32;
    let data = Box::into_raw(bytes) as *mut u8;
    LIVE_BUFFERS.fetch_add(1, Ordering::SeqCst);
    ReplogMsg { length, data }
}

/// # Safety
/// `msg` must be null or a buffer produced by this library and not yet released.
unsafe fn msg_into_wire(msg: ReplogMsg) -> Option<WireMsg> {
    if msg.data.is_null() {
        return None;
    }
    let slice = std::ptr::slice_from_raw_parts_mut(msg.data, msg.length as usize);
    LIVE_BUFFERS.fetch_sub(1, Ordering::SeqCst);
    Some(WireMsg::from(Box::from_raw(slice)))
}

/// # Safety
/// `out` must be null or valid for writes.
unsafe fn write_out(out: *mut ReplogMsg, msg: Option<WireMsg>) {
    match (out.is_null(), msg) {
        (false, Some(msg)) => *out = msg_from_wire(msg),
        (false, None) => *out = ReplogMsg::EMPTY,
        (true, _) => {}
    }
}

/// Forwards pushed frames to a C callback.
struct CallbackTarget {
    func: ReplogDeliverFn,
    ctx: usize,
}

impl Delivery for CallbackTarget {
    fn deliver(&self, peer: PeerId, msg: WireMsg) {
        let peer = ReplogPeer {
            addr: *peer.as_bytes(),
        };
        (self.func)(self.ctx as *mut c_void, peer, msg_from_wire(msg));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

/// Choose where logs are stored. Must be called before any other call.
///
/// A null `root` keeps logs in memory.
///
/// # Safety
/// `root` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn replog_configure(root: *const c_char) -> i32 {
    let backend = if root.is_null() {
        StorageBackend::Memory
    } else {
        match CStr::from_ptr(root).to_str() {
            Ok(root) => StorageBackend::sqlite(root),
            Err(_) => return StatusCode::InvalidArgument.code(),
        }
    };

    let config = RegistryConfig {
        backend,
        ..Default::default()
    };
    if CONTEXT.get().is_some() || CONFIG.set(config).is_err() {
        return StatusCode::InvalidArgument.code();
    }
    StatusCode::Continue.code()
}

/// Install a log subscriber. Returns 1 if one was installed, 0 otherwise.
///
/// # Safety
/// `filter` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn replog_init_logging(filter: *const c_char) -> i32 {
    let filter = if filter.is_null() {
        "info"
    } else {
        CStr::from_ptr(filter).to_str().unwrap_or("info")
    };
    i32::from(crate::logging::init(filter))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Bind a handle to the log `name`.
///
/// `deliver` may be null; push-mode calls then fail. `ctx` is passed back
/// to `deliver` unchanged, possibly from another thread.
///
/// # Safety
/// `name` must be a valid NUL-terminated string; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn replog_create_handle(
    name: *const c_char,
    deliver: Option<ReplogDeliverFn>,
    ctx: *mut c_void,
    out: *mut ReplogHandle,
) -> i32 {
    if name.is_null() || out.is_null() {
        return StatusCode::InvalidArgument.code();
    }
    let Ok(name) = CStr::from_ptr(name).to_str() else {
        return StatusCode::InvalidArgument.code();
    };
    let target = deliver.map(|func| {
        Arc::new(CallbackTarget {
            func,
            ctx: ctx as usize,
        }) as Arc<dyn Delivery>
    });

    let result = run(|bridge| bridge.create_handle(name, target));
    status_of(result.map(|handle| {
        *out = ReplogHandle {
            ticket: handle.ticket(),
        };
        StatusCode::Continue
    }))
}

/// Release a handle, aborting its sessions.
#[no_mangle]
pub extern "C" fn replog_release_handle(handle: ReplogHandle) -> i32 {
    let result = run(|bridge| bridge.release_handle(LogHandle::from_raw(handle.ticket)));
    status_of(result.map(|()| StatusCode::Continue))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync
// ─────────────────────────────────────────────────────────────────────────────

/// Open a session with `peer`; the first frame is written to `out`.
///
/// # Safety
/// `peer` must point to a valid `ReplogPeer`; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn replog_init_sync(
    handle: ReplogHandle,
    peer: *const ReplogPeer,
    out: *mut ReplogMsg,
) -> i32 {
    write_out(out, None);
    if peer.is_null() || out.is_null() {
        return StatusCode::InvalidArgument.code();
    }
    let peer = PeerId::from_bytes((*peer).addr);

    let result = run(|bridge| bridge.init_sync(LogHandle::from_raw(handle.ticket), peer));
    status_of(result.map(|msg| {
        write_out(out, Some(msg));
        StatusCode::Continue
    }))
}

/// Consume `msg` from `peer` and write any reply to `out`.
///
/// `msg` is released by this call whatever the outcome. The reply is
/// written even when the status is `Converged` or `Diverged`.
///
/// # Safety
/// `msg` must be a buffer from this library not yet released; `peer` must
/// point to a valid `ReplogPeer`; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn replog_handle_msg(
    handle: ReplogHandle,
    peer: *const ReplogPeer,
    msg: ReplogMsg,
    out: *mut ReplogMsg,
) -> i32 {
    let inbound = msg_into_wire(msg);
    write_out(out, None);
    if peer.is_null() || out.is_null() {
        return StatusCode::InvalidArgument.code();
    }
    let Some(inbound) = inbound else {
        return StatusCode::MalformedFrame.code();
    };
    let peer = PeerId::from_bytes((*peer).addr);

    let result = run(|bridge| bridge.handle_msg(LogHandle::from_raw(handle.ticket), peer, inbound));
    status_of(result.map(|reply| {
        write_out(out, reply.msg);
        verdict_status(reply.verdict)
    }))
}

/// Open a session; the first frame goes to the handle's callback.
///
/// # Safety
/// `peer` must point to a valid `ReplogPeer`.
#[no_mangle]
pub unsafe extern "C" fn replog_init_sync_push(
    handle: ReplogHandle,
    peer: *const ReplogPeer,
) -> i32 {
    if peer.is_null() {
        return StatusCode::InvalidArgument.code();
    }
    let peer = PeerId::from_bytes((*peer).addr);

    let result = run(|bridge| bridge.init_sync_push(LogHandle::from_raw(handle.ticket), peer));
    status_of(result.map(|()| StatusCode::Continue))
}

/// Consume `msg`; any reply goes to the handle's callback.
///
/// # Safety
/// Same contract as [`replog_handle_msg`].
#[no_mangle]
pub unsafe extern "C" fn replog_handle_msg_push(
    handle: ReplogHandle,
    peer: *const ReplogPeer,
    msg: ReplogMsg,
) -> i32 {
    let inbound = msg_into_wire(msg);
    if peer.is_null() {
        return StatusCode::InvalidArgument.code();
    }
    let Some(inbound) = inbound else {
        return StatusCode::MalformedFrame.code();
    };
    let peer = PeerId::from_bytes((*peer).addr);

    let result = run(|bridge| {
        bridge.handle_msg_push(LogHandle::from_raw(handle.ticket), peer, inbound)
    });
    status_of(result.map(verdict_status))
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffers
// ─────────────────────────────────────────────────────────────────────────────

/// Allocate a zeroed buffer of `length` bytes for inbound data.
#[no_mangle]
pub extern "C" fn replog_msg_alloc(length: u32) -> ReplogMsg {
    msg_from_wire(WireMsg::from(vec![0u8; length as usize]))
}

/// Release a buffer produced by this library. Null buffers are ignored.
///
/// # Safety
/// `msg` must not have been released before.
#[no_mangle]
pub unsafe extern "C" fn replog_msg_release(msg: ReplogMsg) {
    drop(msg_into_wire(msg));
}

/// Number of buffers handed out and not yet released.
#[no_mangle]
pub extern "C" fn replog_live_buffers() -> usize {
    LIVE_BUFFERS.load(Ordering::SeqCst)
}
