//! Boundary bridge between foreign callers and the registry.
//!
//! Frames cross the boundary as [`WireMsg`] values: one owned buffer holding
//! exactly one encoded frame. The bridge consumes every inbound message it is
//! handed and produces outbound ones either as return values (poll mode) or
//! through the handle's [`Delivery`] target (push mode). Pushed frames go
//! through a channel drained by a dedicated dispatcher thread outside the
//! runtime, so session logic never waits on the transport and a target may
//! call back into the blocking entry points.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use replog_core::PeerId;
use replog_sync::{codec, Frame, Verdict};

use crate::config::RegistryConfig;
use crate::error::{ReplogError, Result};
use crate::registry::{LogHandle, SyncRegistry};

/// One encoded frame, owned by whoever holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMsg(Box<[u8]>);

impl WireMsg {
    pub fn encode(frame: &Frame) -> Result<Self> {
        Ok(Self(codec::encode(frame)?.into_boxed_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Box<[u8]> {
        self.0
    }
}

impl From<Vec<u8>> for WireMsg {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl From<Box<[u8]>> for WireMsg {
    fn from(bytes: Box<[u8]>) -> Self {
        Self(bytes)
    }
}

/// Destination for frames produced in push mode.
///
/// Delivery is fire-and-forget; the target takes ownership of the message.
pub trait Delivery: Send + Sync + 'static {
    fn deliver(&self, peer: PeerId, msg: WireMsg);
}

impl<F> Delivery for F
where
    F: Fn(PeerId, WireMsg) + Send + Sync + 'static,
{
    fn deliver(&self, peer: PeerId, msg: WireMsg) {
        self(peer, msg)
    }
}

/// Outcome of a poll-mode `handle_msg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Frame to send back, if any.
    pub msg: Option<WireMsg>,
    pub verdict: Verdict,
}

struct Outbound {
    handle: LogHandle,
    peer: PeerId,
    msg: WireMsg,
}

type Targets = Arc<RwLock<HashMap<LogHandle, Arc<dyn Delivery>>>>;

/// Entry point for hosts.
///
/// The dispatcher thread lives as long as the bridge. Delivery targets run
/// on that thread, one frame at a time.
pub struct Bridge {
    registry: Arc<SyncRegistry>,
    targets: Targets,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl Bridge {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_registry(Arc::new(SyncRegistry::new(config)))
    }

    pub fn with_registry(registry: Arc<SyncRegistry>) -> Self {
        let targets: Targets = Arc::new(RwLock::new(HashMap::new()));
        let (outbox, rx) = mpsc::unbounded_channel();
        let dispatch_targets = targets.clone();
        std::thread::spawn(move || dispatch(rx, dispatch_targets));

        Self {
            registry,
            targets,
            outbox,
        }
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// Bind `name` and register an optional push-mode delivery target.
    pub async fn create_handle(
        &self,
        name: &str,
        delivery: Option<Arc<dyn Delivery>>,
    ) -> Result<LogHandle> {
        let handle = self.registry.bind(name).await?;
        if let Some(target) = delivery {
            self.targets.write().await.insert(handle, target);
        }
        Ok(handle)
    }

    /// Release `handle` and drop its delivery target.
    ///
    /// Frames already queued for the handle are discarded by the dispatcher.
    pub async fn release_handle(&self, handle: LogHandle) -> Result<()> {
        self.targets.write().await.remove(&handle);
        self.registry.release(handle).await
    }

    /// Open a session with `peer` and return the first message.
    pub async fn init_sync(&self, handle: LogHandle, peer: PeerId) -> Result<WireMsg> {
        let frame = self.registry.begin_session(handle, peer).await?;
        let msg = WireMsg::encode(&frame)?;
        trace_out(handle, peer, &frame, &msg);
        Ok(msg)
    }

    /// Consume `msg` from `peer` and return the reply, if any.
    pub async fn handle_msg(&self, handle: LogHandle, peer: PeerId, msg: WireMsg) -> Result<Reply> {
        let advance = self
            .registry
            .advance_bytes(handle, peer, msg.as_bytes())
            .await?;
        drop(msg);

        let msg = match (advance.frame, advance.encoded) {
            (Some(frame), Some(bytes)) => {
                let out = WireMsg::from(bytes);
                trace_out(handle, peer, &frame, &out);
                Some(out)
            }
            _ => None,
        };
        Ok(Reply {
            msg,
            verdict: advance.verdict,
        })
    }

    /// Like [`Bridge::init_sync`], but the first message goes to the
    /// handle's delivery target.
    pub async fn init_sync_push(&self, handle: LogHandle, peer: PeerId) -> Result<()> {
        self.require_target(handle).await?;
        let msg = self.init_sync(handle, peer).await?;
        self.enqueue(handle, peer, msg)
    }

    /// Like [`Bridge::handle_msg`], but any reply goes to the handle's
    /// delivery target. Returns the verdict.
    pub async fn handle_msg_push(
        &self,
        handle: LogHandle,
        peer: PeerId,
        msg: WireMsg,
    ) -> Result<Verdict> {
        self.require_target(handle).await?;
        let reply = self.handle_msg(handle, peer, msg).await?;
        if let Some(out) = reply.msg {
            self.enqueue(handle, peer, out)?;
        }
        Ok(reply.verdict)
    }

    async fn require_target(&self, handle: LogHandle) -> Result<()> {
        if self.targets.read().await.contains_key(&handle) {
            Ok(())
        } else {
            Err(ReplogError::NoDeliveryTarget(handle))
        }
    }

    fn enqueue(&self, handle: LogHandle, peer: PeerId, msg: WireMsg) -> Result<()> {
        self.outbox
            .send(Outbound { handle, peer, msg })
            .map_err(|_| ReplogError::Runtime("delivery dispatcher stopped".into()))
    }
}

fn trace_out(handle: LogHandle, peer: PeerId, frame: &Frame, msg: &WireMsg) {
    tracing::debug!(
        "Handle {} -> peer {}: {:?} round {} ({} bytes)",
        handle,
        peer,
        frame.tag(),
        frame.round,
        msg.len()
    );
}

fn dispatch(mut rx: mpsc::UnboundedReceiver<Outbound>, targets: Targets) {
    while let Some(out) = rx.blocking_recv() {
        let target = targets.blocking_read().get(&out.handle).cloned();
        match target {
            Some(target) => target.deliver(out.peer, out.msg),
            None => tracing::warn!(
                "Dropping {} byte frame for peer {}: handle {} has no delivery target",
                out.msg.len(),
                out.peer,
                out.handle
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_sync::SyncError;

    fn peer() -> PeerId {
        PeerId::from_bytes([3; 32])
    }

    #[tokio::test]
    async fn test_poll_mode_converges() {
        let bridge = Bridge::new(RegistryConfig::in_memory());
        let a = bridge.create_handle("a", None).await.unwrap();
        let b = bridge.create_handle("b", None).await.unwrap();

        let mut msg = bridge.init_sync(a, peer()).await.unwrap();
        let mut target = b;
        let mut rounds = 0;
        loop {
            let reply = bridge.handle_msg(target, peer(), msg).await.unwrap();
            rounds += 1;
            match reply.msg {
                Some(next) => msg = next,
                None => {
                    assert_eq!(reply.verdict, Verdict::Converged);
                    break;
                }
            }
            target = if target == a { b } else { a };
        }
        assert_eq!(rounds, 4);
    }

    #[tokio::test]
    async fn test_push_requires_target() {
        let bridge = Bridge::new(RegistryConfig::in_memory());
        let a = bridge.create_handle("a", None).await.unwrap();

        assert!(matches!(
            bridge.init_sync_push(a, peer()).await,
            Err(ReplogError::NoDeliveryTarget(_))
        ));
        // The failed push must not leave a session behind
        bridge.init_sync(a, peer()).await.unwrap();
    }

    #[tokio::test]
    async fn test_push_mode_delivers_through_target() {
        let bridge = Bridge::new(RegistryConfig::in_memory());
        let (tx, mut rx) = mpsc::unbounded_channel::<(PeerId, WireMsg)>();
        let target: Arc<dyn Delivery> = Arc::new(move |peer: PeerId, msg: WireMsg| {
            let _ = tx.send((peer, msg));
        });

        let a = bridge.create_handle("a", Some(target)).await.unwrap();
        let b = bridge.create_handle("b", None).await.unwrap();

        bridge.init_sync_push(a, peer()).await.unwrap();
        let (to, opening) = rx.recv().await.unwrap();
        assert_eq!(to, peer());

        let reply = bridge.handle_msg(b, peer(), opening).await.unwrap();
        let verdict = bridge
            .handle_msg_push(a, peer(), reply.msg.unwrap())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Continue);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_target_may_block_on_bridge() {
        let runtime = tokio::runtime::Handle::current();
        let bridge = Arc::new(Bridge::new(RegistryConfig::in_memory()));
        let (tx, mut rx) = mpsc::unbounded_channel::<Verdict>();

        // Each pushed frame is fed into the other handle by blocking on the
        // runtime from the delivery thread.
        let to: Arc<std::sync::Mutex<Option<LogHandle>>> = Arc::default();
        let loopback: Arc<dyn Delivery> = Arc::new({
            let bridge = Arc::downgrade(&bridge);
            let to = to.clone();
            move |peer: PeerId, msg: WireMsg| {
                let (Some(bridge), Some(to)) = (bridge.upgrade(), *to.lock().unwrap()) else {
                    return;
                };
                let reply = runtime.block_on(bridge.handle_msg(to, peer, msg)).unwrap();
                let _ = tx.send(reply.verdict);
            }
        });

        let a = bridge.create_handle("a", Some(loopback)).await.unwrap();
        let b = bridge.create_handle("b", None).await.unwrap();
        *to.lock().unwrap() = Some(b);

        bridge.init_sync_push(a, peer()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Verdict::Continue));
    }

    #[tokio::test]
    async fn test_garbage_message_rejected() {
        let bridge = Bridge::new(RegistryConfig::in_memory());
        let a = bridge.create_handle("a", None).await.unwrap();

        let err = bridge
            .handle_msg(a, peer(), WireMsg::from(vec![0xff; 4]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplogError::Sync(SyncError::MalformedFrame(_))));
    }
}
