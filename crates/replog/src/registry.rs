//! The sync handle registry.
//!
//! Maps opaque handle tickets to a bound log and the sessions running
//! against it, one per peer. Every operation on a handle takes that handle's
//! session lock, so calls on one handle are serialized while different
//! handles proceed in parallel.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};

use replog_core::{Keypair, LogHead, PeerId};
use replog_store::{LogStore, LogStoreExt, MemoryStore, SqliteStore};
use replog_sync::{codec, Advance, Frame, SessionState, SyncError, SyncSession};

use crate::config::{RegistryConfig, StorageBackend};
use crate::error::{ReplogError, Result};

/// Opaque ticket naming one bound log.
///
/// Tickets are random, non-zero, and unique among open handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogHandle(u32);

impl LogHandle {
    pub const fn from_raw(ticket: u32) -> Self {
        Self(ticket)
    }

    pub const fn ticket(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Default)]
struct SessionTable {
    active: HashMap<PeerId, SyncSession>,
    /// Final state of each peer's last session; late frames get `SessionClosed`.
    closed: HashMap<PeerId, SessionState>,
}

struct HandleSlot {
    name: String,
    store: Arc<dyn LogStore>,
    sessions: Mutex<SessionTable>,
}

/// Owner of all handles and their sessions.
pub struct SyncRegistry {
    config: RegistryConfig,
    handles: RwLock<HashMap<LogHandle, Arc<HandleSlot>>>,
    /// Named logs of the memory backend, shared across re-binds.
    memory_logs: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl SyncRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            handles: RwLock::new(HashMap::new()),
            memory_logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handles
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind a handle to the log called `name`, opening or creating it.
    ///
    /// Names are single file names; the SQLite backend stores each log at
    /// `root/name`.
    pub async fn bind(&self, name: &str) -> Result<LogHandle> {
        if !is_valid_name(name) {
            return Err(ReplogError::InvalidName(name.to_string()));
        }

        let store: Arc<dyn LogStore> = match &self.config.backend {
            StorageBackend::Memory => {
                let mut logs = self.memory_logs.lock().await;
                logs.entry(name.to_string())
                    .or_insert_with(|| Arc::new(MemoryStore::named(name)))
                    .clone()
            }
            StorageBackend::Sqlite { root } => {
                let path = root.join(name);
                let store = tokio::task::spawn_blocking(move || SqliteStore::open(path))
                    .await
                    .map_err(|e| ReplogError::Runtime(e.to_string()))??;
                Arc::new(store)
            }
        };

        self.bind_store(name, store).await
    }

    /// Bind a handle to an already opened store.
    pub async fn bind_store(&self, name: &str, store: Arc<dyn LogStore>) -> Result<LogHandle> {
        let mut handles = self.handles.write().await;

        let handle = loop {
            let ticket = rand::random::<u32>();
            let handle = LogHandle(ticket);
            if ticket != 0 && !handles.contains_key(&handle) {
                break handle;
            }
        };

        handles.insert(
            handle,
            Arc::new(HandleSlot {
                name: name.to_string(),
                store,
                sessions: Mutex::new(SessionTable::default()),
            }),
        );

        tracing::info!("Bound log {} to handle {}", name, handle);
        Ok(handle)
    }

    /// Invalidate `handle`, aborting any sessions still running under it.
    pub async fn release(&self, handle: LogHandle) -> Result<()> {
        let slot = self
            .handles
            .write()
            .await
            .remove(&handle)
            .ok_or(ReplogError::InvalidHandle(handle))?;

        let mut table = slot.sessions.lock().await;
        let aborted = table.active.len();
        for session in table.active.values_mut() {
            session.abort();
        }
        table.active.clear();
        table.closed.clear();

        tracing::info!(
            "Released handle {} ({}), aborted {} sessions",
            handle,
            slot.name,
            aborted
        );
        Ok(())
    }

    /// Number of open handles.
    pub async fn handle_count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Name of the log bound to `handle`.
    pub async fn log_name(&self, handle: LogHandle) -> Result<String> {
        Ok(self.slot(handle).await?.name.clone())
    }

    async fn slot(&self, handle: LogHandle) -> Result<Arc<HandleSlot>> {
        self.handles
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or(ReplogError::InvalidHandle(handle))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session with `peer` and return its first frame.
    pub async fn begin_session(&self, handle: LogHandle, peer: PeerId) -> Result<Frame> {
        let slot = self.slot(handle).await?;
        let mut table = slot.sessions.lock().await;

        if table.active.contains_key(&peer) {
            return Err(SyncError::AlreadySyncing.into());
        }
        table.closed.remove(&peer);

        let (session, frame) =
            SyncSession::open(peer, slot.store.as_ref(), self.config.sync.clone()).await?;
        table.active.insert(peer, session);

        tracing::debug!(
            "Handle {} began session with peer {} (round {})",
            handle,
            peer,
            frame.round
        );
        Ok(frame)
    }

    /// Feed an inbound frame from `peer` to the matching session.
    ///
    /// A round-0 Summary from a peer with no active session opens a
    /// responder session. Terminal sessions are moved out of the active set.
    pub async fn advance(&self, handle: LogHandle, peer: PeerId, frame: &Frame) -> Result<Advance> {
        let slot = self.slot(handle).await?;
        let mut table = slot.sessions.lock().await;

        if let Some(mut session) = table.active.remove(&peer) {
            let result = session.handle(slot.store.as_ref(), frame).await;
            if session.is_terminal() {
                table.closed.insert(peer, session.state());
            } else {
                table.active.insert(peer, session);
            }
            return Ok(result?);
        }

        if frame.is_opening() {
            table.closed.remove(&peer);
            return match SyncSession::accept(peer, slot.store.as_ref(), frame, self.config.sync.clone())
                .await
            {
                Ok((session, advance)) => {
                    tracing::debug!("Handle {} accepted session from peer {}", handle, peer);
                    if session.is_terminal() {
                        table.closed.insert(peer, session.state());
                    } else {
                        table.active.insert(peer, session);
                    }
                    Ok(advance)
                }
                Err(e) => {
                    table.closed.insert(peer, SessionState::Aborted);
                    Err(e.into())
                }
            };
        }

        if table.closed.contains_key(&peer) {
            Err(SyncError::SessionClosed.into())
        } else {
            Err(SyncError::NoSuchSession.into())
        }
    }

    /// Decode `bytes` and advance. A malformed frame aborts the active session.
    pub async fn advance_bytes(
        &self,
        handle: LogHandle,
        peer: PeerId,
        bytes: &[u8],
    ) -> Result<Advance> {
        match codec::decode_bounded(bytes, self.config.sync.effective_frame_bytes()) {
            Ok(frame) => self.advance(handle, peer, &frame).await,
            Err(e) => {
                tracing::warn!(
                    "Malformed frame from peer {} on handle {}: {}",
                    peer,
                    handle,
                    e
                );
                self.abort_session(handle, peer).await?;
                Err(e.into())
            }
        }
    }

    /// Abort the active session with `peer`, if any.
    ///
    /// Returns whether a session was aborted.
    pub async fn abort_session(&self, handle: LogHandle, peer: PeerId) -> Result<bool> {
        let slot = self.slot(handle).await?;
        let mut table = slot.sessions.lock().await;

        match table.active.remove(&peer) {
            Some(mut session) => {
                session.abort();
                table.closed.insert(peer, session.state());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// State of the latest session with `peer`.
    ///
    /// `None` if no session was ever opened or the pair was reset.
    pub async fn session_state(
        &self,
        handle: LogHandle,
        peer: PeerId,
    ) -> Result<Option<SessionState>> {
        let slot = self.slot(handle).await?;
        let table = slot.sessions.lock().await;

        Ok(table
            .active
            .get(&peer)
            .map(|session| session.state())
            .or_else(|| table.closed.get(&peer).copied()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local log access
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign `payload` with `keypair` and append it to the bound log.
    pub async fn append(
        &self,
        handle: LogHandle,
        keypair: &Keypair,
        payload: impl Into<Bytes>,
    ) -> Result<LogHead> {
        let slot = self.slot(handle).await?;
        let _sessions = slot.sessions.lock().await;

        let head = slot
            .store
            .append_local(keypair, payload.into(), now_millis())
            .await?;
        tracing::debug!("Appended entry {} to {}", head, slot.name);
        Ok(head)
    }

    /// Current head of the bound log.
    pub async fn head(&self, handle: LogHandle) -> Result<LogHead> {
        let slot = self.slot(handle).await?;
        Ok(slot.store.head().await?)
    }

    /// The store bound to `handle`.
    pub async fn store(&self, handle: LogHandle) -> Result<Arc<dyn LogStore>> {
        Ok(self.slot(handle).await?.store.clone())
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(part)), None) => part == name && !name.contains('\\'),
        _ => false,
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use replog_core::{EntryBuilder, MAX_ENTRY_PAYLOAD};
    use replog_store::StoreError;
    use replog_sync::{FrameBody, SyncConfig, Verdict};

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    fn registry() -> SyncRegistry {
        SyncRegistry::new(RegistryConfig::in_memory())
    }

    #[tokio::test]
    async fn test_bind_issues_distinct_nonzero_tickets() {
        let registry = registry();
        let a = registry.bind("a").await.unwrap();
        let b = registry.bind("b").await.unwrap();

        assert_ne!(a, b);
        assert_ne!(a.ticket(), 0);
        assert_ne!(b.ticket(), 0);
        assert_eq!(registry.handle_count().await, 2);
        assert_eq!(registry.log_name(a).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_memory_rebind_reaches_same_log() {
        let registry = registry();
        let kp = Keypair::from_seed(&[1; 32]);

        let first = registry.bind("shared").await.unwrap();
        registry.append(first, &kp, "one").await.unwrap();
        let second = registry.bind("shared").await.unwrap();

        assert_eq!(registry.head(second).await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_names_are_single_components() {
        let registry = registry();
        for name in ["", ".", "..", "../escape", "a/b", "/abs/log", "log/", "a\\b"] {
            assert!(
                matches!(registry.bind(name).await, Err(ReplogError::InvalidName(_))),
                "{:?} accepted",
                name
            );
        }
        registry.bind("orders.db").await.unwrap();
        assert_eq!(registry.handle_count().await, 1);
    }

    #[tokio::test]
    async fn test_append_refuses_oversized_payload() {
        let registry = registry();
        let handle = registry.bind("log").await.unwrap();
        let kp = Keypair::from_seed(&[2; 32]);

        let err = registry
            .append(handle, &kp, vec![0u8; MAX_ENTRY_PAYLOAD + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplogError::Store(StoreError::PayloadTooLarge { .. })));
        assert_eq!(err.status(), StatusCode::InvalidArgument);
        assert!(registry.head(handle).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsendable_reply_closes_session() {
        let registry = SyncRegistry::new(RegistryConfig {
            sync: SyncConfig {
                max_frame_bytes: 0,
                ..Default::default()
            },
            ..RegistryConfig::in_memory()
        });
        let log1 = registry.bind("log1").await.unwrap();
        let log2 = registry.bind("log2").await.unwrap();

        // Stored directly, past the local write limit
        let big = EntryBuilder::after(&LogHead::EMPTY)
            .payload(vec![0u8; 2 * MAX_ENTRY_PAYLOAD])
            .sign(&Keypair::from_seed(&[6; 32]));
        registry.store(log2).await.unwrap().append(&big).await.unwrap();

        let p = peer(3);
        let opening = registry.begin_session(log1, p).await.unwrap();
        let err = registry.advance(log2, p, &opening).await.unwrap_err();
        assert!(matches!(err, ReplogError::Sync(SyncError::FrameTooLarge { .. })));
        assert_eq!(
            registry.session_state(log2, p).await.unwrap(),
            Some(SessionState::Aborted)
        );

        // The pair is free for a new session
        registry.begin_session(log2, p).await.unwrap();
    }

    #[tokio::test]
    async fn test_already_syncing() {
        let registry = registry();
        let handle = registry.bind("log").await.unwrap();

        registry.begin_session(handle, peer(1)).await.unwrap();
        assert!(matches!(
            registry.begin_session(handle, peer(1)).await,
            Err(ReplogError::Sync(SyncError::AlreadySyncing))
        ));

        // A different peer is independent
        registry.begin_session(handle, peer(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_such_session() {
        let registry = registry();
        let handle = registry.bind("log").await.unwrap();

        let ack = Frame::new(1, FrameBody::Ack(replog_sync::Ack { head: None }));
        assert!(matches!(
            registry.advance(handle, peer(1), &ack).await,
            Err(ReplogError::Sync(SyncError::NoSuchSession))
        ));
    }

    #[tokio::test]
    async fn test_invalid_handle_after_release() {
        let registry = registry();
        let handle = registry.bind("log").await.unwrap();
        registry.begin_session(handle, peer(1)).await.unwrap();

        registry.release(handle).await.unwrap();
        assert!(matches!(
            registry.begin_session(handle, peer(1)).await,
            Err(ReplogError::InvalidHandle(_))
        ));
        assert!(matches!(
            registry.release(handle).await,
            Err(ReplogError::InvalidHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_full_exchange_and_closed_session() {
        let registry = registry();
        let kp = Keypair::from_seed(&[4; 32]);
        let a = registry.bind("a").await.unwrap();
        let b = registry.bind("b").await.unwrap();
        for i in 0..3u8 {
            registry.append(a, &kp, vec![i]).await.unwrap();
        }

        let p = peer(9);
        let mut frame = registry.begin_session(a, p).await.unwrap();
        let mut to_b = true;
        let mut last = Verdict::Continue;
        loop {
            let target = if to_b { b } else { a };
            let advance = registry.advance(target, p, &frame).await.unwrap();
            last = advance.verdict;
            match advance.frame {
                Some(next) => frame = next,
                None => break,
            }
            to_b = !to_b;
        }

        assert_eq!(last, Verdict::Converged);
        assert_eq!(registry.head(a).await.unwrap(), registry.head(b).await.unwrap());
        assert_eq!(
            registry.session_state(a, p).await.unwrap(),
            Some(SessionState::Converged)
        );
        assert!(matches!(
            registry.advance(a, p, &frame).await,
            Err(ReplogError::Sync(SyncError::SessionClosed))
        ));
    }

    #[tokio::test]
    async fn test_malformed_bytes_abort_session() {
        let registry = registry();
        let handle = registry.bind("log").await.unwrap();
        registry.begin_session(handle, peer(1)).await.unwrap();

        let err = registry
            .advance_bytes(handle, peer(1), &[0, 1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplogError::Sync(SyncError::MalformedFrame(_))));
        assert_eq!(
            registry.session_state(handle, peer(1)).await.unwrap(),
            Some(SessionState::Aborted)
        );
    }

    #[tokio::test]
    async fn test_sqlite_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            backend: StorageBackend::sqlite(dir.path()),
            ..Default::default()
        };
        let kp = Keypair::from_seed(&[5; 32]);

        {
            let registry = SyncRegistry::new(config.clone());
            let handle = registry.bind("orders.db").await.unwrap();
            registry.append(handle, &kp, "first").await.unwrap();
            registry.release(handle).await.unwrap();
        }

        let registry = SyncRegistry::new(config);
        let handle = registry.bind("orders.db").await.unwrap();
        assert_eq!(registry.head(handle).await.unwrap().seq, 1);
        assert!(dir.path().join("orders.db").exists());
    }
}
