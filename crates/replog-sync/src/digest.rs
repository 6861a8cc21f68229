//! Log fingerprints and comparison.
//!
//! A replica advertises its head plus a digest over the hashes of its last
//! few entries. The receiver recomputes the same digest over its own log to
//! decide whether the two replicas agree, which side is behind, or whether
//! the histories have forked.

use replog_core::{Blake3Hash, EntryHash, LogHead};
use replog_store::LogStore;

use crate::error::Result;
use crate::messages::Summary;

const WINDOW_DOMAIN: &[u8] = b"replog-window-v0:";

/// Snapshot of what a replica holds, as advertised in a Summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogView {
    pub head: LogHead,
    pub window: u32,
    pub window_digest: Blake3Hash,
}

impl LogView {
    /// Capture the current head of `store` and digest its last `window` entries.
    pub async fn capture<S: LogStore + ?Sized>(store: &S, window: u32) -> Result<Self> {
        let head = store.head().await?;
        let window_digest = window_digest_at(store, head.seq, window).await?;
        Ok(Self {
            head,
            window,
            window_digest,
        })
    }

    pub fn summary(&self) -> Summary {
        Summary {
            head: self.head,
            window: self.window,
            window_digest: self.window_digest,
        }
    }
}

/// Digest of the hashes of entries `seq - window + 1 ..= seq`.
///
/// Algorithm: H = Blake3(domain || seq (u64 BE) || hash_1 || ... || hash_k)
pub fn compute_window_digest(seq: u64, hashes: &[EntryHash]) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(WINDOW_DOMAIN);
    hasher.update(&seq.to_be_bytes());
    for hash in hashes {
        hasher.update(hash.as_bytes());
    }
    Blake3Hash(*hasher.finalize().as_bytes())
}

/// Compute the window digest of the local log ending at `seq`.
pub async fn window_digest_at<S: LogStore + ?Sized>(
    store: &S,
    seq: u64,
    window: u32,
) -> Result<Blake3Hash> {
    if seq == 0 {
        return Ok(compute_window_digest(0, &[]));
    }
    let start = seq.saturating_sub(u64::from(window.max(1)) - 1).max(1);
    let hashes: Vec<EntryHash> = store
        .get_hashes_range(start, seq)
        .await?
        .into_iter()
        .map(|(_, hash)| hash)
        .collect();
    Ok(compute_window_digest(seq, &hashes))
}

/// Relation between the local log and a peer's advertised head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Both replicas hold the same entries.
    InSync,
    /// The peer's log is a strict prefix of ours.
    PeerBehind { peer_seq: u64 },
    /// The peer holds entries beyond our head.
    PeerAhead { peer_seq: u64 },
    /// The histories differ at `at_seq`.
    Forked { at_seq: u64 },
}

impl Comparison {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Comparison::InSync)
    }
}

/// Compare the local log (with head `local`) against a peer's head.
///
/// When the peer supplied a window digest, it is checked against the local
/// digest over the same window ending at the peer's head.
pub async fn compare<S: LogStore + ?Sized>(
    store: &S,
    local: &LogHead,
    peer: &LogHead,
    peer_digest: Option<(&Blake3Hash, u32)>,
) -> Result<Comparison> {
    if peer.seq > local.seq {
        return Ok(Comparison::PeerAhead { peer_seq: peer.seq });
    }

    let local_hash = if peer.seq == local.seq {
        local.hash
    } else {
        store.get_hash_at(peer.seq).await?
    };

    if local_hash != peer.hash {
        return Ok(Comparison::Forked { at_seq: peer.seq });
    }

    if let Some((digest, window)) = peer_digest {
        let ours = window_digest_at(store, peer.seq, window).await?;
        if &ours != digest {
            return Ok(Comparison::Forked { at_seq: peer.seq });
        }
    }

    if peer.seq == local.seq {
        Ok(Comparison::InSync)
    } else {
        Ok(Comparison::PeerBehind { peer_seq: peer.seq })
    }
}
