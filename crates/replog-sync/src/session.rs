//! Sync session state machine.
//!
//! One session reconciles one local log with one peer. The initiator opens
//! with a round-0 Summary; every reply carries the inbound round plus one, so
//! each side only ever accepts the exact next round it expects.
//!
//! ```text
//! Initiated -> AwaitingPeerReply -> (Reconciling)* -> Converged | Diverged | Aborted
//! ```

use replog_core::{
    validate_chain_link, validate_entry, validate_entry_structure, Blake3Hash, LogEntry, LogHead,
    PeerId, ValidationError,
};
use replog_store::{LogStore, StoreError};

use crate::codec::{self, DELTA_ENVELOPE_BYTES};
use crate::config::SyncConfig;
use crate::digest::{compare, Comparison, LogView};
use crate::error::{Result, SyncError};
use crate::messages::{Ack, Delta, Frame, FrameBody, Reject, RejectCode, FRAME_HEADER_LEN};

/// Which side opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    AwaitingPeerReply,
    Reconciling,
    Converged,
    Diverged,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Converged | SessionState::Diverged | SessionState::Aborted
        )
    }
}

/// Outcome of consuming one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver the reply frame and wait for the next one.
    Continue,
    /// Both replicas hold the same log. A final Ack may still need delivery.
    Converged,
    /// The histories conflict at `at_seq` and cannot be merged by appending.
    Diverged { at_seq: u64 },
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Continue)
    }
}

/// What to send next, and whether the session is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub frame: Option<Frame>,
    /// Wire encoding of `frame`, within the session's frame limit.
    pub encoded: Option<Vec<u8>>,
    pub verdict: Verdict,
}

/// Counters for one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_in: usize,
    pub frames_out: usize,
    /// Entries pushed to the peer in Delta frames.
    pub entries_sent: usize,
    /// Entries appended to the local log.
    pub entries_received: usize,
    /// Entries received that the local log already held.
    pub entries_skipped: usize,
    /// Highest round seen or sent.
    pub last_round: u32,
}

enum Step {
    Reply(FrameBody),
    ReplyAndConverge(FrameBody),
    Converged,
    Diverged { at_seq: u64, reject: bool },
}

/// Reconciliation state for one (log, peer) pair.
///
/// The session does not hold the store; every operation borrows it, so the
/// owner decides how access to the log is shared.
#[derive(Debug)]
pub struct SyncSession {
    peer: PeerId,
    role: Role,
    state: SessionState,
    config: SyncConfig,
    expected_round: u32,
    /// Last head the peer told us about.
    peer_head: Option<LogHead>,
    /// Last head we told the peer about.
    announced: Option<LogHead>,
    /// Local head at the time we last sent an Ack.
    acked: Option<LogHead>,
    report: SessionReport,
}

impl SyncSession {
    fn new(peer: PeerId, role: Role, config: SyncConfig) -> Self {
        Self {
            peer,
            role,
            state: SessionState::Initiated,
            config,
            expected_round: 0,
            peer_head: None,
            announced: None,
            acked: None,
            report: SessionReport::default(),
        }
    }

    /// Start a session as initiator. Returns the opening Summary.
    pub async fn open<S: LogStore + ?Sized>(
        peer: PeerId,
        store: &S,
        config: SyncConfig,
    ) -> Result<(Self, Frame)> {
        let mut session = Self::new(peer, Role::Initiator, config);
        let view = LogView::capture(store, session.config.effective_window()).await?;

        let frame = Frame::new(0, FrameBody::Summary(view.summary()));
        session.record_out(&frame);
        session.expected_round = 1;
        session.state = SessionState::AwaitingPeerReply;

        tracing::debug!(
            "Opened sync of {} with peer {}: head {}",
            store.name(),
            peer,
            view.head
        );
        Ok((session, frame))
    }

    /// Start a session as responder from the peer's opening Summary.
    pub async fn accept<S: LogStore + ?Sized>(
        peer: PeerId,
        store: &S,
        opening: &Frame,
        config: SyncConfig,
    ) -> Result<(Self, Advance)> {
        if !opening.is_opening() {
            return Err(SyncError::ProtocolViolation(
                "session must open with a round-0 Summary".into(),
            ));
        }

        let mut session = Self::new(peer, Role::Responder, config);
        let advance = session.handle(store, opening).await?;
        Ok((session, advance))
    }

    /// Consume one inbound frame and produce the next step.
    ///
    /// Any error aborts the session; entries appended in earlier rounds stay.
    pub async fn handle<S: LogStore + ?Sized>(
        &mut self,
        store: &S,
        frame: &Frame,
    ) -> Result<Advance> {
        if self.state.is_terminal() {
            return Err(SyncError::SessionClosed);
        }

        match self.handle_inner(store, frame).await {
            Ok(advance) => Ok(advance),
            Err(e) => {
                if e.is_protocol_violation() {
                    tracing::warn!(
                        "Peer {} broke protocol syncing {} at round {}: {}",
                        self.peer,
                        store.name(),
                        frame.round,
                        e
                    );
                } else {
                    tracing::warn!(
                        "Aborting sync of {} with peer {} at round {}: {}",
                        store.name(),
                        self.peer,
                        frame.round,
                        e
                    );
                }
                self.state = SessionState::Aborted;
                Err(e)
            }
        }
    }

    /// Abort the session immediately.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Aborted;
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The round the next inbound frame must carry.
    pub fn expected_round(&self) -> u32 {
        self.expected_round
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    async fn handle_inner<S: LogStore + ?Sized>(
        &mut self,
        store: &S,
        frame: &Frame,
    ) -> Result<Advance> {
        if frame.round != self.expected_round {
            return Err(SyncError::UnexpectedRound {
                expected: self.expected_round,
                got: frame.round,
            });
        }
        if frame.round >= self.config.max_rounds {
            return Err(SyncError::RoundLimitExceeded {
                limit: self.config.max_rounds,
            });
        }

        self.report.frames_in += 1;
        self.report.last_round = frame.round;
        tracing::debug!(
            "Sync of {} with peer {}: received {:?} round {}",
            store.name(),
            self.peer,
            frame.tag(),
            frame.round
        );

        let opening = self.role == Role::Responder && frame.round == 0;
        let step = match &frame.body {
            FrameBody::Summary(summary) => {
                self.peer_head = Some(summary.head);
                self.respond(
                    store,
                    summary.head,
                    Some((&summary.window_digest, summary.window)),
                    opening,
                )
                .await?
            }
            FrameBody::Delta(delta) => self.apply_delta(store, delta).await?,
            FrameBody::Ack(ack) => self.handle_ack(store, ack).await?,
            FrameBody::Reject(reject) => {
                tracing::warn!(
                    "Peer {} rejected sync of {} at seq {}: {}",
                    self.peer,
                    store.name(),
                    reject.at_seq,
                    reject.reason
                );
                Step::Diverged {
                    at_seq: reject.at_seq,
                    reject: false,
                }
            }
        };

        self.finish(store.name(), step, frame.round.saturating_add(1))
    }

    /// Reply to a peer head according to how it relates to the local log.
    async fn respond<S: LogStore + ?Sized>(
        &mut self,
        store: &S,
        peer_head: LogHead,
        peer_digest: Option<(&Blake3Hash, u32)>,
        opening: bool,
    ) -> Result<Step> {
        let view = LogView::capture(store, self.config.effective_window()).await?;

        let step = match compare(store, &view.head, &peer_head, peer_digest).await? {
            // Answer an opening Summary with our own so both sides verify.
            Comparison::InSync if opening => Step::Reply(FrameBody::Summary(view.summary())),
            Comparison::InSync => {
                self.acked = Some(view.head);
                Step::Reply(self.ack_body(view.head))
            }
            Comparison::PeerBehind { peer_seq } => {
                Step::Reply(self.delta_body(store, peer_seq, view.head).await?)
            }
            Comparison::PeerAhead { .. } => Step::Reply(FrameBody::Summary(view.summary())),
            Comparison::Forked { at_seq } => Step::Diverged {
                at_seq,
                reject: true,
            },
        };
        Ok(step)
    }

    async fn apply_delta<S: LogStore + ?Sized>(&mut self, store: &S, delta: &Delta) -> Result<Step> {
        let (Some(first), Some(last)) = (delta.entries.first(), delta.entries.last()) else {
            return Err(SyncError::ProtocolViolation("empty delta".into()));
        };
        let local = store.head().await?;

        if first.seq() > local.seq + 1 {
            return Err(SyncError::ProtocolViolation(format!(
                "delta starts at seq {} but local head is {}",
                first.seq(),
                local.seq
            )));
        }

        // Entries we already hold must match ours exactly.
        let overlap_end = last.seq().min(local.seq);
        let mut overlap = 0;
        if first.seq() <= overlap_end {
            let ours = store.get_hashes_range(first.seq(), overlap_end).await?;
            for (entry, (seq, hash)) in delta.entries.iter().zip(ours.iter()) {
                if entry.compute_hash() != *hash {
                    tracing::warn!(
                        "Fork detected in {} at seq {}: local={}, peer={}",
                        store.name(),
                        seq,
                        hash.to_hex(),
                        entry.compute_hash().to_hex()
                    );
                    return Ok(Step::Diverged {
                        at_seq: *seq,
                        reject: true,
                    });
                }
                overlap += 1;
            }
        }

        let fresh: Vec<LogEntry> = delta
            .entries
            .iter()
            .filter(|e| e.seq() > local.seq)
            .cloned()
            .collect();

        let mut cursor = local;
        for (i, entry) in fresh.iter().enumerate() {
            if self.config.validate_entries {
                validate_entry(entry)?;
            } else {
                validate_entry_structure(entry)?;
            }

            match validate_chain_link(entry, &cursor) {
                Ok(()) => cursor = entry.as_head(),
                Err(ValidationError::BrokenChain { .. }) if i == 0 => {
                    tracing::warn!(
                        "Fork detected in {} at seq {}: peer entry {} links elsewhere",
                        store.name(),
                        local.seq,
                        entry.seq()
                    );
                    return Ok(Step::Diverged {
                        at_seq: local.seq,
                        reject: true,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.report.entries_skipped += overlap;
        if !fresh.is_empty() {
            match store.append_batch(&fresh).await {
                Ok(result) => {
                    self.report.entries_received += result.appended;
                    self.report.entries_skipped += result.skipped;
                }
                Err(StoreError::Conflict { seq, existing }) => {
                    tracing::warn!(
                        "Fork detected in {} at seq {}: existing={}",
                        store.name(),
                        seq,
                        existing
                    );
                    return Ok(Step::Diverged { at_seq: seq, reject: true });
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.peer_head = Some(delta.sender_head);
        self.respond(store, delta.sender_head, None, false).await
    }

    async fn handle_ack<S: LogStore + ?Sized>(&mut self, store: &S, ack: &Ack) -> Result<Step> {
        let peer_head = match ack.head.or(self.peer_head) {
            Some(head) => head,
            None => {
                return Err(SyncError::ProtocolViolation(
                    "empty ack before any peer head".into(),
                ))
            }
        };
        self.peer_head = Some(peer_head);

        let local = store.head().await?;
        if peer_head == local {
            if self.acked == Some(local) {
                return Ok(Step::Converged);
            }
            self.acked = Some(local);
            return Ok(Step::ReplyAndConverge(self.ack_body(local)));
        }

        self.respond(store, peer_head, None, false).await
    }

    /// Ack carrying our head, or the zero-length form if the peer already knows it.
    fn ack_body(&self, head: LogHead) -> FrameBody {
        let head = if self.announced == Some(head) {
            None
        } else {
            Some(head)
        };
        FrameBody::Ack(Ack { head })
    }

    async fn delta_body<S: LogStore + ?Sized>(
        &self,
        store: &S,
        peer_seq: u64,
        local_head: LogHead,
    ) -> Result<FrameBody> {
        let batch = self.config.effective_batch_size() as u64;
        let end = local_head.seq.min(peer_seq + batch);
        let mut entries = store.get_entries_range(peer_seq + 1, end).await?;

        if entries.first().map(|e| e.seq()) != Some(peer_seq + 1) {
            return Err(StoreError::InvalidData(format!(
                "missing entry {} below head {}",
                peer_seq + 1,
                local_head.seq
            ))
            .into());
        }

        let limit = self.config.effective_frame_bytes();
        let budget = limit.saturating_sub(FRAME_HEADER_LEN + DELTA_ENVELOPE_BYTES);
        let mut used = 0;
        let mut take = 0;
        for entry in &entries {
            let len = codec::encoded_entry_len(entry)?;
            if used + len > budget {
                if take == 0 {
                    return Err(SyncError::FrameTooLarge {
                        size: FRAME_HEADER_LEN + DELTA_ENVELOPE_BYTES + len,
                        limit,
                    });
                }
                break;
            }
            used += len;
            take += 1;
        }
        entries.truncate(take);

        Ok(FrameBody::Delta(Delta {
            entries,
            sender_head: local_head,
        }))
    }

    /// Turn a step into the outbound frame. Nothing is recorded unless the
    /// frame encodes within the frame limit.
    fn finish(&mut self, log: &str, step: Step, round: u32) -> Result<Advance> {
        let (state, frame, verdict) = match step {
            Step::Reply(body) => (
                SessionState::Reconciling,
                Some(Frame::new(round, body)),
                Verdict::Continue,
            ),
            Step::ReplyAndConverge(body) => (
                SessionState::Converged,
                Some(Frame::new(round, body)),
                Verdict::Converged,
            ),
            Step::Converged => (SessionState::Converged, None, Verdict::Converged),
            Step::Diverged { at_seq, reject } => {
                let frame = reject.then(|| {
                    Frame::new(
                        round,
                        FrameBody::Reject(Reject {
                            at_seq,
                            code: RejectCode::Diverged,
                            reason: format!("histories differ at seq {}", at_seq),
                        }),
                    )
                });
                (SessionState::Diverged, frame, Verdict::Diverged { at_seq })
            }
        };

        let encoded = frame.as_ref().map(|f| self.seal(f)).transpose()?;

        self.state = state;
        if let Some(frame) = &frame {
            self.record_out(frame);
            self.expected_round = round.saturating_add(1);
        }

        match verdict {
            Verdict::Continue => {}
            Verdict::Converged => tracing::info!(
                "Sync of {} with peer {} converged after {} rounds ({} entries in, {} out)",
                log,
                self.peer,
                self.report.last_round + 1,
                self.report.entries_received,
                self.report.entries_sent
            ),
            Verdict::Diverged { at_seq } => tracing::warn!(
                "Sync of {} with peer {} diverged at seq {}",
                log,
                self.peer,
                at_seq
            ),
        }

        Ok(Advance {
            frame,
            encoded,
            verdict,
        })
    }

    fn seal(&self, frame: &Frame) -> Result<Vec<u8>> {
        let bytes = codec::encode(frame)?;
        let limit = self.config.effective_frame_bytes();
        if bytes.len() > limit {
            return Err(SyncError::FrameTooLarge {
                size: bytes.len(),
                limit,
            });
        }
        Ok(bytes)
    }

    fn record_out(&mut self, frame: &Frame) {
        self.report.frames_out += 1;
        self.report.last_round = frame.round;
        match &frame.body {
            FrameBody::Summary(summary) => self.announced = Some(summary.head),
            FrameBody::Delta(delta) => {
                self.report.entries_sent += delta.entries.len();
                self.announced = Some(delta.sender_head);
            }
            FrameBody::Ack(Ack { head: Some(head) }) => self.announced = Some(*head),
            FrameBody::Ack(Ack { head: None }) | FrameBody::Reject(_) => {}
        }
    }
}
