//! Proptest generators for property-based testing.

use proptest::prelude::*;

use replog_core::{EntryBuilder, EntryHash, Keypair, LogEntry, LogHead, PeerId};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random EntryHash.
pub fn entry_hash() -> impl Strategy<Value = EntryHash> {
    any::<[u8; 32]>().prop_map(EntryHash::from_bytes)
}

/// Generate a random PeerId.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    any::<[u8; 32]>().prop_map(PeerId::from_bytes)
}

/// Generate a well-formed head: empty, or a positive seq with a hash.
pub fn log_head() -> impl Strategy<Value = LogHead> {
    prop_oneof![
        Just(LogHead::EMPTY),
        (1u64..=1_000_000, entry_hash()).prop_map(|(seq, hash)| LogHead::at(seq, hash)),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for generating a valid chain.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub seed: [u8; 32],
    pub len: u64,
    pub payloads: Vec<Vec<u8>>,
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<[u8; 32]>(), prop::collection::vec(payload(64), 0..24))
            .prop_map(|(seed, payloads)| ChainParams {
                seed,
                len: payloads.len() as u64,
                payloads,
            })
            .boxed()
    }
}

/// Build the chain described by `params`.
pub fn chain_from_params(params: &ChainParams) -> Vec<LogEntry> {
    let keypair = Keypair::from_seed(&params.seed);
    let mut head = LogHead::EMPTY;
    params
        .payloads
        .iter()
        .enumerate()
        .map(|(i, payload)| {
            let entry = EntryBuilder::after(&head)
                .timestamp(i as i64)
                .payload(payload.clone())
                .sign(&keypair);
            head = entry.as_head();
            entry
        })
        .collect()
}
