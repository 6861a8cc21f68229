//! Entry validation: signature verification, structural checks and chaining.

use crate::canonical::signed_message;
use crate::crypto::Blake3Hash;
use crate::entry::{LogEntry, ENTRY_VERSION, MAX_ENTRY_PAYLOAD};
use crate::error::ValidationError;
use crate::types::LogHead;

/// Validate an entry in isolation (without checking its place in a log).
///
/// This performs:
/// - Structural checks (see [`validate_entry_structure`])
/// - Signature verification
pub fn validate_entry(entry: &LogEntry) -> Result<(), ValidationError> {
    validate_entry_structure(entry)?;

    let message = signed_message(entry);
    entry
        .header
        .writer
        .verify(&message, &entry.signature)
        .map_err(|_| ValidationError::SignatureFailed)?;

    Ok(())
}

/// Validate entry structure without signature verification.
///
/// Useful when the entry comes from trusted storage.
pub fn validate_entry_structure(entry: &LogEntry) -> Result<(), ValidationError> {
    if entry.header.version != ENTRY_VERSION {
        return Err(ValidationError::UnsupportedVersion(entry.header.version));
    }

    if entry.payload.len() > MAX_ENTRY_PAYLOAD {
        return Err(ValidationError::PayloadTooLarge {
            size: entry.payload.len(),
            limit: MAX_ENTRY_PAYLOAD,
        });
    }

    if Blake3Hash::hash(&entry.payload) != entry.header.payload_hash {
        return Err(ValidationError::PayloadHashMismatch);
    }

    if entry.header.seq == 0 {
        return Err(ValidationError::InvalidSequence {
            expected: 1,
            got: 0,
        });
    }

    match (entry.header.seq, &entry.header.prev_hash) {
        (1, Some(_)) => Err(ValidationError::StructuralError(
            "seq 1 must not have prev_hash".into(),
        )),
        (seq, None) if seq > 1 => Err(ValidationError::StructuralError(
            "seq > 1 requires prev_hash".into(),
        )),
        _ => Ok(()),
    }
}

/// Check that `entry` extends a log whose current head is `head`.
pub fn validate_chain_link(entry: &LogEntry, head: &LogHead) -> Result<(), ValidationError> {
    if entry.header.seq != head.seq + 1 {
        return Err(ValidationError::InvalidSequence {
            expected: head.seq + 1,
            got: entry.header.seq,
        });
    }

    if entry.header.prev_hash != head.hash {
        return Err(ValidationError::BrokenChain {
            seq: entry.header.seq,
            expected: head.hash,
            got: entry.header.prev_hash,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EntrySignature, Keypair};
    use crate::entry::EntryBuilder;
    use crate::types::EntryHash;
    use bytes::Bytes;

    fn keypair() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    #[test]
    fn test_valid_entry() {
        let entry = EntryBuilder::new(1)
            .timestamp(1234567890000)
            .payload(b"hello".to_vec())
            .sign(&keypair());

        validate_entry(&entry).expect("should be valid");
    }

    #[test]
    fn test_tampered_payload() {
        let mut entry = EntryBuilder::new(1).payload(b"hello".to_vec()).sign(&keypair());
        entry.payload = Bytes::from_static(b"tampered");

        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::PayloadHashMismatch)
        ));
    }

    #[test]
    fn test_invalid_signature() {
        let mut entry = EntryBuilder::new(1).payload(b"hello".to_vec()).sign(&keypair());
        entry.signature = EntrySignature::ZERO;

        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::SignatureFailed)
        ));
        // Structure alone is still fine
        validate_entry_structure(&entry).unwrap();
    }

    #[test]
    fn test_tampered_header_breaks_signature() {
        let mut entry = EntryBuilder::new(1).sign(&keypair());
        entry.header.timestamp = 99;

        assert!(matches!(
            validate_entry(&entry),
            Err(ValidationError::SignatureFailed)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut entry = EntryBuilder::new(1).sign(&keypair());
        entry.header.version = 9;

        assert!(matches!(
            validate_entry_structure(&entry),
            Err(ValidationError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_payload_size_cap() {
        let at_limit = EntryBuilder::new(1)
            .payload(vec![7u8; MAX_ENTRY_PAYLOAD])
            .sign(&keypair());
        validate_entry(&at_limit).unwrap();

        let over = EntryBuilder::new(1)
            .payload(vec![7u8; MAX_ENTRY_PAYLOAD + 1])
            .sign(&keypair());
        assert!(matches!(
            validate_entry_structure(&over),
            Err(ValidationError::PayloadTooLarge { size, .. }) if size == MAX_ENTRY_PAYLOAD + 1
        ));
    }

    #[test]
    fn test_seq_prev_structure() {
        let kp = keypair();

        let zero = EntryBuilder::new(0).sign(&kp);
        assert!(matches!(
            validate_entry_structure(&zero),
            Err(ValidationError::InvalidSequence { expected: 1, got: 0 })
        ));

        let orphan = EntryBuilder::new(2).sign(&kp);
        assert!(matches!(
            validate_entry_structure(&orphan),
            Err(ValidationError::StructuralError(_))
        ));

        let first_with_prev = EntryBuilder::new(1)
            .prev(EntryHash::from_bytes([1; 32]))
            .sign(&kp);
        assert!(matches!(
            validate_entry_structure(&first_with_prev),
            Err(ValidationError::StructuralError(_))
        ));
    }

    #[test]
    fn test_chain_link() {
        let kp = keypair();
        let first = EntryBuilder::after(&LogHead::EMPTY).sign(&kp);
        validate_chain_link(&first, &LogHead::EMPTY).unwrap();

        let head = first.as_head();
        let second = EntryBuilder::after(&head).sign(&kp);
        validate_chain_link(&second, &head).unwrap();

        // Gap
        assert!(matches!(
            validate_chain_link(&second, &LogHead::EMPTY),
            Err(ValidationError::InvalidSequence { expected: 1, got: 2 })
        ));

        // Right seq, wrong predecessor
        let stranger = LogHead::at(1, EntryHash::from_bytes([9; 32]));
        assert!(matches!(
            validate_chain_link(&second, &stranger),
            Err(ValidationError::BrokenChain { seq: 2, .. })
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn signed_entries_validate(
                seed in any::<[u8; 32]>(),
                ts in any::<i64>(),
                payload in proptest::collection::vec(any::<u8>(), 0..256),
            ) {
                let kp = Keypair::from_seed(&seed);
                let entry = EntryBuilder::new(1).timestamp(ts).payload(payload).sign(&kp);
                prop_assert!(validate_entry(&entry).is_ok());
            }

            #[test]
            fn flipped_payload_byte_is_rejected(
                payload in proptest::collection::vec(any::<u8>(), 1..128),
                idx in any::<prop::sample::Index>(),
            ) {
                let mut entry = EntryBuilder::new(1).payload(payload.clone()).sign(&keypair());
                let mut tampered = payload;
                let i = idx.index(tampered.len());
                tampered[i] ^= 0x01;
                entry.payload = Bytes::from(tampered);
                prop_assert!(validate_entry(&entry).is_err());
            }
        }
    }
}
