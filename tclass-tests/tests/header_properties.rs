//! Property-based tests for the wire envelope and payload corpus

use proptest::prelude::*;
use tclass_protocol::header::{HeaderError, MessageType, FIXED_FIELDS_LEN};
use tclass_protocol::{decode, encode, PayloadSource, SeqNumber, HEADER_SIZE, LOREM_IPSUM, TYPE_SEQ_NUM};

fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=1230)
}

proptest! {
    #[test]
    fn prop_encoded_request_decodes(seq in any::<u32>(), sent_time in any::<i64>(), body in body_strategy()) {
        let datagram = encode(SeqNumber::new(seq), sent_time, &body);
        prop_assert_eq!(datagram.len(), HEADER_SIZE + body.len());

        let header = decode(&datagram).unwrap();
        prop_assert!(header.is_seq_num());
        prop_assert_eq!(header.len, FIXED_FIELDS_LEN);
        prop_assert_eq!(header.seq, SeqNumber::new(seq));
        prop_assert_eq!(header.sent_time, sent_time);
        prop_assert_eq!(&datagram[HEADER_SIZE..], &body[..]);
    }

    #[test]
    fn prop_short_input_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        let is_insufficient = matches!(decode(&bytes), Err(HeaderError::InsufficientData { .. }));
        prop_assert!(is_insufficient);
    }

    #[test]
    fn prop_unknown_tag_still_decodes(tag in any::<u8>(), rest in prop::collection::vec(any::<u8>(), 13..64)) {
        prop_assume!(tag != TYPE_SEQ_NUM);
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&rest);

        let header = decode(&bytes).unwrap();
        prop_assert_eq!(header.msg_type, MessageType::Unknown(tag));
        prop_assert!(!header.is_seq_num());
    }

    #[test]
    fn prop_generate_is_exact_and_deterministic(offset in 0usize..4096, len in 0usize..=1230) {
        let source = PayloadSource::new(LOREM_IPSUM, offset);
        let first = source.generate(len);
        let second = source.generate(len);

        prop_assert_eq!(first.len(), len);
        prop_assert_eq!(&first, &second);
        if len > 0 {
            prop_assert_eq!(first[0], LOREM_IPSUM[offset % LOREM_IPSUM.len()]);
        }
    }

    #[test]
    fn prop_generate_clamps_to_corpus(len in 1231usize..10_000) {
        prop_assert_eq!(PayloadSource::default().generate(len).len(), LOREM_IPSUM.len());
    }
}
