use proptest::prelude::*;
use rollcall_core::hex::{self, HexCase};
use rollcall_core::RollError;

#[test]
fn encode_both_cases() {
    let bytes = [0x00u8, 0x1f, 0xa0, 0xff];
    assert_eq!(hex::encode(&bytes, HexCase::Lower), "001fa0ff");
    assert_eq!(hex::encode(&bytes, HexCase::Upper), "001FA0FF");
    assert_eq!(hex::encode_upper(&[]), "");
}

#[test]
fn decode_is_case_insensitive() {
    assert_eq!(hex::decode("DeadBEEF").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(hex::decode("deadbeef").unwrap(), hex::decode("DEADBEEF").unwrap());
}

#[test]
fn decode_rejects_non_hex() {
    for bad in ["zz", "0g", "12 4", "ab\n", "-1"] {
        assert!(
            matches!(hex::decode(bad), Err(RollError::InvalidEncoding(_))),
            "accepted {bad:?}"
        );
    }
}

// Odd-length input: the strict decoder refuses it, the legacy decoder
// left-pads a zero nibble.
#[test]
fn odd_length_strict_vs_padded() {
    assert!(matches!(hex::decode("abc"), Err(RollError::InvalidEncoding(_))));
    assert_eq!(hex::decode_padded("abc").unwrap(), vec![0x0a, 0xbc]);
    assert_eq!(hex::decode_padded("f").unwrap(), vec![0x0f]);
    assert!(hex::decode_padded("xyz").is_err());
}

#[test]
fn decode_digest_needs_32_bytes() {
    let ok = "ab".repeat(32);
    assert_eq!(hex::decode_digest(&ok).unwrap(), [0xab; 32]);
    assert!(hex::decode_digest(&"ab".repeat(31)).is_err());
    assert!(hex::decode_digest(&"ab".repeat(33)).is_err());
}

proptest! {
    #[test]
    fn decode_inverts_encode(bytes in proptest::collection::vec(any::<u8>(), 0..128), upper in any::<bool>()) {
        let case = if upper { HexCase::Upper } else { HexCase::Lower };
        let text = hex::encode(&bytes, case);
        prop_assert_eq!(text.len(), bytes.len() * 2);
        prop_assert_eq!(hex::decode(&text).unwrap(), bytes);
    }
}
