//! Property-based tests for key encodings.
//!
//! Record and block keys are compared as raw bytes by the store, so their
//! byte order must follow timestamp order across the whole `i64` range,
//! including the jump from negative to positive.

use proptest::prelude::*;
use sensorwave_edge::storage::keys::{
    block_key, decode_record_key, decode_timestamp, encode_timestamp, parse_block_range,
    record_bound, record_key,
};

fn series_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.]{0,15}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_record_key_order_follows_time(a in any::<i64>(), b in any::<i64>(), id in series_id_strategy()) {
        let (ka, kb) = (record_key(&id, a), record_key(&id, b));
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    #[test]
    fn test_record_key_order_is_time_major(
        a in any::<i64>(),
        b in any::<i64>(),
        id_a in series_id_strategy(),
        id_b in series_id_strategy(),
    ) {
        prop_assume!(a != b);
        prop_assert_eq!(record_key(&id_a, a).cmp(&record_key(&id_b, b)), a.cmp(&b));
        prop_assert!(record_bound(a) <= record_key(&id_a, a));
    }

    #[test]
    fn test_record_key_decodes(ts in any::<i64>(), id in series_id_strategy()) {
        let key = record_key(&id, ts);
        let (decoded_ts, decoded_id) = decode_record_key(&key).unwrap();
        prop_assert_eq!(decoded_ts, ts);
        prop_assert_eq!(decoded_id, id.as_str());
        prop_assert_eq!(decode_timestamp(encode_timestamp(ts)), ts);
    }

    #[test]
    fn test_block_key_order_follows_start(a in any::<i64>(), b in any::<i64>(), span in 0i64..1_000_000) {
        let ka = block_key("NUMERIC", 7, a, a.saturating_add(span));
        let kb = block_key("NUMERIC", 7, b, b.saturating_add(span));
        prop_assert_eq!(ka.as_bytes().cmp(kb.as_bytes()), a.cmp(&b));
        prop_assert_eq!(parse_block_range(&ka).unwrap(), (a, a.saturating_add(span)));
    }
}

#[test]
fn test_sign_boundary_ordering() {
    let around_zero = [i64::MIN, i64::MIN + 1, -2, -1, 0, 1, 2, i64::MAX - 1, i64::MAX];
    for pair in around_zero.windows(2) {
        assert!(record_key("s", pair[0]) < record_key("s", pair[1]));
        assert!(encode_timestamp(pair[0]) < encode_timestamp(pair[1]));
    }
}
