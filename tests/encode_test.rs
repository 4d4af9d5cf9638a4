//! Encoding round-trip law: for every primitive path-parameter value,
//! decoding the encoded rendering recovers the value under the type's
//! canonical parser.

use chrono::DateTime;
use chrono::NaiveDate;
use proptest::prelude::*;
use uuid::Uuid;

use smolder::encode::decode_segment;
use smolder::encode::encode_path;
use smolder::encode::encode_segment;
use smolder::value::Value;

proptest! {
    #[test]
    fn string_segments_roundtrip(raw in ".*") {
        let encoded = encode_segment(&raw);
        // Everything outside the unreserved set is escaped.
        prop_assert!(encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric()
                || matches!(b, b'-' | b'.' | b'_' | b'~' | b'%')));
        prop_assert_eq!(decode_segment(&encoded).expect("decode"), raw);
    }

    #[test]
    fn int_renderings_parse_back(v in -100_000i64..100_000) {
        let rendered = Value::Int(v).render_plain();
        let encoded = encode_segment(&rendered);
        let decoded = decode_segment(&encoded).expect("decode");
        prop_assert_eq!(decoded.parse::<i64>().expect("parse"), v);
    }

    #[test]
    fn uuid_renderings_parse_back(bytes in any::<[u8; 16]>()) {
        let uuid = Uuid::from_bytes(bytes);
        let rendered = Value::Uuid(uuid).render_plain();
        let encoded = encode_segment(&rendered);
        // Canonical hyphenated lowercase form is already unreserved.
        prop_assert_eq!(&encoded, &rendered);
        let decoded = decode_segment(&encoded).expect("decode");
        prop_assert_eq!(Uuid::parse_str(&decoded).expect("parse"), uuid);
    }

    #[test]
    fn datetime_renderings_parse_back(secs in -62_135_596_800i64..253_402_300_799) {
        let dt = DateTime::from_timestamp(secs, 0).expect("timestamp");
        let rendered = Value::DateTime(dt).render_plain();
        let decoded = decode_segment(&encode_segment(&rendered)).expect("decode");
        let parsed = DateTime::parse_from_rfc3339(&decoded).expect("parse");
        prop_assert_eq!(parsed.timestamp(), secs);
    }

    #[test]
    fn date_renderings_parse_back(days in -719_162i64..2_932_896) {
        let date = NaiveDate::from_num_days_from_ce_opt((days + 719_163) as i32)
            .expect("date");
        let rendered = Value::Date(date).render_plain();
        let decoded = decode_segment(&encode_segment(&rendered)).expect("decode");
        let parsed =
            NaiveDate::parse_from_str(&decoded, "%Y-%m-%d").expect("parse");
        prop_assert_eq!(parsed, date);
    }

    #[test]
    fn float_renderings_parse_back(v in prop::num::f64::NORMAL | prop::num::f64::ZERO) {
        let rendered = Value::Float(v).render_plain();
        let decoded = decode_segment(&encode_segment(&rendered)).expect("decode");
        prop_assert_eq!(decoded.parse::<f64>().expect("parse"), v);
    }
}

#[test]
fn bool_renderings_are_fixed_tokens() {
    assert_eq!(Value::Bool(true).render_plain(), "true");
    assert_eq!(Value::Bool(false).render_plain(), "false");
    assert_eq!(decode_segment(&encode_segment("true")).expect("decode"), "true");
}

#[test]
fn full_path_encoding_composes_segments() {
    let values = vec![
        ("user".to_string(), Value::Str("anne marie".to_string())),
        ("post".to_string(), Value::Int(7)),
    ];
    let path = encode_path("/users/{user}/posts/{post}", &values).expect("encode");
    assert_eq!(path, "/users/anne%20marie/posts/7");
}
