//! Property-based round-trips for the binary property-list codec.

use proptest::prelude::*;
use streampack::plist;
use streampack::stream::MemoryStream;
use streampack::time::UnixTime;
use streampack::value::{Value, ValueDictionary};

fn arb_real() -> impl Strategy<Value = f64> {
    prop_oneof![
        // Values exactly representable as f32 exercise the narrowed
        // encoding; whole numbers exercise the 64-bit one.
        any::<f32>().prop_filter("finite", |f| f.is_finite()).prop_map(f64::from),
        (-1_000_000_000i64..1_000_000_000).prop_map(|n| n as f64),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        arb_real().prop_map(Value::Real),
        "[a-zA-Z0-9 _./-]{0,40}".prop_map(Value::String),
        "\\PC{0,20}".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..64).prop_map(Value::Data),
        // Whole seconds survive the epoch shift bit-exactly.
        (-4_000_000_000i64..4_000_000_000).prop_map(|s| Value::Date(UnixTime::from_secs(s))),
    ];

    leaf.prop_recursive(3, 64, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Vector),
            proptest::collection::vec(("[a-z]{1,12}", inner), 0..8).prop_map(|pairs| {
                let mut dict = ValueDictionary::new();
                for (key, value) in pairs {
                    dict.set(key, value);
                }
                Value::Dictionary(dict)
            }),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_plist_roundtrip(value in arb_value()) {
        let mut sink = MemoryStream::new();
        plist::write(&mut sink, &value).unwrap();
        let bytes = sink.into_vec();

        let read_back = plist::read(MemoryStream::from_vec(bytes)).unwrap();
        prop_assert_eq!(read_back, value);
    }

    #[test]
    fn prop_plist_deterministic(value in arb_value()) {
        let mut first = MemoryStream::new();
        plist::write(&mut first, &value).unwrap();
        let mut second = MemoryStream::new();
        plist::write(&mut second, &value).unwrap();
        prop_assert_eq!(first.into_vec(), second.into_vec());
    }
}

#[test]
fn test_heavily_shared_subtrees() {
    // The same subtree referenced from many places must still read back
    // as a plain tree.
    let shared = Value::Vector(vec![
        Value::String("shared".into()),
        Value::Integer(7),
    ]);
    let mut dict = ValueDictionary::new();
    for key in ["a", "b", "c", "d"] {
        dict.set(key.into(), shared.clone());
    }
    let value = Value::from(dict);

    let mut sink = MemoryStream::new();
    plist::write(&mut sink, &value).unwrap();
    let read_back = plist::read(MemoryStream::from_vec(sink.into_vec())).unwrap();
    assert_eq!(read_back, value);
}
