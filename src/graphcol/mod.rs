//! GraphCol: the self-describing columnar chunk format. A chunk is one
//! contiguous byte array holding a sorted batch of triples from a single
//! namespace, with a subject bloom filter embedded for routing.
//!
//! Layout:
//! ```text
//! Header:  "GCOL" | version u16 | namespace_len u32 | namespace bytes
//!          | triple_count u32 | min_ts i64 | max_ts i64 | flags u32
//! Directory: column_count u16 | per column:
//!          name_len u16 | name | encoding u8 | offset u32 | size u32
//!          | uncompressed_size u32
//! Bloom:   capacity u32 | target_fpr f32 | m u32 | k u8 | count u32 | bits
//! Columns: zstd-compressed payloads at the directory offsets
//! Trailer: CRC32(header + directory + bloom) u32 | "GCOL"
//! ```

mod decode;
mod encode;

pub use decode::{ChunkReader, decode_chunk};
pub use encode::encode_chunk;

use crate::models::Triple;

pub const MAGIC: &[u8; 4] = b"GCOL";
pub const VERSION: u16 = 1;

pub const ENCODING_PLAIN: u8 = 0;
pub const ENCODING_DICT: u8 = 1;

// Dense columns: one value per row.
pub(crate) const COL_SUBJECT: &str = "subject";
pub(crate) const COL_PREDICATE: &str = "predicate";
pub(crate) const COL_OBJ_TYPE: &str = "obj_type";
pub(crate) const COL_TIMESTAMP: &str = "timestamp";
pub(crate) const COL_TX_ID: &str = "tx_id";

// Sparse value columns: null bitmap followed by the present values.
pub(crate) const COL_OBJ_REF: &str = "obj_ref";
pub(crate) const COL_OBJ_STRING: &str = "obj_string";
pub(crate) const COL_OBJ_INT64: &str = "obj_int64";
pub(crate) const COL_OBJ_FLOAT64: &str = "obj_float64";
pub(crate) const COL_OBJ_BOOL: &str = "obj_bool";
pub(crate) const COL_OBJ_TIMESTAMP: &str = "obj_timestamp";
pub(crate) const COL_OBJ_LAT: &str = "obj_lat";
pub(crate) const COL_OBJ_LNG: &str = "obj_lng";
pub(crate) const COL_OBJ_LANG: &str = "obj_lang";
pub(crate) const COL_OBJ_UNIT: &str = "obj_unit";
pub(crate) const COL_OBJ_BINARY: &str = "obj_binary";

/// Canonical chunk order: subject sort key (reversed hostname then path
/// segments), then subject, then predicate and version. Encode sorts with
/// this and decode reproduces it, so the order is the round-trip identity.
pub fn sort_triples(triples: &mut [Triple]) {
    triples.sort_by(|a, b| {
        a.subject
            .sort_key()
            .cmp(&b.subject.sort_key())
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.predicate.cmp(&b.predicate))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.tx_id.cmp(&b.tx_id))
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    pub namespace: String,
    pub triple_count: u32,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, TransactionId, TypedObject};
    use crate::store::now_ms;

    fn eid(host: &str, path: &str) -> EntityId {
        EntityId::parse(&format!("https://{host}/{path}")).unwrap()
    }

    fn sample_objects() -> Vec<TypedObject> {
        vec![
            TypedObject::Null,
            TypedObject::Bool(true),
            TypedObject::Int32(-42),
            TypedObject::Int64(1 << 40),
            TypedObject::Float64(2.5),
            TypedObject::String("hello world".into()),
            TypedObject::Url("https://example.com/page".into()),
            TypedObject::Ref(eid("example.com", "things/other")),
            TypedObject::Timestamp(1_700_000_000_000),
            TypedObject::GeoPoint {
                lat: 37.7749,
                lng: -122.4194,
            },
            TypedObject::Monolingual {
                text: "bonjour".into(),
                lang: "fr".into(),
            },
            TypedObject::Quantity {
                value: 9.81,
                unit: Some("https://units.example.com/m-s2".into()),
            },
            TypedObject::Quantity {
                value: 1.0,
                unit: None,
            },
            TypedObject::Json(br#"{"k": [1, 2]}"#.to_vec()),
            TypedObject::Binary(vec![0, 1, 2, 255]),
        ]
    }

    fn random_triples(n: usize) -> Vec<Triple> {
        use rand::Rng;
        let mut rng = rand::rng();
        let objects = sample_objects();
        (0..n)
            .map(|i| {
                let host = ["a.example.com", "b.example.com", "example.org"]
                    [rng.random_range(0..3)];
                Triple::new(
                    eid(host, &format!("items/{}", rng.random_range(0..500))),
                    format!("pred{}", rng.random_range(0..20)),
                    objects[i % objects.len()].clone(),
                    now_ms() + rng.random_range(0..10_000),
                    TransactionId::generate(),
                )
            })
            .collect()
    }

    #[test]
    fn test_round_trip_all_tag_types() {
        let triples: Vec<Triple> = sample_objects()
            .into_iter()
            .enumerate()
            .map(|(i, obj)| {
                Triple::new(
                    eid("example.com", &format!("things/{i}")),
                    format!("p{i}"),
                    obj,
                    1_700_000_000_000 + i as i64,
                    TransactionId::generate(),
                )
            })
            .collect();

        let bytes = encode_chunk("https://example.com/things", &triples).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();

        let mut expected = triples;
        sort_triples(&mut expected);
        assert_eq!(decoded.triples, expected);
        assert_eq!(decoded.meta.namespace, "https://example.com/things");
        assert_eq!(decoded.meta.triple_count as usize, expected.len());
    }

    #[test]
    fn test_round_trip_1000_random_triples() {
        let triples = random_triples(1000);
        let bytes = encode_chunk("https://example.com/items", &triples).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();

        let mut expected = triples;
        sort_triples(&mut expected);
        assert_eq!(decoded.triples.len(), 1000);
        assert_eq!(decoded.triples, expected);

        // Canonical order is by subject sort key.
        for pair in decoded.triples.windows(2) {
            assert!(pair[0].subject.sort_key() <= pair[1].subject.sort_key());
        }
    }

    #[test]
    fn test_bloom_covers_exactly_the_subjects_present() {
        let triples = random_triples(200);
        let bytes = encode_chunk("https://example.com/items", &triples).unwrap();
        let reader = ChunkReader::parse(&bytes).unwrap();
        for t in &triples {
            assert!(reader.might_contain(&t.subject));
        }
    }

    #[test]
    fn test_reader_exposes_meta_without_column_decode() {
        let triples = random_triples(50);
        let bytes = encode_chunk("https://example.com/items", &triples).unwrap();
        let reader = ChunkReader::parse(&bytes).unwrap();
        assert_eq!(reader.meta().triple_count, 50);
        assert!(reader.meta().min_timestamp <= reader.meta().max_timestamp);
    }

    #[test]
    fn test_corrupt_chunk_rejected() {
        let triples = random_triples(10);
        let mut bytes = encode_chunk("https://example.com/items", &triples).unwrap();

        // Flip a byte inside the header region.
        bytes[7] ^= 0xFF;
        assert!(decode_chunk(&bytes).is_err());
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        let triples = random_triples(10);
        let bytes = encode_chunk("https://example.com/items", &triples).unwrap();
        assert!(decode_chunk(&bytes[..bytes.len() / 2]).is_err());
        assert!(decode_chunk(&[]).is_err());
    }

    #[test]
    fn test_empty_chunk_round_trips() {
        let bytes = encode_chunk("https://example.com/empty", &[]).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert!(decoded.triples.is_empty());
        assert_eq!(decoded.meta.triple_count, 0);
    }
}
