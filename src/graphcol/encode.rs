use std::collections::{BTreeSet, HashMap};

use flate2::Crc;

use super::*;
use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::models::{Triple, TypedObject};

/// One column staged for writing: name, encoding, and the raw payload before
/// compression.
struct Column {
    name: &'static str,
    encoding: u8,
    raw: Vec<u8>,
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
    buf.extend_from_slice(b);
}

/// Builds a sparse column: a null bitmap over all rows followed by the
/// present values in row order.
struct SparseColumn {
    bitmap: Vec<u8>,
    values: Vec<u8>,
}

impl SparseColumn {
    fn new(rows: usize) -> Self {
        SparseColumn {
            bitmap: vec![0u8; rows.div_ceil(8)],
            values: Vec::new(),
        }
    }

    fn mark(&mut self, row: usize) {
        self.bitmap[row / 8] |= 1 << (row % 8);
    }

    fn into_raw(self) -> Vec<u8> {
        let mut raw = self.bitmap;
        raw.extend_from_slice(&self.values);
        raw
    }
}

/// Encode a batch of triples from one namespace into a GraphCol chunk.
/// The batch is sorted into canonical order first.
pub fn encode_chunk(namespace: &str, triples: &[Triple]) -> Result<Vec<u8>> {
    let mut sorted: Vec<Triple> = triples.to_vec();
    sort_triples(&mut sorted);
    let rows = sorted.len();

    let min_ts = sorted.iter().map(|t| t.timestamp).min().unwrap_or(0);
    let max_ts = sorted.iter().map(|t| t.timestamp).max().unwrap_or(0);

    // The bloom filter covers exactly the subjects present.
    let subjects: BTreeSet<&str> = sorted.iter().map(|t| t.subject.as_str()).collect();
    let mut bloom = BloomFilter::new(subjects.len().max(1) as u32, 0.01);
    for s in &subjects {
        bloom.add(s.as_bytes());
    }

    // ── Dense columns ──

    let mut subject_raw = Vec::new();
    let mut obj_type_raw = Vec::with_capacity(rows);
    let mut timestamp_raw = Vec::with_capacity(rows * 8);
    let mut tx_id_raw = Vec::new();
    for t in &sorted {
        put_str(&mut subject_raw, t.subject.as_str());
        obj_type_raw.push(t.object.obj_type().code());
        timestamp_raw.extend_from_slice(&t.timestamp.to_le_bytes());
        put_str(&mut tx_id_raw, t.tx_id.as_str());
    }

    // Predicates repeat heavily; dictionary-encode them.
    let mut predicate_dict: Vec<&str> = Vec::new();
    let mut predicate_ids: HashMap<&str, u32> = HashMap::new();
    let mut predicate_indexes: Vec<u32> = Vec::with_capacity(rows);
    for t in &sorted {
        let next = predicate_dict.len() as u32;
        let idx = *predicate_ids.entry(t.predicate.as_str()).or_insert_with(|| {
            predicate_dict.push(t.predicate.as_str());
            next
        });
        predicate_indexes.push(idx);
    }
    let mut predicate_raw = Vec::new();
    predicate_raw.extend_from_slice(&(predicate_dict.len() as u32).to_le_bytes());
    for entry in &predicate_dict {
        put_str(&mut predicate_raw, entry);
    }
    for idx in &predicate_indexes {
        predicate_raw.extend_from_slice(&idx.to_le_bytes());
    }

    // ── Sparse value columns ──

    let mut obj_ref = SparseColumn::new(rows);
    let mut obj_string = SparseColumn::new(rows);
    let mut obj_int64 = SparseColumn::new(rows);
    let mut obj_float64 = SparseColumn::new(rows);
    let mut obj_bool = SparseColumn::new(rows);
    let mut obj_timestamp = SparseColumn::new(rows);
    let mut obj_lat = SparseColumn::new(rows);
    let mut obj_lng = SparseColumn::new(rows);
    let mut obj_lang = SparseColumn::new(rows);
    let mut obj_unit = SparseColumn::new(rows);
    let mut obj_binary = SparseColumn::new(rows);

    for (row, t) in sorted.iter().enumerate() {
        match &t.object {
            TypedObject::Null => {}
            TypedObject::Bool(v) => {
                obj_bool.mark(row);
                obj_bool.values.push(*v as u8);
            }
            TypedObject::Int32(v) => {
                obj_int64.mark(row);
                obj_int64.values.extend_from_slice(&(*v as i64).to_le_bytes());
            }
            TypedObject::Int64(v) => {
                obj_int64.mark(row);
                obj_int64.values.extend_from_slice(&v.to_le_bytes());
            }
            TypedObject::Float64(v) => {
                obj_float64.mark(row);
                obj_float64.values.extend_from_slice(&v.to_le_bytes());
            }
            TypedObject::String(s) | TypedObject::Url(s) => {
                obj_string.mark(row);
                put_str(&mut obj_string.values, s);
            }
            TypedObject::Ref(id) => {
                obj_ref.mark(row);
                put_str(&mut obj_ref.values, id.as_str());
            }
            TypedObject::Timestamp(v) => {
                obj_timestamp.mark(row);
                obj_timestamp.values.extend_from_slice(&v.to_le_bytes());
            }
            TypedObject::GeoPoint { lat, lng } => {
                obj_lat.mark(row);
                obj_lat.values.extend_from_slice(&lat.to_le_bytes());
                obj_lng.mark(row);
                obj_lng.values.extend_from_slice(&lng.to_le_bytes());
            }
            TypedObject::Monolingual { text, lang } => {
                obj_string.mark(row);
                put_str(&mut obj_string.values, text);
                obj_lang.mark(row);
                put_str(&mut obj_lang.values, lang);
            }
            TypedObject::Quantity { value, unit } => {
                obj_float64.mark(row);
                obj_float64.values.extend_from_slice(&value.to_le_bytes());
                if let Some(u) = unit {
                    obj_unit.mark(row);
                    put_str(&mut obj_unit.values, u);
                }
            }
            TypedObject::Json(bytes) | TypedObject::Binary(bytes) => {
                obj_binary.mark(row);
                put_bytes(&mut obj_binary.values, bytes);
            }
        }
    }

    let columns = vec![
        Column {
            name: COL_SUBJECT,
            encoding: ENCODING_PLAIN,
            raw: subject_raw,
        },
        Column {
            name: COL_PREDICATE,
            encoding: ENCODING_DICT,
            raw: predicate_raw,
        },
        Column {
            name: COL_OBJ_TYPE,
            encoding: ENCODING_PLAIN,
            raw: obj_type_raw,
        },
        Column {
            name: COL_TIMESTAMP,
            encoding: ENCODING_PLAIN,
            raw: timestamp_raw,
        },
        Column {
            name: COL_TX_ID,
            encoding: ENCODING_PLAIN,
            raw: tx_id_raw,
        },
        Column {
            name: COL_OBJ_REF,
            encoding: ENCODING_PLAIN,
            raw: obj_ref.into_raw(),
        },
        Column {
            name: COL_OBJ_STRING,
            encoding: ENCODING_PLAIN,
            raw: obj_string.into_raw(),
        },
        Column {
            name: COL_OBJ_INT64,
            encoding: ENCODING_PLAIN,
            raw: obj_int64.into_raw(),
        },
        Column {
            name: COL_OBJ_FLOAT64,
            encoding: ENCODING_PLAIN,
            raw: obj_float64.into_raw(),
        },
        Column {
            name: COL_OBJ_BOOL,
            encoding: ENCODING_PLAIN,
            raw: obj_bool.into_raw(),
        },
        Column {
            name: COL_OBJ_TIMESTAMP,
            encoding: ENCODING_PLAIN,
            raw: obj_timestamp.into_raw(),
        },
        Column {
            name: COL_OBJ_LAT,
            encoding: ENCODING_PLAIN,
            raw: obj_lat.into_raw(),
        },
        Column {
            name: COL_OBJ_LNG,
            encoding: ENCODING_PLAIN,
            raw: obj_lng.into_raw(),
        },
        Column {
            name: COL_OBJ_LANG,
            encoding: ENCODING_PLAIN,
            raw: obj_lang.into_raw(),
        },
        Column {
            name: COL_OBJ_UNIT,
            encoding: ENCODING_PLAIN,
            raw: obj_unit.into_raw(),
        },
        Column {
            name: COL_OBJ_BINARY,
            encoding: ENCODING_PLAIN,
            raw: obj_binary.into_raw(),
        },
    ];

    // Compress payloads, then lay the chunk out back to front so directory
    // offsets are absolute.
    let mut compressed: Vec<(u32, Vec<u8>)> = Vec::with_capacity(columns.len());
    for col in &columns {
        let payload = zstd::encode_all(&col.raw[..], 3)?;
        compressed.push((col.raw.len() as u32, payload));
    }

    let mut header = Vec::new();
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&(namespace.len() as u32).to_le_bytes());
    header.extend_from_slice(namespace.as_bytes());
    header.extend_from_slice(&(rows as u32).to_le_bytes());
    header.extend_from_slice(&min_ts.to_le_bytes());
    header.extend_from_slice(&max_ts.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // flags

    let bloom_bytes = bloom.serialize();

    let directory_len: usize = 2 + columns
        .iter()
        .map(|c| 2 + c.name.len() + 1 + 4 + 4 + 4)
        .sum::<usize>();
    let columns_start = header.len() + directory_len + bloom_bytes.len();

    let mut directory = Vec::with_capacity(directory_len);
    directory.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    let mut offset = columns_start as u32;
    for (col, (uncompressed, payload)) in columns.iter().zip(compressed.iter()) {
        directory.extend_from_slice(&(col.name.len() as u16).to_le_bytes());
        directory.extend_from_slice(col.name.as_bytes());
        directory.push(col.encoding);
        directory.extend_from_slice(&offset.to_le_bytes());
        directory.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        directory.extend_from_slice(&uncompressed.to_le_bytes());
        offset += payload.len() as u32;
    }

    let mut out = Vec::with_capacity(offset as usize + 8);
    out.extend_from_slice(&header);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&bloom_bytes);
    for (_, payload) in &compressed {
        out.extend_from_slice(payload);
    }

    let mut crc = Crc::new();
    crc.update(&out[..columns_start]);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(MAGIC);

    Ok(out)
}
