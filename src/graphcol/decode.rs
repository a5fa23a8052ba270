use std::collections::HashMap;

use flate2::Crc;

use super::*;
use crate::bloom::BloomFilter;
use crate::error::{GraphError, Result};
use crate::models::{EntityId, ObjType, TransactionId, Triple, TypedObject};

fn corrupt(what: &str) -> GraphError {
    GraphError::Fatal(format!("graphcol chunk corrupt: {what}"))
}

/// Bounds-checked little-endian reader over the chunk bytes.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| corrupt("truncated"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("invalid utf-8"))
    }

    fn byte_slice(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

#[derive(Debug, Clone)]
struct DirEntry {
    encoding: u8,
    offset: usize,
    size: usize,
    uncompressed: usize,
}

#[derive(Debug)]
pub struct DecodedChunk {
    pub meta: ChunkMeta,
    pub bloom: BloomFilter,
    pub triples: Vec<Triple>,
}

/// Parses the header, directory and bloom filter eagerly; column payloads
/// are decompressed only when asked for.
pub struct ChunkReader<'a> {
    bytes: &'a [u8],
    meta: ChunkMeta,
    bloom: BloomFilter,
    directory: HashMap<String, DirEntry>,
}

impl<'a> ChunkReader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 8 + MAGIC.len() * 2 {
            return Err(corrupt("too short"));
        }
        if &bytes[bytes.len() - 4..] != MAGIC {
            return Err(corrupt("bad trailing magic"));
        }

        let mut cur = Cursor::new(bytes);
        if cur.take(4)? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = cur.u16()?;
        if version != VERSION {
            return Err(GraphError::Fatal(format!(
                "graphcol version {version} is not supported"
            )));
        }
        let namespace = cur.str()?;
        let triple_count = cur.u32()?;
        let min_timestamp = cur.i64()?;
        let max_timestamp = cur.i64()?;
        let _flags = cur.u32()?;

        let column_count = cur.u16()?;
        let mut directory = HashMap::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let name_len = cur.u16()? as usize;
            let name = String::from_utf8(cur.take(name_len)?.to_vec())
                .map_err(|_| corrupt("invalid column name"))?;
            let encoding = cur.u8()?;
            let offset = cur.u32()? as usize;
            let size = cur.u32()? as usize;
            let uncompressed = cur.u32()? as usize;
            directory.insert(
                name,
                DirEntry {
                    encoding,
                    offset,
                    size,
                    uncompressed,
                },
            );
        }

        // The bloom section is self-delimiting: 17 fixed bytes carrying m,
        // then ceil(m / 8) bit bytes.
        let bloom_start = cur.pos;
        let m_bytes = cur
            .bytes
            .get(bloom_start + 8..bloom_start + 12)
            .ok_or_else(|| corrupt("truncated bloom"))?;
        let m = u32::from_le_bytes(m_bytes.try_into().unwrap());
        let bloom_end = bloom_start + 17 + m.div_ceil(8) as usize;
        if bloom_end > bytes.len() {
            return Err(corrupt("truncated bloom"));
        }
        let bloom = BloomFilter::deserialize(&bytes[bloom_start..bloom_end])?;

        let stored_crc = u32::from_le_bytes(
            bytes[bytes.len() - 8..bytes.len() - 4].try_into().unwrap(),
        );
        let mut crc = Crc::new();
        crc.update(&bytes[..bloom_end]);
        if crc.sum() != stored_crc {
            return Err(corrupt("crc mismatch"));
        }

        Ok(ChunkReader {
            bytes,
            meta: ChunkMeta {
                namespace,
                triple_count,
                min_timestamp,
                max_timestamp,
            },
            bloom,
            directory,
        })
    }

    pub fn meta(&self) -> &ChunkMeta {
        &self.meta
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    /// Routing probe using only the embedded bloom filter; no column is
    /// touched.
    pub fn might_contain(&self, subject: &EntityId) -> bool {
        self.bloom.might_exist(subject.as_str().as_bytes())
    }

    fn column(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .directory
            .get(name)
            .ok_or_else(|| corrupt(&format!("missing column {name}")))?;
        let end = entry
            .offset
            .checked_add(entry.size)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| corrupt("column out of bounds"))?;
        let raw = zstd::decode_all(&self.bytes[entry.offset..end])?;
        if raw.len() != entry.uncompressed {
            return Err(corrupt(&format!("column {name} size mismatch")));
        }
        Ok(raw)
    }

    fn string_column(&self, name: &str, rows: usize) -> Result<Vec<String>> {
        let raw = self.column(name)?;
        let mut cur = Cursor::new(&raw);
        (0..rows).map(|_| cur.str()).collect()
    }

    fn dict_string_column(&self, name: &str, rows: usize) -> Result<Vec<String>> {
        let entry = self
            .directory
            .get(name)
            .ok_or_else(|| corrupt(&format!("missing column {name}")))?;
        if entry.encoding != ENCODING_DICT {
            return self.string_column(name, rows);
        }
        let raw = self.column(name)?;
        let mut cur = Cursor::new(&raw);
        let dict_len = cur.u32()? as usize;
        let dict: Vec<String> = (0..dict_len)
            .map(|_| cur.str())
            .collect::<Result<Vec<_>>>()?;
        (0..rows)
            .map(|_| {
                let idx = cur.u32()? as usize;
                dict.get(idx)
                    .cloned()
                    .ok_or_else(|| corrupt("dictionary index out of range"))
            })
            .collect()
    }

    fn sparse<T>(
        &self,
        name: &str,
        rows: usize,
        mut read: impl FnMut(&mut Cursor) -> Result<T>,
    ) -> Result<Vec<Option<T>>> {
        let raw = self.column(name)?;
        let bitmap_len = rows.div_ceil(8);
        if raw.len() < bitmap_len {
            return Err(corrupt(&format!("column {name} bitmap truncated")));
        }
        let (bitmap, values) = raw.split_at(bitmap_len);
        let mut cur = Cursor::new(values);
        (0..rows)
            .map(|row| {
                if bitmap[row / 8] & (1 << (row % 8)) != 0 {
                    read(&mut cur).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    /// Decode every row, reconstructing the canonical sorted order.
    pub fn triples(&self) -> Result<Vec<Triple>> {
        let rows = self.meta.triple_count as usize;

        let subjects = self.string_column(COL_SUBJECT, rows)?;
        let predicates = self.dict_string_column(COL_PREDICATE, rows)?;
        let obj_types = self.column(COL_OBJ_TYPE)?;
        if obj_types.len() != rows {
            return Err(corrupt("obj_type column size mismatch"));
        }
        let timestamps = {
            let raw = self.column(COL_TIMESTAMP)?;
            let mut cur = Cursor::new(&raw);
            (0..rows).map(|_| cur.i64()).collect::<Result<Vec<_>>>()?
        };
        let tx_ids = self.string_column(COL_TX_ID, rows)?;

        let obj_ref = self.sparse(COL_OBJ_REF, rows, |c| c.str())?;
        let obj_string = self.sparse(COL_OBJ_STRING, rows, |c| c.str())?;
        let obj_int64 = self.sparse(COL_OBJ_INT64, rows, |c| c.i64())?;
        let obj_float64 = self.sparse(COL_OBJ_FLOAT64, rows, |c| c.f64())?;
        let obj_bool = self.sparse(COL_OBJ_BOOL, rows, |c| c.u8())?;
        let obj_timestamp = self.sparse(COL_OBJ_TIMESTAMP, rows, |c| c.i64())?;
        let obj_lat = self.sparse(COL_OBJ_LAT, rows, |c| c.f64())?;
        let obj_lng = self.sparse(COL_OBJ_LNG, rows, |c| c.f64())?;
        let obj_lang = self.sparse(COL_OBJ_LANG, rows, |c| c.str())?;
        let obj_unit = self.sparse(COL_OBJ_UNIT, rows, |c| c.str())?;
        let obj_binary = self.sparse(COL_OBJ_BINARY, rows, |c| c.byte_slice())?;

        let required = |name: &str, row: usize| corrupt(&format!("row {row} missing {name}"));

        let mut out = Vec::with_capacity(rows);
        for row in 0..rows {
            let tag = ObjType::from_code(obj_types[row])?;
            let object = match tag {
                ObjType::Null => TypedObject::Null,
                ObjType::Bool => TypedObject::Bool(
                    obj_bool[row].ok_or_else(|| required(COL_OBJ_BOOL, row))? != 0,
                ),
                ObjType::Int32 => TypedObject::Int32(
                    obj_int64[row].ok_or_else(|| required(COL_OBJ_INT64, row))? as i32,
                ),
                ObjType::Int64 => TypedObject::Int64(
                    obj_int64[row].ok_or_else(|| required(COL_OBJ_INT64, row))?,
                ),
                ObjType::Float64 => TypedObject::Float64(
                    obj_float64[row].ok_or_else(|| required(COL_OBJ_FLOAT64, row))?,
                ),
                ObjType::String => TypedObject::String(
                    obj_string[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_STRING, row))?,
                ),
                ObjType::Url => TypedObject::Url(
                    obj_string[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_STRING, row))?,
                ),
                ObjType::Ref => TypedObject::Ref(EntityId::from_trusted(
                    obj_ref[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_REF, row))?,
                )),
                ObjType::Timestamp => TypedObject::Timestamp(
                    obj_timestamp[row].ok_or_else(|| required(COL_OBJ_TIMESTAMP, row))?,
                ),
                ObjType::GeoPoint => TypedObject::GeoPoint {
                    lat: obj_lat[row].ok_or_else(|| required(COL_OBJ_LAT, row))?,
                    lng: obj_lng[row].ok_or_else(|| required(COL_OBJ_LNG, row))?,
                },
                ObjType::Monolingual => TypedObject::Monolingual {
                    text: obj_string[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_STRING, row))?,
                    lang: obj_lang[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_LANG, row))?,
                },
                ObjType::Quantity => TypedObject::Quantity {
                    value: obj_float64[row].ok_or_else(|| required(COL_OBJ_FLOAT64, row))?,
                    unit: obj_unit[row].clone(),
                },
                ObjType::Json => TypedObject::Json(
                    obj_binary[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_BINARY, row))?,
                ),
                ObjType::Binary => TypedObject::Binary(
                    obj_binary[row]
                        .clone()
                        .ok_or_else(|| required(COL_OBJ_BINARY, row))?,
                ),
            };
            out.push(Triple {
                subject: EntityId::from_trusted(subjects[row].clone()),
                predicate: predicates[row].clone(),
                object,
                timestamp: timestamps[row],
                tx_id: TransactionId::from_trusted(tx_ids[row].clone()),
            });
        }
        Ok(out)
    }
}

/// Full decode: header, bloom and every row.
pub fn decode_chunk(bytes: &[u8]) -> Result<DecodedChunk> {
    let reader = ChunkReader::parse(bytes)?;
    let triples = reader.triples()?;
    Ok(DecodedChunk {
        meta: reader.meta.clone(),
        bloom: reader.bloom.clone(),
        triples,
    })
}
