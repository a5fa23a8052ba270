use serde::{Deserialize, Serialize};
use url::Url;

use super::entity::EntityId;
use crate::error::{GraphError, Result};

/// Payload bounds for JSON/BINARY objects and strings.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
pub const MAX_JSON_DEPTH: usize = 10;
pub const MAX_JSON_KEYS: usize = 1000;

/// Stable storage tag for each object type. The codes are written into the
/// `obj_type` column and GraphCol chunks and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjType {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Url = 6,
    Ref = 7,
    Timestamp = 8,
    GeoPoint = 9,
    Monolingual = 10,
    Quantity = 11,
    Json = 12,
    Binary = 13,
}

impl ObjType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => ObjType::Null,
            1 => ObjType::Bool,
            2 => ObjType::Int32,
            3 => ObjType::Int64,
            4 => ObjType::Float64,
            5 => ObjType::String,
            6 => ObjType::Url,
            7 => ObjType::Ref,
            8 => ObjType::Timestamp,
            9 => ObjType::GeoPoint,
            10 => ObjType::Monolingual,
            11 => ObjType::Quantity,
            12 => ObjType::Json,
            13 => ObjType::Binary,
            other => {
                return Err(GraphError::Fatal(format!("unknown obj_type code {other}")));
            }
        })
    }
}

/// A tagged object value. Exactly one tag, carrying only its own payload.
/// `Null` is the tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedObject {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Url(String),
    Ref(EntityId),
    Timestamp(i64),
    GeoPoint { lat: f64, lng: f64 },
    Monolingual { text: String, lang: String },
    Quantity { value: f64, unit: Option<String> },
    Json(Vec<u8>),
    Binary(Vec<u8>),
}

impl TypedObject {
    pub fn obj_type(&self) -> ObjType {
        match self {
            TypedObject::Null => ObjType::Null,
            TypedObject::Bool(_) => ObjType::Bool,
            TypedObject::Int32(_) => ObjType::Int32,
            TypedObject::Int64(_) => ObjType::Int64,
            TypedObject::Float64(_) => ObjType::Float64,
            TypedObject::String(_) => ObjType::String,
            TypedObject::Url(_) => ObjType::Url,
            TypedObject::Ref(_) => ObjType::Ref,
            TypedObject::Timestamp(_) => ObjType::Timestamp,
            TypedObject::GeoPoint { .. } => ObjType::GeoPoint,
            TypedObject::Monolingual { .. } => ObjType::Monolingual,
            TypedObject::Quantity { .. } => ObjType::Quantity,
            TypedObject::Json(_) => ObjType::Json,
            TypedObject::Binary(_) => ObjType::Binary,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, TypedObject::Null)
    }

    /// Type-specific invariants. Called on every write path.
    pub fn validate(&self) -> Result<()> {
        match self {
            TypedObject::Null
            | TypedObject::Bool(_)
            | TypedObject::Int32(_)
            | TypedObject::Int64(_)
            | TypedObject::Timestamp(_) => Ok(()),

            TypedObject::Float64(v) => {
                if !v.is_finite() {
                    return Err(GraphError::Validation("float value must be finite".into()));
                }
                Ok(())
            }

            TypedObject::String(s) => {
                if s.len() > MAX_PAYLOAD_BYTES {
                    return Err(GraphError::Validation(format!(
                        "string exceeds {MAX_PAYLOAD_BYTES} bytes"
                    )));
                }
                Ok(())
            }

            TypedObject::Url(u) => {
                validate_absolute_url(u)?;
                Ok(())
            }

            TypedObject::Ref(id) => {
                // Existence is not a foreign-key constraint; only the id shape
                // is checked.
                EntityId::parse(id.as_str()).map(|_| ())
            }

            TypedObject::GeoPoint { lat, lng } => {
                if !(-90.0..=90.0).contains(lat) {
                    return Err(GraphError::Validation(format!(
                        "latitude {lat} out of range [-90, 90]"
                    )));
                }
                if !(-180.0..=180.0).contains(lng) {
                    return Err(GraphError::Validation(format!(
                        "longitude {lng} out of range [-180, 180]"
                    )));
                }
                Ok(())
            }

            TypedObject::Monolingual { text, lang } => {
                if text.len() > MAX_PAYLOAD_BYTES {
                    return Err(GraphError::Validation(format!(
                        "text exceeds {MAX_PAYLOAD_BYTES} bytes"
                    )));
                }
                if lang.is_empty() || lang.len() > 35 {
                    return Err(GraphError::Validation(format!(
                        "language tag {lang:?} is not a valid BCP 47 length"
                    )));
                }
                Ok(())
            }

            TypedObject::Quantity { value, unit } => {
                if !value.is_finite() {
                    return Err(GraphError::Validation(
                        "quantity value must be finite".into(),
                    ));
                }
                if let Some(u) = unit {
                    validate_absolute_url(u)?;
                }
                Ok(())
            }

            TypedObject::Json(bytes) => {
                if bytes.len() > MAX_PAYLOAD_BYTES {
                    return Err(GraphError::Validation(format!(
                        "json payload exceeds {MAX_PAYLOAD_BYTES} bytes"
                    )));
                }
                let value: serde_json::Value = serde_json::from_slice(bytes)
                    .map_err(|e| GraphError::Validation(format!("json payload: {e}")))?;
                let mut keys = 0usize;
                check_json_limits(&value, 1, &mut keys)?;
                Ok(())
            }

            TypedObject::Binary(bytes) => {
                if bytes.len() > MAX_PAYLOAD_BYTES {
                    return Err(GraphError::Validation(format!(
                        "binary payload exceeds {MAX_PAYLOAD_BYTES} bytes"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn validate_absolute_url(raw: &str) -> Result<()> {
    let url =
        Url::parse(raw).map_err(|e| GraphError::Validation(format!("url {raw:?}: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(GraphError::Validation(format!(
            "url {raw:?}: scheme must be http or https"
        )));
    }
    Ok(())
}

fn check_json_limits(value: &serde_json::Value, depth: usize, keys: &mut usize) -> Result<()> {
    if depth > MAX_JSON_DEPTH {
        return Err(GraphError::Validation(format!(
            "json nesting exceeds depth {MAX_JSON_DEPTH}"
        )));
    }
    match value {
        serde_json::Value::Object(map) => {
            *keys += map.len();
            if *keys > MAX_JSON_KEYS {
                return Err(GraphError::Validation(format!(
                    "json payload exceeds {MAX_JSON_KEYS} keys"
                )));
            }
            for v in map.values() {
                check_json_limits(v, depth + 1, keys)?;
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                check_json_limits(v, depth + 1, keys)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_range() {
        assert!(
            TypedObject::GeoPoint {
                lat: 37.7749,
                lng: -122.4194
            }
            .validate()
            .is_ok()
        );
        assert!(TypedObject::GeoPoint { lat: 91.0, lng: 0.0 }.validate().is_err());
        assert!(
            TypedObject::GeoPoint {
                lat: 0.0,
                lng: -180.5
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_json_depth_limit() {
        let mut nested = "1".to_string();
        for _ in 0..12 {
            nested = format!("[{nested}]");
        }
        let obj = TypedObject::Json(nested.into_bytes());
        assert!(obj.validate().is_err());

        let flat = TypedObject::Json(br#"{"a": 1, "b": [1, 2, 3]}"#.to_vec());
        assert!(flat.validate().is_ok());
    }

    #[test]
    fn test_url_must_be_absolute() {
        assert!(TypedObject::Url("https://example.com/x".into()).validate().is_ok());
        assert!(TypedObject::Url("not-a-url".into()).validate().is_err());
    }

    #[test]
    fn test_tag_codes_round_trip() {
        for code in 0u8..=13 {
            assert_eq!(ObjType::from_code(code).unwrap().code(), code);
        }
        assert!(ObjType::from_code(14).is_err());
    }

    #[test]
    fn test_wire_serde_round_trip() {
        let objects = vec![
            TypedObject::Null,
            TypedObject::Int64(-7),
            TypedObject::Monolingual {
                text: "hello".into(),
                lang: "en".into(),
            },
            TypedObject::Quantity {
                value: 9.81,
                unit: Some("https://units.example.com/m-s2".into()),
            },
        ];
        for obj in objects {
            let json = serde_json::to_string(&obj).unwrap();
            let back: TypedObject = serde_json::from_str(&json).unwrap();
            assert_eq!(back, obj);
        }
    }
}
