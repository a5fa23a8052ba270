use rusqlite::{Connection, params};

use crate::error::{GraphError, Result};
use crate::models::EntityId;

pub const DEFAULT_GEOHASH_PRECISION: usize = 6;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Minimum cell dimension in km per geohash precision 1..=8. Used to pick
/// the coarsest prefix whose cell still covers a search radius.
const MIN_CELL_KM: [f64; 8] = [5000.0, 625.0, 156.0, 19.5, 4.89, 0.61, 0.153, 0.019];

/// Encode a coordinate into a geohash cell of the given precision.
pub fn encode(lat: f64, lng: f64, precision: usize) -> String {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lng_range = (-180.0f64, 180.0f64);
    let mut hash = String::with_capacity(precision);
    let mut bit = 0usize;
    let mut ch = 0usize;
    let mut even = true;

    while hash.len() < precision {
        if even {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if lng >= mid {
                ch = (ch << 1) | 1;
                lng_range.0 = mid;
            } else {
                ch <<= 1;
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch = (ch << 1) | 1;
                lat_range.0 = mid;
            } else {
                ch <<= 1;
                lat_range.1 = mid;
            }
        }
        even = !even;
        bit += 1;
        if bit == 5 {
            hash.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}

/// Decode a geohash into its cell center and half-dimensions.
pub fn decode(hash: &str) -> Result<(f64, f64, f64, f64)> {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lng_range = (-180.0f64, 180.0f64);
    let mut even = true;

    for c in hash.bytes() {
        let idx = BASE32
            .iter()
            .position(|&b| b == c.to_ascii_lowercase())
            .ok_or_else(|| {
                GraphError::Validation(format!("invalid geohash character {:?}", c as char))
            })?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1;
            if even {
                let mid = (lng_range.0 + lng_range.1) / 2.0;
                if bit == 1 {
                    lng_range.0 = mid;
                } else {
                    lng_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            even = !even;
        }
    }
    let lat = (lat_range.0 + lat_range.1) / 2.0;
    let lng = (lng_range.0 + lng_range.1) / 2.0;
    let lat_err = (lat_range.1 - lat_range.0) / 2.0;
    let lng_err = (lng_range.1 - lng_range.0) / 2.0;
    Ok((lat, lng, lat_err, lng_err))
}

/// The up-to-8 neighboring cells of a geohash, wrapping across the
/// antimeridian and clipping at the poles.
pub fn neighbors(hash: &str) -> Result<Vec<String>> {
    let (lat, lng, lat_err, lng_err) = decode(hash)?;
    let mut out = Vec::with_capacity(8);
    for dlat in [-1.0f64, 0.0, 1.0] {
        for dlng in [-1.0f64, 0.0, 1.0] {
            if dlat == 0.0 && dlng == 0.0 {
                continue;
            }
            let nlat = lat + dlat * lat_err * 2.0;
            if !(-90.0..=90.0).contains(&nlat) {
                continue;
            }
            let mut nlng = lng + dlng * lng_err * 2.0;
            if nlng > 180.0 {
                nlng -= 360.0;
            } else if nlng < -180.0 {
                nlng += 360.0;
            }
            let cell = encode(nlat, nlng, hash.len());
            if cell != hash && !out.contains(&cell) {
                out.push(cell);
            }
        }
    }
    Ok(out)
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

fn precision_for_radius(radius_km: f64, max_precision: usize) -> usize {
    let max_precision = max_precision.clamp(1, MIN_CELL_KM.len());
    for p in (1..=max_precision).rev() {
        if MIN_CELL_KM[p - 1] >= radius_km {
            return p;
        }
    }
    1
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub subject: EntityId,
    pub predicate: String,
    pub lat: f64,
    pub lng: f64,
    /// Distance from the query center; 0 for bounding-box queries.
    pub distance_km: f64,
}

// ── Index maintenance ──

pub(crate) fn upsert_point(
    conn: &Connection,
    subject: &EntityId,
    predicate: &str,
    lat: f64,
    lng: f64,
    precision: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO geo_index (subject, predicate, geohash, lat, lng) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(subject, predicate) DO UPDATE SET geohash = ?3, lat = ?4, lng = ?5",
        params![subject.as_str(), predicate, encode(lat, lng, precision), lat, lng],
    )?;
    Ok(())
}

pub(crate) fn delete_point(conn: &Connection, subject: &EntityId, predicate: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM geo_index WHERE subject = ?1 AND predicate = ?2",
        params![subject.as_str(), predicate],
    )?;
    Ok(())
}

// ── Queries ──

/// Bounding-box query. When `min_lng > max_lng` the box crosses the
/// antimeridian and is evaluated as two half-boxes.
pub(crate) fn bbox(
    conn: &Connection,
    min_lat: f64,
    min_lng: f64,
    max_lat: f64,
    max_lng: f64,
    limit: usize,
) -> Result<Vec<GeoMatch>> {
    let lng_clause = if min_lng <= max_lng {
        "lng >= ?3 AND lng <= ?4"
    } else {
        "(lng >= ?3 OR lng <= ?4)"
    };
    let sql = format!(
        "SELECT subject, predicate, lat, lng FROM geo_index \
         WHERE lat >= ?1 AND lat <= ?2 AND {lng_clause} \
         ORDER BY subject LIMIT ?5"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(
            params![min_lat, max_lat, min_lng, max_lng, limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(s, p, lat, lng)| GeoMatch {
            subject: EntityId::from_trusted(s),
            predicate: p,
            lat,
            lng,
            distance_km: 0.0,
        })
        .collect())
}

/// Radius query: enumerate the covering cell plus its 8 neighbors at a
/// precision wide enough for the radius, then refine with haversine.
/// Results are sorted by distance ascending.
pub(crate) fn radius(
    conn: &Connection,
    center_lat: f64,
    center_lng: f64,
    radius_km: f64,
    stored_precision: usize,
    limit: usize,
) -> Result<Vec<GeoMatch>> {
    if radius_km <= 0.0 {
        return Err(GraphError::Validation("radius must be positive".into()));
    }
    let precision = precision_for_radius(radius_km, stored_precision);
    let center_cell = encode(center_lat, center_lng, precision);
    let mut cells = neighbors(&center_cell)?;
    cells.push(center_cell);

    let placeholders = (0..cells.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT subject, predicate, lat, lng FROM geo_index \
         WHERE substr(geohash, 1, ?1) IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(cells.len() + 1);
    let precision_param = precision as i64;
    bound.push(&precision_param);
    for cell in &cells {
        bound.push(cell);
    }
    let rows = stmt
        .query_map(bound.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut matches: Vec<GeoMatch> = rows
        .into_iter()
        .filter_map(|(s, p, lat, lng)| {
            let distance_km = haversine_km(center_lat, center_lng, lat, lng);
            (distance_km <= radius_km).then(|| GeoMatch {
                subject: EntityId::from_trusted(s),
                predicate: p,
                lat,
                lng,
                distance_km,
            })
        })
        .collect();
    matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    matches.truncate(limit);
    Ok(matches)
}
