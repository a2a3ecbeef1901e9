//! Random GeoJSON geometries. Polygons are convex hulls of random points so
//! their rings never self-intersect.

use serde::Serialize;
use serde_json::{Value, json};

use crate::errors::LeafError;
use crate::random::RandomSource;
use fakeflow_schema::{GeoJsonSpec, GeometrySpec};

/// `[lon, lat]`.
pub type Position = [f64; 2];

const WORLD: Bounds = Bounds {
    min_lon: -180.0,
    max_lon: 180.0,
    min_lat: -90.0,
    max_lat: 90.0,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Coordinates {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    /// Coordinates copied from the config.
    Explicit(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Point" => Some(GeometryKind::Point),
            "MultiPoint" => Some(GeometryKind::MultiPoint),
            "LineString" => Some(GeometryKind::LineString),
            "MultiLineString" => Some(GeometryKind::MultiLineString),
            "Polygon" => Some(GeometryKind::Polygon),
            "MultiPolygon" => Some(GeometryKind::MultiPolygon),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::LineString => "LineString",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPolygon => "MultiPolygon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min_lon: f64,
    max_lon: f64,
    min_lat: f64,
    max_lat: f64,
}

impl Bounds {
    /// Each axis falls back to the world extent when both ends are zero.
    fn of(spec: &GeometrySpec) -> Self {
        let (min_lon, max_lon) = if spec.min_lon == 0.0 && spec.max_lon == 0.0 {
            (WORLD.min_lon, WORLD.max_lon)
        } else {
            (spec.min_lon, spec.max_lon)
        };
        let (min_lat, max_lat) = if spec.min_lat == 0.0 && spec.max_lat == 0.0 {
            (WORLD.min_lat, WORLD.max_lat)
        } else {
            (spec.min_lat, spec.max_lat)
        };
        Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    fn point(&self, random: &RandomSource) -> Position {
        [
            random.range_f64(self.min_lon, self.max_lon),
            random.range_f64(self.min_lat, self.max_lat),
        ]
    }

    fn points(&self, count: usize, random: &RandomSource) -> Vec<Position> {
        (0..count).map(|_| self.point(random)).collect()
    }
}

/// Coordinates for one geometry spec; `None` for an unknown kind.
pub fn synthesize(spec: &GeometrySpec, random: &RandomSource) -> Option<(GeometryKind, Coordinates)> {
    let kind = GeometryKind::parse(&spec.kind)?;
    if let Some(explicit) = &spec.coordinates {
        return Some((kind, Coordinates::Explicit(explicit.clone())));
    }

    let bounds = Bounds::of(spec);
    let count = || point_count(spec, random);
    let coordinates = match kind {
        GeometryKind::Point => Coordinates::Point(bounds.point(random)),
        GeometryKind::MultiPoint => Coordinates::MultiPoint(bounds.points(count(), random)),
        GeometryKind::LineString => Coordinates::LineString(bounds.points(count(), random)),
        GeometryKind::MultiLineString => {
            let lines = count();
            Coordinates::MultiLineString(
                (0..lines)
                    .map(|_| bounds.points(count(), random))
                    .collect(),
            )
        }
        GeometryKind::Polygon => Coordinates::Polygon(vec![polygon_ring(&bounds, count(), random)]),
        GeometryKind::MultiPolygon => {
            let polygons = spec.polygons_count.max(1);
            Coordinates::MultiPolygon(
                (0..polygons)
                    .map(|_| vec![polygon_ring(&bounds, count(), random)])
                    .collect(),
            )
        }
    };
    Some((kind, coordinates))
}

fn point_count(spec: &GeometrySpec, random: &RandomSource) -> usize {
    let count = if spec.max_points > spec.min_points {
        random.range_usize(spec.min_points, spec.max_points)
    } else {
        spec.min_points
    };
    count.max(1)
}

fn polygon_ring(bounds: &Bounds, count: usize, random: &RandomSource) -> Vec<Position> {
    close_ring(convex_hull(bounds.points(count, random)))
}

/// Andrew's monotone chain. Returns the hull in counter-clockwise order
/// without repeating the first point; three or fewer points come back sorted
/// but otherwise untouched.
pub fn convex_hull(mut points: Vec<Position>) -> Vec<Position> {
    points.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    if points.len() <= 3 {
        return points;
    }

    let mut lower: Vec<Position> = Vec::with_capacity(points.len());
    for point in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *point) <= 0.0 {
            lower.pop();
        }
        lower.push(*point);
    }

    let mut upper: Vec<Position> = Vec::with_capacity(points.len());
    for point in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *point) <= 0.0 {
            upper.pop();
        }
        upper.push(*point);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Repeat the first position at the end. A single-point ring becomes `[p, p]`.
pub fn close_ring(mut ring: Vec<Position>) -> Vec<Position> {
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    ring
}

/// Z component of `(a - o) x (b - o)`; positive for a left turn.
fn cross(o: Position, a: Position, b: Position) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Build the GeoJSON envelope for a geometry leaf, serialized to a string.
pub fn generate_geojson(spec: &GeoJsonSpec, random: &RandomSource) -> Result<String, LeafError> {
    let geometries: Vec<Value> = spec
        .geometries
        .iter()
        .filter_map(|geometry| synthesize(geometry, random))
        .map(|(kind, coordinates)| json!({"type": kind.as_str(), "coordinates": coordinates}))
        .collect();
    if geometries.is_empty() {
        return Err(LeafError::NoGeometries);
    }

    let collection = geometries.len() > 1
        || spec.container_type.as_deref() == Some("GeometryCollection");
    let geometry = if collection {
        json!({"type": "GeometryCollection", "geometries": geometries})
    } else {
        geometries.into_iter().next().unwrap_or(Value::Null)
    };

    let envelope = json!({
        "type": spec.feature_type.as_deref().unwrap_or("Feature"),
        "properties": {"srs": spec.srs.as_deref().unwrap_or_default()},
        "geometry": geometry,
    });
    Ok(serde_json::to_string(&envelope)?)
}
