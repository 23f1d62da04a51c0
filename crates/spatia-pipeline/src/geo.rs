//! Geometry primitives
//!
//! Object geometries and standing regions are `geo-types` shapes; the
//! predicates come from the `geo` algorithms. Coordinates are WGS84 degrees
//! with `x = lon` and `y = lat`. Polygon tests treat lon/lat as a plane,
//! circle tests use haversine distance.

use geo::{Closest, ClosestPoint, Contains, HaversineDistance, Intersects};
use geo_types::{Coord, Line, LineString, Point, Polygon, Rect};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::errors::{PipelineError, Result};

/// Latitude/longitude pair as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Validated constructor used by the command parser
    pub fn checked(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(PipelineError::malformed(format!("latitude out of range: {lat}")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(PipelineError::malformed(format!("longitude out of range: {lon}")));
        }
        Ok(Self { lat, lon })
    }
}

impl From<Position> for Coord<f64> {
    fn from(p: Position) -> Self {
        Coord { x: p.lon, y: p.lat }
    }
}

impl From<Coord<f64>> for Position {
    fn from(c: Coord<f64>) -> Self {
        Self { lat: c.y, lon: c.x }
    }
}

fn check_coord(c: &Coord<f64>) -> Result<()> {
    Position::checked(c.y, c.x).map(|_| ())
}

/// Object geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Geometry {
    Point(Point<f64>),
    LineString(LineString<f64>),
    /// Exterior ring only
    Polygon(Polygon<f64>),
}

impl Geometry {
    pub fn point(lat: f64, lon: f64) -> Self {
        Self::Point(Point::new(lon, lat))
    }

    pub fn line(path: impl IntoIterator<Item = Position>) -> Self {
        Self::LineString(path.into_iter().map(Coord::from).collect())
    }

    /// Rectangle stored as a closed polygon
    pub fn bounds(min: Position, max: Position) -> Self {
        Self::Polygon(Rect::new(Coord::from(min), Coord::from(max)).to_polygon())
    }

    pub fn vertices(&self) -> &[Coord<f64>] {
        match self {
            Self::Point(p) => std::slice::from_ref(&p.0),
            Self::LineString(path) => &path.0,
            Self::Polygon(polygon) => &polygon.exterior().0,
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Self::LineString(_))
    }

    /// Representative vertex used for path-crossing checks
    pub fn anchor(&self) -> Option<Coord<f64>> {
        self.vertices().first().copied()
    }

    /// Parse the GeoJSON body of an `OBJECT` argument.
    /// Accepts a bare geometry or a Feature carrying Point, LineString or
    /// Polygon (exterior ring).
    pub fn from_geojson(input: &str) -> Result<Self> {
        let parsed: GeoJson = input
            .parse()
            .map_err(|e: geojson::Error| PipelineError::malformed(format!("invalid geojson: {e}")))?;

        let geometry = match parsed {
            GeoJson::Geometry(geometry) => geometry,
            GeoJson::Feature(feature) => feature
                .geometry
                .ok_or_else(|| PipelineError::malformed("geojson feature has no geometry"))?,
            GeoJson::FeatureCollection(_) => {
                return Err(PipelineError::malformed("geojson feature collections are not objects"))
            }
        };

        match geometry.value {
            geojson::Value::Point(position) => Ok(Self::Point(Point::from(coordinate(&position)?))),
            geojson::Value::LineString(path) => {
                if path.len() < 2 {
                    return Err(PipelineError::malformed("linestring needs at least 2 positions"));
                }
                let path = path.iter().map(|c| coordinate(c)).collect::<Result<LineString<f64>>>()?;
                Ok(Self::LineString(path))
            }
            geojson::Value::Polygon(rings) => {
                let exterior = rings
                    .first()
                    .ok_or_else(|| PipelineError::malformed("polygon has no rings"))?;
                if exterior.len() < 4 || exterior.first() != exterior.last() {
                    return Err(PipelineError::malformed("polygon ring must be closed with at least 4 positions"));
                }
                let ring = exterior.iter().map(|c| coordinate(c)).collect::<Result<LineString<f64>>>()?;
                Ok(Self::Polygon(Polygon::new(ring, Vec::new())))
            }
            _ => Err(PipelineError::malformed("unsupported geojson geometry")),
        }
    }

    fn closest_to(&self, p: &Point<f64>) -> Closest<f64> {
        match self {
            Self::Point(q) => q.closest_point(p),
            Self::LineString(path) => path.closest_point(p),
            Self::Polygon(polygon) if polygon.intersects(p) => Closest::Intersection(*p),
            Self::Polygon(polygon) => polygon.exterior().closest_point(p),
        }
    }
}

// GeoJSON positions are [lon, lat, (alt)]
fn coordinate(values: &[f64]) -> Result<Coord<f64>> {
    match values {
        [lon, lat, ..] => Position::checked(*lat, *lon).map(Coord::from),
        _ => Err(PipelineError::malformed("geojson position needs [lon, lat]")),
    }
}

/// A standing spatial region used by live-query predicates and geofences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegionSpec", into = "RegionSpec")]
pub enum Region {
    Bounds { min: Coord<f64>, max: Coord<f64> },
    Polygon(Polygon<f64>),
    Circle { center: Point<f64>, meters: f64 },
}

impl Region {
    pub fn bounds(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self::Bounds {
            min: Coord { x: min_lon, y: min_lat },
            max: Coord { x: max_lon, y: max_lat },
        }
    }

    pub fn circle(lat: f64, lon: f64, meters: f64) -> Self {
        Self::Circle {
            center: Point::new(lon, lat),
            meters,
        }
    }

    pub fn polygon(ring: impl IntoIterator<Item = Position>) -> Self {
        Self::Polygon(Polygon::new(ring.into_iter().map(Coord::from).collect(), Vec::new()))
    }

    /// Reject regions that cannot contain anything or have bad coordinates
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Bounds { min, max } => {
                check_coord(min)?;
                check_coord(max)?;
                if min.y > max.y || min.x > max.x {
                    return Err(PipelineError::malformed("bounds minimum exceeds maximum"));
                }
            }
            Self::Polygon(polygon) => {
                // closing vertex included
                if polygon.exterior().0.len() < 4 {
                    return Err(PipelineError::malformed("polygon needs at least 3 positions"));
                }
                polygon.exterior().coords().try_for_each(check_coord)?;
            }
            Self::Circle { center, meters } => {
                check_coord(&center.0)?;
                if !meters.is_finite() || *meters <= 0.0 {
                    return Err(PipelineError::malformed("circle radius must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Planar shape of a bounds or polygon region
    fn area(&self) -> Option<Cow<'_, Polygon<f64>>> {
        match self {
            Self::Bounds { min, max } => Some(Cow::Owned(Rect::new(*min, *max).to_polygon())),
            Self::Polygon(polygon) => Some(Cow::Borrowed(polygon)),
            Self::Circle { .. } => None,
        }
    }

    /// The whole geometry lies in the region, boundary included
    pub fn contains(&self, geometry: &Geometry) -> bool {
        match (self, self.area()) {
            (Self::Circle { center, meters }, _) => {
                let vertices = geometry.vertices();
                !vertices.is_empty()
                    && vertices
                        .iter()
                        .all(|c| center.haversine_distance(&Point::from(*c)) <= *meters)
            }
            (_, Some(area)) => match geometry {
                Geometry::Point(p) => area.intersects(p),
                Geometry::LineString(path) => area.contains(path),
                Geometry::Polygon(polygon) => area.contains(polygon),
            },
            (_, None) => false,
        }
    }

    pub fn intersects(&self, geometry: &Geometry) -> bool {
        match (self, self.area()) {
            (Self::Circle { center, meters }, _) => within(geometry.closest_to(center), center, *meters),
            (_, Some(area)) => match geometry {
                Geometry::Point(p) => area.intersects(p),
                Geometry::LineString(path) => area.intersects(path),
                Geometry::Polygon(polygon) => area.intersects(polygon),
            },
            (_, None) => false,
        }
    }

    /// The straight segment `from -> to` touches the region
    pub fn crossed_by(&self, from: Coord<f64>, to: Coord<f64>) -> bool {
        let segment = Line::new(from, to);
        match (self, self.area()) {
            (Self::Circle { center, meters }, _) => within(segment.closest_point(center), center, *meters),
            (_, Some(area)) => area.intersects(&segment),
            (_, None) => false,
        }
    }
}

fn within(closest: Closest<f64>, center: &Point<f64>, meters: f64) -> bool {
    match closest {
        Closest::Intersection(_) => true,
        Closest::SinglePoint(p) => center.haversine_distance(&p) <= meters,
        Closest::Indeterminate => false,
    }
}

/// Wire form of a [`Region`], in lat/lon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RegionSpec {
    Bounds { min: Position, max: Position },
    Polygon { ring: Vec<Position> },
    Circle { center: Position, meters: f64 },
}

impl From<RegionSpec> for Region {
    fn from(spec: RegionSpec) -> Self {
        match spec {
            RegionSpec::Bounds { min, max } => Self::Bounds {
                min: min.into(),
                max: max.into(),
            },
            RegionSpec::Polygon { ring } => Self::polygon(ring),
            RegionSpec::Circle { center, meters } => Self::Circle {
                center: Point::from(Coord::from(center)),
                meters,
            },
        }
    }
}

impl From<Region> for RegionSpec {
    fn from(region: Region) -> Self {
        match region {
            Region::Bounds { min, max } => Self::Bounds {
                min: min.into(),
                max: max.into(),
            },
            Region::Polygon(polygon) => Self::Polygon {
                ring: polygon.exterior().coords().copied().map(Position::from).collect(),
            },
            Region::Circle { center, meters } => Self::Circle {
                center: center.0.into(),
                meters,
            },
        }
    }
}
