//! The subset of GeoJSON the pipeline reads and writes.
//!
//! Boundary sources and the district reference layer may be
//! GeoJSON feature collections; geometries persisted in the
//! geometry package and database are GeoJSON text, which
//! PostGIS reads directly with `ST_GeomFromGeoJSON`.
use anyhow::{bail, ensure, Result};
use geo::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde_derive::*;
use serde_json::{Map, Value};

/// A position: `[x, y]` with an optional altitude.
pub type Position = Vec<f64>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    #[serde(other)]
    Unsupported,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl Feature {
    /// A property rendered as text (numbers are formatted).
    pub fn property(&self, key: &str) -> Option<String> {
        match self.properties.as_ref()?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::Unsupported => "Unsupported",
        }
    }

    /// Polygonal geometries as a multipolygon. Rings are
    /// closed by `geo`, so validity must be judged before
    /// calling this.
    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>> {
        Ok(match self {
            Geometry::Polygon { coordinates } => MultiPolygon::new(vec![polygon(coordinates)?]),
            Geometry::MultiPolygon { coordinates } => MultiPolygon::new(
                coordinates
                    .iter()
                    .map(|p| polygon(p))
                    .collect::<Result<_>>()?,
            ),
            other => bail!("not a polygon: {}", other.kind()),
        })
    }

    pub fn to_polygon(&self) -> Result<Polygon<f64>> {
        match self {
            Geometry::Polygon { coordinates } => polygon(coordinates),
            other => bail!("not a polygon: {}", other.kind()),
        }
    }
}

impl From<&Point<f64>> for Geometry {
    fn from(p: &Point<f64>) -> Self {
        Geometry::Point {
            coordinates: vec![p.x(), p.y()],
        }
    }
}

impl From<&LineString<f64>> for Geometry {
    fn from(l: &LineString<f64>) -> Self {
        Geometry::LineString {
            coordinates: positions(l),
        }
    }
}

impl From<&Polygon<f64>> for Geometry {
    fn from(p: &Polygon<f64>) -> Self {
        Geometry::Polygon {
            coordinates: rings(p),
        }
    }
}

impl From<&MultiPolygon<f64>> for Geometry {
    fn from(mp: &MultiPolygon<f64>) -> Self {
        Geometry::MultiPolygon {
            coordinates: mp.iter().map(rings).collect(),
        }
    }
}

pub fn coord(p: &[f64]) -> Result<Coord<f64>> {
    ensure!(p.len() >= 2, "position needs at least 2 values");
    Ok(Coord { x: p[0], y: p[1] })
}

pub fn ring(ps: &[Position]) -> Result<Vec<Coord<f64>>> {
    ps.iter().map(|p| coord(p)).collect()
}

fn polygon(rs: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let (exterior, interiors) = rs
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("polygon without rings"))?;
    Ok(Polygon::new(
        LineString::from(ring(exterior)?),
        interiors
            .iter()
            .map(|r| Ok(LineString::from(ring(r)?)))
            .collect::<Result<_>>()?,
    ))
}

fn positions(l: &LineString<f64>) -> Vec<Position> {
    l.coords().map(|c| vec![c.x, c.y]).collect()
}

fn rings(p: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(p.exterior())
        .chain(p.interiors())
        .map(positions)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mixed_collection() -> Result<()> {
        let fc: FeatureCollection = serde_json::from_str(
            r#"{
              "type": "FeatureCollection",
              "features": [
                {"type": "Feature", "properties": {"ADMIN_ZONE": "Swan Coastal ", "ID": 7},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "Point", "coordinates": [1, 2, 30]}},
                {"type": "Feature", "properties": {}, "geometry": null},
                {"type": "Feature", "geometry": {"type": "GeometryCollection", "geometries": []}}
              ]
            }"#,
        )?;

        assert_eq!(fc.features.len(), 4);
        assert_eq!(fc.features[0].property("ADMIN_ZONE").unwrap(), "Swan Coastal ");
        assert_eq!(fc.features[0].property("ID").unwrap(), "7");
        assert_eq!(fc.features[0].geometry.as_ref().unwrap().kind(), "Polygon");
        assert_eq!(fc.features[1].geometry.as_ref().unwrap().kind(), "Point");
        assert!(fc.features[2].geometry.is_none());
        assert_eq!(fc.features[3].geometry, Some(Geometry::Unsupported));
        Ok(())
    }

    #[test]
    fn writes_polygons_as_closed_rings() -> Result<()> {
        let poly = Polygon::new(
            LineString::from(vec![(0., 0.), (2., 0.), (2., 1.)]),
            vec![],
        );
        let text = serde_json::to_string(&Geometry::from(&poly))?;
        assert_eq!(
            text,
            r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[2.0,0.0],[2.0,1.0],[0.0,0.0]]]}"#
        );

        let back: Geometry = serde_json::from_str(&text)?;
        assert_eq!(back.to_polygon()?, poly);
        Ok(())
    }
}
