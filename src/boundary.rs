//! Candidate hotspot boundaries: reading and cleaning.
//!
//! Boundaries come from the mosaicking software and are
//! frequently malformed (bow-tie rings, collapsed slivers,
//! open rings). Cleaning keeps polygonal features, repairs
//! invalid ones with a zero-width union and drops whatever
//! repairs to nothing. A feature that cannot be processed is
//! skipped on its own; it never aborts the whole source.
use std::{fs::read_to_string, path::Path};

use anyhow::{bail, ensure, Context, Result};
use geo::{
    algorithm::line_intersection::{line_intersection, LineIntersection},
    Area, BooleanOps, Coord, Line, LineString, MultiPolygon, Polygon,
};
use tracing::{debug, warn};

use crate::{
    geojson::{self, FeatureCollection, Geometry},
    kml,
};

/// A ring exactly as read: not closed automatically.
pub type RawRing = Vec<Coord<f64>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawPolygon {
    pub exterior: RawRing,
    pub interiors: Vec<RawRing>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawGeometry {
    Polygon(RawPolygon),
    MultiPolygon(Vec<RawPolygon>),
    /// Any non-polygonal geometry, by kind.
    Other(String),
    Missing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryFeature {
    pub name: String,
    pub geometry: RawGeometry,
}

/// Read the features of a KML or GeoJSON boundary file.
///
/// The outer error is for an unreadable file; inner errors
/// are per feature.
pub fn read_boundary_source(path: &Path) -> Result<Vec<Result<BoundaryFeature>>> {
    let text = read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "kml" => Ok(kml::parse_placemarks(&text)),
        "geojson" | "json" => {
            let fc: FeatureCollection = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(fc
                .features
                .iter()
                .enumerate()
                .map(|(idx, f)| {
                    let name = f
                        .property("name")
                        .unwrap_or_else(|| format!("feature {}", idx + 1));
                    raw_geometry(f.geometry.as_ref())
                        .with_context(|| format!("feature `{}`", name))
                        .map(|geometry| BoundaryFeature { name, geometry })
                })
                .collect())
        }
        other => bail!("unsupported boundary format: `{}`", other),
    }
}

fn raw_geometry(g: Option<&Geometry>) -> Result<RawGeometry> {
    fn raw_polygon(rings: &[Vec<geojson::Position>]) -> Result<RawPolygon> {
        let (exterior, interiors) = rings
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("polygon without rings"))?;
        Ok(RawPolygon {
            exterior: geojson::ring(exterior)?,
            interiors: interiors
                .iter()
                .map(|r| geojson::ring(r))
                .collect::<Result<_>>()?,
        })
    }

    Ok(match g {
        None => RawGeometry::Missing,
        Some(Geometry::Polygon { coordinates }) => RawGeometry::Polygon(raw_polygon(coordinates)?),
        Some(Geometry::MultiPolygon { coordinates }) => RawGeometry::MultiPolygon(
            coordinates
                .iter()
                .map(|p| raw_polygon(p))
                .collect::<Result<_>>()?,
        ),
        Some(other) => RawGeometry::Other(other.kind().to_string()),
    })
}

/// Result of cleaning a boundary source.
#[derive(Debug, Default)]
pub struct Cleaned {
    pub geometries: Vec<MultiPolygon<f64>>,
    /// Human readable notes on every dropped feature.
    pub dropped: Vec<String>,
    pub repaired: usize,
}

/// Keep polygonal features, repairing invalid ones.
pub fn clean_features(features: Vec<Result<BoundaryFeature>>) -> Cleaned {
    let mut cleaned = Cleaned::default();
    for feature in features {
        let feature = match feature {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "skipping unreadable boundary feature");
                cleaned.dropped.push(format!("{:#}", e));
                continue;
            }
        };

        match clean_feature(&feature) {
            Ok(Cleaning::Kept(g)) => cleaned.geometries.push(g),
            Ok(Cleaning::Repaired(g)) => {
                debug!(feature = %feature.name, "repaired invalid boundary");
                cleaned.repaired += 1;
                cleaned.geometries.push(g);
            }
            Ok(Cleaning::NoGeometry) => {
                debug!(feature = %feature.name, "boundary feature without geometry");
            }
            Ok(Cleaning::Rejected(kind)) => {
                warn!(feature = %feature.name, kind = %kind, "non-polygon boundary rejected");
                cleaned
                    .dropped
                    .push(format!("`{}`: {} is not a polygon", feature.name, kind));
            }
            Ok(Cleaning::RepairedEmpty) => {
                warn!(feature = %feature.name, "invalid boundary repaired to an empty geometry, dropped");
                cleaned
                    .dropped
                    .push(format!("`{}`: invalid and empty after repair", feature.name));
            }
            Err(e) => {
                warn!(feature = %feature.name, error = %format!("{:#}", e), "skipping boundary feature");
                cleaned.dropped.push(format!("`{}`: {:#}", feature.name, e));
            }
        }
    }
    cleaned
}

#[derive(Debug)]
pub enum Cleaning {
    Kept(MultiPolygon<f64>),
    Repaired(MultiPolygon<f64>),
    RepairedEmpty,
    Rejected(String),
    NoGeometry,
}

pub fn clean_feature(feature: &BoundaryFeature) -> Result<Cleaning> {
    let polygons: Vec<&RawPolygon> = match &feature.geometry {
        RawGeometry::Polygon(p) => vec![p],
        RawGeometry::MultiPolygon(ps) => ps.iter().collect(),
        RawGeometry::Other(kind) => return Ok(Cleaning::Rejected(kind.clone())),
        RawGeometry::Missing => return Ok(Cleaning::NoGeometry),
    };

    let mut valid = true;
    for p in polygons.iter() {
        valid &= ring_is_valid(&p.exterior)?;
        for hole in p.interiors.iter() {
            valid &= ring_is_valid(hole)?;
        }
    }

    let geometry = MultiPolygon::new(polygons.into_iter().map(to_polygon).collect());
    if valid {
        return Ok(Cleaning::Kept(geometry));
    }

    let repaired = repair(&geometry);
    Ok(if repaired.0.is_empty() {
        Cleaning::RepairedEmpty
    } else {
        Cleaning::Repaired(repaired)
    })
}

/// Zero-width repair: the union of a geometry with nothing
/// resolves self-intersections under the even-odd rule and
/// removes collapsed parts.
pub fn repair(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let empty = MultiPolygon::<f64>::new(vec![]);
    let mut repaired = geometry.union(&empty);
    repaired.0.retain(|p| p.unsigned_area() > 0.);
    repaired
}

fn to_polygon(p: &RawPolygon) -> Polygon<f64> {
    Polygon::new(
        LineString::from(p.exterior.clone()),
        p.interiors
            .iter()
            .map(|r| LineString::from(r.clone()))
            .collect(),
    )
}

/// A ring is valid when closed, with at least four
/// positions, a non-zero area and no crossing or overlapping
/// segments. Non-finite coordinates are an error.
pub fn ring_is_valid(ring: &[Coord<f64>]) -> Result<bool> {
    ensure!(
        ring.iter().all(|c| c.x.is_finite() && c.y.is_finite()),
        "non-finite coordinate in ring"
    );
    if ring.len() < 4 || ring.first() != ring.last() {
        return Ok(false);
    }
    if LineString::from(ring.to_vec()).lines().count() < 3 || signed_area(ring) == 0. {
        return Ok(false);
    }

    let segments: Vec<Line<f64>> = ring.windows(2).map(|w| Line::new(w[0], w[1])).collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return Ok(false),
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::SinglePoint { .. }) => return Ok(false),
            }
        }
    }
    Ok(true)
}

fn signed_area(ring: &[Coord<f64>]) -> f64 {
    ring.windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>()
        / 2.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(points: &[(f64, f64)]) -> RawRing {
        points.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    fn polygon_feature(name: &str, points: &[(f64, f64)]) -> BoundaryFeature {
        BoundaryFeature {
            name: name.to_string(),
            geometry: RawGeometry::Polygon(RawPolygon {
                exterior: ring(points),
                interiors: vec![],
            }),
        }
    }

    const SQUARE: &[(f64, f64)] = &[(0., 0.), (1., 0.), (1., 1.), (0., 1.), (0., 0.)];
    const BOWTIE: &[(f64, f64)] = &[(0., 0.), (2., 2.), (2., 0.), (0., 2.), (0., 0.)];
    const SLIVER: &[(f64, f64)] = &[(0., 0.), (1., 1.), (2., 2.), (1., 1.), (0., 0.)];

    #[test]
    fn ring_validity() -> Result<()> {
        assert!(ring_is_valid(&ring(SQUARE))?);
        assert!(!ring_is_valid(&ring(BOWTIE))?);
        assert!(!ring_is_valid(&ring(SLIVER))?);
        // open ring
        assert!(!ring_is_valid(&ring(&SQUARE[..4]))?);
        assert!(!ring_is_valid(&ring(&[(0., 0.), (1., 0.), (0., 0.)]))?);
        assert!(ring_is_valid(&ring(&[(0., 0.), (f64::NAN, 0.), (1., 1.), (0., 0.)])).is_err());
        Ok(())
    }

    #[test]
    fn valid_polygon_kept_as_is() -> Result<()> {
        match clean_feature(&polygon_feature("sq", SQUARE))? {
            Cleaning::Kept(g) => assert_eq!(g.0.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn bowtie_repairs_to_non_empty() -> Result<()> {
        match clean_feature(&polygon_feature("bowtie", BOWTIE))? {
            Cleaning::Repaired(g) => assert!(g.unsigned_area() > 0.),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn sliver_repairs_to_empty() -> Result<()> {
        assert!(matches!(
            clean_feature(&polygon_feature("sliver", SLIVER))?,
            Cleaning::RepairedEmpty
        ));
        Ok(())
    }

    #[test]
    fn open_ring_is_closed_by_repair() -> Result<()> {
        match clean_feature(&polygon_feature("open", &SQUARE[..4]))? {
            Cleaning::Repaired(g) => assert!((g.unsigned_area() - 1.).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn clean_never_aborts() {
        let features = vec![
            Ok(polygon_feature("sq", SQUARE)),
            Ok(polygon_feature("bowtie", BOWTIE)),
            Ok(polygon_feature("sliver", SLIVER)),
            Ok(polygon_feature("nan", &[(0., 0.), (f64::NAN, 1.), (1., 1.), (0., 0.)])),
            Ok(BoundaryFeature {
                name: "pin".to_string(),
                geometry: RawGeometry::Other("Point".to_string()),
            }),
            Ok(BoundaryFeature {
                name: "nothing".to_string(),
                geometry: RawGeometry::Missing,
            }),
            Err(anyhow::anyhow!("bad coordinates")),
        ];
        let cleaned = clean_features(features);
        assert_eq!(cleaned.geometries.len(), 2);
        assert_eq!(cleaned.repaired, 1);
        assert_eq!(cleaned.dropped.len(), 4);
    }

    #[test]
    fn reads_geojson_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("SuperMosaic_BND.geojson");
        std::fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"name":"a"},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1]]]}},
                {"type":"Feature","properties":{},
                 "geometry":{"type":"LineString","coordinates":[[0,0],[1,1]]}}
            ]}"#,
        )?;
        let features = read_boundary_source(&path)?;
        let a = features[0].as_ref().unwrap();
        assert_eq!(a.name, "a");
        match &a.geometry {
            RawGeometry::Polygon(p) => assert_eq!(p.exterior.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            features[1].as_ref().unwrap().geometry,
            RawGeometry::Other("LineString".to_string())
        );
        Ok(())
    }
}
