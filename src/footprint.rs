//! Flight footprint and the districts it covers.
use std::{fs::read_to_string, path::Path};

use anyhow::{bail, Context, Result};
use geo::{Coord, Intersects, LineString, MultiPolygon, Polygon};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::{frame::FrameBox, geojson::FeatureCollection};

#[derive(Clone, Debug, PartialEq)]
pub struct Footprint {
    /// Closed 5-point outline.
    pub line: LineString<f64>,
    pub polygon: Polygon<f64>,
    /// Filled in by district attribution only.
    pub districts: Vec<String>,
}

impl Footprint {
    /// Bounding rectangle of all frame boxes, in geographic
    /// coordinates.
    pub fn from_boxes(boxes: &[FrameBox]) -> Result<Self> {
        let mut coords = boxes.iter().flat_map(|b| b.polygon.exterior().coords());
        let first = match coords.next() {
            Some(c) => *c,
            None => bail!("no frame boxes to build a footprint from"),
        };
        let (minx, miny, maxx, maxy) = coords.fold(
            (first.x, first.y, first.x, first.y),
            |(minx, miny, maxx, maxy), c| (minx.min(c.x), miny.min(c.y), maxx.max(c.x), maxy.max(c.y)),
        );

        let line = LineString::from(vec![
            Coord { x: minx, y: miny },
            Coord { x: minx, y: maxy },
            Coord { x: maxx, y: maxy },
            Coord { x: maxx, y: miny },
            Coord { x: minx, y: miny },
        ]);
        Ok(Footprint {
            polygon: Polygon::new(line.clone(), vec![]),
            line,
            districts: vec![],
        })
    }
}

/// An administrative district.
#[derive(Clone, Debug)]
pub struct District {
    pub zone: String,
    pub boundary: MultiPolygon<f64>,
}

/// Zone names are used as keys downstream (`Swan Coastal`
/// becomes `Swan_Coastal`).
pub fn normalize_zone(value: &str) -> String {
    value.trim().replace(' ', "_")
}

/// Load districts from a GeoJSON feature collection in
/// geographic coordinates. Features without a zone attribute
/// or a polygonal geometry are skipped.
pub fn load_districts(path: &Path, field: &str) -> Result<Vec<District>> {
    let text = read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let fc: FeatureCollection =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let mut districts = vec![];
    for (idx, feature) in fc.features.iter().enumerate() {
        let zone = match feature.property(field) {
            Some(z) if !z.trim().is_empty() => normalize_zone(&z),
            _ => {
                debug!(feature = idx, field, "district without zone attribute");
                continue;
            }
        };
        match feature.geometry.as_ref().map(|g| g.to_multi_polygon()) {
            Some(Ok(boundary)) => districts.push(District { zone, boundary }),
            Some(Err(e)) => warn!(zone = %zone, error = %e, "skipping district"),
            None => debug!(zone = %zone, "district without geometry"),
        }
    }
    Ok(districts)
}

/// Zones intersecting the footprint, first-seen order, once.
pub fn attribute_districts(footprint: &Polygon<f64>, districts: &[District]) -> Vec<String> {
    districts
        .iter()
        .filter(|d| d.boundary.intersects(footprint))
        .map(|d| d.zone.clone())
        .unique()
        .collect()
}
