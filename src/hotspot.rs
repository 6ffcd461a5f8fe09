//! Hotspot detection: merge candidate boundaries into
//! connected regions and match each region to the frames
//! that saw it.
use std::path::Path;

use anyhow::{Context, Result};
use geo::{BooleanOps, BoundingRect, Centroid, Intersects, MultiPolygon, Point, Polygon};
use itertools::Itertools;
use tracing::{debug, info};

use crate::{
    boundary::{clean_features, read_boundary_source},
    frame::FrameBox,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Hotspot {
    /// 1-based, in region order.
    pub number: u32,
    pub polygon: Polygon<f64>,
    pub centroid: Point<f64>,
    pub flight_timestamp: String,
    /// Contributing frame identifiers, first-seen order.
    pub images: Vec<String>,
}

impl Hotspot {
    /// Frame identifiers as stored alongside the geometry.
    pub fn images_label(&self) -> String {
        self.images.join(", ")
    }
}

/// Detection result, with the notes on dropped boundaries.
#[derive(Debug, Default)]
pub struct Detection {
    pub hotspots: Vec<Hotspot>,
    pub dropped: Vec<String>,
    pub repaired: usize,
}

/// Read, clean and match a boundary source.
pub fn detect_from_source(path: &Path, boxes: &[FrameBox], timestamp: &str) -> Result<Detection> {
    let features = read_boundary_source(path)?;
    debug!(count = features.len(), source = %path.display(), "boundary features read");
    let cleaned = clean_features(features);
    let hotspots = detect(&cleaned.geometries, boxes, timestamp)
        .with_context(|| format!("detecting hotspots from {}", path.display()))?;
    Ok(Detection {
        hotspots,
        dropped: cleaned.dropped,
        repaired: cleaned.repaired,
    })
}

/// Match cleaned boundary geometries against frame boxes.
///
/// All geometries are dissolved into connected regions; a
/// region is kept when its envelope intersects at least one
/// frame box. Regions seen by no frame do not consume a
/// number.
pub fn detect(geometries: &[MultiPolygon<f64>], boxes: &[FrameBox], timestamp: &str) -> Result<Vec<Hotspot>> {
    if geometries.is_empty() {
        return Ok(vec![]);
    }

    let merged = geometries
        .iter()
        .fold(MultiPolygon::<f64>::new(vec![]), |acc, g| acc.union(g));
    debug!(
        features = geometries.len(),
        regions = merged.0.len(),
        "boundaries dissolved"
    );

    let mut hotspots = vec![];
    for region in merged.0.into_iter() {
        let envelope = match region.bounding_rect() {
            Some(r) => r,
            None => continue,
        };
        let images: Vec<String> = boxes
            .iter()
            .filter(|b| envelope.intersects(&b.polygon))
            .map(|b| b.id.clone())
            .unique()
            .collect();
        if images.is_empty() {
            debug!(?envelope, "region outside every frame, discarded");
            continue;
        }

        let centroid = region
            .centroid()
            .with_context(|| format!("region {} has no centroid", hotspots.len() + 1))?;
        hotspots.push(Hotspot {
            number: hotspots.len() as u32 + 1,
            polygon: region,
            centroid,
            flight_timestamp: timestamp.to_string(),
            images,
        });
    }

    info!(count = hotspots.len(), "hotspots detected");
    Ok(hotspots)
}

/// Frames to convert and publish: every contributing frame,
/// sorted, once.
pub fn worklist(hotspots: &[Hotspot]) -> Vec<String> {
    hotspots
        .iter()
        .flat_map(|h| h.images.iter().cloned())
        .sorted()
        .dedup()
        .collect()
}
