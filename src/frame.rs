//! Frames of a flight and their footprints on the ground.
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use geo::{Coord, LineString, Polygon};

use crate::{crs::Crs, georef::GeoTransform};

/// A frame file on disk, before its raster is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameFile {
    pub path: PathBuf,
    /// File name with extension (`000042.png`).
    pub name: String,
    /// File stem (`000042`); identifies the frame downstream.
    pub id: String,
    /// Filesystem modification time.
    pub captured: DateTime<Utc>,
}

impl FrameFile {
    pub fn from_path(path: PathBuf) -> Result<Self> {
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading mtime of {}", path.display()))?;
        Self::with_capture_time(path, modified.into())
    }

    pub fn with_capture_time(path: PathBuf, captured: DateTime<Utc>) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid frame file name: {}", path.display()))?
            .to_string();
        let id = frame_id(&name);
        Ok(FrameFile {
            path,
            name,
            id,
            captured,
        })
    }
}

/// Identifier of a frame: its file name without extension.
pub fn frame_id(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Source-CRS extent of a frame, as read from the
/// georeferencing (upper-left and lower-right corners).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corners {
    pub ulx: f64,
    pub uly: f64,
    pub lrx: f64,
    pub lry: f64,
}

impl Corners {
    pub fn new(ulx: f64, uly: f64, lrx: f64, lry: f64) -> Self {
        Corners { ulx, uly, lrx, lry }
    }

    /// Normalised `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.ulx.min(self.lrx),
            self.uly.min(self.lry),
            self.ulx.max(self.lrx),
            self.uly.max(self.lry),
        )
    }

    /// Closed ring `UL, UR, LR, LL, UL`.
    pub fn polygon(&self) -> Polygon<f64> {
        let ring = vec![
            Coord { x: self.ulx, y: self.uly },
            Coord { x: self.lrx, y: self.uly },
            Coord { x: self.lrx, y: self.lry },
            Coord { x: self.ulx, y: self.lry },
            Coord { x: self.ulx, y: self.uly },
        ];
        Polygon::new(LineString::from(ring), vec![])
    }
}

/// Axis-aligned rectangle intersection (touching edges
/// count as overlapping).
pub fn overlap(a: &Corners, b: &Corners) -> bool {
    let (a_minx, a_miny, a_maxx, a_maxy) = a.bounds();
    let (b_minx, b_miny, b_maxx, b_maxy) = b.bounds();
    a_minx <= b_maxx && b_minx <= a_maxx && a_miny <= b_maxy && b_miny <= a_maxy
}

/// An opened frame: file, raster size and georeferencing.
#[derive(Clone, Debug)]
pub struct Frame {
    pub file: FrameFile,
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
}

impl Frame {
    pub fn open(file: &FrameFile) -> Result<Self> {
        let (width, height) = image::image_dimensions(&file.path)
            .with_context(|| format!("opening raster {}", file.path.display()))?;
        let transform = GeoTransform::read_for(&file.path)?;
        Ok(Frame {
            file: file.clone(),
            width,
            height,
            transform,
        })
    }

    pub fn corners(&self) -> Corners {
        let t = &self.transform;
        Corners {
            ulx: t.ulx,
            uly: t.uly,
            lrx: t.ulx + self.width as f64 * t.xres,
            lry: t.uly + self.height as f64 * t.yres,
        }
    }

    pub fn source_polygon(&self) -> Polygon<f64> {
        self.corners().polygon()
    }
}

/// Bounding box of one frame, in the source CRS and in
/// geographic coordinates.
#[derive(Clone, Debug)]
pub struct FrameBox {
    pub id: String,
    pub name: String,
    pub source: Polygon<f64>,
    pub polygon: Polygon<f64>,
}

impl FrameBox {
    pub fn new(file: &FrameFile, corners: &Corners, crs: &Crs) -> Self {
        let source = corners.polygon();
        let polygon = crs.polygon_to_geographic(&source);
        FrameBox {
            id: file.id.clone(),
            name: file.name.clone(),
            source,
            polygon,
        }
    }
}

/// One box per frame, in input order.
pub fn frame_boxes(frames: &[Frame], crs: &Crs) -> Vec<FrameBox> {
    frames
        .iter()
        .map(|f| FrameBox::new(&f.file, &f.corners(), crs))
        .collect()
}
