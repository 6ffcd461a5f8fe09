//! Seams to the systems a flight is handed to.
//!
//! Every collaborator is a trait object shared by the
//! pipeline; the crate ships default implementations in
//! `raster`, `storage`, `publish`, `notify` and `store`.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;

use crate::{crs::Crs, frame::Frame, store::Record};

/// Stitches the frames of a flight into one raster.
pub trait MosaicBuilder: Send + Sync {
    fn build(&self, frames: &[Frame], crs: &Crs, output: &Path) -> Result<()>;
}

/// Converts one frame to the published raster format;
/// returns the path written.
pub trait Converter: Send + Sync {
    fn convert(&self, frame: &Frame, output_dir: &Path) -> Result<PathBuf>;
}

/// Remote object storage the publisher reads from.
pub trait Storage: Send + Sync {
    fn push(&self, artifact: &Path, key: &str) -> Result<()>;

    /// Whether a pushed key is visible to readers. Storages
    /// that cannot tell report `false`, and callers fall back
    /// to a fixed wait.
    fn acknowledged(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Registers a stored raster with the map server.
pub trait Publisher: Send + Sync {
    /// `label` is the layer name; `None` uses the artifact
    /// name.
    fn publish(&self, flight: &str, artifact_name: &str, label: Option<&str>) -> Result<()>;
}

pub trait Notifier: Send + Sync {
    fn started(&self, flight: &str) -> Result<()>;

    fn notify(&self, flight: &str, success: bool, report: &str, districts: &[String]) -> Result<()>;
}

/// Append-only tables shared by all flights.
pub trait GeometryDatabase: Send + Sync {
    fn append(&self, table: &str, records: &[Record]) -> Result<()>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub mosaic: Arc<dyn MosaicBuilder>,
    pub converter: Arc<dyn Converter>,
    /// `None` skips pushing and everything that depends on it.
    pub storage: Option<Arc<dyn Storage>>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn Notifier>,
    pub database: Arc<dyn GeometryDatabase>,
}
