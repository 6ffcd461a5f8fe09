//! Process a flight of georeferenced thermal frames into a
//! mosaic, a flight footprint and a set of hotspots.
//!
//! A flight is a directory of sequentially captured frames
//! (each georeferenced by a world file, an `.aux.xml`
//! sidecar or GeoTIFF tags) plus a boundary file of
//! candidate hotspot regions produced by the mosaicking
//! software. The crate provides:
//!
//! 1. The geometry: frame corners and bounding boxes
//! ([frame]), reprojection of UTM/MGA grids to geographic
//! coordinates ([crs]), the flight footprint and its
//! administrative districts ([footprint]), and the hotspot
//! detector that dissolves boundaries into connected regions
//! and matches them to the frames that saw them ([hotspot]).
//!
//! 2. The [pipeline] that drives a flight through every
//! stage, best effort, and reports what succeeded. The
//! systems the results are handed to sit behind the traits
//! in [external], with default implementations for a mounted
//! storage directory, GeoServer and Postmark.
//!
//! # Usage
//!
//! ```rust,no_run
//! # fn test_compile() -> anyhow::Result<()> {
//! use std::{path::Path, sync::Arc};
//! use thermal_flight::{
//!     config::PipelineConfig,
//!     external::Collaborators,
//!     notify::LogNotifier,
//!     pipeline::Pipeline,
//!     publish::NoopPublisher,
//!     raster::{GeoMosaic, TiffConverter},
//!     store::SqliteDatabase,
//! };
//!
//! let config = PipelineConfig::from_env()?;
//! let collaborators = Collaborators {
//!     mosaic: Arc::new(GeoMosaic),
//!     converter: Arc::new(TiffConverter),
//!     storage: None,
//!     publisher: Arc::new(NoopPublisher),
//!     notifier: Arc::new(LogNotifier),
//!     database: Arc::new(SqliteDatabase::open(&config.database_path)?),
//! };
//! let run = Pipeline::new(config, collaborators).run(Path::new("FireFlight_20230110_0200"));
//! println!("{}", run.report());
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod cli;
pub mod config;
pub mod crs;
pub mod error;
pub mod external;
pub mod footprint;
pub mod frame;
pub mod geojson;
pub mod georef;
pub mod hotspot;
pub mod intake;
pub mod kml;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod raster;
pub mod storage;
pub mod store;

pub use crate::pipeline::{Pipeline, PipelineRun, RunState};
