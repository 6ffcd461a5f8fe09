//! Errors that stop a flight before any stage runs.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("flight directory not found: {}", .0.display())]
    FlightDirMissing(PathBuf),

    #[error("boundary directory not found: {}", .0.display())]
    BoundaryDirMissing(PathBuf),

    #[error("no file named *SuperMosaic*BND.kml found in {}", .0.display())]
    BoundarySourceMissing(PathBuf),
}
