//! Flight intake: directory layout, boundary source discovery
//! and the first-frame exclusion heuristic.
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use glob::{glob_with, MatchOptions, Pattern};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    config::PipelineConfig,
    error::IntakeError,
    frame::{overlap, Corners, FrameFile},
};

/// Minimum gap (seconds) between the first two frames for
/// the first one to be treated as a stray pre-flight frame.
pub const EXCLUDE_FIRST_MIN_GAP_SECS: f64 = 180.;

/// Boundary file used when no super-mosaic boundary exists.
pub const FALLBACK_BOUNDARY_NAME: &str = "mosaic_0_0_bnd.kml";

/// Paths making up one flight on disk.
#[derive(Clone, Debug)]
pub struct FlightLayout {
    pub name: String,
    /// Flight name without the capture-system prefix.
    pub timestamp: String,
    pub root: PathBuf,
    pub frame_dir: PathBuf,
    pub boundary_dir: PathBuf,
    pub output_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub mosaic: PathBuf,
    pub package: PathBuf,
}

impl FlightLayout {
    pub fn new(root: &Path, config: &PipelineConfig) -> Result<Self, IntakeError> {
        if !root.is_dir() {
            return Err(IntakeError::FlightDirMissing(root.to_path_buf()));
        }
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IntakeError::FlightDirMissing(root.to_path_buf()))?
            .to_string();
        let timestamp = name
            .strip_prefix(config.flight_prefix.as_str())
            .unwrap_or(&name)
            .to_string();
        let output_dir = root.join(&config.output_dir);
        Ok(FlightLayout {
            mosaic: output_dir.join(format!("{}_mosaic.tif", name)),
            package: output_dir.join("output.gpkg"),
            converted_dir: output_dir.join("images"),
            frame_dir: root.join(&config.frame_dir),
            boundary_dir: root.join(&config.boundary_dir),
            root: root.to_path_buf(),
            output_dir,
            timestamp,
            name,
        })
    }

    /// Storage key of the mosaic.
    pub fn mosaic_key(&self) -> String {
        format!("{}.tif", self.name)
    }

    /// Storage key of a converted frame.
    pub fn frame_key(&self, converted_name: &str) -> String {
        format!("{}_images/{}", self.name, converted_name)
    }
}

/// Find the hotspot boundary file of a flight.
///
/// A `*SuperMosaic*BND.<ext>` file is preferred; the plain
/// mosaic boundary is the fallback.
pub fn locate_boundary_source(dir: &Path) -> Result<PathBuf, IntakeError> {
    lazy_static! {
        static ref SUPER_MOSAIC: Regex =
            Regex::new(r"(?i)supermosaic.*bnd\.(kml|geojson|json)$").unwrap();
    }

    let mut names: Vec<String> = fs::read_dir(dir)
        .map_err(|_| IntakeError::BoundaryDirMissing(dir.to_path_buf()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    let chosen = names
        .iter()
        .find(|n| SUPER_MOSAIC.is_match(n))
        .or_else(|| {
            names
                .iter()
                .find(|n| n.eq_ignore_ascii_case(FALLBACK_BOUNDARY_NAME))
        });

    match chosen {
        Some(name) => {
            debug!(file = %name, "boundary source located");
            Ok(dir.join(name))
        }
        None => Err(IntakeError::BoundarySourceMissing(dir.to_path_buf())),
    }
}

/// List the frames of a flight, sorted by file name.
pub fn list_frames(dir: &Path, ext: &str) -> Result<Vec<FrameFile>> {
    let dir_str = dir
        .to_str()
        .with_context(|| format!("non-utf8 frame directory: {}", dir.display()))?;
    let pattern = format!("{}/*.{}", Pattern::escape(dir_str), ext);
    let opts = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut paths = glob_with(&pattern, opts)?.collect::<Result<Vec<_>, _>>()?;
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    paths.into_iter().map(FrameFile::from_path).collect()
}

/// Outcome of the first-frame heuristic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exclusion {
    pub overlap: bool,
    /// Capture time of the second frame minus the first.
    pub time_diff_secs: Option<f64>,
    pub exclude_first: bool,
}

impl Exclusion {
    /// Decide whether the first frame is a stray frame: no
    /// spatial overlap with the second AND captured more than
    /// three minutes earlier. Either cue alone keeps it.
    pub fn evaluate(first: (&FrameFile, &Corners), second: (&FrameFile, &Corners)) -> Self {
        let overlap = overlap(first.1, second.1);
        let diff = time_diff(first.0, second.0);
        Exclusion {
            overlap,
            time_diff_secs: Some(diff),
            exclude_first: !overlap && diff > EXCLUDE_FIRST_MIN_GAP_SECS,
        }
    }

    pub fn keep_all() -> Self {
        Exclusion {
            overlap: false,
            time_diff_secs: None,
            exclude_first: false,
        }
    }
}

/// Seconds between two capture times; negative when the
/// filesystem timestamps are out of order.
pub fn time_diff(first: &FrameFile, second: &FrameFile) -> f64 {
    (second.captured - first.captured).num_milliseconds() as f64 / 1000.
}

/// The ordered frames of one flight.
///
/// The exclusion decision is made once, on construction,
/// from the first two frames of the sorted list; dropping
/// the first frame never triggers a second evaluation.
#[derive(Clone, Debug)]
pub struct FlightSet {
    frames: Vec<FrameFile>,
    exclusion: Exclusion,
    /// Set when the heuristic could not read the first frames.
    pub heuristic_error: Option<String>,
}

impl FlightSet {
    pub fn assemble<F>(mut frames: Vec<FrameFile>, corners_of: F) -> Self
    where
        F: Fn(&FrameFile) -> Result<Corners>,
    {
        frames.sort_by(|a, b| a.name.cmp(&b.name));

        let mut heuristic_error = None;
        let exclusion = if frames.len() < 2 {
            Exclusion::keep_all()
        } else {
            match corners_of(&frames[0]).and_then(|a| Ok((a, corners_of(&frames[1])?))) {
                Ok((a, b)) => Exclusion::evaluate((&frames[0], &a), (&frames[1], &b)),
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "could not evaluate first-frame heuristic");
                    heuristic_error = Some(format!("{:#}", e));
                    Exclusion::keep_all()
                }
            }
        };

        if exclusion.exclude_first {
            let dropped = frames.remove(0);
            info!(
                frame = %dropped.name,
                gap_secs = ?exclusion.time_diff_secs,
                "excluding first frame"
            );
        }

        FlightSet {
            frames,
            exclusion,
            heuristic_error,
        }
    }

    pub fn frames(&self) -> &[FrameFile] {
        &self.frames
    }

    pub fn exclusion(&self) -> Exclusion {
        self.exclusion
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&FrameFile> {
        self.frames.iter().find(|f| f.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs::{create_dir_all, write};

    fn frames(count: usize, gap_after_first: i64) -> Vec<FrameFile> {
        let start = Utc.with_ymd_and_hms(2023, 1, 10, 2, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let offset = if i == 0 { 0 } else { gap_after_first + 2 * i as i64 };
                FrameFile::with_capture_time(
                    PathBuf::from(format!("{:06}.png", i)),
                    start + Duration::seconds(offset),
                )
                .unwrap()
            })
            .collect()
    }

    // frames march east 80 m apart, each 100 m wide; the first
    // may be pushed far away
    fn corners_with_first_at(first_x: f64) -> impl Fn(&FrameFile) -> Result<Corners> {
        move |f: &FrameFile| {
            let i: f64 = f.id.parse()?;
            let x = if i == 0. { first_x } else { 1000. + 80. * i };
            Ok(Corners::new(x, 100., x + 100., 0.))
        }
    }

    #[test]
    fn excludes_distant_late_first_frame() {
        let set = FlightSet::assemble(frames(12, 400), corners_with_first_at(-5000.));
        let ex = set.exclusion();
        assert!(!ex.overlap);
        assert!(ex.time_diff_secs.unwrap() > 180.);
        assert!(ex.exclude_first);
        assert_eq!(set.len(), 11);
        assert_eq!(set.frames()[0].id, "000001");
    }

    #[test]
    fn either_cue_alone_keeps_first_frame() {
        // close in time, far in space
        let set = FlightSet::assemble(frames(5, 10), corners_with_first_at(-5000.));
        assert!(!set.exclusion().exclude_first);
        assert_eq!(set.len(), 5);

        // far in time, overlapping in space
        let set = FlightSet::assemble(frames(5, 400), corners_with_first_at(1050.));
        assert!(set.exclusion().overlap);
        assert!(!set.exclusion().exclude_first);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn gap_must_exceed_threshold() {
        // second frame at 178 + 2 = 180 s: not strictly greater
        let set = FlightSet::assemble(frames(3, 178), corners_with_first_at(-5000.));
        assert_eq!(set.exclusion().time_diff_secs, Some(180.));
        assert!(!set.exclusion().exclude_first);
    }

    #[test]
    fn negative_gap_is_kept_as_is() {
        let mut files = frames(3, 0);
        files[0].captured = files[1].captured + Duration::seconds(500);
        let set = FlightSet::assemble(files, corners_with_first_at(-5000.));
        assert_eq!(set.exclusion().time_diff_secs, Some(-500.));
        assert!(!set.exclusion().exclude_first);
    }

    #[test]
    fn short_flights_keep_everything() {
        for n in 0..2 {
            let set = FlightSet::assemble(frames(n, 400), |_: &FrameFile| -> Result<Corners> {
                bail!("must not be called")
            });
            assert_eq!(set.exclusion(), Exclusion::keep_all());
            assert_eq!(set.len(), n);
        }
    }

    #[test]
    fn unreadable_frames_disable_exclusion() {
        let set = FlightSet::assemble(frames(4, 400), |_: &FrameFile| -> Result<Corners> {
            bail!("corrupt raster")
        });
        assert!(!set.exclusion().exclude_first);
        assert!(set.heuristic_error.is_some());
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn sorts_by_file_name() {
        let mut files = frames(3, 0);
        files.reverse();
        let set = FlightSet::assemble(files, corners_with_first_at(1000.));
        let ids: Vec<_> = set.frames().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["000000", "000001", "000002"]);
    }

    #[test]
    fn boundary_source_precedence() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bnd = dir.path().join("KML Boundaries/CAMERA1");
        create_dir_all(&bnd)?;
        assert!(matches!(
            locate_boundary_source(&bnd),
            Err(IntakeError::BoundarySourceMissing(_))
        ));

        write(bnd.join("Mosaic_0_0_BND.kml"), "")?;
        write(bnd.join("notes.txt"), "")?;
        assert_eq!(
            locate_boundary_source(&bnd)?.file_name().unwrap(),
            "Mosaic_0_0_BND.kml"
        );

        write(bnd.join("FireFlight_SuperMosaic_0_BND.KML"), "")?;
        assert_eq!(
            locate_boundary_source(&bnd)?.file_name().unwrap(),
            "FireFlight_SuperMosaic_0_BND.KML"
        );
        Ok(())
    }

    #[test]
    fn missing_boundary_dir_is_fatal() {
        assert!(matches!(
            locate_boundary_source(Path::new("/nonexistent/boundaries")),
            Err(IntakeError::BoundaryDirMissing(_))
        ));
    }

    #[test]
    fn lists_frames_case_insensitively() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["000002.png", "000001.PNG", "000003.png.aux.xml", "readme.txt"].iter() {
            write(dir.path().join(name), "")?;
        }
        let files = list_frames(dir.path(), "png")?;
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["000001.PNG", "000002.png"]);
        Ok(())
    }
}
