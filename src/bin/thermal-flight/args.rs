use anyhow::Result;
use clap::value_t_or_exit;
use std::{path::PathBuf, time::Duration};
use thermal_flight::{arg, args_parser, config::PipelineConfig, opt};

pub struct Args {
    pub flight: PathBuf,
    pub frame_dir: Option<PathBuf>,
    pub boundary_dir: Option<PathBuf>,
    pub frame_ext: Option<String>,
    pub source_epsg: Option<u32>,
    pub districts: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub sync_delay: Option<u64>,
    pub offline: bool,
    pub strict: bool,
}

impl Args {
    pub fn from_cmd_line() -> Result<Args> {
        let matches = args_parser!("thermal-flight")
            .about("Process a thermal imaging flight: mosaic, footprint and hotspots.")
            .arg(
                opt!("frame dir")
                    .help("Frame directory, relative to the flight (default: PNGs/CAMERA1)"),
            )
            .arg(
                opt!("boundary dir")
                    .help("Boundary directory, relative to the flight (default: KML Boundaries/CAMERA1)"),
            )
            .arg(opt!("frame ext").help("Frame file extension (default: png)"))
            .arg(
                opt!("source epsg")
                    .short("e")
                    .help("EPSG code of the frames' georeferencing (default: 28350)"),
            )
            .arg(
                opt!("districts")
                    .short("d")
                    .help("GeoJSON file of administrative districts"),
            )
            .arg(opt!("database").help("Geometry database the results are appended to"))
            .arg(opt!("sync delay").help("Seconds to wait for the storage sync (default: 60)"))
            .arg(
                opt!("offline")
                    .takes_value(false)
                    .help("Do not push, publish or mail; log instead"),
            )
            .arg(
                opt!("strict")
                    .takes_value(false)
                    .help("Exit with status 2 when any stage failed"),
            )
            .arg(
                arg!("flight")
                    .required(true)
                    .help("Flight directory, or a flight name under the destination folder"),
            )
            .get_matches();

        let flight = value_t_or_exit!(matches, "flight", PathBuf);
        let path = |name: &str| matches.value_of(name).map(PathBuf::from);
        let source_epsg = matches
            .is_present("source epsg")
            .then(|| value_t_or_exit!(matches.value_of("source epsg"), u32));
        let sync_delay = matches
            .is_present("sync delay")
            .then(|| value_t_or_exit!(matches.value_of("sync delay"), u64));

        Ok(Args {
            flight,
            frame_dir: path("frame dir"),
            boundary_dir: path("boundary dir"),
            frame_ext: matches.value_of("frame ext").map(String::from),
            source_epsg,
            districts: path("districts"),
            database: path("database"),
            sync_delay,
            offline: matches.is_present("offline"),
            strict: matches.is_present("strict"),
        })
    }

    /// Command line options win over the environment.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.frame_dir {
            config.frame_dir = dir.clone();
        }
        if let Some(dir) = &self.boundary_dir {
            config.boundary_dir = dir.clone();
        }
        if let Some(ext) = &self.frame_ext {
            config.frame_ext = ext.clone();
        }
        if let Some(epsg) = self.source_epsg {
            config.source_epsg = epsg;
        }
        if let Some(path) = &self.districts {
            config.districts_path = Some(path.clone());
        }
        if let Some(path) = &self.database {
            config.database_path = path.clone();
        }
        if let Some(secs) = self.sync_delay {
            config.sync.delay = Duration::from_secs(secs);
        }
    }

    /// The flight directory: the argument itself when it is a
    /// directory, else a flight name under the destination
    /// folder.
    pub fn flight_root(&self, config: &PipelineConfig) -> PathBuf {
        if self.flight.is_dir() {
            self.flight.clone()
        } else {
            config.destination_folder.join(&self.flight)
        }
    }
}
