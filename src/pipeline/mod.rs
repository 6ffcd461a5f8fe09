//! The flight processing pipeline.
//!
//! A run passes an intake gate, then executes every stage
//! in order. Stages are best effort: a failed stage is
//! recorded and clears the run's success, but never stops
//! the stages after it. Stages that need something an
//! earlier stage did not produce fail with a dependency
//! message.
mod deadline;
mod run;
mod wait;


use std::{
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use tracing::{info, info_span, warn};

pub use self::{
    deadline::call_with_deadline,
    run::{PipelineRun, RunState, Stage, StageOutcome, StageStatus},
    wait::{CancelToken, SyncWait, WaitOutcome},
};
use crate::{
    cli::progress_bar,
    config::PipelineConfig,
    crs::Crs,
    external::Collaborators,
    footprint::{attribute_districts, load_districts, Footprint},
    frame::{frame_boxes, Frame, FrameBox},
    geojson::Geometry,
    hotspot::{detect_from_source, worklist, Hotspot},
    intake::{list_frames, locate_boundary_source, FlightLayout, FlightSet},
    store::{
        LayerStore, Record, BOUNDARIES_LAYER, BOUNDARIES_TABLE, CENTROIDS_LAYER,
        CENTROIDS_TABLE, FOOTPRINTS_TABLE, FOOTPRINT_LAYER,
    },
};

/// Everything a run learns about its flight, threaded
/// through the stages.
struct RunContext {
    layout: FlightLayout,
    /// An unsupported source CRS is kept as its message.
    crs: std::result::Result<Crs, String>,
    boundary_source: PathBuf,
    flight: FlightSet,
    /// Opened on first use; an error is kept as its message.
    frames: Option<std::result::Result<Arc<Vec<Frame>>, String>>,
    mosaic_built: bool,
    mosaic_pushed: bool,
    footprint: Option<Footprint>,
    boxes: Option<Vec<FrameBox>>,
    hotspots: Vec<Hotspot>,
    /// Converted frames: identifier and storage key, if pushed.
    converted: Vec<(String, Option<String>)>,
    pushed: Vec<String>,
}

impl RunContext {
    fn frames(&mut self) -> Result<Arc<Vec<Frame>>> {
        if self.frames.is_none() {
            let files = self.flight.frames();
            let bar = progress_bar(files.len() as u64);
            let opened = files
                .iter()
                .map(|f| {
                    bar.inc(1);
                    Frame::open(f)
                })
                .collect::<Result<Vec<_>>>()
                .map(Arc::new)
                .map_err(|e| format!("{:#}", e));
            bar.finish_and_clear();
            self.frames = Some(opened);
        }
        match self.frames.as_ref() {
            Some(Ok(frames)) => Ok(frames.clone()),
            Some(Err(e)) => Err(anyhow!("frames unavailable: {}", e)),
            None => Err(anyhow!("frames unavailable")),
        }
    }

    /// Opened frames with the CRS their corners are in.
    fn georeferenced(&mut self) -> Result<(Arc<Vec<Frame>>, Crs)> {
        let frames = self.frames()?;
        match self.crs.as_ref() {
            Ok(crs) => Ok((frames, *crs)),
            Err(e) => Err(anyhow!("source CRS unavailable: {}", e)),
        }
    }

    fn package(&self) -> Result<LayerStore> {
        LayerStore::open(&self.layout.package)
    }

    /// Remove layers a previous run of this flight left in
    /// the package.
    fn clear_layers(&self, layers: &[&str]) -> Result<()> {
        let package = self.package()?;
        for layer in layers {
            package.drop_layer(layer)?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Pipeline {
            config,
            collaborators,
            cancel: CancelToken::new(),
        }
    }

    /// Token interrupting the sync waits of this pipeline.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process the flight rooted at `root`.
    pub fn run(&self, root: &Path) -> PipelineRun {
        let flight = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let span = info_span!("flight", name = %flight);
        let _enter = span.enter();
        let mut run = PipelineRun::new(&flight);

        let mut ctx = match self.intake(root, &mut run) {
            Ok(ctx) => ctx,
            Err(e) => {
                run.fail_intake(format!("{:#}", e));
                if let Err(e) = self.collaborators.notifier.notify(&flight, false, &run.report(), &[]) {
                    warn!(error = %format!("{:#}", e), "failure notification not sent");
                }
                return run;
            }
        };

        run.start();
        if let Err(e) = self.collaborators.notifier.started(&flight) {
            warn!(error = %format!("{:#}", e), "start notification not sent");
        }

        let outcome = self.build_mosaic(&mut ctx);
        run.record(outcome);
        let outcome = self.sync_wait(Stage::MosaicSync, &ctx);
        run.record(outcome);
        let outcome = self.push_mosaic(&mut ctx);
        run.record(outcome);
        let outcome = self.build_footprint(&mut ctx);
        run.record(outcome);
        let outcome = self.attribute_districts(&mut ctx, &mut run);
        run.record(outcome);
        let outcome = self.build_frame_boxes(&mut ctx);
        run.record(outcome);
        let outcome = self.detect_hotspots(&mut ctx, &mut run);
        run.record(outcome);
        let outcome = self.convert_frames(&mut ctx, &run.worklist);
        run.record(outcome);
        let outcome = self.sync_wait(Stage::PublishSync, &ctx);
        run.record(outcome);
        let outcome = self.publish(&ctx);
        run.record(outcome);

        run.finish();
        info!(success = run.success(), hotspots = run.hotspots, "flight processed");

        if let Err(e) = self.write_report(&run) {
            warn!(error = %format!("{:#}", e), "report not written");
        }
        if let Err(e) =
            self.collaborators
                .notifier
                .notify(&flight, run.success(), &run.report(), &run.districts)
        {
            warn!(error = %format!("{:#}", e), "notification not sent");
        }
        run
    }

    /// The gate: a flight without its boundary source is not
    /// processed at all. Problems with the frames or their CRS
    /// are left to the stages that need them.
    fn intake(&self, root: &Path, run: &mut PipelineRun) -> Result<RunContext> {
        let layout = FlightLayout::new(root, &self.config)?;
        let boundary_source = locate_boundary_source(&layout.boundary_dir)?;

        let crs = Crs::from_epsg(self.config.source_epsg).map_err(|e| format!("{:#}", e));
        if let Err(e) = crs.as_ref() {
            run.note(format!("Source CRS rejected: {}", e));
        }
        let (files, listing_error) = match list_frames(&layout.frame_dir, &self.config.frame_ext) {
            Ok(files) => (files, None),
            Err(e) => {
                let e = format!("{:#}", e);
                run.note(format!("Frames could not be listed: {}", e));
                (vec![], Some(e))
            }
        };
        let flight = FlightSet::assemble(files, |f| Ok(Frame::open(f)?.corners()));
        if let Some(e) = flight.heuristic_error.as_ref() {
            run.note(format!(
                "Could not compare the first two frames ({}); all frames kept",
                e
            ));
        }
        let exclusion = flight.exclusion();
        if exclusion.exclude_first {
            run.note(format!(
                "First frame excluded: no overlap with the second and captured {:.0}s earlier",
                exclusion.time_diff_secs.unwrap_or_default()
            ));
        }
        run.frames_retained = flight.len();
        info!(frames = flight.len(), source = %boundary_source.display(), "flight taken in");

        Ok(RunContext {
            layout,
            crs,
            boundary_source,
            flight,
            frames: listing_error.map(Err),
            mosaic_built: false,
            mosaic_pushed: false,
            footprint: None,
            boxes: None,
            hotspots: vec![],
            converted: vec![],
            pushed: vec![],
        })
    }

    fn build_mosaic(&self, ctx: &mut RunContext) -> StageOutcome {
        let stage = Stage::Mosaic;
        let (frames, crs) = match ctx.georeferenced() {
            Ok(source) => source,
            Err(e) => return StageOutcome::failed(stage, format!("Mosaic creation failed: {:#}", e)),
        };
        let builder = self.collaborators.mosaic.clone();
        let output = ctx.layout.mosaic.clone();
        let result = call_with_deadline("mosaic build", self.config.call_timeout, move || {
            builder.build(&frames, &crs, &output)
        });
        match result {
            Ok(()) => {
                ctx.mosaic_built = true;
                StageOutcome::succeeded(stage, "Mosaic created OK")
            }
            Err(e) => StageOutcome::failed(stage, format!("Mosaic creation failed: {:#}", e)),
        }
    }

    fn sync_wait(&self, stage: Stage, ctx: &RunContext) -> StageOutcome {
        let wait = SyncWait::from(&self.config.sync);
        let storage = self.collaborators.storage.as_deref();
        match wait.wait(storage, &ctx.pushed, &self.cancel) {
            WaitOutcome::Acknowledged => StageOutcome::succeeded(stage, "Storage sync acknowledged"),
            WaitOutcome::Elapsed => StageOutcome::succeeded(
                stage,
                format!("Waited {}s for storage sync", wait.delay.as_secs()),
            ),
            WaitOutcome::Cancelled => StageOutcome::warning(stage, "Storage sync wait interrupted"),
        }
    }

    fn push_mosaic(&self, ctx: &mut RunContext) -> StageOutcome {
        let stage = Stage::MosaicPush;
        if !ctx.mosaic_built {
            return StageOutcome::dependency(stage, "mosaic");
        }
        let storage = match self.collaborators.storage.clone() {
            Some(s) => s,
            None => return StageOutcome::warning(stage, "No storage configured; mosaic not pushed"),
        };
        let key = ctx.layout.mosaic_key();
        let (artifact, push_key) = (ctx.layout.mosaic.clone(), key.clone());
        match call_with_deadline("mosaic push", self.config.call_timeout, move || {
            storage.push(&artifact, &push_key)
        }) {
            Ok(()) => {
                ctx.mosaic_pushed = true;
                ctx.pushed.push(key);
                StageOutcome::succeeded(stage, "Mosaic pushed to storage OK")
            }
            Err(e) => StageOutcome::failed(stage, format!("Mosaic push to storage failed: {:#}", e)),
        }
    }

    fn build_footprint(&self, ctx: &mut RunContext) -> StageOutcome {
        let stage = Stage::Footprint;
        let result = (|| -> Result<Footprint> {
            ctx.clear_layers(&[FOOTPRINT_LAYER])?;
            let (frames, crs) = ctx.georeferenced()?;
            let footprint = Footprint::from_boxes(&frame_boxes(&frames, &crs))?;
            let timestamp = &ctx.layout.timestamp;
            self.collaborators.database.append(
                FOOTPRINTS_TABLE,
                &[Record::new(Geometry::from(&footprint.line), timestamp)],
            )?;
            ctx.package()?.replace_layer(
                FOOTPRINT_LAYER,
                &[Record::new(Geometry::from(&footprint.polygon), timestamp)],
            )?;
            Ok(footprint)
        })();
        match result {
            Ok(footprint) => {
                ctx.footprint = Some(footprint);
                StageOutcome::succeeded(stage, "Footprint produced and persisted OK")
            }
            Err(e) => StageOutcome::failed(
                stage,
                format!("Footprint production or persistence failed: {:#}", e),
            ),
        }
    }

    fn attribute_districts(&self, ctx: &mut RunContext, run: &mut PipelineRun) -> StageOutcome {
        let stage = Stage::Districts;
        if ctx.footprint.is_none() {
            return StageOutcome::dependency(stage, "footprint");
        }
        // read back what the footprint stage wrote
        let polygon = match ctx
            .package()
            .and_then(|p| p.read_layer(FOOTPRINT_LAYER))
            .and_then(|rows| match rows.first() {
                Some(r) => r.geometry.to_polygon(),
                None => Err(anyhow!("footprint layer is empty")),
            }) {
            Ok(p) => p,
            Err(e) => {
                return StageOutcome::failed(
                    stage,
                    format!("Footprint district(s) not found: footprint unavailable ({:#})", e),
                )
            }
        };

        let path = match self.config.districts_path.as_ref() {
            Some(p) => p,
            None => return StageOutcome::warning(stage, "No district layer configured"),
        };
        let districts = match load_districts(path, &self.config.districts_field) {
            Ok(d) => d,
            Err(e) => {
                return StageOutcome::failed(stage, format!("Footprint district(s) not found: {:#}", e))
            }
        };

        let zones = attribute_districts(&polygon, &districts);
        if let Some(footprint) = ctx.footprint.as_mut() {
            footprint.districts = zones.clone();
        }
        run.districts = zones.clone();
        if zones.is_empty() {
            StageOutcome::warning(stage, "Footprint lies in no known district")
        } else {
            StageOutcome::succeeded(stage, format!("Footprint lies in district(s) {:?}", zones))
        }
    }

    fn build_frame_boxes(&self, ctx: &mut RunContext) -> StageOutcome {
        let stage = Stage::FrameBoxes;
        match ctx.georeferenced() {
            Ok((frames, crs)) => {
                ctx.boxes = Some(frame_boxes(&frames, &crs));
                StageOutcome::succeeded(stage, "Bounding box creation for images OK")
            }
            Err(e) => StageOutcome::failed(
                stage,
                format!("Bounding box creation for images failed: {:#}", e),
            ),
        }
    }

    fn detect_hotspots(&self, ctx: &mut RunContext, run: &mut PipelineRun) -> StageOutcome {
        let stage = Stage::Hotspots;
        if let Err(e) = ctx.clear_layers(&[BOUNDARIES_LAYER, CENTROIDS_LAYER]) {
            return StageOutcome::failed(
                stage,
                format!("Hotspot detection failed: stale layers not cleared ({:#})", e),
            );
        }
        let boxes = match ctx.boxes.as_ref() {
            Some(b) => b,
            None => return StageOutcome::dependency(stage, "frame boxes"),
        };

        let detection = match detect_from_source(&ctx.boundary_source, boxes, &ctx.layout.timestamp) {
            Ok(d) => d,
            Err(e) => {
                return StageOutcome::failed(stage, format!("Hotspot detection failed: {:#}", e))
            }
        };
        for dropped in detection.dropped.iter() {
            run.note(format!("Boundary dropped: {}", dropped));
        }

        ctx.hotspots = detection.hotspots;
        run.hotspots = ctx.hotspots.len();
        run.worklist = worklist(&ctx.hotspots);

        // the worklist survives a persistence failure
        if let Err(e) = self.persist_hotspots(ctx) {
            return StageOutcome::failed(stage, format!("Hotspot persistence failed: {:#}", e));
        }
        if ctx.hotspots.is_empty() {
            StageOutcome::warning(stage, "NO HOTSPOTS FOUND")
        } else {
            StageOutcome::succeeded(
                stage,
                format!("{} hotspot(s) found; boundaries and centroids persisted OK", ctx.hotspots.len()),
            )
        }
    }

    fn persist_hotspots(&self, ctx: &RunContext) -> Result<()> {
        let record = |h: &Hotspot, geometry: Geometry| Record {
            geometry,
            flight_datetime: h.flight_timestamp.clone(),
            hotspot_no: Some(h.number),
            images: Some(h.images_label()),
        };
        let boundaries: Vec<_> = ctx
            .hotspots
            .iter()
            .map(|h| record(h, Geometry::from(&h.polygon)))
            .collect();
        let centroids: Vec<_> = ctx
            .hotspots
            .iter()
            .map(|h| record(h, Geometry::from(&h.centroid)))
            .collect();

        let package = ctx.package()?;
        package.replace_layer(BOUNDARIES_LAYER, &boundaries)?;
        package.replace_layer(CENTROIDS_LAYER, &centroids)?;
        self.collaborators.database.append(BOUNDARIES_TABLE, &boundaries)?;
        self.collaborators.database.append(CENTROIDS_TABLE, &centroids)?;
        Ok(())
    }

    fn convert_frames(&self, ctx: &mut RunContext, worklist: &[String]) -> StageOutcome {
        let stage = Stage::Conversion;
        if worklist.is_empty() {
            return StageOutcome::succeeded(stage, "No images to convert");
        }
        let frames = match ctx.frames() {
            Ok(f) => f,
            Err(e) => return StageOutcome::failed(stage, format!("Production of tif images failed: {:#}", e)),
        };

        let mut failures = vec![];
        for id in worklist {
            match self.convert_frame(ctx, &frames, id) {
                Ok(key) => ctx.converted.push((id.clone(), key)),
                Err(e) => {
                    warn!(frame = %id, error = %format!("{:#}", e), "conversion failed");
                    failures.push(format!("{}: {:#}", id, e));
                }
            }
        }

        if failures.is_empty() {
            StageOutcome::succeeded(stage, "Production of tif images OK")
        } else {
            StageOutcome::failed(
                stage,
                format!(
                    "Production of tif images failed for {} of {}: {}",
                    failures.len(),
                    worklist.len(),
                    failures.join("; ")
                ),
            )
        }
    }

    /// Convert one frame and push it; the storage key is
    /// returned when it was pushed.
    fn convert_frame(&self, ctx: &mut RunContext, frames: &[Frame], id: &str) -> Result<Option<String>> {
        let frame = frames
            .iter()
            .find(|f| f.file.id == id)
            .cloned()
            .with_context(|| format!("frame {} is not part of the flight", id))?;
        let converter = self.collaborators.converter.clone();
        let output_dir = ctx.layout.converted_dir.clone();
        let converted = call_with_deadline("conversion", self.config.call_timeout, move || {
            converter.convert(&frame, &output_dir)
        })?;

        let storage = match self.collaborators.storage.clone() {
            Some(s) => s,
            None => return Ok(None),
        };
        let name = converted
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("converted frame {} has no file name", id))?;
        let key = ctx.layout.frame_key(&name);
        let push_key = key.clone();
        call_with_deadline("frame push", self.config.call_timeout, move || {
            storage.push(&converted, &push_key)
        })?;
        ctx.pushed.push(key.clone());
        Ok(Some(key))
    }

    fn publish(&self, ctx: &RunContext) -> StageOutcome {
        let stage = Stage::Publication;
        let publisher = &self.collaborators.publisher;
        let flight = &ctx.layout.name;
        let mut failures = vec![];
        let mut lines = vec![];

        if ctx.mosaic_pushed {
            match publisher.publish(flight, &ctx.layout.mosaic_key(), None) {
                Ok(()) => lines.push("Mosaic published OK".to_string()),
                Err(e) => failures.push(format!("mosaic: {:#}", e)),
            }
        } else {
            lines.push("Mosaic could not be published (not pushed)".to_string());
        }

        let mut published = 0;
        for (id, key) in ctx.converted.iter() {
            let key = match key {
                Some(k) => k,
                None => continue,
            };
            let label = format!("{}_img_{}", ctx.layout.timestamp, id);
            match publisher.publish(flight, key, Some(&label)) {
                Ok(()) => published += 1,
                Err(e) => failures.push(format!("{}: {:#}", id, e)),
            }
        }
        if published > 0 {
            lines.push(format!("{} image(s) published OK", published));
        }

        if failures.is_empty() {
            StageOutcome::succeeded(stage, lines.join("; "))
        } else {
            StageOutcome::failed(stage, format!("Publishing failed: {}", failures.join("; ")))
        }
    }

    fn write_report(&self, run: &PipelineRun) -> Result<()> {
        create_dir_all(&self.config.log_dir)
            .with_context(|| format!("creating {}", self.config.log_dir.display()))?;
        let path = self.config.log_dir.join(format!("{}.txt", run.flight));
        write(&path, run.report()).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
