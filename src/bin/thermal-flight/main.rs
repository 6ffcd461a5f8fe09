mod args;

use std::{process, sync::Arc, thread};

use anyhow::Result;
use thermal_flight::{
    cli::init_tracing,
    config::PipelineConfig,
    external::{Collaborators, Notifier, Publisher, Storage},
    notify::{LogNotifier, PostmarkNotifier},
    publish::{GeoServerPublisher, NoopPublisher},
    raster::{GeoMosaic, TiffConverter},
    storage::DirectoryStorage,
    pipeline::CancelToken,
    store::SqliteDatabase,
    Pipeline, PipelineRun, RunState,
};
use tracing::{info, warn};

use crate::args::Args;

fn collaborators(config: &PipelineConfig, offline: bool) -> Result<Collaborators> {
    let storage = match (&config.storage_root, offline) {
        (Some(root), false) => Some(Arc::new(DirectoryStorage::new(root)) as Arc<dyn Storage>),
        _ => None,
    };
    let publisher: Arc<dyn Publisher> = match (&config.geoserver, offline) {
        (Some(gs), false) => Arc::new(GeoServerPublisher::new(gs.clone())?),
        _ => Arc::new(NoopPublisher),
    };
    let notifier: Arc<dyn Notifier> = match (&config.email, offline) {
        (Some(email), false) => Arc::new(PostmarkNotifier::new(email.clone())?),
        _ => Arc::new(LogNotifier),
    };

    Ok(Collaborators {
        mosaic: Arc::new(GeoMosaic),
        converter: Arc::new(TiffConverter),
        storage,
        publisher,
        notifier,
        database: Arc::new(SqliteDatabase::open(&config.database_path)?),
    })
}

/// First interrupt cancels the sync waits and lets the run
/// finish its report; a second one exits.
fn cancel_on_ctrl_c(token: CancelToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "interrupt handler not installed");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_err() {
            return;
        }
        info!("received interrupt; cancelling sync waits");
        token.cancel();
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("received second interrupt; exiting");
            process::exit(130);
        }
    });
}

fn exit_code(run: &PipelineRun, strict: bool) -> i32 {
    match run.state() {
        RunState::Completed { success: false } if strict => 2,
        RunState::Completed { .. } => 0,
        _ => 1,
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::from_cmd_line()?;
    let mut config = PipelineConfig::from_env()?;
    args.apply(&mut config);

    let root = args.flight_root(&config);
    let collaborators = collaborators(&config, args.offline)?;
    info!(flight = %root.display(), offline = args.offline, "starting");

    let pipeline = Pipeline::new(config, collaborators);
    cancel_on_ctrl_c(pipeline.cancel_token());
    let run = pipeline.run(&root);
    eprintln!("{}", run.report());
    process::exit(exit_code(&run, args.strict));
}
