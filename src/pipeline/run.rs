//! The record of one pipeline run.
use std::fmt;

use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    /// The flight could not be taken in; nothing ran.
    IntakeFailed,
    InProgress,
    Completed { success: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Mosaic,
    MosaicSync,
    MosaicPush,
    Footprint,
    Districts,
    FrameBoxes,
    Hotspots,
    Conversion,
    PublishSync,
    Publication,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Mosaic => "mosaic",
            Stage::MosaicSync => "mosaic sync",
            Stage::MosaicPush => "mosaic push",
            Stage::Footprint => "footprint",
            Stage::Districts => "districts",
            Stage::FrameBoxes => "frame boxes",
            Stage::Hotspots => "hotspots",
            Stage::Conversion => "conversion",
            Stage::PublishSync => "publish sync",
            Stage::Publication => "publication",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    /// Data-quality issue; does not affect success.
    Warning,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub message: String,
}

impl StageOutcome {
    pub fn succeeded(stage: Stage, message: impl Into<String>) -> Self {
        StageOutcome {
            stage,
            status: StageStatus::Succeeded,
            message: message.into(),
        }
    }

    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        StageOutcome {
            stage,
            status: StageStatus::Warning,
            message: message.into(),
        }
    }

    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        StageOutcome {
            stage,
            status: StageStatus::Failed,
            message: message.into(),
        }
    }

    /// A stage that cannot run because an earlier one did not
    /// produce what it needs.
    pub fn dependency(stage: Stage, missing: &str) -> Self {
        Self::failed(stage, format!("{} skipped: {} unavailable", stage, missing))
    }
}

/// State, outcomes and products of one run.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub flight: String,
    state: RunState,
    success: bool,
    outcomes: Vec<StageOutcome>,
    report: Vec<String>,
    pub districts: Vec<String>,
    pub worklist: Vec<String>,
    pub frames_retained: usize,
    pub hotspots: usize,
}

impl PipelineRun {
    pub fn new(flight: &str) -> Self {
        PipelineRun {
            flight: flight.to_string(),
            state: RunState::NotStarted,
            success: true,
            outcomes: vec![],
            report: vec![],
            districts: vec![],
            worklist: vec![],
            frames_retained: 0,
            hotspots: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn report(&self) -> String {
        self.report.join("\n")
    }

    pub fn start(&mut self) {
        self.state = RunState::InProgress;
    }

    pub fn fail_intake(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(flight = %self.flight, "{}", message);
        self.report.push(message);
        self.success = false;
        self.state = RunState::IntakeFailed;
    }

    /// Add a line to the report without touching success.
    pub fn note(&mut self, line: impl Into<String>) {
        self.report.push(line.into());
    }

    pub fn record(&mut self, outcome: StageOutcome) {
        match outcome.status {
            StageStatus::Succeeded => info!(stage = %outcome.stage, "{}", outcome.message),
            StageStatus::Warning => warn!(stage = %outcome.stage, "{}", outcome.message),
            StageStatus::Failed => {
                warn!(stage = %outcome.stage, failed = true, "{}", outcome.message);
                self.success = false;
            }
        }
        self.report.push(outcome.message.clone());
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        if self.state == RunState::InProgress {
            self.state = RunState::Completed {
                success: self.success,
            };
        }
    }
}
