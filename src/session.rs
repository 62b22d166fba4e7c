use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, error, info, instrument, warn, Span};

use crate::compositor::composite;
use crate::config::Config;
use crate::dense_flow::{DenseFlowEstimator, FlowParams};
use crate::detector::FeatureDetector;
use crate::display::DisplaySink;
use crate::error::{ensure_same_shape, SessionError};
use crate::feature::PointSet;
use crate::image::Image;
use crate::optical_flow::PointEstimator;
use crate::overlay::{OverlayCanvas, TrackOverlay};
use crate::source::FrameSource;
use crate::tracker::SparseTracker;
use crate::visualization::visualize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Running,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// the source has no more frames
    SourceExhausted,
    /// the display sink reported a stop request
    Cancelled,
}

/// Everything carried from one iteration to the next.
#[derive(Debug)]
pub struct SessionState {
    pub prev_gray: Image,
    pub points: PointSet,
    /// the last track call left `points` under the reseed threshold
    pub depleted: bool,
    pub canvas: OverlayCanvas,
}

/// The external collaborators a session drives.
pub struct Backends {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn FeatureDetector>,
    pub estimator: Box<dyn PointEstimator>,
    pub dense: Box<dyn DenseFlowEstimator>,
    pub sink: Box<dyn DisplaySink>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// frames pulled from the source
    pub frames: u64,
    pub reseeds: u64,
    pub exit: ExitReason,
}

/// Drives sparse tracking, dense flow and compositing once per frame.
pub struct Session {
    phase: Phase,
    source: Box<dyn FrameSource>,
    dense: Box<dyn DenseFlowEstimator>,
    sink: Box<dyn DisplaySink>,
    tracker: SparseTracker,
    overlay: TrackOverlay,
    flow_params: FlowParams,
    clear_interval: u64,
    poll_timeout: Duration,
    state: Option<SessionState>,
    frames: u64,
    reseeds: u64,
    exit: Option<ExitReason>,
    released: bool,
}

impl Session {
    pub fn new(config: &Config, backends: Backends) -> Result<Self> {
        config.validate()?;
        let tracker = SparseTracker::new(
            backends.estimator,
            backends.detector,
            config.lk_params(),
            config.detector_params(),
            config.reseed_threshold(),
        );
        Ok(Self {
            phase: Phase::Init,
            source: backends.source,
            dense: backends.dense,
            sink: backends.sink,
            tracker,
            overlay: TrackOverlay {
                thickness: config.track_thickness,
                marker_radius: config.marker_radius,
            },
            flow_params: config.flow_params(),
            clear_interval: config.overlay_clear_interval,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            state: None,
            frames: 0,
            reseeds: 0,
            exit: None,
            released: false,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Carried state, present while the session is running.
    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.exit.map(|exit| SessionSummary {
            frames: self.frames,
            reseeds: self.reseeds,
            exit,
        })
    }

    /// Frames the source still holds, if it knows.
    pub fn remaining_frames(&self) -> Option<u64> {
        self.source.remaining()
    }

    /// Run until the source is exhausted, the user cancels or something fails.
    pub fn run(&mut self) -> Result<SessionSummary> {
        while self.step()? != Phase::Terminated {}
        self.summary()
            .ok_or_else(|| anyhow!("session terminated without an exit reason"))
    }

    /// Advance the state machine by one transition. The source and sink are
    /// released on every path into `Terminated`, errors included.
    pub fn step(&mut self) -> Result<Phase> {
        let outcome = match self.phase {
            Phase::Init => self.init(),
            Phase::Running => self.iterate(),
            Phase::Terminated => return Ok(Phase::Terminated),
        };
        match outcome {
            Ok(None) => {
                self.phase = Phase::Running;
                Ok(self.phase)
            }
            Ok(Some(reason)) => {
                info!(?reason, frames = self.frames, reseeds = self.reseeds, "session finished");
                self.exit = Some(reason);
                self.terminate()?;
                Ok(Phase::Terminated)
            }
            Err(err) => {
                error!("session failed: {err:#}");
                if let Err(release_err) = self.terminate() {
                    warn!("release after failure also failed: {release_err:#}");
                }
                Err(err)
            }
        }
    }

    fn init(&mut self) -> Result<Option<ExitReason>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(Some(ExitReason::SourceExhausted));
        };
        self.frames += 1;
        let (width, height) = frame.shape();
        info!(width, height, "first frame");

        let points = self.tracker.detect(&frame.gray)?;
        if points.is_empty() {
            warn!("no features on the first frame, detecting again on the next one");
        }
        self.state = Some(SessionState {
            canvas: OverlayCanvas::new(frame.shape(), self.clear_interval),
            prev_gray: frame.gray,
            points,
            depleted: false,
        });
        Ok(None)
    }

    #[instrument(skip_all, fields(frame = tracing::field::Empty))]
    fn iterate(&mut self) -> Result<Option<ExitReason>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(Some(ExitReason::SourceExhausted));
        };
        self.frames += 1;
        Span::current().record("frame", frame.index);

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("running session without state"))?;
        ensure_same_shape("frame source", state.prev_gray.shape(), frame.shape())?;

        // sparse tracks, or a fresh point set when the live one is used up
        let (pairs, next_points, depleted) = if self
            .tracker
            .needs_reseed(&state.points, state.depleted)
        {
            let points = self.tracker.detect(&frame.gray)?;
            if points.is_empty() {
                return Err(SessionError::DetectorEmpty { frame: frame.index }.into());
            }
            self.reseeds += 1;
            info!(
                live = state.points.len(),
                threshold = self.tracker.min_tracks(),
                detected = points.len(),
                "reseeded point set"
            );
            (vec![], points, false)
        } else {
            let outcome = self
                .tracker
                .track(&state.prev_gray, &frame.gray, &state.points)?;
            debug!(
                tracked = outcome.pairs.len(),
                lost = outcome.lost,
                "sparse tracking"
            );
            if outcome.depleted {
                warn!(
                    surviving = outcome.pairs.len(),
                    threshold = self.tracker.min_tracks(),
                    "tracking degenerate, reseeding on the next frame"
                );
            }
            let next_points = outcome.surviving_new();
            (outcome.pairs, next_points, outcome.depleted)
        };

        // dense flow
        let field = self
            .dense
            .estimate(&state.prev_gray, &frame.gray, &self.flow_params)?;
        ensure_same_shape("dense flow", frame.shape(), field.shape())?;
        let dense_vis = visualize(&field);

        // track history
        if state.canvas.tick() {
            info!("track canvas cleared");
        }
        let mut annotated = frame.color.clone();
        self.overlay.draw(&mut state.canvas, &mut annotated, &pairs)?;

        let combined = composite(&dense_vis, state.canvas.image())?;
        self.sink.show(frame.index, &combined, &annotated)?;

        state.prev_gray = frame.gray;
        state.points = next_points;
        state.depleted = depleted;

        if self.sink.poll_cancel(self.poll_timeout)? {
            return Ok(Some(ExitReason::Cancelled));
        }
        Ok(None)
    }

    fn terminate(&mut self) -> Result<()> {
        self.phase = Phase::Terminated;
        self.state = None;
        if self.released {
            return Ok(());
        }
        self.released = true;
        let source = self.source.release();
        let sink = self.sink.release();
        source.and(sink)
    }
}
