use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use rerun::{RecordingStream, RecordingStreamBuilder};
use tracing::info;

use crate::image::ColorImage;

/// Where each iteration's output goes, and where the user can ask to stop.
pub trait DisplaySink {
    /// Present the composite of one iteration together with the current
    /// frame carrying the track markers.
    fn show(&mut self, frame_index: u64, composite: &ColorImage, annotated: &ColorImage)
        -> Result<()>;

    /// Wait at most `timeout` for a stop request.
    fn poll_cancel(&mut self, timeout: Duration) -> Result<bool>;

    /// Close windows or flush recordings. Called once at session end.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs the output images to a rerun recording on a `frame` timeline.
pub struct RerunSink {
    recorder: RecordingStream,
}

impl RerunSink {
    /// Record to an `.rrd` file.
    pub fn save(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let recorder = RecordingStreamBuilder::new("flow_tracker").save(path)?;
        info!("recording to {}", path.display());
        Ok(Self { recorder })
    }
}

impl DisplaySink for RerunSink {
    fn show(
        &mut self,
        frame_index: u64,
        composite: &ColorImage,
        annotated: &ColorImage,
    ) -> Result<()> {
        self.recorder.set_time_sequence("frame", frame_index as i64);
        self.recorder.log(
            "flow/combined",
            &rerun::Image::try_from(composite.data.clone())?,
        )?;
        self.recorder.log(
            "camera/tracks",
            &rerun::Image::try_from(annotated.data.clone())?,
        )?;
        Ok(())
    }

    /// A recording has no user input.
    fn poll_cancel(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(false)
    }

    fn release(&mut self) -> Result<()> {
        self.recorder.flush_blocking();
        Ok(())
    }
}
