use anyhow::Result;
use clap::Parser;
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::{info, info_span, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::LevelFilter;

use flow_tracker::config::Config;
use flow_tracker::dense_flow::GridLkFlow;
use flow_tracker::detector::MinEigenDetector;
use flow_tracker::display::{DisplaySink, RerunSink};
use flow_tracker::optical_flow::PyramidalLk;
use flow_tracker::session::{Backends, Phase, Session};
use flow_tracker::source::open_source;

#[derive(Parser)]
pub struct Args {
    /// `synthetic` or a directory of images; with --opencv a video file or camera index
    #[clap(short, long, default_value = "synthetic")]
    pub input: String,
    /// length of the synthetic sequence
    #[clap(long, default_value = "300")]
    pub frames: u64,
    #[clap(long, default_value = "./logs/flow_tracker.rrd")]
    pub recording: String,
    /// JSON settings, used instead of the command line ones
    #[clap(long)]
    pub config_file: Option<String>,
    /// capture and estimate with OpenCV
    #[cfg(feature = "opencv")]
    #[clap(long)]
    pub opencv: bool,
    /// show a HighGUI window instead of recording, `q` quits
    #[cfg(feature = "opencv")]
    #[clap(long)]
    pub window: bool,
    #[clap(flatten)]
    pub config: Config,
}

fn open_sink(args: &Args) -> Result<Box<dyn DisplaySink>> {
    #[cfg(feature = "opencv")]
    if args.window {
        return Ok(Box::new(flow_tracker::cv::WindowSink::new()));
    }
    Ok(Box::new(RerunSink::save(Path::new(&args.recording))?))
}

fn open_backends(args: &Args, config: &Config) -> Result<Backends> {
    let sink = open_sink(args)?;

    #[cfg(feature = "opencv")]
    if args.opencv {
        use flow_tracker::cv::*;
        use flow_tracker::source::{is_native_input, FrameSource};
        // synthetic and image directories stay native, the rest is a camera or video
        let source: Box<dyn FrameSource> = if is_native_input(&args.input) {
            open_source(&args.input, config.seed, args.frames)?
        } else {
            Box::new(CaptureSource::open(&args.input)?)
        };
        return Ok(Backends {
            source,
            detector: Box::new(GoodFeaturesDetector),
            estimator: Box::new(LkEstimator),
            dense: Box::new(FarnebackFlow::default()),
            sink,
        });
    }

    Ok(Backends {
        source: open_source(&args.input, config.seed, args.frames)?,
        detector: Box::new(MinEigenDetector::default()),
        estimator: Box::new(PyramidalLk::new()),
        dense: Box::new(GridLkFlow::new(config.dense_stride)),
        sink,
    })
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let config = match &args.config_file {
        Some(path) => Config::load(Path::new(path))?,
        None => args.config.clone(),
    };

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .with(LevelFilter::INFO)
        .init();

    config.validate()?;
    let mut session = Session::new(&config, open_backends(&args, &config)?)?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    if let Some(length) = session.remaining_frames() {
        header_span.pb_set_length(length);
    }
    let header_span_enter = header_span.enter();

    while session.step()? != Phase::Terminated {
        Span::current().pb_inc(1);
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    if let Some(summary) = session.summary() {
        info!(
            frames = summary.frames,
            reseeds = summary.reseeds,
            exit = ?summary.exit,
            "done"
        );
    }
    Ok(())
}

