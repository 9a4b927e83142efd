use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use opencv::prelude::*;
use quadwatch::capture::open_writer;
use quadwatch::error::OpenCvContext as _;
use quadwatch::{FrameSource, QuadDetector, SessionConfig, SourceSpec};

/// Run rectangle detection over a video without opening a window
#[derive(Parser, Debug)]
#[command(name = "detect")]
#[command(about = "Detect hue-gated rectangles in a video file or camera stream", long_about = None)]
struct Args {
    /// Input video file; falls back to QUAD_VIDEO_PATH / QUAD_CAMERA_INDEX
    #[arg(conflicts_with = "camera")]
    input: Option<PathBuf>,

    /// Capture from this camera index instead of a file
    #[arg(short, long)]
    camera: Option<i32>,

    /// Write the annotated stream to this file (mp4v)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(index) = self.camera {
            config.source = SourceSpec::Camera(index);
        } else if let Some(input) = &self.input {
            config.source = SourceSpec::File(input.clone());
        }
    }
}

fn main() -> quadwatch::Result<()> {
    // Initialize the logger
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    run(&args).inspect_err(|e| error!("{}", e))
}

fn run(args: &Args) -> quadwatch::Result<()> {
    let mut config = SessionConfig::from_env()?;
    args.apply(&mut config);

    let mut source = FrameSource::open(&config.source)?;
    let detector = QuadDetector::new(config.detector.clone());

    let mut writer = match &args.output {
        Some(path) => {
            let writer = open_writer(path, source.fps()?, source.frame_size()?)?;
            info!("Writing annotated frames to {}", path.display());
            Some(writer)
        }
        None => None,
    };

    let mut frame_index = 0u64;
    let mut total_matches = 0usize;
    while let Some(mut frame) = source.next_frame()? {
        frame_index += 1;

        let detection = detector.detect(&frame)?;
        if let Some(first) = detection.first() {
            total_matches += detection.quads.len();
            info!(
                "frame {}: {} at {:?} ({} match(es))",
                frame_index,
                detector.config().label,
                first.rect,
                detection.quads.len()
            );
        }

        detector.annotate(&mut frame, &detection)?;
        if let Some(writer) = writer.as_mut() {
            writer.write(&frame).during("VideoWriter::write")?;
        }

        if !detection.is_empty() && config.stop_on_match && writer.is_none() {
            break;
        }
    }

    println!(
        "Processed {} frames from {}, {} match(es)",
        frame_index,
        source.spec(),
        total_matches
    );
    if let Some(path) = &args.output {
        println!("Output saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_input_selects_file() {
        let args = Args::try_parse_from(["detect", "clips/desk.mp4", "-o", "out.mp4"]).unwrap();
        let mut config = SessionConfig::default();
        args.apply(&mut config);

        assert_eq!(config.source, SourceSpec::File(PathBuf::from("clips/desk.mp4")));
        assert_eq!(args.output, Some(PathBuf::from("out.mp4")));
    }

    #[test]
    fn camera_flag_selects_device() {
        let args = Args::try_parse_from(["detect", "--camera", "2"]).unwrap();
        let mut config = SessionConfig::default();
        args.apply(&mut config);

        assert_eq!(config.source, SourceSpec::Camera(2));
        assert!(args.output.is_none());
    }

    #[test]
    fn no_arguments_keep_configured_source() {
        let args = Args::try_parse_from(["detect"]).unwrap();
        let mut config = SessionConfig {
            source: SourceSpec::File(PathBuf::from("from-env.mp4")),
            ..SessionConfig::default()
        };
        args.apply(&mut config);

        assert_eq!(config.source, SourceSpec::File(PathBuf::from("from-env.mp4")));
    }

    #[test]
    fn camera_and_input_conflict() {
        assert!(Args::try_parse_from(["detect", "a.mp4", "--camera", "0"]).is_err());
        assert!(Args::try_parse_from(["detect", "--camera", "zero"]).is_err());
    }
}
