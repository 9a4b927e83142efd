//! End-to-end runs over a synthetic clip written with OpenCV.
//!
//! The clip is MJPEG in an AVI container, which OpenCV can write and read
//! without external codecs.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use opencv::{
    core::{Mat, Rect, Scalar, Size, CV_8UC3},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use quadwatch::session::{self, FrameUpdate, SessionHandle, SessionState, View};
use quadwatch::{DetectorError, FrameSource, QuadDetector, SessionConfig, SourceSpec};

const WIDTH: i32 = 320;
const HEIGHT: i32 = 240;
const TARGET: Rect = Rect {
    x: 80,
    y: 60,
    width: 140,
    height: 100,
};

fn yellow() -> Scalar {
    Scalar::new(0.0, 220.0, 255.0, 0.0)
}

fn frame_with(target: Option<Rect>) -> Mat {
    let mut frame = Mat::new_rows_cols_with_default(HEIGHT, WIDTH, CV_8UC3, Scalar::all(0.0)).unwrap();
    if let Some(rect) = target {
        imgproc::rectangle(&mut frame, rect, yellow(), -1, imgproc::LINE_8, 0).unwrap();
    }
    frame
}

/// Writes `blank` empty frames followed by `with_target` frames showing the rectangle.
fn write_clip(name: &str, blank: usize, with_target: usize) -> PathBuf {
    let path = std::env::temp_dir().join(format!("quadwatch-{}-{}.avi", name, std::process::id()));
    let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
    let mut writer = VideoWriter::new(&path.to_string_lossy(), fourcc, 10.0, Size::new(WIDTH, HEIGHT), true).unwrap();
    assert!(writer.is_opened().unwrap(), "OpenCV could not open an MJPEG writer");

    for _ in 0..blank {
        writer.write(&frame_with(None)).unwrap();
    }
    for _ in 0..with_target {
        writer.write(&frame_with(Some(TARGET))).unwrap();
    }
    writer.release().unwrap();
    path
}

fn cleanup(path: &Path) {
    std::fs::remove_file(path).ok();
}

fn wait_until<F>(handle: &mut SessionHandle, done: F) -> FrameUpdate
where
    F: Fn(&FrameUpdate) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let update = handle.updates().borrow().clone();
        if done(&update) || Instant::now() > deadline {
            return update;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn slow_session(clip: &Path, interval: Duration) -> SessionConfig {
    SessionConfig {
        source: SourceSpec::File(clip.to_path_buf()),
        frame_interval: interval,
        stop_on_match: false,
        ..SessionConfig::default()
    }
}

#[test]
fn detects_target_in_the_right_frame() {
    let clip = write_clip("frames", 3, 2);
    let mut source = FrameSource::open(&SourceSpec::File(clip.clone())).unwrap();
    let detector = QuadDetector::new(Default::default());

    let mut hits = Vec::new();
    let mut count = 0;
    while let Some(frame) = source.next_frame().unwrap() {
        count += 1;
        let detection = detector.detect(&frame).unwrap();
        if let Some(first) = detection.first() {
            hits.push((count, first.rect));
        }
    }
    drop(source);
    cleanup(&clip);

    assert_eq!(count, 5);
    assert_eq!(hits.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![4, 5]);
    let (_, rect) = hits[0];
    assert!((rect.x - TARGET.x).abs() <= 4, "{rect:?}");
    assert!((rect.width - TARGET.width).abs() <= 8, "{rect:?}");
}

#[test]
fn session_freezes_on_first_match() {
    let clip = write_clip("session", 2, 3);
    let config = SessionConfig {
        source: SourceSpec::File(clip.clone()),
        frame_interval: Duration::from_millis(1),
        ..SessionConfig::default()
    };

    let mut handle = session::spawn(config);
    let deadline = Instant::now() + Duration::from_secs(10);
    let update = loop {
        let update = handle.updates().borrow().clone();
        if !update.state.is_active() || Instant::now() > deadline {
            break update;
        }
        thread::sleep(Duration::from_millis(10));
    };
    handle.stop();
    cleanup(&clip);

    match update.state {
        SessionState::Matched(rect) => assert!(rect.width > 30 && rect.height > 30),
        other => panic!("expected a match, got {other:?}"),
    }
    assert_eq!(update.frame_index, 3);
    let image = update.image.expect("matched frame should be published");
    assert_eq!(image.size, [WIDTH as usize, HEIGHT as usize]);
}

#[test]
fn session_runs_to_end_without_stop_on_match() {
    let clip = write_clip("continuous", 1, 2);
    let config = SessionConfig {
        source: SourceSpec::File(clip.clone()),
        frame_interval: Duration::from_millis(1),
        stop_on_match: false,
        ..SessionConfig::default()
    };

    let mut handle = session::spawn(config);
    handle.set_view(View::Mask);
    let deadline = Instant::now() + Duration::from_secs(10);
    let update = loop {
        let update = handle.updates().borrow().clone();
        if !update.state.is_active() || Instant::now() > deadline {
            break update;
        }
        thread::sleep(Duration::from_millis(10));
    };
    handle.stop();
    cleanup(&clip);

    assert_eq!(update.state, SessionState::Finished);
    assert_eq!(update.frame_index, 3);
}

#[test]
fn exhausted_capture_has_no_frames() {
    let clip = write_clip("exhausted", 2, 0);
    let mut capture = VideoCapture::from_file(&clip.to_string_lossy(), videoio::CAP_ANY).unwrap();
    let mut frame = Mat::default();
    while capture.read(&mut frame).unwrap_or(false) && !frame.empty() {}

    let spec = SourceSpec::File(clip.clone());
    let result = FrameSource::from_capture(capture, spec);
    cleanup(&clip);

    match result {
        Err(err @ DetectorError::NoFrames(_)) => assert!(err.to_string().starts_with("Cannot open webcam")),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("drained capture still produced a frame"),
    }
}

#[test]
fn matched_frame_is_annotated_even_in_mask_view() {
    let clip = write_clip("mask-view", 2, 3);
    let config = SessionConfig {
        source: SourceSpec::File(clip.clone()),
        frame_interval: Duration::from_millis(1),
        ..SessionConfig::default()
    };

    let mut handle = session::spawn(config);
    handle.set_view(View::Mask);
    let update = wait_until(&mut handle, |u| !u.state.is_active());
    handle.stop();
    cleanup(&clip);

    assert!(matches!(update.state, SessionState::Matched(_)), "{:?}", update.state);
    let image = update.image.expect("matched frame should be published");
    let width = image.size[0];
    let centre = image.pixels[(TARGET.y + TARGET.height / 2) as usize * width + (TARGET.x + TARGET.width / 2) as usize];
    // A mask would be white here; the colour frame keeps the yellow fill.
    assert!(centre.r() > 200 && centre.g() > 150 && centre.b() < 100, "{centre:?}");
}

#[test]
fn stop_ends_a_running_session_promptly() {
    let clip = write_clip("stop", 30, 0);
    let mut handle = session::spawn(slow_session(&clip, Duration::from_millis(300)));
    let update = wait_until(&mut handle, |u| u.frame_index >= 1);
    assert_eq!(update.state, SessionState::Running);

    let started = Instant::now();
    handle.stop();
    let elapsed = started.elapsed();
    cleanup(&clip);

    assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");
}

#[test]
fn dropping_the_handle_ends_the_worker() {
    let clip = write_clip("drop", 30, 0);
    let mut handle = session::spawn(slow_session(&clip, Duration::from_millis(300)));
    wait_until(&mut handle, |u| u.frame_index >= 1);

    let started = Instant::now();
    drop(handle);
    let elapsed = started.elapsed();
    cleanup(&clip);

    assert!(elapsed < Duration::from_secs(2), "drop took {elapsed:?}");
}

#[test]
fn replacing_a_slow_session_returns_immediately() {
    let clip = write_clip("replace", 30, 0);
    let mut previous = session::spawn(slow_session(&clip, Duration::from_secs(2)));
    wait_until(&mut previous, |u| u.frame_index >= 1);

    let started = Instant::now();
    let mut next = session::spawn_after(slow_session(&clip, Duration::from_millis(1)), previous);
    assert!(started.elapsed() < Duration::from_millis(500));

    let update = wait_until(&mut next, |u| !u.state.is_active());
    drop(next);
    cleanup(&clip);

    assert_eq!(update.state, SessionState::Finished);
    assert_eq!(update.frame_index, 30);
}
