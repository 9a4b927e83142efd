//! Background capture worker feeding the window.
//!
//! The worker thread owns the capture device and the detector. Rendered frames
//! go to the UI over a `watch` channel, and the UI's view selection comes back
//! over a second one. Dropping the handle stops the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use egui::ColorImage;
use log::{error, info, warn};
use opencv::core::Rect;
use tokio::sync::watch;

use crate::capture::FrameSource;
use crate::config::SessionConfig;
use crate::detect::QuadDetector;
use crate::display::mat_to_color_image;
use crate::error::Result;

/// Which pipeline image the window shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Frame,
    Mask,
    Edges,
}

impl View {
    pub const ALL: [View; 3] = [View::Frame, View::Mask, View::Edges];

    pub fn name(self) -> &'static str {
        match self {
            View::Frame => "Frame",
            View::Mask => "Mask",
            View::Edges => "Edges",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Starting,
    Running,
    /// Capture stopped on the first match
    Matched(Rect),
    /// The source ran out of frames
    Finished,
    Failed(String),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

#[derive(Clone)]
pub struct FrameUpdate {
    pub image: Option<ColorImage>,
    pub frame_index: u64,
    pub matches: usize,
    pub first_match: Option<Rect>,
    pub state: SessionState,
}

impl FrameUpdate {
    fn starting() -> Self {
        Self {
            image: None,
            frame_index: 0,
            matches: 0,
            first_match: None,
            state: SessionState::Starting,
        }
    }
}

pub struct SessionHandle {
    updates: watch::Receiver<FrameUpdate>,
    view: watch::Sender<View>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn updates(&mut self) -> &mut watch::Receiver<FrameUpdate> {
        &mut self.updates
    }

    /// Latest update, if one arrived since the last call.
    ///
    /// Still yields the final update after the worker has exited.
    pub fn poll(&mut self) -> Option<FrameUpdate> {
        let update = self.updates.borrow_and_update();
        if update.has_changed() {
            Some(update.clone())
        } else {
            None
        }
    }

    pub fn set_view(&self, view: View) {
        self.view.send_replace(view);
    }

    pub fn view(&self) -> View {
        *self.view.borrow()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture worker panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start capturing on a background thread.
pub fn spawn(config: SessionConfig) -> SessionHandle {
    start(config, None)
}

/// Replace a running session. The old worker is stopped and joined on the new
/// worker's thread before the source is opened, so the caller never blocks.
pub fn spawn_after(config: SessionConfig, previous: SessionHandle) -> SessionHandle {
    previous.stop.store(true, Ordering::Relaxed);
    start(config, Some(previous))
}

fn start(config: SessionConfig, previous: Option<SessionHandle>) -> SessionHandle {
    let (update_tx, update_rx) = watch::channel(FrameUpdate::starting());
    let (view_tx, view_rx) = watch::channel(View::default());
    let stop = Arc::new(AtomicBool::new(false));

    let worker = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            if let Some(previous) = previous {
                previous.stop();
            }
            let outcome = run(&config, &update_tx, &view_rx, &stop);
            if let Err(e) = outcome {
                error!("Capture on {} failed: {}", config.source, e);
                update_tx.send_modify(|update| update.state = SessionState::Failed(e.to_string()));
            }
        })
    };

    SessionHandle {
        updates: update_rx,
        view: view_tx,
        stop,
        worker: Some(worker),
    }
}

fn run(
    config: &SessionConfig,
    updates: &watch::Sender<FrameUpdate>,
    view: &watch::Receiver<View>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut source = FrameSource::open(&config.source)?;
    let detector = QuadDetector::new(config.detector.clone());
    let mut frame_index = 0u64;

    while !stop.load(Ordering::Relaxed) && !updates.is_closed() {
        let Some(mut frame) = source.next_frame()? else {
            info!("{} ended after {} frames", source.spec(), frame_index);
            updates.send_modify(|update| update.state = SessionState::Finished);
            return Ok(());
        };
        frame_index += 1;

        let detection = detector.detect(&frame)?;
        detector.annotate(&mut frame, &detection)?;

        let first_match = detection.first().map(|quad| quad.rect);
        let state = match first_match {
            Some(rect) if config.stop_on_match => {
                info!("{} found at {:?} in frame {}", detector.config().label, rect, frame_index);
                SessionState::Matched(rect)
            }
            _ => SessionState::Running,
        };

        // The frozen frame is always the annotated one, whatever the view.
        let selected = match state {
            SessionState::Matched(_) => View::Frame,
            _ => *view.borrow(),
        };
        let shown = match selected {
            View::Frame => &frame,
            View::Mask => &detection.stages.mask,
            View::Edges => &detection.stages.edges,
        };
        let image = mat_to_color_image(shown)?;

        let finished = !state.is_active();
        if updates
            .send(FrameUpdate {
                image: Some(image),
                frame_index,
                matches: detection.quads.len(),
                first_match,
                state,
            })
            .is_err()
        {
            warn!("Window closed, stopping capture");
            return Ok(());
        }

        if finished {
            return Ok(());
        }

        thread::sleep(config.frame_interval);
    }

    Ok(())
}
