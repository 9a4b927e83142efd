use std::time::Duration;

use eframe::{egui, Frame};
use egui::{CentralPanel, Color32, ColorImage, Context, TextureHandle, TopBottomPanel};
use log::{error, info};
use rfd::FileDialog;

use crate::capture::SourceSpec;
use crate::config::SessionConfig;
use crate::display::save_snapshot;
use crate::session::{self, SessionHandle, SessionState, View};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

pub struct DetectorApp {
    config: SessionConfig,
    session: Option<SessionHandle>,
    texture: Option<TextureHandle>,
    last_image: Option<ColorImage>,
    frame_index: u64,
    matches: usize,
    state: SessionState,
    view: View,
    notice: Option<String>,
}

impl DetectorApp {
    pub fn new(config: SessionConfig) -> Self {
        let mut app = Self {
            config,
            session: None,
            texture: None,
            last_image: None,
            frame_index: 0,
            matches: 0,
            state: SessionState::Starting,
            view: View::default(),
            notice: None,
        };
        app.restart();
        app
    }

    fn restart(&mut self) {
        info!("Starting capture on {}", self.config.source);
        // The new worker joins the old one before it grabs the device.
        let handle = match self.session.take() {
            Some(previous) => session::spawn_after(self.config.clone(), previous),
            None => session::spawn(self.config.clone()),
        };
        handle.set_view(self.view);
        self.session = Some(handle);
        self.state = SessionState::Starting;
        self.frame_index = 0;
        self.matches = 0;
    }

    fn switch_source(&mut self, source: SourceSpec) {
        self.config.source = source;
        self.restart();
    }

    fn pull_update(&mut self, ctx: &Context) {
        let Some(update) = self.session.as_mut().and_then(|s| s.poll()) else {
            return;
        };

        if let Some(image) = update.image {
            if let Some(texture) = &mut self.texture {
                texture.set(image.clone(), Default::default());
            } else {
                self.texture = Some(ctx.load_texture("frame", image.clone(), Default::default()));
            }
            self.last_image = Some(image);
        }
        self.frame_index = update.frame_index;
        self.matches = update.matches;
        self.state = update.state;
    }

    fn status_line(&self) -> (String, Color32) {
        match &self.state {
            SessionState::Starting => (format!("Opening {}…", self.config.source), Color32::GRAY),
            SessionState::Running => (
                format!(
                    "{} · frame {} · {} match(es)",
                    self.config.source, self.frame_index, self.matches
                ),
                Color32::LIGHT_GRAY,
            ),
            SessionState::Matched(rect) => (
                format!(
                    "{} at ({}, {}) {}×{} in frame {}",
                    self.config.detector.label, rect.x, rect.y, rect.width, rect.height, self.frame_index
                ),
                Color32::GREEN,
            ),
            SessionState::Finished => (
                format!("{} ended after {} frames", self.config.source, self.frame_index),
                Color32::LIGHT_GRAY,
            ),
            SessionState::Failed(msg) => (msg.clone(), Color32::RED),
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Use camera").clicked() {
                let index = match self.config.source {
                    SourceSpec::Camera(index) => index,
                    SourceSpec::File(_) => 0,
                };
                self.switch_source(SourceSpec::Camera(index));
            }

            if ui.button("Open video…").clicked() {
                if let Some(path) = FileDialog::new().add_filter("Video", VIDEO_EXTENSIONS).pick_file() {
                    self.switch_source(SourceSpec::File(path));
                }
            }

            let can_save = self.last_image.is_some();
            if ui.add_enabled(can_save, egui::Button::new("Save snapshot…")).clicked() {
                self.save_current();
            }

            let mut view = self.view;
            egui::ComboBox::from_label("View")
                .selected_text(view.name())
                .show_ui(ui, |ui| {
                    for option in View::ALL {
                        ui.selectable_value(&mut view, option, option.name());
                    }
                });
            if view != self.view {
                self.view = view;
                if let Some(session) = &self.session {
                    session.set_view(view);
                }
            }
        });
    }

    fn save_current(&mut self) {
        let Some(image) = &self.last_image else {
            return;
        };
        let Some(path) = FileDialog::new()
            .add_filter("PNG", &["png"])
            .add_filter("JPEG", &["jpg", "jpeg"])
            .set_file_name(format!("frame_{}.png", self.frame_index))
            .save_file()
        else {
            return;
        };

        self.notice = Some(match save_snapshot(image, &path) {
            Ok(()) => format!("Saved {}", path.display()),
            Err(e) => {
                error!("{}", e);
                e.to_string()
            }
        });
    }
}

impl eframe::App for DetectorApp {
    fn update(&mut self, ctx: &Context, _frame: &mut Frame) {
        self.pull_update(ctx);

        TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));

        TopBottomPanel::bottom("status").show(ctx, |ui| {
            let (text, color) = self.status_line();
            ui.colored_label(color, text);
            if let Some(notice) = &self.notice {
                ui.label(notice);
            }
        });

        CentralPanel::default().show(ctx, |ui| match &self.texture {
            Some(texture) => {
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Image::new(texture).shrink_to_fit());
                });
            }
            None => {
                ui.centered_and_justified(|ui| ui.spinner());
            }
        });

        if self.state.is_active() {
            ctx.request_repaint_after(self.config.frame_interval.max(Duration::from_millis(5)));
        }
    }
}
