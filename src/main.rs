use dotenv::dotenv;
use eframe::egui;
use log::error;
use quadwatch::app::DetectorApp;
use quadwatch::SessionConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    dotenv().ok();
    env_logger::init();

    let config = SessionConfig::from_env().inspect_err(|e| error!("{}", e))?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(config.window_title.clone())
            .with_inner_size(config.window_size),
        ..Default::default()
    };

    let title = config.window_title.clone();
    eframe::run_native(
        &title,
        options,
        Box::new(|_cc| Ok(Box::new(DetectorApp::new(config)))),
    )?;

    Ok(())
}
