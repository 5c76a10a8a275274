use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use deskchat::config::AppConfig;
use deskchat::logging::{self, LogSettings};
use deskchat::providers::providers_from_config;
use deskchat::transcript::TranscriptPrinter;
use deskchat::{App, RuntimeController};
use tracing::info;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    logging::init(&LogSettings::from_env()).context("failed to initialize logging")?;
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let providers = providers_from_config(&config).context("failed to initialize providers")?;
    info!(models = ?config.model_names(), stream = config.stream, "starting deskchat");

    let mut app = App::from_config(&config);
    app.push_notice(format!(
        "Chatting with {}. Type /help for commands.",
        app.selected_models().join(", ")
    ));
    let mut controller = RuntimeController::new(providers);
    let mut printer = TranscriptPrinter::new();
    let mut out = io::stdout().lock();
    let input = spawn_input_reader().context("failed to start input reader")?;
    let mut input_closed = false;

    printer.render(&app, &mut out)?;
    loop {
        if input_closed {
            controller.pump_timeout(&mut app, INPUT_POLL_INTERVAL);
        } else {
            match input.recv_timeout(INPUT_POLL_INTERVAL) {
                Ok(line) => app.on_submit(&line, &mut controller),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => input_closed = true,
            }
        }

        controller.pump(&mut app);
        if controller.take_render_request() {
            printer.render(&app, &mut out)?;
        }

        if app.should_exit || controller.stop_requested() {
            break;
        }
        if input_closed && controller.is_idle() {
            break;
        }
    }

    controller.run_until_idle(&mut app, SHUTDOWN_GRACE);
    printer.render(&app, &mut out)?;
    controller.shutdown();
    Ok(())
}

fn spawn_input_reader() -> io::Result<Receiver<String>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("deskchat-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if sender.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(receiver)
}
