//! Console probe for the controller bridge: polls the manager at frame rate
//! and prints pad state, attach/detach transitions and pause presses.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::interval;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use padbridge::{ControllerInputManager, ControllerObserver, PadInput};

struct ConsoleObserver;

impl ControllerObserver for ConsoleObserver {
    fn controller_connected(&self, _manager: &ControllerInputManager) {
        info!("Controller attached, emulator input active");
    }

    fn controller_disconnected(&self, _manager: &ControllerInputManager) {
        info!("Controller detached, input falls back to neutral");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let manager = ControllerInputManager::shared();

    let observer: Arc<dyn ControllerObserver> = Arc::new(ConsoleObserver);
    manager.set_observer(Arc::downgrade(&observer));
    manager.set_pause_handler(|m| {
        info!(
            "Pause requested (connected: {}, input: {:?})",
            m.is_connected(),
            m.current_input()
        );
    });

    info!("Polling pad input at ~60 Hz, press Ctrl-C to exit");
    let mut frame = interval(Duration::from_micros(16_667));
    let mut last = PadInput::NEUTRAL;
    loop {
        frame.tick().await;
        let input = manager.current_input();
        if input != last {
            info!("Pad state: {:?} (bits: {:#04x})", input, input.bits());
            last = input;
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
