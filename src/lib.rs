//! padbridge: controller-input bridge for a NES emulator UI.
//!
//! Translates platform gamepad state into the console's native pad-input
//! encoding, tracks controller attachment, and raises pause requests. The
//! emulator core polls [`ControllerInputManager::current_input`] once per
//! frame; the application layer registers a [`ControllerObserver`] for
//! attach/detach transitions and a pause handler for the pause button.

pub mod bridge;
pub mod pad;

pub use bridge::{ControllerInputManager, ControllerObserver};
pub use pad::{PadButton, PadInput};
