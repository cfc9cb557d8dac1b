//! Controller-input bridge between the platform gamepad API and the
//! emulator core.
//!
//! Implements a two-stage pipeline:
//!
//! 1. [`event_pump`] - Raw gilrs event collection and NES button mapping
//! 2. [`input_manager`] - Connection state machine, snapshot publication
//!    and observer/pause notification
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► EventPump ──► ControllerInputManager ──► PadInput
//!             (RawPadEvent)  (watch snapshot)          (per-frame poll)
//! ```
//!
//! The pump runs in its own task; the emulator's frame loop polls the
//! manager synchronously and never blocks on event delivery.

pub mod event_pump;
pub mod input_manager;

pub use event_pump::{PumpError, PumpHandle, PumpSettings, RawPadEvent};
pub use input_manager::{ControllerInputManager, ControllerObserver};
