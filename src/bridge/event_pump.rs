use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, Gilrs};
use serde::{Deserialize, Serialize};
use statum::{machine, state, transition};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pad::PadButton;

// Raw pad event with precise chrono timestamps, sent from the pump to the
// input manager's dispatch task.
#[derive(Debug, Clone)]
pub enum RawPadEvent {
    Connected {
        name: String,
        timestamp: DateTime<Local>,
    },
    Disconnected {
        timestamp: DateTime<Local>,
    },
    Button {
        button: PadButton,
        pressed: bool,
        timestamp: DateTime<Local>,
    },
    PauseChanged {
        pressed: bool,
        timestamp: DateTime<Local>,
    },
}

// Pump settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PumpSettings {
    pub stick_deadzone: f32,
    // Deflection beyond which the left stick registers as a D-pad press.
    pub stick_threshold: f32,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            stick_deadzone: 0.05,
            stick_threshold: 0.5,
        }
    }
}

// Pump errors
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("Failed to initialize pump: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),
}

// A gilrs button either maps onto a NES pad bit or onto the pause control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappedButton {
    Pad(PadButton),
    Pause,
}

// Pump states
#[state]
#[derive(Debug, Clone)]
pub enum PumpState {
    Initializing,
    Pumping,
}

#[machine]
#[derive(Debug)]
pub struct EventPump<PumpState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad; first-connected wins, others are ignored
    active_gamepad: Option<gilrs::GamepadId>,

    // Pump settings
    settings: PumpSettings,

    // Channel for sending events to the input manager
    event_sender: mpsc::Sender<RawPadEvent>,

    // Last seen left-stick values after deadzone rescaling
    last_stick_x: f32,
    last_stick_y: f32,

    // D-pad directions currently synthesized from the stick (Up/Down/Left/Right)
    stick_held: [bool; 4],
}

impl EventPump<Initializing> {
    pub fn create(
        settings: Option<PumpSettings>,
        event_sender: mpsc::Sender<RawPadEvent>,
    ) -> Result<Self, PumpError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating event pump with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(PumpError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::builder()
            .gilrs(gilrs)
            .active_gamepad(None)
            .settings(settings)
            .event_sender(event_sender)
            .last_stick_x(0.0)
            .last_stick_y(0.0)
            .stick_held([false; 4])
            .build())
    }
}

#[transition]
impl EventPump<Initializing> {
    // Adopt an already-attached gamepad and transition to the Pumping state.
    pub fn initialize(mut self) -> ::core::result::Result<EventPump<Pumping>, PumpError> {
        let attached: Vec<(gilrs::GamepadId, String)> = self
            .gilrs
            .gamepads()
            .map(|(id, pad)| (id, pad.name().to_string()))
            .collect();

        if attached.is_empty() {
            info!("No gamepad attached at startup, waiting for connect events");
        } else {
            info!("Found {} attached gamepads:", attached.len());
            for (idx, (id, name)) in attached.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, name);
            }
            let (id, name) = &attached[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", name, id);

            let event = RawPadEvent::Connected {
                name: name.clone(),
                timestamp: Local::now(),
            };
            if let Err(e) = self.event_sender.try_send(event) {
                error!("Failed to send initial connect event: {}", e);
                return Err(PumpError::EventSendError(e.to_string()));
            }
        }

        info!("Event pump initialized, transitioning to Pumping state");
        Ok(self.transition())
    }
}

impl EventPump<Pumping> {
    // Drain one gilrs event and forward whatever it maps to.
    pub fn pump_next_event(&mut self) -> Result<(), PumpError> {
        if let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            let now = Local::now();
            debug!("Processing gilrs event: {:?} from {:?}", event, id);

            let events = match event {
                EventType::Connected => self.handle_connected(id, now),
                EventType::Disconnected => self.handle_disconnected(id, now),
                _ if Some(id) != self.active_gamepad => {
                    debug!("Skipping event from non-active gamepad: {:?}", id);
                    Vec::new()
                }
                EventType::ButtonPressed(button, _) => self.button_edge(button, true, now),
                EventType::ButtonReleased(button, _) => self.button_edge(button, false, now),
                EventType::ButtonRepeated(button, _) => {
                    debug!("Button repeat ignored: {:?}", button);
                    Vec::new()
                }
                EventType::AxisChanged(axis, value, _) => self.axis_changed(axis, value, now),
                _ => {
                    debug!("Unhandled event type: {:?}", event);
                    Vec::new()
                }
            };

            for raw_event in events {
                match self.event_sender.try_send(raw_event) {
                    Ok(_) => debug!("Event sent to input manager"),
                    Err(e) => {
                        error!("Failed to send event to input manager: {}", e);
                        return Err(PumpError::EventSendError(e.to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    // Run the pump in a loop.
    pub fn run_pump_loop(&mut self) -> Result<(), PumpError> {
        info!("Starting event pump loop");

        let mut event_count = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        loop {
            if let Err(e) = self.pump_next_event() {
                error!("Error pumping event: {}", e);
                // Continue despite errors to maintain the loop
            } else {
                event_count += 1;
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Event pump stats: {} iterations in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }

            // Small sleep to prevent 100% CPU usage
            std::thread::sleep(std::time::Duration::from_micros(100));
        }
    }

    fn handle_connected(
        &mut self,
        id: gilrs::GamepadId,
        now: DateTime<Local>,
    ) -> Vec<RawPadEvent> {
        if self.active_gamepad.is_some() {
            info!("Additional gamepad {:?} connected, keeping current active pad", id);
            return Vec::new();
        }

        let name = self.gilrs.gamepad(id).name().to_string();
        info!("Gamepad connected: {} ({})", name, id);
        self.active_gamepad = Some(id);
        self.reset_stick_state();
        vec![RawPadEvent::Connected {
            name,
            timestamp: now,
        }]
    }

    fn handle_disconnected(
        &mut self,
        id: gilrs::GamepadId,
        now: DateTime<Local>,
    ) -> Vec<RawPadEvent> {
        if Some(id) != self.active_gamepad {
            debug!("Non-active gamepad {:?} disconnected, ignoring", id);
            return Vec::new();
        }

        warn!("Active gamepad {:?} disconnected", id);
        self.active_gamepad = None;
        self.reset_stick_state();
        let mut events = vec![RawPadEvent::Disconnected { timestamp: now }];

        // Fall back to the next still-attached pad, if any. Emitting the
        // disconnect first keeps the notification sequence alternating.
        let next = self
            .gilrs
            .gamepads()
            .map(|(next_id, pad)| (next_id, pad.name().to_string()))
            .next();
        if let Some((next_id, name)) = next {
            info!("Falling back to remaining gamepad: {} ({})", name, next_id);
            self.active_gamepad = Some(next_id);
            events.push(RawPadEvent::Connected {
                name,
                timestamp: now,
            });
        }

        events
    }

    fn button_edge(
        &mut self,
        button: Button,
        pressed: bool,
        now: DateTime<Local>,
    ) -> Vec<RawPadEvent> {
        let Some(mapped) = map_button(button) else {
            debug!("Ignoring unmapped button: {:?}", button);
            return Vec::new();
        };

        info!(
            "Button {:?} {} at {}",
            mapped,
            if pressed { "pressed" } else { "released" },
            now.format("%H:%M:%S%.3f")
        );

        match mapped {
            MappedButton::Pad(pad_button) => vec![RawPadEvent::Button {
                button: pad_button,
                pressed,
                timestamp: now,
            }],
            MappedButton::Pause => vec![RawPadEvent::PauseChanged {
                pressed,
                timestamp: now,
            }],
        }
    }

    fn axis_changed(&mut self, axis: Axis, value: f32, now: DateTime<Local>) -> Vec<RawPadEvent> {
        match axis {
            Axis::LeftStickX => {
                self.last_stick_x = apply_deadzone(value, self.settings.stick_deadzone);
                stick_dpad_edges(
                    &mut self.stick_held,
                    self.last_stick_x,
                    self.last_stick_y,
                    self.settings.stick_threshold,
                    now,
                )
            }
            Axis::LeftStickY => {
                self.last_stick_y = apply_deadzone(value, self.settings.stick_deadzone);
                stick_dpad_edges(
                    &mut self.stick_held,
                    self.last_stick_x,
                    self.last_stick_y,
                    self.settings.stick_threshold,
                    now,
                )
            }
            _ => {
                debug!("Ignoring unsupported axis: {:?}", axis);
                Vec::new()
            }
        }
    }

    fn reset_stick_state(&mut self) {
        self.last_stick_x = 0.0;
        self.last_stick_y = 0.0;
        self.stick_held = [false; 4];
    }
}

// Public interface for spawning and running the pump
pub struct PumpHandle {
    event_sender: mpsc::Sender<RawPadEvent>,
}

impl PumpHandle {
    // Create a new pump and spawn it as a tokio task.
    pub fn spawn(
        settings: Option<PumpSettings>,
        event_sender: mpsc::Sender<RawPadEvent>,
    ) -> Result<Self, PumpError> {
        info!("Spawning event pump with settings: {:?}", settings);

        let sender_clone = event_sender.clone();
        let pump = EventPump::create(settings, event_sender)?;
        info!("Successfully created EventPump instance");

        tokio::spawn(async move {
            match pump.initialize() {
                Ok(mut pumping) => {
                    info!("Event pump initialization successful, starting pump loop");
                    if let Err(e) = pumping.run_pump_loop() {
                        error!("Pump task terminated with error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to initialize event pump: {}", e);
                }
            }
        });

        info!("Event pump successfully started");
        Ok(Self {
            event_sender: sender_clone,
        })
    }

    // Get a sender for raw events
    pub fn event_sender(&self) -> mpsc::Sender<RawPadEvent> {
        self.event_sender.clone()
    }
}

// Map a gilrs button to its NES counterpart. South/East sit where A/B do on
// most pads; players who want them the other way round use the swap-A/B
// option rather than a different map.
fn map_button(button: Button) -> Option<MappedButton> {
    match button {
        Button::South => Some(MappedButton::Pad(PadButton::A)),
        Button::East => Some(MappedButton::Pad(PadButton::B)),
        Button::Select => Some(MappedButton::Pad(PadButton::Select)),
        Button::Start => Some(MappedButton::Pad(PadButton::Start)),
        Button::DPadUp => Some(MappedButton::Pad(PadButton::Up)),
        Button::DPadDown => Some(MappedButton::Pad(PadButton::Down)),
        Button::DPadLeft => Some(MappedButton::Pad(PadButton::Left)),
        Button::DPadRight => Some(MappedButton::Pad(PadButton::Right)),
        Button::Mode => Some(MappedButton::Pause),
        _ => None,
    }
}

// Helper function to apply deadzone to analog stick values
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        // Rescale the value to the range outside the deadzone
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}

// Translate the left-stick position into D-pad press/release edges. `held`
// tracks which of Up/Down/Left/Right the stick currently asserts, so only
// actual edges are emitted.
fn stick_dpad_edges(
    held: &mut [bool; 4],
    x: f32,
    y: f32,
    threshold: f32,
    timestamp: DateTime<Local>,
) -> Vec<RawPadEvent> {
    // gilrs reports stick-up as positive Y
    let wanted = [
        (PadButton::Up, y > threshold),
        (PadButton::Down, y < -threshold),
        (PadButton::Left, x < -threshold),
        (PadButton::Right, x > threshold),
    ];

    let mut events = Vec::new();
    for (idx, (button, pressed)) in wanted.iter().enumerate() {
        if held[idx] != *pressed {
            held[idx] = *pressed;
            debug!("Stick-synthesized D-pad edge: {:?} {}", button, pressed);
            events.push(RawPadEvent::Button {
                button: *button,
                pressed: *pressed,
                timestamp,
            });
        }
    }
    events
}
