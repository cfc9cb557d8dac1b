//! NES pad value types: the native button bit layout and the A/B swap
//! transform applied during input translation.

use serde::{Deserialize, Serialize};
use std::fmt;

// The eight NES pad buttons, in shift-register order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadButton {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl PadButton {
    // Bit position matches the order the console shifts buttons out of $4016.
    pub const fn mask(self) -> u8 {
        match self {
            PadButton::A => 0x01,
            PadButton::B => 0x02,
            PadButton::Select => 0x04,
            PadButton::Start => 0x08,
            PadButton::Up => 0x10,
            PadButton::Down => 0x20,
            PadButton::Left => 0x40,
            PadButton::Right => 0x80,
        }
    }
}

const ALL_BUTTONS: [PadButton; 8] = [
    PadButton::A,
    PadButton::B,
    PadButton::Select,
    PadButton::Start,
    PadButton::Up,
    PadButton::Down,
    PadButton::Left,
    PadButton::Right,
];

/// Current button states in the emulator's native bit layout.
///
/// Produced fresh on every query; never retained between frames.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadInput(u8);

impl PadInput {
    /// The no-buttons-pressed value, returned whenever no controller is
    /// attached.
    pub const NEUTRAL: PadInput = PadInput(0);

    pub const fn from_bits(bits: u8) -> Self {
        PadInput(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn set(&mut self, button: PadButton, pressed: bool) {
        if pressed {
            self.0 |= button.mask();
        } else {
            self.0 &= !button.mask();
        }
    }

    pub const fn is_pressed(self, button: PadButton) -> bool {
        self.0 & button.mask() != 0
    }

    /// Returns this value with the A and B bits exchanged and every other
    /// bit untouched.
    pub const fn with_swapped_ab(self) -> Self {
        let a = self.0 & PadButton::A.mask();
        let b = self.0 & PadButton::B.mask();
        let rest = self.0 & !(PadButton::A.mask() | PadButton::B.mask());
        PadInput(rest | (a << 1) | (b >> 1))
    }
}

impl fmt::Debug for PadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "PadInput(neutral)");
        }
        let pressed: Vec<&str> = ALL_BUTTONS
            .iter()
            .filter(|b| self.is_pressed(**b))
            .map(|b| match b {
                PadButton::A => "A",
                PadButton::B => "B",
                PadButton::Select => "Select",
                PadButton::Start => "Start",
                PadButton::Up => "Up",
                PadButton::Down => "Down",
                PadButton::Left => "Left",
                PadButton::Right => "Right",
            })
            .collect();
        write!(f, "PadInput({})", pressed.join("+"))
    }
}
