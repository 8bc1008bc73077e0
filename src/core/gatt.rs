//! GATT value types shared by the central and peripheral roles.

use std::fmt;

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicFlags {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl CharacteristicFlags {
    /// Parses the BlueZ `Flags` property. Unknown flags are ignored.
    pub fn from_flags<S: AsRef<str>>(flags: &[S]) -> Self {
        let mut parsed = Self::default();
        for flag in flags {
            match flag.as_ref() {
                "read" => parsed.read = true,
                "write" | "write-without-response" => parsed.write = true,
                "notify" | "indicate" => parsed.notify = true,
                _ => {}
            }
        }
        parsed
    }

    pub fn to_flags(self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.read {
            flags.push("read".to_string());
        }
        if self.write {
            flags.push("write".to_string());
        }
        if self.notify {
            flags.push("notify".to_string());
        }
        flags
    }
}

/// State of the LED actuator, carried as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    On,
}

impl LedState {
    pub fn from_byte(byte: u8) -> Self {
        if byte == 0 { Self::Off } else { Self::On }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }
}

impl fmt::Display for LedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "OFF"),
            Self::On => write!(f, "ON"),
        }
    }
}

impl std::str::FromStr for LedState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "1" => Ok(Self::On),
            "off" | "0" => Ok(Self::Off),
            other => Err(format!("not an LED state: {}", other)),
        }
    }
}

/// Decodes a Temperature (0x2A6E) value into degrees Celsius.
///
/// The sensor firmware sends a single byte of whole degrees; a GATT-conformant
/// peer sends a little-endian sint16 in units of 0.01 °C. Anything else is
/// rejected.
pub fn decode_temperature(value: &[u8]) -> Option<f32> {
    match value {
        [whole] => Some(*whole as f32),
        [lo, hi] => Some(i16::from_le_bytes([*lo, *hi]) as f32 / 100.0),
        _ => None,
    }
}
