use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    Off,
    Sleep,
    Alarm,
    Snooze,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Sleep => "SLEEP",
            Self::Alarm => "ALARM",
            Self::Snooze => "SNOOZE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Sleep,
    Snooze,
}

impl Button {
    /// Decodes the first byte of an inbound serial frame. The device
    /// sends `L` for the sleep button and `R` for the snooze button;
    /// anything else is noise and is ignored.
    pub fn from_frame_byte(byte: u8) -> Option<Self> {
        match byte {
            b'L' => Some(Self::Sleep),
            b'R' => Some(Self::Snooze),
            _ => None,
        }
    }
}

/// The three device output lines. Always derived from the current
/// state, never stored or toggled independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputLines {
    pub relay: bool,
    pub buzzer: bool,
    pub lights: bool,
}

/// Outbound device frame: `YYYYMMDDHHMMSS` wall-clock timestamp plus
/// one `0`/`1` digit per output line, newline terminated.
pub fn encode_state_frame(now: NaiveDateTime, outputs: OutputLines) -> String {
    format!(
        "{}{}{}{}\n",
        now.format("%Y%m%d%H%M%S"),
        u8::from(outputs.relay),
        u8::from(outputs.buzzer),
        u8::from(outputs.lights),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn frame_layout_matches_device_protocol() {
        let now = NaiveDate::from_ymd_opt(2026, 8, 25)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        let outputs = OutputLines {
            relay: true,
            buzzer: false,
            lights: true,
        };
        assert_eq!(encode_state_frame(now, outputs), "20260825070509101\n");
    }

    #[test]
    fn repeated_frames_are_identical_apart_from_timestamp() {
        let outputs = OutputLines {
            relay: true,
            buzzer: false,
            lights: false,
        };
        let a = NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let b = a + chrono::Duration::seconds(10);

        let frame_a = encode_state_frame(a, outputs);
        let frame_b = encode_state_frame(b, outputs);
        assert_eq!(frame_a[14..], frame_b[14..]);
        assert_ne!(frame_a[..14], frame_b[..14]);
    }

    #[test]
    fn button_decoding() {
        assert_eq!(Button::from_frame_byte(b'L'), Some(Button::Sleep));
        assert_eq!(Button::from_frame_byte(b'R'), Some(Button::Snooze));
        assert_eq!(Button::from_frame_byte(b'X'), None);
        assert_eq!(Button::from_frame_byte(0), None);
    }
}
