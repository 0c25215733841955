//! MIDI message types used on the wire
//!
//! The Twister only speaks Control Change on two MIDI channels, plus the
//! System Reset byte sent before a reset sweep. Anything else coming from the
//! device is parsed as `None` and dropped by the transport.

use std::fmt;

/// MIDI messages understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// System Reset
    SystemReset,
}

impl MidiMessage {
    /// Build a Control Change message
    pub fn control_change(channel: u8, cc: u8, value: u8) -> Self {
        MidiMessage::ControlChange {
            channel: channel & 0x0F,
            cc: cc & 0x7F,
            value: value & 0x7F,
        }
    }

    /// Parse a MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;

        // Running status (data byte first) is not tracked
        if status < 0x80 {
            return None;
        }

        match status {
            0xB0..=0xBF => {
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::ControlChange {
                    channel: status & 0x0F,
                    cc: data[1] & 0x7F,
                    value: data[2] & 0x7F,
                })
            }
            0xFF => Some(MidiMessage::SystemReset),
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::SystemReset => vec![0xFF],
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::ControlChange { channel, .. } => Some(channel),
            MidiMessage::SystemReset => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::SystemReset => write!(f, "SystemReset"),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change() {
        let data = vec![0xB1, 12, 0x41]; // CC ch 2, encoder 12, clockwise tick
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(
            msg,
            MidiMessage::ControlChange {
                channel: 1,
                cc: 12,
                value: 0x41,
            }
        );
    }

    #[test]
    fn test_truncated_control_change() {
        assert_eq!(MidiMessage::parse(&[0xB0, 12]), None);
        assert_eq!(MidiMessage::parse(&[]), None);
    }

    #[test]
    fn test_other_messages_ignored() {
        assert_eq!(MidiMessage::parse(&[0x90, 60, 100]), None); // Note On
        assert_eq!(MidiMessage::parse(&[0x41, 0x00]), None); // running status
        assert_eq!(MidiMessage::parse(&[0xFF]), Some(MidiMessage::SystemReset));
    }

    #[test]
    fn test_encode_control_change() {
        let msg = MidiMessage::control_change(1, 63, 126);
        assert_eq!(msg.encode(), vec![0xB1, 63, 126]);
        assert_eq!(msg.channel(), Some(1));
    }

    #[test]
    fn test_control_change_masks_out_of_range_bytes() {
        let msg = MidiMessage::control_change(0x11, 0x80, 0xFF);
        assert_eq!(msg.encode(), vec![0xB1, 0x00, 0x7F]);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xB0, 0x05, 0x7F]), "B0 05 7F");
    }
}
