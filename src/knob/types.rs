//! Type definitions for the knob model
//!
//! A knob is the rotary control a device driver is bound to. Its observable
//! state lives in [`KnobState`]; every change to it is described by a
//! [`FieldChange`] carrying the old and new [`FieldValue`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// How target values coming from the device are set and validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Every tick moves the target and commits it immediately
    #[default]
    Continuous,
    /// Ticks move the target; a click commits the value seen at press time,
    /// inactivity rolls back to the current value
    SetAndClick,
    /// Ticks only move the target while the button is held; release commits
    ClickSetAndRelease,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatingMode::Continuous => "CONTINUOUS",
            OperatingMode::SetAndClick => "SET_AND_CLICK",
            OperatingMode::ClickSetAndRelease => "CLICK_SET_AND_RELEASE",
        };
        f.write_str(s)
    }
}

/// Error returned when a `#RRGGBB` color string cannot be parsed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid color '{input}': expected #RRGGBB")]
pub struct ColorParseError {
    pub input: String,
}

/// Color tag identifying a knob (RGB components in 0.0..=1.0)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagColor {
    red: f64,
    green: f64,
    blue: f64,
}

impl TagColor {
    pub const BLACK: TagColor = TagColor {
        red: 0.0,
        green: 0.0,
        blue: 0.0,
    };

    pub const WHITE: TagColor = TagColor {
        red: 1.0,
        green: 1.0,
        blue: 1.0,
    };

    /// Create a color from RGB components, clamped to 0.0..=1.0
    pub fn rgb(red: f64, green: f64, blue: f64) -> Self {
        Self {
            red: red.clamp(0.0, 1.0),
            green: green.clamp(0.0, 1.0),
            blue: blue.clamp(0.0, 1.0),
        }
    }

    /// Create a color from hue (degrees), saturation and brightness (0.0..=1.0)
    pub fn hsb(hue: f64, saturation: f64, brightness: f64) -> Self {
        let saturation = saturation.clamp(0.0, 1.0);
        let brightness = brightness.clamp(0.0, 1.0);

        if saturation == 0.0 {
            return Self::rgb(brightness, brightness, brightness);
        }

        let h = hue.rem_euclid(360.0) / 60.0;
        let sector = h.floor();
        let fraction = h - sector;
        let p = brightness * (1.0 - saturation);
        let q = brightness * (1.0 - saturation * fraction);
        let t = brightness * (1.0 - saturation * (1.0 - fraction));

        match sector as u8 {
            0 => Self::rgb(brightness, t, p),
            1 => Self::rgb(q, brightness, p),
            2 => Self::rgb(p, brightness, t),
            3 => Self::rgb(p, q, brightness),
            4 => Self::rgb(t, p, brightness),
            _ => Self::rgb(brightness, p, q),
        }
    }

    /// Hue in degrees, 0.0..360.0 (0.0 for grays)
    pub fn hue(&self) -> f64 {
        let max = self.red.max(self.green).max(self.blue);
        let min = self.red.min(self.green).min(self.blue);
        let delta = max - min;

        if delta == 0.0 {
            return 0.0;
        }

        let hue = if max == self.red {
            (self.green - self.blue) / delta
        } else if max == self.green {
            2.0 + (self.blue - self.red) / delta
        } else {
            4.0 + (self.red - self.green) / delta
        };

        (hue * 60.0).rem_euclid(360.0)
    }

    pub fn red(&self) -> f64 {
        self.red
    }

    pub fn green(&self) -> f64 {
        self.green
    }

    pub fn blue(&self) -> f64 {
        self.blue
    }

    /// Parse a `#RRGGBB` (or `RRGGBB`) string
    pub fn parse_hex(input: &str) -> Result<Self, ColorParseError> {
        let digits = input.trim().trim_start_matches('#');
        let error = || ColorParseError {
            input: input.to_string(),
        };

        if digits.len() != 6 {
            return Err(error());
        }

        let bytes = hex::decode(digits).map_err(|_| error())?;
        Ok(Self::rgb(
            bytes[0] as f64 / 255.0,
            bytes[1] as f64 / 255.0,
            bytes[2] as f64 / 255.0,
        ))
    }

    /// Format as `#RRGGBB`
    pub fn to_hex(&self) -> String {
        let bytes = [
            (self.red * 255.0).round() as u8,
            (self.green * 255.0).round() as u8,
            (self.blue * 255.0).round() as u8,
        ];
        format!("#{}", hex::encode_upper(bytes))
    }
}

impl Default for TagColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for TagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for TagColor {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value)
    }
}

impl From<TagColor> for String {
    fn from(color: TagColor) -> Self {
        color.to_hex()
    }
}

/// Process-unique identity of a knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KnobId(u64);

impl KnobId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        KnobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for KnobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one listener installed on a knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Tag carried by a listener's own write
///
/// `seq` counts the listener's writes to one field, starting at 1, so the
/// listener can tell which of its writes an echo belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteOrigin {
    pub subscription: SubscriptionId,
    pub seq: u64,
}

/// Observable fields of a knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Channel,
    CoarseIncrement,
    CurrentValue,
    Disabled,
    FineIncrement,
    FineResolution,
    MaxValue,
    MinValue,
    OperatingMode,
    TagColor,
    TargetValue,
}

/// A typed value of one knob field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Channel(u8),
    CoarseIncrement(f64),
    CurrentValue(f64),
    Disabled(bool),
    FineIncrement(f64),
    FineResolution(bool),
    MaxValue(f64),
    MinValue(f64),
    OperatingMode(OperatingMode),
    TagColor(TagColor),
    TargetValue(f64),
}

impl FieldValue {
    /// The field this value belongs to
    pub fn field(&self) -> Field {
        match self {
            FieldValue::Channel(_) => Field::Channel,
            FieldValue::CoarseIncrement(_) => Field::CoarseIncrement,
            FieldValue::CurrentValue(_) => Field::CurrentValue,
            FieldValue::Disabled(_) => Field::Disabled,
            FieldValue::FineIncrement(_) => Field::FineIncrement,
            FieldValue::FineResolution(_) => Field::FineResolution,
            FieldValue::MaxValue(_) => Field::MaxValue,
            FieldValue::MinValue(_) => Field::MinValue,
            FieldValue::OperatingMode(_) => Field::OperatingMode,
            FieldValue::TagColor(_) => Field::TagColor,
            FieldValue::TargetValue(_) => Field::TargetValue,
        }
    }

    /// Numeric payload of the value fields, None otherwise
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::CoarseIncrement(v)
            | FieldValue::CurrentValue(v)
            | FieldValue::FineIncrement(v)
            | FieldValue::MaxValue(v)
            | FieldValue::MinValue(v)
            | FieldValue::TargetValue(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<u8> {
        match *self {
            FieldValue::Channel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match *self {
            FieldValue::Disabled(b) | FieldValue::FineResolution(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<OperatingMode> {
        match *self {
            FieldValue::OperatingMode(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<TagColor> {
        match *self {
            FieldValue::TagColor(c) => Some(c),
            _ => None,
        }
    }
}

/// One observed change of a knob field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldChange {
    pub old: FieldValue,
    pub new: FieldValue,
    /// Listener write that caused this change, None for model-side writes
    pub origin: Option<WriteOrigin>,
}

impl FieldChange {
    pub fn field(&self) -> Field {
        self.new.field()
    }
}

/// Notification delivered to knob listeners
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KnobEvent {
    Changed(FieldChange),
    /// A tagged write was applied but left the field as it was
    Settled {
        value: FieldValue,
        origin: WriteOrigin,
    },
    /// The model considers the target final
    TargetCommitted {
        value: f64,
        origin: Option<SubscriptionId>,
    },
}

/// Complete observable state of a knob
#[derive(Debug, Clone, PartialEq)]
pub struct KnobState {
    /// Device-relative slot
    pub channel: u8,
    pub current_value: f64,
    pub target_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub coarse_increment: f64,
    pub fine_increment: f64,
    pub disabled: bool,
    pub fine_resolution: bool,
    pub operating_mode: OperatingMode,
    pub tag_color: TagColor,
}

impl Default for KnobState {
    fn default() -> Self {
        Self {
            channel: 0,
            current_value: 0.0,
            target_value: 0.0,
            min_value: 0.0,
            max_value: 100.0,
            coarse_increment: 1.0,
            fine_increment: 0.05,
            disabled: false,
            fine_resolution: false,
            operating_mode: OperatingMode::Continuous,
            tag_color: TagColor::default(),
        }
    }
}

impl KnobState {
    /// Read one field
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Channel => FieldValue::Channel(self.channel),
            Field::CoarseIncrement => FieldValue::CoarseIncrement(self.coarse_increment),
            Field::CurrentValue => FieldValue::CurrentValue(self.current_value),
            Field::Disabled => FieldValue::Disabled(self.disabled),
            Field::FineIncrement => FieldValue::FineIncrement(self.fine_increment),
            Field::FineResolution => FieldValue::FineResolution(self.fine_resolution),
            Field::MaxValue => FieldValue::MaxValue(self.max_value),
            Field::MinValue => FieldValue::MinValue(self.min_value),
            Field::OperatingMode => FieldValue::OperatingMode(self.operating_mode),
            Field::TagColor => FieldValue::TagColor(self.tag_color),
            Field::TargetValue => FieldValue::TargetValue(self.target_value),
        }
    }

    /// Overwrite one field, returning the previous value
    pub fn set(&mut self, value: FieldValue) -> FieldValue {
        let old = self.get(value.field());
        match value {
            FieldValue::Channel(v) => self.channel = v,
            FieldValue::CoarseIncrement(v) => self.coarse_increment = v,
            FieldValue::CurrentValue(v) => self.current_value = v,
            FieldValue::Disabled(v) => self.disabled = v,
            FieldValue::FineIncrement(v) => self.fine_increment = v,
            FieldValue::FineResolution(v) => self.fine_resolution = v,
            FieldValue::MaxValue(v) => self.max_value = v,
            FieldValue::MinValue(v) => self.min_value = v,
            FieldValue::OperatingMode(v) => self.operating_mode = v,
            FieldValue::TagColor(v) => self.tag_color = v,
            FieldValue::TargetValue(v) => self.target_value = v,
        }
        old
    }

    /// Current value pulled into `[min, max]`
    pub fn clamped_current(&self) -> f64 {
        if self.min_value <= self.max_value {
            self.current_value.clamp(self.min_value, self.max_value)
        } else {
            self.current_value
        }
    }
}
