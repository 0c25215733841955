//! Knob model - the rotary control a device is bound to
//!
//! A knob exposes its current value, target value, range, increments, color
//! tag, disabled flag, operating mode and device channel as observable fields,
//! plus an explicit "target committed" signal. Each field change is reported
//! exactly once, as a typed [`FieldChange`], over one ordered listener stream
//! per knob.

mod actor;
mod commands;
mod handle;
mod types;

pub use actor::KnobActor;
pub use commands::SubscriberFn;
pub use handle::KnobHandle;
pub use types::{
    ColorParseError, Field, FieldChange, FieldValue, KnobEvent, KnobId, KnobState,
    OperatingMode, SubscriptionId, TagColor, WriteOrigin,
};
