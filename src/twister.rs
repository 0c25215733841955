//! DJ TechTools Midi Fighter Twister driver
//!
//! Each bound knob occupies one of the Twister's 64 encoders, addressed by the
//! knob's channel. Two MIDI channels carry the traffic of one encoder:
//!
//! - MIDI channel 0: ring value out, rotation ticks in (0x3F ccw, 0x41 cw)
//! - MIDI channel 1: ring color out, button press (0x7F) / release (0x00) in
//!
//! How ticks and button events change the knob depends on its operating mode.
//! In SET_AND_CLICK mode a quick click commits the target seen at press time,
//! and an inactivity watchdog rolls the target back if nothing is committed.

mod encoding;
mod watchdog;


pub use encoding::{hue_to_wire, value_to_wire};
pub use watchdog::{ActivityClock, Watchdog};

use crate::controller::{ControllerRegistry, DeviceDriver, ReactionTable, Shadow};
use crate::knob::{Field, FieldValue, OperatingMode, TagColor};
use crate::midi::MidiMessage;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Device name as reported by the USB MIDI driver
pub const IDENTIFIER: &str = "Midi Fighter Twister";

/// Encoders addressable on the device (4 banks of 16)
pub const CHANNELS: u8 = 64;

pub const VALUE_SUBCHANNEL: u8 = 0;
pub const BUTTON_SUBCHANNEL: u8 = 1;

pub const COUNTER_CLOCKWISE: u8 = 0x3F;
pub const CLOCKWISE: u8 = 0x41;
pub const PRESSED: u8 = 0x7F;
pub const RELEASED: u8 = 0x00;

pub const DEFAULT_CLICK_WINDOW: Duration = Duration::from_millis(300);
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(5000);

pub type TwisterRegistry = ControllerRegistry<TwisterDriver>;

/// Click and watchdog timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwisterTiming {
    /// Press-to-release time under which a press counts as a click
    pub click_window: Duration,
    /// Inactivity after which SET_AND_CLICK rolls the target back
    pub watchdog_timeout: Duration,
}

impl Default for TwisterTiming {
    fn default() -> Self {
        Self {
            click_window: DEFAULT_CLICK_WINDOW,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
        }
    }
}

/// Button press waiting for its release
#[derive(Debug, Clone, Copy)]
struct PressRecord {
    /// Device timestamp of the press (microseconds)
    timestamp: u64,
    /// Target at press time, restored by a click
    target: f64,
}

/// Per-encoder protocol state
#[derive(Default)]
pub struct TwisterChannel {
    press: Mutex<Option<PressRecord>>,
    watchdog: Mutex<Option<Watchdog>>,
    activity: Arc<ActivityClock>,
}

impl TwisterChannel {
    /// True while a rollback watchdog is pending
    pub fn has_watchdog(&self) -> bool {
        self.watchdog
            .lock()
            .as_ref()
            .is_some_and(|watchdog| !watchdog.is_finished())
    }

    fn cancel_watchdog(&self) {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.cancel();
        }
    }
}

type TwisterShadow = Shadow<TwisterDriver>;

pub struct TwisterDriver {
    timing: TwisterTiming,
    /// Runtime for watchdog tasks; messages arrive on non-Tokio threads
    runtime: Handle,
}

impl TwisterDriver {
    pub fn new(timing: TwisterTiming, runtime: Handle) -> Self {
        Self { timing, runtime }
    }

    pub fn timing(&self) -> TwisterTiming {
        self.timing
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    fn send(transport: &dyn Transport, subchannel: u8, channel: u8, value: u8) -> bool {
        transport.send(&MidiMessage::control_change(subchannel, channel, value), None)
    }

    fn send_value(shadow: &TwisterShadow) {
        let fields = shadow.fields();
        let wire = value_to_wire(fields.current_value, fields.min_value, fields.max_value);
        Self::send(shadow.transport(), VALUE_SUBCHANNEL, fields.channel, wire);
    }

    /// Send the tag color's hue and normalize the knob's color to it
    fn send_color(shadow: &TwisterShadow, color: TagColor) {
        let hue = color.hue();
        Self::send(shadow.transport(), BUTTON_SUBCHANNEL, shadow.channel(), hue_to_wire(hue));
        shadow.set_tag_color(TagColor::hsb(hue, 1.0, 1.0));
    }

    fn init_channel(shadow: &TwisterShadow) {
        Self::send_value(shadow);
        Self::send_color(shadow, shadow.tag_color());
    }

    fn zero_channel(transport: &dyn Transport, channel: u8) {
        Self::send(transport, VALUE_SUBCHANNEL, channel, 0);
        Self::send(transport, BUTTON_SUBCHANNEL, channel, 0);
    }

    // =========================================================================
    // Incoming
    // =========================================================================

    fn on_rotation(&self, shadow: &Arc<TwisterShadow>, value: u8) {
        let direction = match value {
            CLOCKWISE => 1.0,
            COUNTER_CLOCKWISE => -1.0,
            other => {
                warn!(
                    "Unexpected rotation value 0x{:02X} on encoder {}, dropped",
                    other,
                    shadow.channel()
                );
                return;
            }
        };

        let step = if shadow.is_fine_resolution() {
            shadow.fine_increment()
        } else {
            shadow.coarse_increment()
        };

        match shadow.operating_mode() {
            OperatingMode::Continuous => {
                shadow.set_target_value(shadow.target_value() + direction * step);
                shadow.commit_target();
            }
            OperatingMode::SetAndClick => {
                shadow.state().activity.touch();
                self.arm_watchdog(shadow);
                shadow.set_target_value(shadow.target_value() + direction * step);
            }
            OperatingMode::ClickSetAndRelease => {
                // Only while the button is held, always coarse
                if shadow.is_fine_resolution() {
                    shadow.set_target_value(
                        shadow.target_value() + direction * shadow.coarse_increment(),
                    );
                }
            }
        }
    }

    fn on_button(&self, shadow: &Arc<TwisterShadow>, value: u8, timestamp: u64) {
        let pressed = match value {
            PRESSED => true,
            RELEASED => false,
            other => {
                warn!(
                    "Unexpected button value 0x{:02X} on encoder {}, dropped",
                    other,
                    shadow.channel()
                );
                return;
            }
        };

        match shadow.operating_mode() {
            OperatingMode::Continuous => shadow.set_fine_resolution(pressed),
            OperatingMode::SetAndClick => {
                let state = shadow.state();
                state.activity.touch();

                if pressed {
                    *state.press.lock() = Some(PressRecord {
                        timestamp,
                        target: shadow.target_value(),
                    });
                    shadow.set_fine_resolution(true);
                    return;
                }

                let click_window = self.timing.click_window.as_micros() as u64;
                let press = state.press.lock().take();
                if let Some(press) = press {
                    if timestamp.saturating_sub(press.timestamp) < click_window {
                        // Holding the slot lock keeps a firing watchdog out
                        let mut slot = state.watchdog.lock();
                        if let Some(watchdog) = slot.take() {
                            watchdog.cancel();
                        }
                        debug!("Click on encoder {}, committing {}", shadow.channel(), press.target);
                        shadow.set_target_value(press.target);
                        shadow.commit_target();
                    }
                }
                shadow.set_fine_resolution(false);
            }
            OperatingMode::ClickSetAndRelease => {
                shadow.set_fine_resolution(pressed);
                if !pressed {
                    shadow.commit_target();
                }
            }
        }
    }

    /// Arm the rollback watchdog unless one is already pending
    fn arm_watchdog(&self, shadow: &Arc<TwisterShadow>) {
        let state = shadow.state();
        let mut slot = state.watchdog.lock();
        if slot.as_ref().is_some_and(|watchdog| !watchdog.is_finished()) {
            return;
        }

        let rollback = shadow.current_value();
        let target = Arc::clone(shadow);
        *slot = Some(Watchdog::spawn(
            &self.runtime,
            state.activity.clone(),
            self.timing.watchdog_timeout,
            move |id| {
                let mut slot = target.state().watchdog.lock();
                if target.is_disposed() || slot.as_ref().map(Watchdog::id) != Some(id) {
                    return;
                }
                slot.take();

                debug!(
                    "No activity on encoder {}, rolling back to {}",
                    target.channel(),
                    rollback
                );
                target.set_target_value(rollback);
                target.commit_target();
            },
        ));
        trace!("Watchdog armed on encoder {} (rollback {})", shadow.channel(), rollback);
    }
}

// =============================================================================
// Reactions
// =============================================================================

fn channel_changed(shadow: &Arc<TwisterShadow>, old: &FieldValue, _new: &FieldValue) {
    if let Some(old) = old.as_channel() {
        TwisterDriver::zero_channel(shadow.transport(), old);
    }

    let state = shadow.state();
    state.cancel_watchdog();
    state.press.lock().take();

    TwisterDriver::init_channel(shadow);
}

fn value_changed(shadow: &Arc<TwisterShadow>, _old: &FieldValue, _new: &FieldValue) {
    TwisterDriver::send_value(shadow);
}

fn tag_color_changed(shadow: &Arc<TwisterShadow>, _old: &FieldValue, new: &FieldValue) {
    if let Some(color) = new.as_color() {
        TwisterDriver::send_color(shadow, color);
    }
}

fn no_device_effect(shadow: &Arc<TwisterShadow>, old: &FieldValue, new: &FieldValue) {
    trace!("{}: {:?} -> {:?}", shadow.knob(), old, new);
}

impl DeviceDriver for TwisterDriver {
    type ChannelState = TwisterChannel;

    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn reactions(&self) -> ReactionTable<Self> {
        let mut table: ReactionTable<Self> = HashMap::new();
        table.insert(Field::Channel, channel_changed);
        table.insert(Field::CurrentValue, value_changed);
        table.insert(Field::MinValue, value_changed);
        table.insert(Field::MaxValue, value_changed);
        table.insert(Field::TagColor, tag_color_changed);
        table.insert(Field::Disabled, no_device_effect);
        table.insert(Field::OperatingMode, no_device_effect);
        table.insert(Field::TargetValue, no_device_effect);
        table
    }

    fn attached(&self, shadow: &Arc<TwisterShadow>) {
        Self::init_channel(shadow);
    }

    fn detached(&self, shadow: &Arc<TwisterShadow>) {
        shadow.state().cancel_watchdog();
        Self::zero_channel(shadow.transport(), shadow.channel());
    }

    fn on_message(&self, message: &MidiMessage, timestamp: u64, shadows: &[Arc<TwisterShadow>]) {
        let MidiMessage::ControlChange { channel: subchannel, cc: encoder, value } = *message else {
            return;
        };

        for shadow in shadows.iter().filter(|shadow| shadow.channel() == encoder) {
            match subchannel {
                VALUE_SUBCHANNEL => self.on_rotation(shadow, value),
                BUTTON_SUBCHANNEL => self.on_button(shadow, value, timestamp),
                _ => {}
            }
        }
    }

    /// System reset, then sweep every encoder's value and color from 127 down
    /// to 0 so no LED keeps what the device last showed
    fn reset(&self, transport: &dyn Transport) -> bool {
        let mut ok = transport.send(&MidiMessage::SystemReset, None);

        for channel in 0..CHANNELS {
            for value in (0..=127u8).rev() {
                ok &= Self::send(transport, VALUE_SUBCHANNEL, channel, value);
                ok &= Self::send(transport, BUTTON_SUBCHANNEL, channel, value);
            }
        }

        ok
    }
}
