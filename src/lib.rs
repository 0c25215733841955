//! Knobs GW - binds rotary knob models to a Midi Fighter Twister
//!
//! Knob state lives in [`knob`] actors. A [`controller::ControllerRegistry`]
//! mirrors every bound knob into a shadow and drives the device through a
//! [`transport::Transport`]; the [`twister`] driver speaks the Twister's
//! protocol.

pub mod config;
pub mod controller;
pub mod knob;
pub mod midi;
pub mod transport;
pub mod twister;
