//! Controller binding framework
//!
//! A [`ControllerRegistry`] owns the knobs bound to one physical device. Each
//! bound knob gets a [`Shadow`] that mirrors its fields and runs the device
//! driver's reaction for every change on a shared [`WorkerPool`]. Incoming
//! device messages go the other way, through [`DeviceDriver::on_message`].
//!
//! Everything device-specific lives behind [`DeviceDriver`]; the registry and
//! the shadow are the same for every device.

mod directory;
mod registry;
mod shadow;
mod worker_pool;

pub use directory::ControllerDirectory;
pub use registry::ControllerRegistry;
pub use shadow::Shadow;
pub use worker_pool::{WorkerPool, DEFAULT_WORKERS};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::knob::{Field, FieldValue, KnobHandle, KnobId};
use crate::midi::MidiMessage;
use crate::transport::Transport;

/// Device reaction to one field change, called with (old, new) on a worker
pub type Reaction<D> = fn(&Arc<Shadow<D>>, &FieldValue, &FieldValue);

/// Reactions keyed by the field they handle
///
/// Fields without an entry only update the shadow.
pub type ReactionTable<D> = HashMap<Field, Reaction<D>>;

/// Errors reported by registries and the directory
///
/// These are caller bugs rather than environmental failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("knob {knob} is already bound")]
    AlreadyBound { knob: KnobId },

    #[error("knob {knob} is not bound")]
    NotBound { knob: KnobId },

    #[error("knob {knob} is no longer running")]
    KnobUnavailable { knob: KnobId },

    #[error("controller '{identifier}' has been disposed")]
    Disposed { identifier: String },

    #[error("no controller registered as '{identifier}'")]
    UnknownController { identifier: String },
}

/// Protocol driver for one device model
///
/// Shared by every shadow of a registry, so methods take `&self` and any
/// mutable state lives in [`DeviceDriver::ChannelState`] or behind interior
/// mutability.
pub trait DeviceDriver: Send + Sync + Sized + 'static {
    /// Per-knob protocol state, created when a knob is bound
    type ChannelState: Default + Send + Sync + 'static;

    /// Device name, used as the registry identifier
    fn identifier(&self) -> &str;

    /// Reactions to field changes
    fn reactions(&self) -> ReactionTable<Self>;

    /// Push the initial state of a newly bound knob to the device
    ///
    /// Runs before the shadow receives any change.
    fn attached(&self, shadow: &Arc<Shadow<Self>>);

    /// Release the device channel of a knob being unbound
    fn detached(&self, shadow: &Arc<Shadow<Self>>);

    /// Decode one incoming message against the bound knobs
    ///
    /// Runs on the transport's receive context.
    fn on_message(&self, message: &MidiMessage, timestamp: u64, shadows: &[Arc<Shadow<Self>>]);

    /// Put the device in a known state; `true` on success
    fn reset(&self, transport: &dyn Transport) -> bool {
        transport.send(&MidiMessage::SystemReset, None)
    }
}

/// Device-independent view of a registry, as held by the directory
#[async_trait]
pub trait Controller: Send + Sync {
    /// Stable device name
    fn identifier(&self) -> &str;

    /// Bind a knob to this device
    async fn add(&self, knob: &KnobHandle) -> Result<(), RegistryError>;

    /// Unbind a knob
    fn remove(&self, knob: &KnobHandle) -> Result<(), RegistryError>;

    fn contains(&self, knob: &KnobHandle) -> bool;

    /// Number of bound knobs
    fn bound_count(&self) -> usize;

    /// Put the device in a known state; `true` on success
    fn reset(&self) -> bool;

    /// Unbind every knob and close the transport
    fn dispose(&self);
}
