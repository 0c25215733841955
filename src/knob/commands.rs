//! Command enum for the knob actor

use super::types::{FieldValue, KnobEvent, KnobState, SubscriptionId, WriteOrigin};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Listener callback, invoked on the knob's owning task for every event
pub type SubscriberFn = Arc<dyn Fn(&KnobEvent) + Send + Sync>;

/// Builds a listener from the subscription id and the state at the moment of
/// subscribing. Runs on the owning task, so no event can slip in between.
pub type InstallFn = Box<dyn FnOnce(SubscriptionId, &KnobState) -> SubscriberFn + Send>;

/// Commands for the knob actor
///
/// Writes are fire-and-forget; queries answer through a oneshot channel.
pub enum KnobCommand {
    /// Write one field
    Set {
        value: FieldValue,
        /// Listener issuing the write, echoed back in the resulting event
        origin: Option<WriteOrigin>,
    },

    /// Announce that the current target is final
    CommitTarget { origin: Option<SubscriptionId> },

    /// Install a listener atomically with a state read
    Subscribe { install: InstallFn },

    /// Remove a listener
    Unsubscribe { id: SubscriptionId },

    /// Read the whole state
    Snapshot {
        response: oneshot::Sender<KnobState>,
    },

    /// Stop the actor
    Shutdown,
}

impl std::fmt::Debug for KnobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KnobCommand::Set { value, origin } => f
                .debug_struct("Set")
                .field("value", value)
                .field("origin", origin)
                .finish(),
            KnobCommand::CommitTarget { origin } => f
                .debug_struct("CommitTarget")
                .field("origin", origin)
                .finish(),
            KnobCommand::Subscribe { .. } => f.write_str("Subscribe"),
            KnobCommand::Unsubscribe { id } => {
                f.debug_struct("Unsubscribe").field("id", id).finish()
            }
            KnobCommand::Snapshot { .. } => f.write_str("Snapshot"),
            KnobCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}
