//! KnobHandle - Public API for a knob actor
//!
//! Writes are fire-and-forget and can be issued from any thread (MIDI input
//! callbacks, worker threads, timers). Queries are async and answered by the
//! actor through oneshot channels.

use super::commands::{InstallFn, KnobCommand, SubscriberFn};
use super::types::{
    FieldValue, KnobId, KnobState, OperatingMode, SubscriptionId, TagColor, WriteOrigin,
};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to a knob owned by a [`KnobActor`](super::KnobActor)
///
/// Two handles are equal when they point at the same knob.
#[derive(Clone)]
pub struct KnobHandle {
    id: KnobId,
    name: Arc<str>,
    cmd_tx: mpsc::UnboundedSender<KnobCommand>,
}

impl KnobHandle {
    pub(crate) fn new(id: KnobId, name: Arc<str>, cmd_tx: mpsc::UnboundedSender<KnobCommand>) -> Self {
        Self { id, name, cmd_tx }
    }

    pub fn id(&self) -> KnobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the owning actor has stopped
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    // =========================================================================
    // Writes (fire-and-forget)
    // =========================================================================

    /// Write one field
    pub fn set(&self, value: FieldValue) {
        let _ = self.cmd_tx.send(KnobCommand::Set {
            value,
            origin: None,
        });
    }

    /// Write one field on behalf of a listener, so it can recognize the echo
    pub fn write_from(&self, origin: WriteOrigin, value: FieldValue) {
        let _ = self.cmd_tx.send(KnobCommand::Set {
            value,
            origin: Some(origin),
        });
    }

    pub fn set_channel(&self, channel: u8) {
        self.set(FieldValue::Channel(channel));
    }

    pub fn set_current_value(&self, value: f64) {
        self.set(FieldValue::CurrentValue(value));
    }

    pub fn set_target_value(&self, value: f64) {
        self.set(FieldValue::TargetValue(value));
    }

    pub fn set_range(&self, min: f64, max: f64) {
        self.set(FieldValue::MinValue(min));
        self.set(FieldValue::MaxValue(max));
    }

    pub fn set_increments(&self, coarse: f64, fine: f64) {
        self.set(FieldValue::CoarseIncrement(coarse));
        self.set(FieldValue::FineIncrement(fine));
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.set(FieldValue::Disabled(disabled));
    }

    pub fn set_operating_mode(&self, mode: OperatingMode) {
        self.set(FieldValue::OperatingMode(mode));
    }

    pub fn set_tag_color(&self, color: TagColor) {
        self.set(FieldValue::TagColor(color));
    }

    /// Announce that the target value is final
    pub fn commit_target(&self) {
        let _ = self.cmd_tx.send(KnobCommand::CommitTarget { origin: None });
    }

    pub(crate) fn commit_target_from(&self, origin: SubscriptionId) {
        let _ = self.cmd_tx.send(KnobCommand::CommitTarget {
            origin: Some(origin),
        });
    }

    /// Stop the owning actor; listeners are dropped with it
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(KnobCommand::Shutdown);
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Install a listener for every following event
    pub fn subscribe(&self, listener: SubscriberFn) {
        let install: InstallFn = Box::new(move |_, _| listener);
        let _ = self.cmd_tx.send(KnobCommand::Subscribe { install });
    }

    /// Install a listener built from the subscription id and the state at the
    /// moment of subscribing
    ///
    /// `build` runs on the knob's owning task; whatever it returns besides the
    /// listener is handed back to the caller. Returns None if the knob is gone.
    pub async fn subscribe_with<T, F>(&self, build: F) -> Option<T>
    where
        F: FnOnce(SubscriptionId, &KnobState) -> (SubscriberFn, T) + Send + 'static,
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let install: InstallFn = Box::new(move |id, state| {
            let (listener, value) = build(id, state);
            let _ = response_tx.send(value);
            listener
        });

        if self.cmd_tx.send(KnobCommand::Subscribe { install }).is_err() {
            return None;
        }

        response_rx.await.ok()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.cmd_tx.send(KnobCommand::Unsubscribe { id });
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Read the whole state; None if the knob is gone
    pub async fn snapshot(&self) -> Option<KnobState> {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(KnobCommand::Snapshot {
                response: response_tx,
            })
            .is_err()
        {
            return None;
        }

        response_rx.await.ok()
    }
}

impl PartialEq for KnobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for KnobHandle {}

impl Hash for KnobHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for KnobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnobHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for KnobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.id)
    }
}
