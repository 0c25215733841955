//! KnobActor - the task that owns a knob's state
//!
//! The knob model is not thread-safe by contract. Instead of locking it, one
//! actor task owns it and applies commands sequentially; every other context
//! (device I/O, worker pool, watchdog timers) writes through a
//! [`KnobHandle`](super::KnobHandle). Listeners run synchronously on this
//! task, in command order.

use super::commands::{KnobCommand, SubscriberFn};
use super::handle::KnobHandle;
use super::types::{
    FieldChange, FieldValue, KnobEvent, KnobId, KnobState, SubscriptionId, WriteOrigin,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub struct KnobActor {
    id: KnobId,
    name: Arc<str>,
    state: KnobState,
    subscribers: Vec<(SubscriptionId, SubscriberFn)>,
    next_subscription: u64,
    command_rx: mpsc::UnboundedReceiver<KnobCommand>,
}

impl KnobActor {
    /// Spawn a knob actor on the current Tokio runtime and return its handle
    pub fn spawn(name: impl Into<Arc<str>>, initial: KnobState) -> KnobHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let id = KnobId::next();
        let name = name.into();

        let mut state = initial;
        state.current_value = state.clamped_current();

        let actor = KnobActor {
            id,
            name: name.clone(),
            state,
            subscribers: Vec::new(),
            next_subscription: 1,
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        debug!(knob = %name, id = %id, "KnobActor spawned");

        KnobHandle::new(id, name, cmd_tx)
    }

    async fn run(mut self) {
        while let Some(cmd) = self.command_rx.recv().await {
            trace!(knob = %self.name, ?cmd, "Processing command");

            match cmd {
                KnobCommand::Set { value, origin } => self.handle_set(value, origin),
                KnobCommand::CommitTarget { origin } => {
                    let event = KnobEvent::TargetCommitted {
                        value: self.state.target_value,
                        origin,
                    };
                    self.notify(&event);
                }
                KnobCommand::Subscribe { install } => {
                    let id = SubscriptionId(self.next_subscription);
                    self.next_subscription += 1;
                    let listener = install(id, &self.state);
                    self.subscribers.push((id, listener));
                    debug!(knob = %self.name, subscription = id.0, "Added subscriber");
                }
                KnobCommand::Unsubscribe { id } => {
                    self.subscribers.retain(|(sid, _)| *sid != id);
                    debug!(knob = %self.name, subscription = id.0, "Removed subscriber");
                }
                KnobCommand::Snapshot { response } => {
                    let _ = response.send(self.state.clone());
                }
                KnobCommand::Shutdown => {
                    debug!(knob = %self.name, id = %self.id, "KnobActor shutting down");
                    break;
                }
            }
        }
    }

    fn handle_set(&mut self, value: FieldValue, origin: Option<WriteOrigin>) {
        let value = match value {
            FieldValue::CurrentValue(v) => FieldValue::CurrentValue(
                v.clamp(self.state.min_value, self.state.max_value.max(self.state.min_value)),
            ),
            other => other,
        };

        self.apply(value, origin);

        // Moving the range may push the current value out of it
        if matches!(value, FieldValue::MinValue(_) | FieldValue::MaxValue(_)) {
            let clamped = self.state.clamped_current();
            self.apply(FieldValue::CurrentValue(clamped), None);
        }
    }

    fn apply(&mut self, value: FieldValue, origin: Option<WriteOrigin>) {
        let old = self.state.set(value);
        if old == value {
            // The writer still needs to know its write has gone through
            if let Some(origin) = origin {
                self.notify(&KnobEvent::Settled { value, origin });
            }
            return;
        }

        let change = FieldChange {
            old,
            new: value,
            origin,
        };
        self.notify(&KnobEvent::Changed(change));
    }

    fn notify(&self, event: &KnobEvent) {
        for (_, listener) in &self.subscribers {
            listener(event);
        }
    }
}
