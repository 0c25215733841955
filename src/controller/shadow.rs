//! Shadow - thread-safe mirror of one bound knob
//!
//! The shadow keeps a copy of every knob field, updated on the knob's owning
//! task as change events arrive, and hands each change to the driver's
//! reaction for that field on the registry's worker pool. Driver code reads
//! the copy from any thread and writes back through the knob handle.
//!
//! Writes back are applied to the copy at once and reach the knob later, in
//! order with the model's own writes. Each one is numbered per field; while
//! any is still in flight, model changes to that field are left out of the
//! copy, since the shadow's write lands after them.

use super::worker_pool::WorkerPool;
use super::{DeviceDriver, ReactionTable};
use crate::knob::{
    Field, FieldChange, FieldValue, KnobEvent, KnobHandle, KnobState, OperatingMode,
    SubscriberFn, SubscriptionId, TagColor, WriteOrigin,
};
use crate::transport::Transport;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Writes back to one field: issued so far, and echoed by the knob
#[derive(Debug, Default, Clone, Copy)]
struct WriteLedger {
    issued: u64,
    settled: u64,
}

impl WriteLedger {
    fn in_flight(&self) -> bool {
        self.settled < self.issued
    }
}

pub struct Shadow<D: DeviceDriver> {
    knob: KnobHandle,
    subscription: SubscriptionId,
    fields: RwLock<KnobState>,
    writes: Mutex<HashMap<Field, WriteLedger>>,
    reactions: Arc<ReactionTable<D>>,
    driver: Arc<D>,
    transport: Arc<dyn Transport>,
    pool: Arc<WorkerPool>,
    state: D::ChannelState,
    disposed: AtomicBool,
}

impl<D: DeviceDriver> Shadow<D> {
    /// Subscribe to `knob` and build its shadow
    ///
    /// The field copy, the driver's channel initialization and the fine
    /// resolution reset all happen on the knob's owning task before the
    /// listener is installed, so no reaction can run ahead of them.
    /// Returns None if the knob is gone.
    pub(crate) async fn attach(
        knob: KnobHandle,
        driver: Arc<D>,
        transport: Arc<dyn Transport>,
        pool: Arc<WorkerPool>,
        reactions: Arc<ReactionTable<D>>,
    ) -> Option<Arc<Self>> {
        let handle = knob.clone();
        knob.subscribe_with(move |subscription, state| {
            let shadow = Arc::new(Shadow {
                knob: handle,
                subscription,
                fields: RwLock::new(state.clone()),
                writes: Mutex::new(HashMap::new()),
                reactions,
                driver: driver.clone(),
                transport,
                pool,
                state: D::ChannelState::default(),
                disposed: AtomicBool::new(false),
            });

            driver.attached(&shadow);
            shadow.set_fine_resolution(false);

            let weak = Arc::downgrade(&shadow);
            let listener: SubscriberFn = Arc::new(move |event: &KnobEvent| {
                if let Some(shadow) = weak.upgrade() {
                    shadow.observe(event);
                }
            });

            debug!(knob = %shadow.knob, channel = state.channel, "Shadow attached");
            (listener, shadow)
        })
        .await
    }

    /// Handle one event on the knob's owning task
    fn observe(self: &Arc<Self>, event: &KnobEvent) {
        if self.is_disposed() {
            return;
        }

        let change = match *event {
            KnobEvent::Changed(change) => change,
            KnobEvent::Settled { value, origin } => {
                self.settle(value, origin);
                return;
            }
            KnobEvent::TargetCommitted { value, .. } => {
                trace!(knob = %self.knob, value, "Target committed");
                return;
            }
        };

        // Our own writes need no reaction
        if let Some(origin) = change.origin {
            if origin.subscription == self.subscription {
                self.settle(change.new, origin);
                return;
            }
        }

        self.record(&change);

        let Some(reaction) = self.reactions.get(&change.field()).copied() else {
            return;
        };

        let shadow = Arc::clone(self);
        let (old, new) = (change.old, change.new);
        let queued = self.pool.execute(move || {
            // Unbound while queued: the device channel is already released
            if shadow.is_disposed() {
                return;
            }
            reaction(&shadow, &old, &new)
        });
        if !queued {
            debug!(knob = %self.knob, field = ?change.field(), "Worker pool closed, reaction dropped");
        }
    }

    /// Cache a foreign change unless one of our writes to the field is in flight
    fn record(&self, change: &FieldChange) {
        let writes = self.writes.lock();
        let pending = writes
            .get(&change.field())
            .is_some_and(WriteLedger::in_flight);
        if !pending {
            self.fields.write().set(change.new);
        }
    }

    /// One of our writes reached the knob
    fn settle(&self, value: FieldValue, origin: WriteOrigin) {
        if origin.subscription != self.subscription {
            return;
        }

        let mut writes = self.writes.lock();
        let ledger = writes.entry(value.field()).or_default();
        ledger.settled = ledger.settled.max(origin.seq);

        // The knob may have adjusted the value (clamping); the newest write wins
        if origin.seq == ledger.issued {
            self.fields.write().set(value);
        }
    }

    // =========================================================================
    // Cached fields
    // =========================================================================

    pub fn knob(&self) -> &KnobHandle {
        &self.knob
    }

    /// Copy of every cached field
    pub fn fields(&self) -> KnobState {
        self.fields.read().clone()
    }

    pub fn channel(&self) -> u8 {
        self.fields.read().channel
    }

    pub fn current_value(&self) -> f64 {
        self.fields.read().current_value
    }

    pub fn target_value(&self) -> f64 {
        self.fields.read().target_value
    }

    pub fn min_value(&self) -> f64 {
        self.fields.read().min_value
    }

    pub fn max_value(&self) -> f64 {
        self.fields.read().max_value
    }

    pub fn coarse_increment(&self) -> f64 {
        self.fields.read().coarse_increment
    }

    pub fn fine_increment(&self) -> f64 {
        self.fields.read().fine_increment
    }

    pub fn is_disabled(&self) -> bool {
        self.fields.read().disabled
    }

    pub fn is_fine_resolution(&self) -> bool {
        self.fields.read().fine_resolution
    }

    pub fn operating_mode(&self) -> OperatingMode {
        self.fields.read().operating_mode
    }

    pub fn tag_color(&self) -> TagColor {
        self.fields.read().tag_color
    }

    // =========================================================================
    // Driver resources
    // =========================================================================

    /// Driver-private state for this knob's channel
    pub fn state(&self) -> &D::ChannelState {
        &self.state
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // =========================================================================
    // Writes back to the knob
    // =========================================================================

    fn write(&self, value: FieldValue) {
        // Held while sending so numbering follows the knob's command order
        let mut writes = self.writes.lock();
        let ledger = writes.entry(value.field()).or_default();
        ledger.issued += 1;
        let origin = WriteOrigin {
            subscription: self.subscription,
            seq: ledger.issued,
        };

        self.fields.write().set(value);
        self.knob.write_from(origin, value);
    }

    pub fn set_fine_resolution(&self, fine: bool) {
        self.write(FieldValue::FineResolution(fine));
    }

    pub fn set_tag_color(&self, color: TagColor) {
        self.write(FieldValue::TagColor(color));
    }

    /// Move the knob's target; does not commit it
    pub fn set_target_value(&self, value: f64) {
        self.write(FieldValue::TargetValue(value));
    }

    /// Announce the knob's target as final
    pub fn commit_target(&self) {
        self.knob.commit_target_from(self.subscription);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop observing the knob and let the driver release its channel
    ///
    /// Only the first call has an effect.
    pub fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.knob.unsubscribe(self.subscription);
        self.driver.detached(self);
        debug!(knob = %self.knob, "Shadow disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knob::{Field, KnobActor};
    use crate::midi::MidiMessage;
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Records attach/detach calls and every reaction it receives
    #[derive(Default)]
    struct Probe {
        calls: Mutex<Vec<String>>,
    }

    impl DeviceDriver for Probe {
        type ChannelState = ();

        fn identifier(&self) -> &str {
            "probe"
        }

        fn reactions(&self) -> ReactionTable<Self> {
            let mut table: ReactionTable<Self> = HashMap::new();
            table.insert(Field::TargetValue, record_target);
            table.insert(Field::TagColor, record_color);
            table
        }

        fn attached(&self, shadow: &Arc<Shadow<Self>>) {
            self.calls
                .lock()
                .push(format!("attached {}", shadow.channel()));
        }

        fn detached(&self, _shadow: &Arc<Shadow<Self>>) {
            self.calls.lock().push("detached".to_string());
        }

        fn on_message(&self, _: &MidiMessage, _: u64, _: &[Arc<Shadow<Self>>]) {}
    }

    fn record_target(shadow: &Arc<Shadow<Probe>>, old: &FieldValue, new: &FieldValue) {
        shadow
            .driver()
            .calls
            .lock()
            .push(format!("target {:?} -> {:?}", old.as_f64(), new.as_f64()));
    }

    fn record_color(shadow: &Arc<Shadow<Probe>>, _old: &FieldValue, new: &FieldValue) {
        if let Some(color) = new.as_color() {
            shadow.driver().calls.lock().push(format!("color {}", color));
        }
    }

    async fn attach(knob: &KnobHandle, driver: Arc<Probe>, pool: Arc<WorkerPool>) -> Arc<Shadow<Probe>> {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(Arc::new(|_, _| {})));
        let reactions = Arc::new(driver.reactions());
        Shadow::attach(knob.clone(), driver, transport, pool, reactions)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_attach_copies_fields_and_resets_fine_resolution() {
        let knob = KnobActor::spawn(
            "probe",
            KnobState {
                channel: 5,
                target_value: 3.0,
                fine_resolution: true,
                ..KnobState::default()
            },
        );
        let driver = Arc::new(Probe::default());
        let shadow = attach(&knob, driver.clone(), Arc::new(WorkerPool::new(1))).await;

        assert_eq!(shadow.channel(), 5);
        assert_eq!(shadow.target_value(), 3.0);
        assert!(!shadow.is_fine_resolution());
        assert!(!knob.snapshot().await.unwrap().fine_resolution);
        assert_eq!(*driver.calls.lock(), vec!["attached 5".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_model_change_updates_cache_and_runs_reaction() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        let driver = Arc::new(Probe::default());
        let pool = Arc::new(WorkerPool::new(1));
        let shadow = attach(&knob, driver.clone(), pool.clone()).await;

        knob.set_target_value(7.0);
        knob.set_increments(2.0, 0.5); // cache only
        let _ = knob.snapshot().await;

        assert_eq!(shadow.target_value(), 7.0);
        assert_eq!(shadow.coarse_increment(), 2.0);
        assert_eq!(shadow.fine_increment(), 0.5);

        pool.shutdown();
        assert_eq!(
            driver.calls.lock()[1..],
            ["target Some(0.0) -> Some(7.0)".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_own_writes_do_not_trigger_reactions() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        let driver = Arc::new(Probe::default());
        let pool = Arc::new(WorkerPool::new(1));
        let shadow = attach(&knob, driver.clone(), pool.clone()).await;

        shadow.set_target_value(9.0);
        shadow.set_tag_color(TagColor::rgb(1.0, 0.0, 0.0));
        assert_eq!(shadow.target_value(), 9.0);

        let state = knob.snapshot().await.unwrap();
        assert_eq!(state.target_value, 9.0);
        assert_eq!(state.tag_color, TagColor::rgb(1.0, 0.0, 0.0));

        pool.shutdown();
        assert_eq!(driver.calls.lock().len(), 1); // only "attached"
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unchanged_write_does_not_hold_back_model_changes() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        let shadow = attach(&knob, Arc::new(Probe::default()), Arc::new(WorkerPool::new(1))).await;

        // Target is already 0: the knob settles the write without a change
        shadow.set_target_value(0.0);
        let _ = knob.snapshot().await;

        knob.set_target_value(3.0);
        let _ = knob.snapshot().await;
        assert_eq!(shadow.target_value(), 3.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_reaches_other_listeners() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        let commits = Arc::new(Mutex::new(Vec::new()));
        let sink = commits.clone();
        knob.subscribe(Arc::new(move |event: &KnobEvent| {
            if let KnobEvent::TargetCommitted { value, .. } = event {
                sink.lock().push(*value);
            }
        }));

        let shadow = attach(&knob, Arc::new(Probe::default()), Arc::new(WorkerPool::new(1))).await;
        shadow.set_target_value(4.5);
        shadow.commit_target();
        let _ = knob.snapshot().await;

        assert_eq!(*commits.lock(), vec![4.5]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispose_is_idempotent_and_stops_observing() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        let driver = Arc::new(Probe::default());
        let pool = Arc::new(WorkerPool::new(1));
        let shadow = attach(&knob, driver.clone(), pool.clone()).await;

        shadow.dispose();
        shadow.dispose();
        knob.set_target_value(2.0);
        let _ = knob.snapshot().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(shadow.is_disposed());
        assert_eq!(shadow.target_value(), 0.0);

        pool.shutdown();
        assert_eq!(
            *driver.calls.lock(),
            vec!["attached 0".to_string(), "detached".to_string()]
        );
    }

    #[tokio::test]
    async fn test_attach_to_stopped_knob() {
        let knob = KnobActor::spawn("probe", KnobState::default());
        knob.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(Arc::new(|_, _| {})));
        let driver = Arc::new(Probe::default());
        let reactions = Arc::new(driver.reactions());
        let shadow = Shadow::attach(knob, driver, transport, Arc::new(WorkerPool::new(1)), reactions).await;
        assert!(shadow.is_none());
    }
}
