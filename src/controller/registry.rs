//! ControllerRegistry - the knobs bound to one device

use super::shadow::Shadow;
use super::worker_pool::WorkerPool;
use super::{Controller, DeviceDriver, ReactionTable, RegistryError};
use crate::knob::{KnobHandle, KnobId};
use crate::midi::MidiMessage;
use crate::transport::{MemoryTransport, MessageCallback, MidiTransport, PortMatch, Transport};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

pub struct ControllerRegistry<D: DeviceDriver> {
    identifier: String,
    driver: Arc<D>,
    reactions: Arc<ReactionTable<D>>,
    transport: Arc<dyn Transport>,
    pool: Arc<WorkerPool>,
    shadows: DashMap<KnobId, Arc<Shadow<D>>>,
    /// Held for the whole of `add`, so a losing caller never touches the device
    adding: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl<D: DeviceDriver> ControllerRegistry<D> {
    /// Build a registry around a transport
    ///
    /// `connect` receives the callback that routes incoming messages to the
    /// driver and returns the transport to send through, which is handed back
    /// alongside the registry.
    pub fn open<T, F>(driver: D, pool: Arc<WorkerPool>, connect: F) -> (Arc<Self>, Arc<T>)
    where
        T: Transport + 'static,
        F: FnOnce(MessageCallback) -> Arc<T>,
    {
        // Messages arriving before the registry exists are dropped
        let target: Arc<RwLock<Weak<Self>>> = Arc::new(RwLock::new(Weak::new()));
        let route = target.clone();
        let on_message: MessageCallback = Arc::new(move |message, timestamp| {
            let registry = route.read().upgrade();
            if let Some(registry) = registry {
                registry.dispatch(&message, timestamp);
            }
        });

        let transport = connect(on_message);
        let registry = Arc::new(Self {
            identifier: driver.identifier().to_string(),
            reactions: Arc::new(driver.reactions()),
            driver: Arc::new(driver),
            transport: transport.clone(),
            pool,
            shadows: DashMap::new(),
            adding: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        });
        *target.write() = Arc::downgrade(&registry);

        (registry, transport)
    }

    /// Registry on the MIDI ports named `device_name`
    pub fn open_midi(
        driver: D,
        pool: Arc<WorkerPool>,
        device_name: &str,
        port_match: PortMatch,
    ) -> Arc<Self> {
        let (registry, _) = Self::open(driver, pool, |on_message| {
            Arc::new(MidiTransport::open(device_name, port_match, on_message))
        });
        registry
    }

    /// Registry on an in-memory loopback, returned alongside it
    pub fn open_in_memory(driver: D, pool: Arc<WorkerPool>) -> (Arc<Self>, Arc<MemoryTransport>) {
        Self::open(driver, pool, |on_message| Arc::new(MemoryTransport::new(on_message)))
    }

    fn dispatch(&self, message: &MidiMessage, timestamp: u64) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        trace!("{} <- {} @{}", self.identifier, message, timestamp);

        let shadows: Vec<_> = self.shadows.iter().map(|entry| entry.value().clone()).collect();
        self.driver.on_message(message, timestamp, &shadows);
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Shadow of a bound knob
    pub fn shadow(&self, knob: &KnobHandle) -> Result<Arc<Shadow<D>>, RegistryError> {
        self.shadows
            .get(&knob.id())
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::NotBound { knob: knob.id() })
    }

    pub async fn add(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
        let disposed = || RegistryError::Disposed {
            identifier: self.identifier.clone(),
        };

        let _adding = self.adding.lock().await;

        if self.disposed.load(Ordering::SeqCst) {
            return Err(disposed());
        }
        if self.shadows.contains_key(&knob.id()) {
            return Err(RegistryError::AlreadyBound { knob: knob.id() });
        }

        let shadow = Shadow::attach(
            knob.clone(),
            self.driver.clone(),
            self.transport.clone(),
            self.pool.clone(),
            self.reactions.clone(),
        )
        .await
        .ok_or(RegistryError::KnobUnavailable { knob: knob.id() })?;

        self.shadows.insert(knob.id(), shadow);

        // dispose() may have swept the map while we attached
        if self.disposed.load(Ordering::SeqCst) {
            if let Some((_, shadow)) = self.shadows.remove(&knob.id()) {
                shadow.dispose();
            }
            return Err(disposed());
        }

        info!("{}: bound {}", self.identifier, knob);
        Ok(())
    }

    pub fn remove(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
        let (_, shadow) = self
            .shadows
            .remove(&knob.id())
            .ok_or(RegistryError::NotBound { knob: knob.id() })?;

        shadow.dispose();
        info!("{}: unbound {}", self.identifier, knob);
        Ok(())
    }

    pub fn contains(&self, knob: &KnobHandle) -> bool {
        self.shadows.contains_key(&knob.id())
    }

    pub fn bound_count(&self) -> usize {
        self.shadows.len()
    }

    pub fn reset(&self) -> bool {
        let ok = self.driver.reset(self.transport.as_ref());
        if ok {
            debug!("{}: reset complete", self.identifier);
        } else {
            warn!("{}: reset failed", self.identifier);
        }
        ok
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let keys: Vec<KnobId> = self.shadows.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, shadow)) = self.shadows.remove(&key) {
                shadow.dispose();
            }
        }

        self.transport.close();
        info!("{}: disposed", self.identifier);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: DeviceDriver> Controller for ControllerRegistry<D> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn add(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
        ControllerRegistry::add(self, knob).await
    }

    fn remove(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
        ControllerRegistry::remove(self, knob)
    }

    fn contains(&self, knob: &KnobHandle) -> bool {
        ControllerRegistry::contains(self, knob)
    }

    fn bound_count(&self) -> usize {
        ControllerRegistry::bound_count(self)
    }

    fn reset(&self) -> bool {
        ControllerRegistry::reset(self)
    }

    fn dispose(&self) {
        ControllerRegistry::dispose(self)
    }
}
