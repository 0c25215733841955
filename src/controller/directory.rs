//! ControllerDirectory - the controllers known to the process, by name
//!
//! Built explicitly at startup: every device registry is registered once and
//! looked up by its identifier afterwards.

use super::{Controller, RegistryError};
use crate::knob::KnobHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct ControllerDirectory {
    controllers: HashMap<String, Arc<dyn Controller>>,
}

impl ControllerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller and reset its device
    ///
    /// Returns `false` (and keeps the existing entry) if the identifier is
    /// already taken.
    pub fn register(&mut self, controller: Arc<dyn Controller>) -> bool {
        self.insert(controller, true)
    }

    /// Register a controller, leaving its device as it is
    pub fn register_without_reset(&mut self, controller: Arc<dyn Controller>) -> bool {
        self.insert(controller, false)
    }

    fn insert(&mut self, controller: Arc<dyn Controller>, reset: bool) -> bool {
        let identifier = controller.identifier().to_string();
        if self.controllers.contains_key(&identifier) {
            warn!("Controller '{}' already registered, skipping", identifier);
            return false;
        }

        if !reset {
            info!("Controller '{}' registered", identifier);
        } else if controller.reset() {
            info!("Controller '{}' registered and reset", identifier);
        } else {
            warn!("Controller '{}' registered, but its reset failed", identifier);
        }

        self.controllers.insert(identifier, controller);
        true
    }

    pub fn exists(&self, identifier: &str) -> bool {
        self.controllers.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Controller>> {
        self.controllers.get(identifier).cloned()
    }

    /// Registered identifiers, sorted
    pub fn identifiers(&self) -> Vec<&str> {
        let mut identifiers: Vec<&str> = self.controllers.keys().map(String::as_str).collect();
        identifiers.sort_unstable();
        identifiers
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Arc<dyn Controller>> {
        self.controllers.values()
    }

    fn lookup(&self, identifier: &str) -> Result<&Arc<dyn Controller>, RegistryError> {
        self.controllers
            .get(identifier)
            .ok_or_else(|| RegistryError::UnknownController {
                identifier: identifier.to_string(),
            })
    }

    /// Move a knob from one controller to another
    ///
    /// `None` on either side means "no controller". The knob is left unbound
    /// if binding to the new controller fails.
    pub async fn assign(
        &self,
        knob: &KnobHandle,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(), RegistryError> {
        if from == to {
            return Ok(());
        }

        // Resolve both ends before touching either binding
        let old = from.map(|id| self.lookup(id)).transpose()?;
        let new = to.map(|id| self.lookup(id)).transpose()?;

        if let Some(old) = old {
            old.remove(knob)?;
        }
        if let Some(new) = new {
            new.add(knob).await?;
        }
        Ok(())
    }

    /// Dispose every registered controller
    pub fn dispose_all(&self) {
        for controller in self.controllers.values() {
            controller.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knob::KnobId;
    use crate::knob::{KnobActor, KnobState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Bookkeeping-only controller
    struct Fake {
        identifier: &'static str,
        resets_ok: bool,
        bound: Mutex<HashSet<KnobId>>,
        resets: Mutex<usize>,
        disposed: Mutex<bool>,
    }

    impl Fake {
        fn new(identifier: &'static str, resets_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                identifier,
                resets_ok,
                bound: Mutex::new(HashSet::new()),
                resets: Mutex::new(0),
                disposed: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl Controller for Fake {
        fn identifier(&self) -> &str {
            self.identifier
        }

        async fn add(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
            if self.bound.lock().insert(knob.id()) {
                Ok(())
            } else {
                Err(RegistryError::AlreadyBound { knob: knob.id() })
            }
        }

        fn remove(&self, knob: &KnobHandle) -> Result<(), RegistryError> {
            if self.bound.lock().remove(&knob.id()) {
                Ok(())
            } else {
                Err(RegistryError::NotBound { knob: knob.id() })
            }
        }

        fn contains(&self, knob: &KnobHandle) -> bool {
            self.bound.lock().contains(&knob.id())
        }

        fn bound_count(&self) -> usize {
            self.bound.lock().len()
        }

        fn reset(&self) -> bool {
            *self.resets.lock() += 1;
            self.resets_ok
        }

        fn dispose(&self) {
            *self.disposed.lock() = true;
        }
    }

    #[test]
    fn test_register_resets_and_rejects_duplicates() {
        let mut directory = ControllerDirectory::new();
        let first = Fake::new("twister", true);
        let second = Fake::new("twister", true);

        assert!(directory.register(first.clone()));
        assert!(!directory.register(second.clone()));
        assert!(directory.register(Fake::new("offline", false)));

        assert_eq!(*first.resets.lock(), 1);
        assert_eq!(*second.resets.lock(), 0);
        assert_eq!(directory.identifiers(), vec!["offline", "twister"]);
        assert!(directory.exists("twister"));
        assert!(!directory.exists("x-touch"));
        assert_eq!(directory.controllers().count(), 2);
    }

    #[test]
    fn test_register_without_reset() {
        let mut directory = ControllerDirectory::new();
        let quiet = Fake::new("quiet", true);

        assert!(directory.register_without_reset(quiet.clone()));
        assert_eq!(*quiet.resets.lock(), 0);
        assert!(directory.get("quiet").is_some());
    }

    #[tokio::test]
    async fn test_assign_moves_knob() {
        let mut directory = ControllerDirectory::new();
        let a = Fake::new("a", true);
        let b = Fake::new("b", true);
        directory.register(a.clone());
        directory.register(b.clone());
        let knob = KnobActor::spawn("knob", KnobState::default());

        directory.assign(&knob, None, Some("a")).await.unwrap();
        assert!(a.contains(&knob));

        directory.assign(&knob, Some("a"), Some("b")).await.unwrap();
        assert!(!a.contains(&knob));
        assert!(b.contains(&knob));

        directory.assign(&knob, Some("b"), None).await.unwrap();
        assert_eq!(b.bound_count(), 0);
    }

    #[tokio::test]
    async fn test_assign_unknown_controller_changes_nothing() {
        let mut directory = ControllerDirectory::new();
        let a = Fake::new("a", true);
        directory.register(a.clone());
        let knob = KnobActor::spawn("knob", KnobState::default());
        directory.assign(&knob, None, Some("a")).await.unwrap();

        let result = directory.assign(&knob, Some("a"), Some("missing")).await;
        assert_eq!(
            result,
            Err(RegistryError::UnknownController {
                identifier: "missing".to_string()
            })
        );
        assert!(a.contains(&knob));
    }

    #[test]
    fn test_dispose_all() {
        let mut directory = ControllerDirectory::new();
        let a = Fake::new("a", true);
        let b = Fake::new("b", true);
        directory.register(a.clone());
        directory.register(b.clone());

        directory.dispose_all();
        assert!(*a.disposed.lock());
        assert!(*b.disposed.lock());
    }
}
