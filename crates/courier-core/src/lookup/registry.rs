//! AdapterRegistry - lookup adapter の集合と優先度・有効状態
//!
//! Adapter 自体は状態を持たず、priority / enabled / base_url などの記述子は
//! registry 側で保持する。記述子は `reload()` で設定から差し替えられる。

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::error::RegistryError;
use crate::config::{LookupConfig, PortConfig};
use crate::ports::LookupAdapter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub name: String,
    /// Lower runs first.
    pub priority: i32,
    pub enabled: bool,
    pub base_url: Option<String>,
    pub settings: BTreeMap<String, String>,
}

impl AdapterDescriptor {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            base_url: None,
            settings: BTreeMap::new(),
        }
    }

    fn apply(&mut self, port: &PortConfig) {
        self.enabled = port.enabled;
        self.priority = port.priority;
        self.base_url = port.base_url.clone();
        self.settings = port.settings.clone();
    }
}

/// A registered adapter together with its current descriptor.
pub struct Candidate<Req, Resp> {
    pub descriptor: AdapterDescriptor,
    pub adapter: Arc<dyn LookupAdapter<Req, Resp>>,
}

impl<Req, Resp> Clone for Candidate<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            adapter: Arc::clone(&self.adapter),
        }
    }
}

struct RegistryState<Req, Resp> {
    enabled: bool,
    default_adapter: Option<String>,
    // 登録順を保持する（同一 priority の tie-break）
    entries: Vec<Candidate<Req, Resp>>,
}

pub struct AdapterRegistry<Req, Resp> {
    state: RwLock<RegistryState<Req, Resp>>,
}

impl<Req, Resp> Default for AdapterRegistry<Req, Resp> {
    fn default() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                enabled: true,
                default_adapter: None,
                entries: Vec::new(),
            }),
        }
    }
}

impl<Req, Resp> AdapterRegistry<Req, Resp> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState<Req, Resp>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState<Req, Resp>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register with a descriptor built from the adapter's own name and priority.
    pub fn register(&self, adapter: Arc<dyn LookupAdapter<Req, Resp>>) -> Result<(), RegistryError> {
        let descriptor = AdapterDescriptor::new(adapter.name(), adapter.priority());
        self.insert(Candidate { descriptor, adapter })
    }

    /// Register with settings from a port entry. The adapter's name stays the key.
    pub fn register_with(
        &self,
        adapter: Arc<dyn LookupAdapter<Req, Resp>>,
        port: &PortConfig,
    ) -> Result<(), RegistryError> {
        let mut descriptor = AdapterDescriptor::new(adapter.name(), adapter.priority());
        descriptor.apply(port);
        self.insert(Candidate { descriptor, adapter })
    }

    fn insert(&self, candidate: Candidate<Req, Resp>) -> Result<(), RegistryError> {
        let mut state = self.write();
        let name = &candidate.descriptor.name;
        if state.entries.iter().any(|c| &c.descriptor.name == name) {
            return Err(RegistryError::DuplicateAdapter(name.clone()));
        }
        info!(
            adapter = %name,
            priority = candidate.descriptor.priority,
            enabled = candidate.descriptor.enabled,
            "lookup adapter registered"
        );
        state.entries.push(candidate);
        Ok(())
    }

    /// Apply the global switch, default port and per-port descriptors.
    /// Adapters without a port entry keep their current descriptor.
    pub fn reload(&self, config: &LookupConfig) {
        let mut state = self.write();
        state.enabled = config.enabled;
        state.default_adapter = config.default_port.clone();
        for entry in &mut state.entries {
            if let Some(port) = config.ports.get(&entry.descriptor.name) {
                entry.descriptor.apply(port);
            }
        }
        for name in config.ports.keys() {
            if !state.entries.iter().any(|c| &c.descriptor.name == name) {
                warn!(adapter = %name, "configured lookup port has no registered adapter");
            }
        }
        info!(
            enabled = state.enabled,
            default_adapter = ?state.default_adapter,
            "lookup registry reloaded"
        );
    }

    /// Returns false when `name` is not registered.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut state = self.write();
        match state.entries.iter_mut().find(|c| c.descriptor.name == name) {
            Some(entry) => {
                entry.descriptor.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_globally_enabled(&self, enabled: bool) {
        self.write().enabled = enabled;
    }

    pub fn is_globally_enabled(&self) -> bool {
        self.read().enabled
    }

    pub fn default_adapter(&self) -> Option<String> {
        self.read().default_adapter.clone()
    }

    pub fn descriptors(&self) -> Vec<AdapterDescriptor> {
        self.read().entries.iter().map(|c| c.descriptor.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Candidate<Req, Resp>> {
        self.read()
            .entries
            .iter()
            .find(|c| c.descriptor.name == name)
            .cloned()
    }

    /// Enabled and currently available adapters, ascending by priority.
    /// Equal priorities keep registration order.
    pub fn candidates(&self) -> Vec<Candidate<Req, Resp>> {
        let state = self.read();
        if !state.enabled {
            debug!("lookup registry is globally disabled");
            return Vec::new();
        }
        let mut candidates: Vec<_> = state
            .entries
            .iter()
            .filter(|c| {
                let usable = c.descriptor.enabled && c.adapter.is_available();
                if !usable {
                    debug!(adapter = %c.descriptor.name, enabled = c.descriptor.enabled, "lookup adapter skipped");
                }
                usable
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.descriptor.priority);
        candidates
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::fixtures::ScriptedAdapter;

    type Registry = AdapterRegistry<String, String>;

    fn names(candidates: &[Candidate<String, String>]) -> Vec<&str> {
        candidates.iter().map(|c| c.descriptor.name.as_str()).collect()
    }

    #[test]
    fn candidates_sorted_by_priority_with_stable_ties() {
        let registry = Registry::new();
        registry.register(Arc::new(ScriptedAdapter::succeeding("c", 20))).unwrap();
        registry.register(Arc::new(ScriptedAdapter::succeeding("a", 10))).unwrap();
        registry.register(Arc::new(ScriptedAdapter::succeeding("a2", 10))).unwrap();
        assert_eq!(names(&registry.candidates()), vec!["a", "a2", "c"]);
    }

    #[test]
    fn unavailable_and_disabled_adapters_are_not_candidates() {
        let registry = Registry::new();
        let flaky = Arc::new(ScriptedAdapter::succeeding("flaky", 1));
        registry.register(flaky.clone()).unwrap();
        registry.register(Arc::new(ScriptedAdapter::succeeding("off", 2))).unwrap();
        registry.register(Arc::new(ScriptedAdapter::succeeding("on", 3))).unwrap();
        assert!(registry.set_enabled("off", false));
        assert!(!registry.set_enabled("missing", false));

        flaky.set_available(false);
        assert_eq!(names(&registry.candidates()), vec!["on"]);

        // availability is read on every call
        flaky.set_available(true);
        assert_eq!(names(&registry.candidates()), vec!["flaky", "on"]);
    }

    #[test]
    fn global_switch_empties_candidates() {
        let registry = Registry::new();
        registry.register(Arc::new(ScriptedAdapter::succeeding("a", 1))).unwrap();
        registry.set_globally_enabled(false);
        assert!(registry.candidates().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = Registry::new();
        registry.register(Arc::new(ScriptedAdapter::succeeding("a", 1))).unwrap();
        let err = registry
            .register(Arc::new(ScriptedAdapter::succeeding("a", 2)))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAdapter("a".into()));
    }

    #[test]
    fn register_with_port_overrides_adapter_defaults() {
        let registry = Registry::new();
        let port = PortConfig {
            enabled: false,
            priority: 7,
            base_url: Some("https://vin.example".into()),
            settings: BTreeMap::from([("app_key".to_string(), "k".to_string())]),
        };
        registry
            .register_with(Arc::new(ScriptedAdapter::succeeding("remote", 50)), &port)
            .unwrap();
        let descriptors = registry.descriptors();
        let descriptor = &descriptors[0];
        assert_eq!(descriptor.priority, 7);
        assert!(!descriptor.enabled);
        assert_eq!(descriptor.base_url.as_deref(), Some("https://vin.example"));
        assert_eq!(descriptor.settings.get("app_key").map(String::as_str), Some("k"));
    }

    #[test]
    fn reload_replaces_descriptors_and_default() {
        let registry = Registry::new();
        registry.register(Arc::new(ScriptedAdapter::succeeding("a", 10))).unwrap();
        registry.register(Arc::new(ScriptedAdapter::succeeding("b", 20))).unwrap();

        let mut config = LookupConfig {
            default_port: Some("b".into()),
            ..LookupConfig::default()
        };
        config.ports.insert(
            "b".into(),
            PortConfig {
                priority: 1,
                ..PortConfig::default()
            },
        );
        registry.reload(&config);

        assert_eq!(names(&registry.candidates()), vec!["b", "a"]);
        assert_eq!(registry.default_adapter().as_deref(), Some("b"));

        config.enabled = false;
        registry.reload(&config);
        assert!(!registry.is_globally_enabled());
    }
}
