//! Stage registry: plugin loading and stage instance lifecycle.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use weir_core::error::{Result, WeirError};
use weir_core::stage::{StageBox, StageConfig, StageKind, StageRole};

use crate::plugin::{BuiltinFactory, PluginModule};

/// Default directory searched for stage plugin libraries.
pub const DEFAULT_PLUGIN_DIR: &str = "/opt/weir/plugins";

struct InstanceRecord {
    id: u64,
    module: String,
    raw: RawStage,
}

/// Raw instance pointer tracked by the registry. Each live instance is
/// owned by exactly one worker, so moving the pointer between threads is
/// sound; the registry only touches it under its mutex.
struct RawStage(*mut StageBox);

unsafe impl Send for RawStage {}

struct RegistryState {
    modules: HashMap<String, PluginModule>,
    instances: Vec<InstanceRecord>,
}

/// An owned reference to one live stage instance.
///
/// The handle is `Send` and is given to the worker thread that drives the
/// stage. It must be returned through [`StageRegistry::destroy_stage`]
/// before the registry shuts down; the handle itself frees nothing on
/// drop, so instance destruction always goes through the module that
/// created the instance.
#[derive(Debug)]
pub struct StageHandle {
    id: u64,
    raw: *mut StageBox,
}

unsafe impl Send for StageHandle {}

impl StageHandle {
    /// Mutable access to the stage role. The worker owning the handle is
    /// the only caller, so no stage call is ever in flight concurrently.
    pub fn role_mut(&mut self) -> &mut StageRole {
        unsafe { &mut (*self.raw).role }
    }

    /// The role this instance fulfils.
    pub fn kind(&self) -> StageKind {
        unsafe { (*self.raw).role.kind() }
    }

    /// The stage's name.
    pub fn name(&self) -> &str {
        unsafe { (*self.raw).role.name() }
    }
}

/// Loads stage plugins lazily, creates and destroys stage instances, and
/// guarantees cleanup of whatever remains at shutdown.
///
/// One mutex guards both the loaded-module map and the live-instance
/// list; `create_stage`, `destroy_stage` and `shutdown` hold it for their
/// full mutation, which serialises plugin management without serialising
/// stage execution (stages run outside the lock, on their worker
/// threads).
pub struct StageRegistry {
    plugin_dir: PathBuf,
    state: Mutex<RegistryState>,
    next_instance_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl StageRegistry {
    /// Create a registry resolving plugins in [`DEFAULT_PLUGIN_DIR`].
    pub fn new() -> Self {
        Self::with_plugin_dir(DEFAULT_PLUGIN_DIR)
    }

    /// Create a registry resolving plugins in the given directory.
    pub fn with_plugin_dir(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            state: Mutex::new(RegistryState {
                modules: HashMap::new(),
                instances: Vec::new(),
            }),
            next_instance_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// The directory bare plugin names resolve against.
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Register an in-process stage factory under a bare type name.
    pub fn register_builtin(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn() -> StageRole + Send + Sync + 'static,
    ) {
        let mut state = self.state.lock();
        state.modules.insert(
            type_name.into(),
            PluginModule::Builtin {
                factory: Box::new(factory) as BuiltinFactory,
            },
        );
    }

    /// True when `name` is registered as a builtin stage type.
    pub fn has_builtin(&self, name: &str) -> bool {
        matches!(
            self.state.lock().modules.get(name),
            Some(PluginModule::Builtin { .. })
        )
    }

    /// Create a stage instance from the named plugin, loading the plugin
    /// first if needed, and deliver the opaque configuration.
    pub fn create_stage(
        &self,
        plugin_name: &str,
        config: Option<&StageConfig>,
    ) -> Result<StageHandle> {
        let mut state = self.state.lock();

        let module = match state.modules.entry(plugin_name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(PluginModule::load(plugin_name, &self.plugin_dir)?)
            }
        };

        let raw = module.create();
        if raw.is_null() {
            return Err(WeirError::StageCreate {
                plugin: plugin_name.to_string(),
            });
        }

        // Configuration is delivered exactly once, right after creation.
        // Stages that do not care inherit the default accepting hook.
        let empty = StageConfig::new();
        let config = config.unwrap_or(&empty);
        if let Err(err) = unsafe { &mut (*raw).role }.configure(config) {
            unsafe { module.destroy(raw) };
            return Err(WeirError::StageConfigRejected {
                plugin: plugin_name.to_string(),
                cause: err.to_string(),
            });
        }

        let id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        state.instances.push(InstanceRecord {
            id,
            module: plugin_name.to_string(),
            raw: RawStage(raw),
        });
        self.created.fetch_add(1, Ordering::Relaxed);

        Ok(StageHandle { id, raw })
    }

    /// Destroy a stage instance through the module that created it.
    /// Unknown handles are a no-op.
    pub fn destroy_stage(&self, handle: StageHandle) {
        let mut state = self.state.lock();

        let Some(position) = state.instances.iter().position(|i| i.id == handle.id) else {
            return;
        };
        let record = state.instances.remove(position);
        if let Some(module) = state.modules.get(&record.module) {
            unsafe { module.destroy(record.raw.0) };
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Destroy all remaining instances, then unload all plugins.
    /// Idempotent; also invoked when the registry is dropped.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();

        let drained: Vec<_> = state.instances.drain(..).collect();
        for record in drained {
            if let Some(module) = state.modules.get(&record.module) {
                unsafe { module.destroy(record.raw.0) };
                self.destroyed.fetch_add(1, Ordering::Relaxed);
            }
        }

        for (name, module) in state.modules.drain() {
            if let Some(path) = module.path() {
                tracing::debug!(plugin = %name, path = %path.display(), "unloading stage plugin");
            }
        }
    }

    /// Total instances created over the registry's lifetime.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Total instances destroyed over the registry's lifetime.
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StageRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weir_core::stage::{SinkStage, Stage, StageContext, StageError, StageResult};
    use weir_core::{Payload, StopToken};

    #[derive(Default)]
    struct NullSink;

    impl Stage for NullSink {
        fn name(&self) -> &str {
            "null_sink"
        }
    }

    impl SinkStage for NullSink {
        fn consume(&mut self, _ctx: &StageContext, _input: &Payload) -> StageResult<()> {
            Ok(())
        }
    }

    struct RejectingSink;

    impl Stage for RejectingSink {
        fn name(&self) -> &str {
            "rejecting_sink"
        }

        fn configure(&mut self, _config: &StageConfig) -> StageResult<()> {
            Err(StageError::new("never accepts configuration"))
        }
    }

    impl SinkStage for RejectingSink {
        fn consume(&mut self, _ctx: &StageContext, _input: &Payload) -> StageResult<()> {
            Ok(())
        }
    }

    fn registry_with_null_sink() -> StageRegistry {
        let registry = StageRegistry::new();
        registry.register_builtin("null_sink", || StageRole::Sink(Box::new(NullSink)));
        registry
    }

    #[test]
    fn create_and_destroy_are_counted() {
        let registry = registry_with_null_sink();
        let handle = registry.create_stage("null_sink", None).unwrap();
        assert_eq!(handle.kind(), StageKind::Sink);
        assert_eq!(handle.name(), "null_sink");
        assert_eq!(registry.created(), 1);
        assert_eq!(registry.destroyed(), 0);

        registry.destroy_stage(handle);
        assert_eq!(registry.destroyed(), 1);
    }

    #[test]
    fn configuration_rejection_destroys_the_instance() {
        let registry = StageRegistry::new();
        registry.register_builtin("rejecting_sink", || StageRole::Sink(Box::new(RejectingSink)));

        let err = registry.create_stage("rejecting_sink", None).unwrap_err();
        assert_eq!(err.code(), "W202");
        // The rejected instance never shows up in the lifetime counters.
        assert_eq!(registry.created(), 0);
        assert!(registry.state.lock().instances.is_empty());
    }

    #[test]
    fn unknown_plugin_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StageRegistry::with_plugin_dir(dir.path());
        let err = registry.create_stage("libstage_absent.so", None).unwrap_err();
        assert_eq!(err.code(), "W101");
    }

    #[test]
    fn shutdown_destroys_leftover_instances_and_is_idempotent() {
        let registry = registry_with_null_sink();
        let _leaked = registry.create_stage("null_sink", None).unwrap();
        let _leaked2 = registry.create_stage("null_sink", None).unwrap();

        registry.shutdown();
        assert_eq!(registry.destroyed(), 2);
        assert!(!registry.has_builtin("null_sink"));

        registry.shutdown();
        assert_eq!(registry.destroyed(), 2);
    }

    #[test]
    fn destroy_after_shutdown_is_a_no_op() {
        let registry = registry_with_null_sink();
        let handle = registry.create_stage("null_sink", None).unwrap();
        registry.shutdown();
        let destroyed = registry.destroyed();
        registry.destroy_stage(handle);
        assert_eq!(registry.destroyed(), destroyed);
    }

    #[test]
    fn concurrent_creates_are_serialised_safely() {
        let registry = Arc::new(registry_with_null_sink());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut handle = registry.create_stage("null_sink", None).unwrap();
                    let ctx = StageContext::new(StopToken::new());
                    if let StageRole::Sink(sink) = handle.role_mut() {
                        sink.consume(&ctx, &Payload::default()).unwrap();
                    }
                    registry.destroy_stage(handle);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.created(), 8);
        assert_eq!(registry.destroyed(), 8);
    }
}
