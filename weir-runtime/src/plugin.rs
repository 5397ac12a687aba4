//! Loaded stage modules: builtin factories and dynamic libraries.
//!
//! A dynamic stage plugin is a shared library exporting the two factory
//! symbols declared in [`weir_core::stage`]. Builtins are factories
//! registered in-process under a bare type name; both forms share the
//! raw-pointer instance lifecycle so the registry treats them uniformly.

use std::path::{Path, PathBuf};

use libloading::Library;
use weir_core::error::{Result, WeirError};
use weir_core::stage::{
    CREATE_STAGE_SYMBOL, CreateStageFn, DESTROY_STAGE_SYMBOL, DestroyStageFn, StageBox, StageRole,
};

/// Factory registered for a builtin stage type.
pub type BuiltinFactory = Box<dyn Fn() -> StageRole + Send + Sync>;

/// One loaded stage module.
pub(crate) enum PluginModule {
    /// An in-process factory registered under a bare type name.
    Builtin { factory: BuiltinFactory },
    /// A dynamic library loaded from disk.
    Dynamic {
        // Keeps the library mapped while the extracted symbols are in use.
        _library: Library,
        create: CreateStageFn,
        destroy: DestroyStageFn,
        path: PathBuf,
    },
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginModule::Builtin { .. } => f.debug_struct("Builtin").finish(),
            PluginModule::Dynamic { path, .. } => {
                f.debug_struct("Dynamic").field("path", path).finish()
            }
        }
    }
}

impl PluginModule {
    /// Load a dynamic plugin. `plugin_name` is either an absolute path or
    /// a name resolved relative to `plugin_dir`.
    pub(crate) fn load(plugin_name: &str, plugin_dir: &Path) -> Result<Self> {
        let path = resolve_path(plugin_name, plugin_dir);
        tracing::debug!(plugin = plugin_name, path = %path.display(), "loading stage plugin");

        let library = unsafe { Library::new(&path) }.map_err(|e| WeirError::PluginLoad {
            plugin: plugin_name.to_string(),
            cause: e.to_string(),
        })?;

        let create = *unsafe { library.get::<CreateStageFn>(CREATE_STAGE_SYMBOL) }.map_err(|e| {
            WeirError::PluginSymbol {
                plugin: plugin_name.to_string(),
                symbol: String::from_utf8_lossy(CREATE_STAGE_SYMBOL).into_owned(),
                cause: e.to_string(),
            }
        })?;

        let destroy =
            *unsafe { library.get::<DestroyStageFn>(DESTROY_STAGE_SYMBOL) }.map_err(|e| {
                WeirError::PluginSymbol {
                    plugin: plugin_name.to_string(),
                    symbol: String::from_utf8_lossy(DESTROY_STAGE_SYMBOL).into_owned(),
                    cause: e.to_string(),
                }
            })?;

        Ok(Self::Dynamic {
            _library: library,
            create,
            destroy,
            path,
        })
    }

    /// Create one stage instance. A null return means the factory failed.
    pub(crate) fn create(&self) -> *mut StageBox {
        match self {
            Self::Builtin { factory } => Box::into_raw(Box::new(StageBox { role: factory() })),
            Self::Dynamic { create, .. } => unsafe { create() },
        }
    }

    /// Destroy an instance previously returned by [`Self::create`].
    ///
    /// # Safety
    /// `raw` must come from this module's `create` and must not be used
    /// afterwards.
    pub(crate) unsafe fn destroy(&self, raw: *mut StageBox) {
        if raw.is_null() {
            return;
        }
        match self {
            Self::Builtin { .. } => drop(unsafe { Box::from_raw(raw) }),
            Self::Dynamic { destroy, .. } => unsafe { destroy(raw) },
        }
    }

    /// The on-disk path for dynamic modules.
    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Self::Builtin { .. } => None,
            Self::Dynamic { path, .. } => Some(path),
        }
    }
}

fn resolve_path(plugin_name: &str, plugin_dir: &Path) -> PathBuf {
    let candidate = Path::new(plugin_name);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        plugin_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_bypass_the_plugin_dir() {
        let path = resolve_path("/lib/libstage_x.so", Path::new("/opt/weir/plugins"));
        assert_eq!(path, PathBuf::from("/lib/libstage_x.so"));
    }

    #[test]
    fn bare_names_resolve_into_the_plugin_dir() {
        let path = resolve_path("libstage_x.so", Path::new("/opt/weir/plugins"));
        assert_eq!(path, PathBuf::from("/opt/weir/plugins/libstage_x.so"));
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let err = PluginModule::load("libstage_absent.so", Path::new("/nonexistent")).unwrap_err();
        assert_eq!(err.code(), "W101");
    }
}
