//! Dynamic loading of native modules.
//!
//! A module is a shared object exporting `bowl_module_initialize` and
//! `bowl_module_finalize`. Loading couples the native handle to a library
//! value in the heap: the handle lives in a side table (heap cells relocate)
//! and is reachable only through the cell's handle id. When the collector
//! observes that a library cell has become unreachable it invokes the
//! finalizer and closes the handle.

use std::path::{Path, PathBuf};

use libloading::Library;

use crate::ffi::types::BowlModuleFunction;
use crate::vm::{Thrown, ValueRef, Vm, VmResult};

const INITIALIZE_SYMBOL: &[u8] = b"bowl_module_initialize\0";
const FINALIZE_SYMBOL: &[u8] = b"bowl_module_finalize\0";

/// A loaded native module, tracked in the VM's side table under the handle
/// id stored in its library cell.
pub(crate) struct LoadedLibrary {
    /// Normalized path (or name, for in-process modules).
    pub path: PathBuf,
    /// The native handle; `None` for in-process modules.
    pub handle: Option<Library>,
    /// The finalizer, invoked when the cell becomes unreachable.
    pub finalize: Option<BowlModuleFunction>,
    /// The library cell; kept current by the collector.
    pub cell: ValueRef,
}

/// Normalize a library path so that different spellings of the same file
/// share one registry entry.
fn normalize(path: &str) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| Path::new(path).to_path_buf())
}

impl Vm {
    /// Check whether the library at `path` is currently loaded.
    pub fn library_is_loaded(&self, path: &str) -> bool {
        self.registry.contains_key(&normalize(path))
    }

    /// The constructor for library values.
    ///
    /// If a library with the same normalized path is already loaded, the
    /// existing cell is returned. Otherwise the shared object is opened, its
    /// `bowl_module_initialize` is resolved and invoked with the fresh
    /// library cell; if the initializer raises, the handle is closed again
    /// and the exception propagates.
    pub fn library(&mut self, path: &str) -> VmResult {
        let normalized = normalize(path);
        if let Some(&id) = self.registry.get(&normalized) {
            let entry = self.libraries[id]
                .as_ref()
                .expect("registry points at a closed library");
            return Ok(entry.cell);
        }

        log::debug!("loading library '{}'", normalized.display());
        let handle = match unsafe { Library::new(path) } {
            Ok(handle) => handle,
            Err(error) => {
                return Err(
                    self.format_exception(&format!("failed to load library '{path}': {error}"))
                );
            }
        };
        let initialize: BowlModuleFunction =
            match unsafe { handle.get::<BowlModuleFunction>(INITIALIZE_SYMBOL) } {
                Ok(symbol) => *symbol,
                Err(error) => {
                    return Err(self.format_exception(&format!(
                        "library '{path}' does not export 'bowl_module_initialize': {error}"
                    )));
                }
            };
        let finalize = unsafe { handle.get::<BowlModuleFunction>(FINALIZE_SYMBOL) }
            .ok()
            .map(|symbol| *symbol);

        self.install_module(normalized, Some(handle), initialize, finalize)
    }

    /// Register an in-process module under a name.
    ///
    /// This is the loading path for modules compiled into the host itself:
    /// the library cell owns no native handle, but initialization and
    /// collector-driven finalization behave exactly like for a shared
    /// object.
    pub fn static_library(
        &mut self,
        name: &str,
        initialize: BowlModuleFunction,
        finalize: BowlModuleFunction,
    ) -> VmResult {
        let key = PathBuf::from(name);
        if let Some(&id) = self.registry.get(&key) {
            let entry = self.libraries[id]
                .as_ref()
                .expect("registry points at a closed library");
            return Ok(entry.cell);
        }
        self.install_module(key, None, initialize, Some(finalize))
    }

    fn install_module(
        &mut self,
        path: PathBuf,
        handle: Option<Library>,
        initialize: BowlModuleFunction,
        finalize: Option<BowlModuleFunction>,
    ) -> VmResult {
        let name = path.to_string_lossy().into_owned();
        let id = self.libraries.len();
        let cell = self.library_cell(id as u64, name.as_bytes())?;
        self.libraries.push(Some(LoadedLibrary {
            path: path.clone(),
            handle,
            finalize,
            cell,
        }));
        self.registry.insert(path, id);

        // Pin the cell while the initializer runs; nothing else references
        // it yet, and the initializer is free to allocate.
        self.push_frame();
        self.set_register(0, cell);
        let raised = initialize(self as *mut Vm, cell);
        let cell = self.register(0);
        self.pop_frame();

        if raised.is_null() {
            if let Some(entry) = &mut self.libraries[id] {
                entry.cell = cell;
            }
            Ok(cell)
        } else {
            // Initialization failed: close the handle and drop the entry.
            if let Some(entry) = self.libraries[id].take() {
                self.registry.remove(&entry.path);
            }
            Err(Thrown(raised))
        }
    }
}
