/*
 *  module/loader.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Module loader - opens modules, resolves entry points, tracks sessions
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Local};
use log::{debug, info, warn};

use plugheap_abi::{
    PlugHeapError,
    PlugHeapObject,
    PLUGHEAP_ABI_VERSION,
    PLUGHEAP_VERSION_SYMBOL,
};

use super::discovery;
use super::entry::EntryPointTable;
use super::image::{DylibOpener, ModuleImage, ModuleOpener};
use super::object::ModuleObject;
use crate::error::LoaderError;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Module load state. A module never returns to `Opened` once closed;
/// opening the path again yields a new module with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Opened,
    Closed,
}

/// Loader settings
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Searched (after `$PLUGHEAP_MODULE_PATH`) by `open_by_name`
    pub search_paths: Vec<PathBuf>,

    /// Reject modules whose version differs from the host ABI
    pub strict_version: bool,
}

/// Snapshot of an open module
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: u64,
    pub path: PathBuf,
    pub state: ModuleState,
    pub version: Option<u32>,
    pub live_objects: usize,
    pub opened_at: DateTime<Local>,
}

/// One loaded module
///
/// Shared through `Arc`: callers and every `ModuleObject` created from it
/// hold a reference (the loader only keeps a weak one), so the image stays
/// mapped until the last object is destroyed.
pub struct Module {
    id: u64,
    path: PathBuf,
    entry_points: EntryPointTable,
    closed: AtomicBool,
    live_objects: AtomicUsize,
    opened_at: DateTime<Local>,
    // Declared last so it is dropped last
    image: Box<dyn ModuleImage>,
}

impl Module {
    fn new(path: PathBuf, image: Box<dyn ModuleImage>, entry_points: EntryPointTable) -> Self {
        Self {
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            path,
            entry_points,
            closed: AtomicBool::new(false),
            live_objects: AtomicUsize::new(0),
            opened_at: Local::now(),
            image,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ModuleState {
        if self.is_closed() {
            ModuleState::Closed
        } else {
            ModuleState::Opened
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Objects created by this module and not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::Acquire)
    }

    pub fn opened_at(&self) -> DateTime<Local> {
        self.opened_at
    }

    pub fn entry_points(&self) -> &EntryPointTable {
        &self.entry_points
    }

    /// Underlying image, for modules exporting extra symbols
    pub fn image(&self) -> &dyn ModuleImage {
        self.image.as_ref()
    }

    /// Query the optional version entry point
    pub fn query_version(&self) -> Result<u32, LoaderError> {
        match self.entry_points.version {
            Some(version) => Ok(version()),
            None => Err(LoaderError::Unsupported(PLUGHEAP_VERSION_SYMBOL)),
        }
    }

    /// Create an object bound to this module
    ///
    /// The returned handle destroys the object through this module exactly
    /// once. A failed factory call produces no handle.
    pub fn create(self: &Arc<Self>, args: impl AsRef<[u8]>) -> Result<ModuleObject, LoaderError> {
        let object = self.create_raw(args.as_ref())?;

        // SAFETY: `object` was just produced by this module's factory
        unsafe { ModuleObject::from_raw(Arc::clone(self), object) }
    }

    /// Invoke the factory directly
    ///
    /// The caller owns the result and must pass it to [`Module::destroy_raw`]
    /// on this same module exactly once.
    pub fn create_raw(&self, args: &[u8]) -> Result<NonNull<PlugHeapObject>, LoaderError> {
        if self.is_closed() {
            return Err(LoaderError::Closed(self.path.clone()));
        }

        let mut error = PlugHeapError::default();
        let object = (self.entry_points.create)(args.as_ptr(), args.len(), &mut error);

        match NonNull::new(object) {
            Some(object) => {
                let live = self.live_objects.fetch_add(1, Ordering::AcqRel) + 1;
                debug!("Created object {:p} in {} ({} live)", object, self.path.display(), live);
                Ok(object)
            }
            None => {
                let mut message = error.message_str();
                if message.is_empty() {
                    message = "factory returned null".to_string();
                }
                debug!("Factory in {} failed: {}", self.path.display(), message);
                Err(LoaderError::ConstructionFailed {
                    path: self.path.clone(),
                    message,
                })
            }
        }
    }

    /// Invoke the destroy entry point. A null object is a no-op.
    ///
    /// # Safety
    ///
    /// `object` must be null or have come from `create_raw` on this same
    /// module and not been destroyed yet. The module cannot tell a foreign
    /// or stale pointer apart from a valid one.
    pub unsafe fn destroy_raw(&self, object: *mut PlugHeapObject) {
        if object.is_null() {
            return;
        }

        (self.entry_points.destroy)(object);
        let live = self.live_objects.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        debug!("Destroyed object {:p} in {} ({} live)", object, self.path.display(), live);
    }

    /// Mark the module closed. Idempotent.
    ///
    /// No new objects can be created afterwards. The image itself is
    /// unmapped once the last reference (caller or live object) is gone.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let live = self.live_objects();
        if live > 0 {
            info!("Closed module {} (unload deferred, {} live objects)", self.path.display(), live);
        } else {
            info!("Closed module {}", self.path.display());
        }
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.id,
            path: self.path.clone(),
            state: self.state(),
            version: self.query_version().ok(),
            live_objects: self.live_objects(),
            opened_at: self.opened_at,
        }
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        let live = self.live_objects();
        if live > 0 {
            warn!("Unloading {} with {} objects never destroyed", self.path.display(), live);
        }
        info!("Unloading module {}", self.path.display());
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .field("live_objects", &self.live_objects())
            .field("entry_points", &self.entry_points)
            .finish()
    }
}

/// Module loader - one session per path
///
/// Opening a path that already has an open module returns that module.
pub struct ModuleLoader {
    opener: Box<dyn ModuleOpener>,
    options: LoaderOptions,
    sessions: Mutex<HashMap<PathBuf, Weak<Module>>>,
}

impl ModuleLoader {
    /// Loader backed by native shared libraries
    pub fn new(options: LoaderOptions) -> Self {
        Self::with_opener(DylibOpener, options)
    }

    pub fn with_opener(opener: impl ModuleOpener + 'static, options: LoaderOptions) -> Self {
        Self {
            opener: Box::new(opener),
            options,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Open a module by path
    ///
    /// This performs the following steps:
    /// 1. Reuse the open module for this path, if there is one
    /// 2. Map the image
    /// 3. Resolve the entry point table
    /// 4. Check the reported version against the host ABI
    ///
    /// On failure after step 2 the image is unmapped before returning.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Arc<Module>, LoaderError> {
        let path = session_key(path.as_ref());
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = sessions.get(&path).and_then(Weak::upgrade) {
            if !existing.is_closed() {
                debug!("Reusing open module {} (id {})", path.display(), existing.id());
                return Ok(existing);
            }
        }
        sessions.retain(|_, module| module.strong_count() > 0);

        info!("Opening module: {}", path.display());
        let image = self.opener.open(&path)?;

        let entry_points = match EntryPointTable::resolve(image.as_ref()) {
            Ok(table) => table,
            Err(missing) => {
                drop(image);
                warn!("Module {} is missing {}", path.display(), missing.join(", "));
                return Err(LoaderError::MissingEntryPoints { path, missing });
            }
        };

        let module = Arc::new(Module::new(path.clone(), image, entry_points));

        match module.query_version() {
            Ok(version) if version != PLUGHEAP_ABI_VERSION => {
                if self.options.strict_version {
                    return Err(LoaderError::VersionMismatch {
                        path,
                        found: version,
                        expected: PLUGHEAP_ABI_VERSION,
                    });
                }
                warn!(
                    "Module {} reports version {}, host ABI is {} - continuing",
                    path.display(),
                    version,
                    PLUGHEAP_ABI_VERSION
                );
            }
            Ok(version) => debug!("Module {} version {}", path.display(), version),
            Err(_) => debug!("Module {} exports no version entry point", path.display()),
        }

        info!("Opened module {} (id {})", path.display(), module.id());
        sessions.insert(path, Arc::downgrade(&module));
        Ok(module)
    }

    /// Find a module by short name in the search paths and open it
    pub fn open_by_name(&self, name: &str) -> Result<Arc<Module>, LoaderError> {
        let search_paths = discovery::search_paths(&self.options.search_paths);
        let path = discovery::find_module_in(name, &search_paths)
            .ok_or_else(|| LoaderError::NotFound {
                path: PathBuf::from(name),
                reason: format!("no module file in {} search paths", search_paths.len()),
            })?;

        self.open(path)
    }

    /// Open `spec` as a path if it looks like one, otherwise by name
    pub fn open_spec(&self, spec: &str) -> Result<Arc<Module>, LoaderError> {
        if discovery::looks_like_path(spec) {
            self.open(spec)
        } else {
            self.open_by_name(spec)
        }
    }

    /// Close a module and end its session. Idempotent.
    ///
    /// Live objects keep the image mapped until they are destroyed; see
    /// [`Module::close`].
    pub fn close(&self, module: &Arc<Module>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        let is_session = sessions
            .get(module.path())
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(module)));
        if is_session {
            sessions.remove(module.path());
        }

        module.close();
    }

    /// Snapshot of the modules currently open in this loader
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        let mut modules: Vec<ModuleInfo> = sessions
            .values()
            .filter_map(Weak::upgrade)
            .filter(|module| !module.is_closed())
            .map(|module| module.info())
            .collect();
        modules.sort_by_key(|info| info.id);
        modules
    }
}

/// Canonical path when it exists, the path as given otherwise
fn session_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
