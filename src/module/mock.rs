/*
 *  module/mock.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  In-process mock module for testing without shared libraries
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

//! Mock module image
//!
//! Serves the entry points of an in-process "tally" component through the
//! same `ModuleImage` seam a shared library uses. Counters are thread-local
//! so parallel tests do not see each other's calls.
//!
//! Tally behaviour:
//! - construction args `reject` make the factory fail
//! - request `fail` returns an invalid-argument error
//! - request `big` answers with 4096 bytes
//! - any other request is echoed back and emitted as `seen:<request>`

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use plugheap_abi::export::{self, Component, ComponentError, Events};
use plugheap_abi::{
    PlugHeapCreateFn,
    PlugHeapDestroyFn,
    PlugHeapError,
    PlugHeapObject,
    PlugHeapObjectVTable,
    PlugHeapVersionFn,
    PLUGHEAP_ABI_VERSION,
    PLUGHEAP_CREATE_SYMBOL,
    PLUGHEAP_DESTROY_SYMBOL,
    PLUGHEAP_VERSION_SYMBOL,
};

use super::image::{ModuleImage, ModuleOpener};
use crate::error::LoaderError;

thread_local! {
    static OPEN_IMAGES: Cell<usize> = const { Cell::new(0) };
    static CREATE_CALLS: Cell<usize> = const { Cell::new(0) };
    static DESTROY_CALLS: Cell<usize> = const { Cell::new(0) };
}

/// Mock images currently mapped on this thread
pub fn open_images() -> usize {
    OPEN_IMAGES.with(Cell::get)
}

/// Factory calls made on this thread
pub fn create_calls() -> usize {
    CREATE_CALLS.with(Cell::get)
}

/// Non-null destroy calls made on this thread
pub fn destroy_calls() -> usize {
    DESTROY_CALLS.with(Cell::get)
}

pub struct Tally {
    label: String,
}

impl Component for Tally {
    fn create(args: &[u8]) -> Result<Self, String> {
        if args == b"reject" {
            return Err("tally refuses these arguments".to_string());
        }
        let label = if args.is_empty() {
            "tally".to_string()
        } else {
            String::from_utf8_lossy(args).into_owned()
        };
        Ok(Self { label })
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn invoke(&mut self, input: &[u8], events: &mut Events) -> Result<Vec<u8>, ComponentError> {
        match input {
            b"fail" => Err(ComponentError::invalid_argument("tally was asked to fail")),
            b"big" => Ok(vec![b'x'; 4096]),
            other => {
                let mut event = b"seen:".to_vec();
                event.extend_from_slice(other);
                events.emit(&event);
                Ok(other.to_vec())
            }
        }
    }
}

static TALLY_VTABLE: PlugHeapObjectVTable = export::vtable_for::<Tally>();

extern "C" fn tally_create(args: *const u8, args_len: usize, error: *mut PlugHeapError) -> *mut PlugHeapObject {
    CREATE_CALLS.with(|c| c.set(c.get() + 1));
    unsafe { export::create::<Tally>(&TALLY_VTABLE, args, args_len, error) }
}

extern "C" fn tally_destroy(object: *mut PlugHeapObject) {
    if !object.is_null() {
        DESTROY_CALLS.with(|c| c.set(c.get() + 1));
    }
    unsafe { export::destroy::<Tally>(object) }
}

extern "C" fn tally_version() -> u32 {
    PLUGHEAP_ABI_VERSION
}

extern "C" fn tally_version_next() -> u32 {
    PLUGHEAP_ABI_VERSION + 1
}

/// Symbol table standing in for a mapped library
pub struct MockImage {
    symbols: HashMap<&'static str, usize>,
}

impl MockImage {
    /// Image exporting create, destroy and version
    pub fn complete() -> Self {
        OPEN_IMAGES.with(|c| c.set(c.get() + 1));

        let mut symbols = HashMap::new();
        symbols.insert(PLUGHEAP_CREATE_SYMBOL, tally_create as PlugHeapCreateFn as usize);
        symbols.insert(PLUGHEAP_DESTROY_SYMBOL, tally_destroy as PlugHeapDestroyFn as usize);
        symbols.insert(PLUGHEAP_VERSION_SYMBOL, tally_version as PlugHeapVersionFn as usize);
        Self { symbols }
    }

    /// Image whose version entry point reports a newer ABI
    pub fn newer_version() -> Self {
        let mut image = Self::complete();
        image.symbols.insert(PLUGHEAP_VERSION_SYMBOL, tally_version_next as PlugHeapVersionFn as usize);
        image
    }

    /// Drop one exported symbol
    pub fn without(mut self, symbol: &str) -> Self {
        self.symbols.remove(symbol);
        self
    }
}

impl Drop for MockImage {
    fn drop(&mut self) {
        OPEN_IMAGES.with(|c| c.set(c.get() - 1));
    }
}

impl ModuleImage for MockImage {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols.get(name).and_then(|&address| NonNull::new(address as *mut c_void))
    }
}

/// Opener serving mock images for registered paths
#[derive(Default)]
pub struct MockOpener {
    images: HashMap<PathBuf, fn() -> MockImage>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, factory: fn() -> MockImage) -> Self {
        self.images.insert(path.into(), factory);
        self
    }
}

impl ModuleOpener for MockOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, LoaderError> {
        let factory = self.images.get(path).ok_or_else(|| LoaderError::NotFound {
            path: path.to_path_buf(),
            reason: "no mock image registered".to_string(),
        })?;
        Ok(Box::new(factory()))
    }
}
