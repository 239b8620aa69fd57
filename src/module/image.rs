/*
 *  module/image.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Loaded module images and the openers that produce them
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

use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

use libloading::Library;
use log::debug;

use crate::error::LoaderError;

/// A mapped module. Dropping the image unmaps it, so every address it has
/// handed out is only valid while the image is alive.
pub trait ModuleImage: Send + Sync {
    /// Address of an exported symbol, if present
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Opens module images by path
pub trait ModuleOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, LoaderError>;
}

impl ModuleImage for Library {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the symbol is read as a bare address, never called here
        let symbol = unsafe { self.get::<*mut c_void>(name.as_bytes()) };

        match symbol {
            Ok(address) => NonNull::new(*address),
            Err(e) => {
                debug!("Symbol {} not found: {}", name, e);
                None
            }
        }
    }
}

/// Native shared-library opener (.so/.dylib/.dll)
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibOpener;

impl ModuleOpener for DylibOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, LoaderError> {
        // SAFETY: loading runs the library's initialisers; modules are
        // trusted code by contract
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoaderError::NotFound {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(library))
    }
}
