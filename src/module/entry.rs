/*
 *  module/entry.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Entry point table resolved from a module image
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
use std::fmt;
use std::ptr::NonNull;

use plugheap_abi::{
    PlugHeapCreateFn,
    PlugHeapDestroyFn,
    PlugHeapVersionFn,
    PLUGHEAP_CREATE_SYMBOL,
    PLUGHEAP_DESTROY_SYMBOL,
    PLUGHEAP_VERSION_SYMBOL,
};

use super::image::ModuleImage;

/// Entry points of one module, resolved once at load time.
///
/// The function pointers are only valid while the image they were resolved
/// from stays mapped; `Module` keeps both together.
#[derive(Clone, Copy)]
pub struct EntryPointTable {
    pub create: PlugHeapCreateFn,
    pub destroy: PlugHeapDestroyFn,
    pub version: Option<PlugHeapVersionFn>,
}

impl EntryPointTable {
    /// Resolve all well-known entry points.
    ///
    /// Returns the names of the required symbols that are missing.
    pub fn resolve(image: &dyn ModuleImage) -> Result<Self, Vec<&'static str>> {
        let create = image.symbol(PLUGHEAP_CREATE_SYMBOL);
        let destroy = image.symbol(PLUGHEAP_DESTROY_SYMBOL);
        let version = image.symbol(PLUGHEAP_VERSION_SYMBOL);

        match (create, destroy) {
            (Some(create), Some(destroy)) => {
                // SAFETY: the exported symbols are functions with the ABI
                // signatures by contract
                unsafe {
                    Ok(Self {
                        create: std::mem::transmute::<*mut c_void, PlugHeapCreateFn>(create.as_ptr()),
                        destroy: std::mem::transmute::<*mut c_void, PlugHeapDestroyFn>(destroy.as_ptr()),
                        version: version.map(|v: NonNull<c_void>| {
                            std::mem::transmute::<*mut c_void, PlugHeapVersionFn>(v.as_ptr())
                        }),
                    })
                }
            }
            (create, destroy) => {
                let mut missing = Vec::new();
                if create.is_none() {
                    missing.push(PLUGHEAP_CREATE_SYMBOL);
                }
                if destroy.is_none() {
                    missing.push(PLUGHEAP_DESTROY_SYMBOL);
                }
                Err(missing)
            }
        }
    }
}

impl fmt::Debug for EntryPointTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPointTable")
            .field("create", &(self.create as *const c_void))
            .field("destroy", &(self.destroy as *const c_void))
            .field("version", &self.version.map(|v| v as *const c_void))
            .finish()
    }
}
