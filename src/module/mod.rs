/*
 *  module/mod.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
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

//! Module loading
//!
//! A module is a shared library exporting `plugheap_create`,
//! `plugheap_destroy` and optionally `plugheap_version`. Objects it creates
//! live on the module's heap and must go back to the same module's destroy.
//!
//! ```text
//! ModuleLoader ── open ──> Arc<Module> ── create ──> ModuleObject
//!                              ^                          │
//!                              └──── holds a reference ───┘
//! ```
//!
//! A `ModuleObject` keeps its module mapped and destroys its object exactly
//! once, on drop or on an explicit `destroy`.

pub mod discovery;
pub mod entry;
pub mod image;
pub mod loader;
pub mod object;

#[cfg(test)]
pub(crate) mod mock;

pub use entry::EntryPointTable;
pub use image::{DylibOpener, ModuleImage, ModuleOpener};
pub use loader::{LoaderOptions, Module, ModuleInfo, ModuleLoader, ModuleState};
pub use object::ModuleObject;
