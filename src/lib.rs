/*
 *  lib.rs
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

//! PlugHeap host library
//!
//! Opens shared-library modules, resolves their entry points by name and
//! hands out object handles that are always destroyed by the module that
//! created them.

pub mod config;
pub mod error;
pub mod module;

/// C ABI shared with modules
pub use plugheap_abi as ffi;

pub use error::LoaderError;
pub use module::{LoaderOptions, Module, ModuleInfo, ModuleLoader, ModuleObject, ModuleState};
