/*
 *  error.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for module loading and object lifecycle
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

use std::path::PathBuf;
use thiserror::Error;

use plugheap_abi::PlugHeapErrorCode;

/// Every failure the loader reports is recoverable: retry another path,
/// treat a missing capability as absent, or drop the one creation attempt.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Path does not resolve to a loadable module
    #[error("Module not found: {}: {reason}", path.display())]
    NotFound { path: PathBuf, reason: String },

    /// Required entry points absent after opening
    #[error("Module {} is missing entry points: {}", path.display(), missing.join(", "))]
    MissingEntryPoints { path: PathBuf, missing: Vec<&'static str> },

    /// Factory returned null
    #[error("Construction failed in {}: {message}", path.display())]
    ConstructionFailed { path: PathBuf, message: String },

    /// Optional capability not exported by the module
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// Module closed; no new objects may be created from it
    #[error("Module {} is closed", .0.display())]
    Closed(PathBuf),

    /// Strict version policy rejected the module
    #[error("Module {} reports version {found}, host expects {expected}", path.display())]
    VersionMismatch { path: PathBuf, found: u32, expected: u32 },

    /// Operation on an object that was already destroyed
    #[error("Object has already been released")]
    Released,

    /// Object operation returned an error code
    #[error("Module call failed ({code:?}): {message}")]
    Invocation { code: PlugHeapErrorCode, message: String },
}
