/*
 *  PlugHeap ABI
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types shared by the host and every module
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

//! FFI types for the PlugHeap module system
//!
//! This crate defines the C-compatible types that form the stable ABI
//! between the host and its modules. All types use `#[repr(C)]` so the
//! layout is identical on both sides of the library boundary.
//!
//! A module exports, by fixed name:
//!
//! - `plugheap_create` - factory, returns an object or null
//! - `plugheap_destroy` - frees an object created by the same module
//! - `plugheap_version` - optional, returns the module's ABI version
//!
//! Every object begins with a [`PlugHeapObject`] header holding a pointer
//! to the module's [`PlugHeapObjectVTable`]. The rest of the object is
//! private to the module and lives on the module's heap.

use std::any::Any;
use std::ffi::{c_char, c_void};

pub mod export;

/// ABI version the host is built against
pub const PLUGHEAP_ABI_VERSION: u32 = 1;

/// Maximum length for error messages
pub const PLUGHEAP_ERROR_MESSAGE_SIZE: usize = 256;

/// Well-known entry point names
pub const PLUGHEAP_CREATE_SYMBOL: &str = "plugheap_create";
pub const PLUGHEAP_DESTROY_SYMBOL: &str = "plugheap_destroy";
pub const PLUGHEAP_VERSION_SYMBOL: &str = "plugheap_version";

/// Error codes returned by object operations
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugHeapErrorCode {
    /// Operation completed successfully
    Success = 0,

    /// Generic error
    ErrorGeneric = 1,

    /// Invalid argument passed to function
    ErrorInvalidArgument = 2,

    /// Unsupported operation for this object
    ErrorUnsupportedOperation = 3,

    /// Output buffer too small; `written` holds the required size
    ErrorBufferTooSmall = 4,

    /// Object construction failed
    ErrorInitialization = 5,

    /// Null pointer passed where non-null expected
    ErrorNullPointer = 6,

    /// Panic occurred in module code
    ErrorPanic = 7,
}

/// Error information structure
#[repr(C)]
pub struct PlugHeapError {
    /// Error code
    pub code: PlugHeapErrorCode,

    /// Human-readable error message (null-terminated)
    pub message: [c_char; PLUGHEAP_ERROR_MESSAGE_SIZE],
}

impl PlugHeapError {
    /// Create a new error with code and message
    pub fn new(code: PlugHeapErrorCode, message: &str) -> Self {
        let mut error = Self {
            code,
            message: [0; PLUGHEAP_ERROR_MESSAGE_SIZE],
        };

        let bytes = message.as_bytes();
        let len = bytes.len().min(PLUGHEAP_ERROR_MESSAGE_SIZE - 1);

        for (i, &byte) in bytes.iter().take(len).enumerate() {
            error.message[i] = byte as c_char;
        }

        error
    }

    /// Create a success error (no error)
    pub fn success() -> Self {
        Self::new(PlugHeapErrorCode::Success, "")
    }

    /// Extract error message as Rust string
    pub fn message_str(&self) -> String {
        extract_string(&self.message)
    }
}

impl Default for PlugHeapError {
    fn default() -> Self {
        Self::success()
    }
}

impl std::fmt::Debug for PlugHeapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlugHeapError")
            .field("code", &self.code)
            .field("message", &self.message_str())
            .finish()
    }
}

/// Object header. Every object handed out by a module starts with this.
#[repr(C)]
pub struct PlugHeapObject {
    pub vtable: *const PlugHeapObjectVTable,
}

/// Listener callback registered on an object
///
/// `user_data` is passed back untouched; `event` is only valid for the
/// duration of the call.
pub type PlugHeapListenerFn = extern "C" fn(
    user_data: *mut c_void,
    event: *const u8,
    length: usize,
);

/// Object vtable - the virtual operations of a module object
#[repr(C)]
pub struct PlugHeapObjectVTable {
    /// Copy the object's name into `buffer` (always null-terminated,
    /// truncated to fit). Returns the full name length in bytes.
    pub name: extern "C" fn(
        object: *const PlugHeapObject,
        buffer: *mut c_char,
        capacity: usize,
    ) -> usize,

    /// Handle one request. On `ErrorBufferTooSmall`, `written` holds the
    /// number of bytes the response needs, and the request has not taken
    /// effect twice: a retry with the same input and a large enough buffer
    /// receives the same response.
    pub invoke: extern "C" fn(
        object: *mut PlugHeapObject,
        input: *const u8,
        input_len: usize,
        output: *mut u8,
        output_capacity: usize,
        written: *mut usize,
        error: *mut PlugHeapError,
    ) -> PlugHeapErrorCode,

    /// Register (or clear, with `None`) the event listener
    pub set_listener: extern "C" fn(
        object: *mut PlugHeapObject,
        listener: Option<PlugHeapListenerFn>,
        user_data: *mut c_void,
    ),
}

/// Factory entry point: `plugheap_create`
///
/// Returns null on failure, with `error` filled in when non-null.
pub type PlugHeapCreateFn = extern "C" fn(
    args: *const u8,
    args_len: usize,
    error: *mut PlugHeapError,
) -> *mut PlugHeapObject;

/// Destroy entry point: `plugheap_destroy`
pub type PlugHeapDestroyFn = extern "C" fn(object: *mut PlugHeapObject);

/// Optional version entry point: `plugheap_version`
pub type PlugHeapVersionFn = extern "C" fn() -> u32;

/// Extract a null-terminated string from a C buffer
pub fn extract_string(buffer: &[c_char]) -> String {
    let len = buffer.iter()
        .position(|&c| c == 0)
        .unwrap_or(buffer.len());

    let bytes: Vec<u8> = buffer[..len]
        .iter()
        .map(|&c| c as u8)
        .collect();

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Copy a string into a C buffer, truncating and null-terminating
///
/// # Safety
///
/// `buffer` must be null or valid for `capacity` bytes of writes.
pub unsafe fn copy_str_to_buffer(s: &str, buffer: *mut c_char, capacity: usize) {
    if buffer.is_null() || capacity == 0 {
        return;
    }

    let bytes = s.as_bytes();
    let len = bytes.len().min(capacity - 1);

    for (i, &byte) in bytes.iter().take(len).enumerate() {
        *buffer.add(i) = byte as c_char;
    }
    *buffer.add(len) = 0;
}

/// Write an error record if the caller supplied one
///
/// # Safety
///
/// `error` must be null or valid for a write of `PlugHeapError`.
pub unsafe fn write_error(error: *mut PlugHeapError, code: PlugHeapErrorCode, message: &str) {
    if !error.is_null() {
        *error = PlugHeapError::new(code, message);
    }
}

/// Turn a panic payload into a message
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Module panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Module panic: {}", s)
    } else {
        "Module panic: unknown error".to_string()
    }
}

/// Catch panics in an exported function that returns an error code
///
/// Unwinding across the C ABI is undefined behavior, so every exported
/// function body runs inside this.
#[macro_export]
macro_rules! catch_panic {
    ($error:expr, $code:block) => {
        match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(payload) => {
                let message = $crate::panic_message(payload);
                unsafe {
                    $crate::write_error($error, $crate::PlugHeapErrorCode::ErrorPanic, &message);
                }
                $crate::PlugHeapErrorCode::ErrorPanic
            }
        }
    };
}
