/*
 *  PlugHeap ABI - Component export layer
 *
 *  Lets a module implement a plain Rust trait and have the C entry
 *  points, vtable and panic guards generated for it
 */

//! Safe export layer for modules written in Rust
//!
//! Implement [`Component`] and invoke [`export_component!`](crate::export_component):
//!
//! ```ignore
//! struct Greeter { greeting: String }
//!
//! impl plugheap_abi::export::Component for Greeter {
//!     fn create(args: &[u8]) -> Result<Self, String> { /* ... */ }
//!     fn name(&self) -> &str { "greeter" }
//!     fn invoke(&mut self, input: &[u8], events: &mut Events) -> Result<Vec<u8>, ComponentError> { /* ... */ }
//! }
//!
//! plugheap_abi::export_component!(Greeter);
//! ```

use std::ffi::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::{
    copy_str_to_buffer,
    panic_message,
    write_error,
    PlugHeapError,
    PlugHeapErrorCode,
    PlugHeapListenerFn,
    PlugHeapObject,
    PlugHeapObjectVTable,
};

/// A module object implemented in Rust
pub trait Component: Sized + 'static {
    /// Build the object from opaque construction arguments
    fn create(args: &[u8]) -> Result<Self, String>;

    /// Object name reported to the host
    fn name(&self) -> &str;

    /// Handle one request
    fn invoke(&mut self, input: &[u8], events: &mut Events) -> Result<Vec<u8>, ComponentError>;
}

/// Error returned from [`Component::invoke`]
#[derive(Debug, Clone)]
pub struct ComponentError {
    pub code: PlugHeapErrorCode,
    pub message: String,
}

impl ComponentError {
    pub fn new(code: PlugHeapErrorCode, message: impl Into<String>) -> Self {
        // Success is not an error
        let code = match code {
            PlugHeapErrorCode::Success => PlugHeapErrorCode::ErrorGeneric,
            other => other,
        };
        Self { code, message: message.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(PlugHeapErrorCode::ErrorInvalidArgument, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(PlugHeapErrorCode::ErrorUnsupportedOperation, message)
    }
}

impl From<String> for ComponentError {
    fn from(message: String) -> Self {
        Self::new(PlugHeapErrorCode::ErrorGeneric, message)
    }
}

#[derive(Clone, Copy)]
struct Listener {
    callback: PlugHeapListenerFn,
    user_data: *mut c_void,
}

/// Event sink handed to [`Component::invoke`]
pub struct Events {
    listener: Option<Listener>,
}

impl Events {
    /// An event sink with no listener, for driving a component directly
    pub fn silent() -> Self {
        Self { listener: None }
    }

    /// Deliver an event to the host listener, if one is registered
    pub fn emit(&mut self, event: &[u8]) {
        if let Some(listener) = self.listener {
            (listener.callback)(listener.user_data, event.as_ptr(), event.len());
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }
}

/// Heap layout of an exported object. The header must stay first.
#[repr(C)]
struct Exported<T> {
    header: PlugHeapObject,
    listener: Option<Listener>,
    // (input, response) held back after ErrorBufferTooSmall
    pending: Option<(Vec<u8>, Vec<u8>)>,
    component: T,
}

/// Build the vtable for a component type
pub const fn vtable_for<T: Component>() -> PlugHeapObjectVTable {
    PlugHeapObjectVTable {
        name: name_thunk::<T>,
        invoke: invoke_thunk::<T>,
        set_listener: set_listener_thunk::<T>,
    }
}

unsafe fn slice_or_empty<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    }
}

/// Factory body behind `plugheap_create`
///
/// # Safety
///
/// `args` must be null or valid for `args_len` bytes; `error` must be null
/// or writable.
pub unsafe fn create<T: Component>(
    vtable: &'static PlugHeapObjectVTable,
    args: *const u8,
    args_len: usize,
    error: *mut PlugHeapError,
) -> *mut PlugHeapObject {
    let args = slice_or_empty(args, args_len);

    match catch_unwind(AssertUnwindSafe(|| T::create(args))) {
        Ok(Ok(component)) => {
            let exported = Box::new(Exported {
                header: PlugHeapObject { vtable },
                listener: None,
                pending: None,
                component,
            });
            Box::into_raw(exported).cast::<PlugHeapObject>()
        }
        Ok(Err(message)) => {
            write_error(error, PlugHeapErrorCode::ErrorInitialization, &message);
            ptr::null_mut()
        }
        Err(payload) => {
            write_error(error, PlugHeapErrorCode::ErrorPanic, &panic_message(payload));
            ptr::null_mut()
        }
    }
}

/// Destroy body behind `plugheap_destroy`
///
/// # Safety
///
/// `object` must be null or a pointer returned by [`create`] for the same
/// `T`, not yet destroyed.
pub unsafe fn destroy<T: Component>(object: *mut PlugHeapObject) {
    if object.is_null() {
        return;
    }

    let exported = Box::from_raw(object.cast::<Exported<T>>());
    // A panicking Drop must not unwind into the host
    let _ = catch_unwind(AssertUnwindSafe(move || drop(exported)));
}

extern "C" fn name_thunk<T: Component>(
    object: *const PlugHeapObject,
    buffer: *mut c_char,
    capacity: usize,
) -> usize {
    if object.is_null() {
        return 0;
    }

    let exported = unsafe { &*object.cast::<Exported<T>>() };
    catch_unwind(AssertUnwindSafe(|| {
        let name = exported.component.name();
        unsafe { copy_str_to_buffer(name, buffer, capacity) };
        name.len()
    }))
    .unwrap_or(0)
}

extern "C" fn invoke_thunk<T: Component>(
    object: *mut PlugHeapObject,
    input: *const u8,
    input_len: usize,
    output: *mut u8,
    output_capacity: usize,
    written: *mut usize,
    error: *mut PlugHeapError,
) -> PlugHeapErrorCode {
    crate::catch_panic!(error, {
        if object.is_null() || written.is_null() || (output.is_null() && output_capacity > 0) {
            unsafe {
                write_error(error, PlugHeapErrorCode::ErrorNullPointer, "Null pointer passed to invoke");
            }
            return PlugHeapErrorCode::ErrorNullPointer;
        }

        let exported = unsafe { &mut *object.cast::<Exported<T>>() };
        let input = unsafe { slice_or_empty(input, input_len) };

        let response = match exported.pending.take() {
            Some((pending_input, response)) if pending_input == input => response,
            _ => {
                let mut events = Events { listener: exported.listener };
                match exported.component.invoke(input, &mut events) {
                    Ok(response) => response,
                    Err(e) => {
                        unsafe { write_error(error, e.code, &e.message) };
                        return e.code;
                    }
                }
            }
        };

        unsafe { *written = response.len() };

        if response.len() > output_capacity {
            let message = format!(
                "Response needs {} bytes, buffer holds {}",
                response.len(),
                output_capacity
            );
            unsafe { write_error(error, PlugHeapErrorCode::ErrorBufferTooSmall, &message) };
            exported.pending = Some((input.to_vec(), response));
            return PlugHeapErrorCode::ErrorBufferTooSmall;
        }

        if !response.is_empty() {
            unsafe { ptr::copy_nonoverlapping(response.as_ptr(), output, response.len()) };
        }
        PlugHeapErrorCode::Success
    })
}

extern "C" fn set_listener_thunk<T: Component>(
    object: *mut PlugHeapObject,
    listener: Option<PlugHeapListenerFn>,
    user_data: *mut c_void,
) {
    if object.is_null() {
        return;
    }

    let exported = unsafe { &mut *object.cast::<Exported<T>>() };
    exported.listener = listener.map(|callback| Listener { callback, user_data });
}

/// Generate the `plugheap_create` / `plugheap_destroy` entry points (and
/// `plugheap_version` when a version is given) for a [`Component`] type.
#[macro_export]
macro_rules! export_component {
    ($component:ty $(, version = $version:expr)?) => {
        static __PLUGHEAP_VTABLE: $crate::PlugHeapObjectVTable =
            $crate::export::vtable_for::<$component>();

        #[no_mangle]
        pub extern "C" fn plugheap_create(
            args: *const u8,
            args_len: usize,
            error: *mut $crate::PlugHeapError,
        ) -> *mut $crate::PlugHeapObject {
            unsafe { $crate::export::create::<$component>(&__PLUGHEAP_VTABLE, args, args_len, error) }
        }

        #[no_mangle]
        pub extern "C" fn plugheap_destroy(object: *mut $crate::PlugHeapObject) {
            unsafe { $crate::export::destroy::<$component>(object) }
        }

        $(
            #[no_mangle]
            pub extern "C" fn plugheap_version() -> u32 {
                $version
            }
        )?
    };
}
