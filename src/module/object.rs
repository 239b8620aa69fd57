/*
 *  module/object.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Lifecycle-bound object handle - pairs each object with its module
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

use std::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use log::{debug, error};

use plugheap_abi::{
    extract_string,
    PlugHeapError,
    PlugHeapErrorCode,
    PlugHeapObject,
    PlugHeapObjectVTable,
};

use super::loader::Module;
use crate::error::LoaderError;

const NAME_BUFFER_SIZE: usize = 64;
const MAX_NAME_LEN: usize = 4096;
const INITIAL_OUTPUT_CAPACITY: usize = 256;

type Listener = Box<dyn FnMut(&[u8]) + Send>;

/// Handle to one module object
///
/// This struct provides the bridge between the object's C vtable and
/// Rust. It guarantees:
///
/// - the object is destroyed exactly once, through the module that made it
/// - the module stays mapped while the object is alive
/// - a registered listener closure outlives every call the module can
///   make into it
///
/// The handle is move-only; duplicating it would mean a double destroy.
pub struct ModuleObject {
    module: Arc<Module>,
    object: Option<NonNull<PlugHeapObject>>,
    listener: Option<NonNull<Listener>>,
}

// SAFETY: the object is only reached through `&mut self` or `&self` on the
// owning thread; moving the handle moves sole ownership. Modules whose
// objects are thread-affine must not be handed across threads.
unsafe impl Send for ModuleObject {}

impl ModuleObject {
    /// Adopt an object created by `module`
    ///
    /// # Safety
    ///
    /// `object` must come from `module.create_raw` and not be owned by
    /// anything else.
    pub unsafe fn from_raw(module: Arc<Module>, object: NonNull<PlugHeapObject>) -> Result<Self, LoaderError> {
        if unsafe { object.as_ref() }.vtable.is_null() {
            unsafe { module.destroy_raw(object.as_ptr()) };
            return Err(LoaderError::ConstructionFailed {
                path: module.path().to_path_buf(),
                message: "object has no vtable".to_string(),
            });
        }

        Ok(Self {
            module,
            object: Some(object),
            listener: None,
        })
    }

    /// The module that owns this object
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn is_alive(&self) -> bool {
        self.object.is_some()
    }

    fn parts(&self) -> Result<(NonNull<PlugHeapObject>, &PlugHeapObjectVTable), LoaderError> {
        let object = self.object.ok_or(LoaderError::Released)?;

        // SAFETY: checked non-null in from_raw; the vtable lives in the
        // module image, which `self.module` keeps mapped
        let vtable = unsafe { &*object.as_ref().vtable };
        Ok((object, vtable))
    }

    /// Object name as reported by the module
    pub fn name(&self) -> Result<String, LoaderError> {
        let (object, vtable) = self.parts()?;

        let mut buffer = vec![0 as c_char; NAME_BUFFER_SIZE];
        let len = (vtable.name)(object.as_ptr(), buffer.as_mut_ptr(), buffer.len());

        if len >= buffer.len() {
            if len > MAX_NAME_LEN {
                return Err(LoaderError::Invocation {
                    code: PlugHeapErrorCode::ErrorGeneric,
                    message: format!("module reported a {} byte name", len),
                });
            }
            buffer = vec![0 as c_char; len + 1];
            (vtable.name)(object.as_ptr(), buffer.as_mut_ptr(), buffer.len());
        }

        Ok(extract_string(&buffer))
    }

    /// Send one request and collect the response
    ///
    /// Retries once with a larger buffer when the module reports
    /// `ErrorBufferTooSmall`.
    pub fn invoke(&mut self, input: &[u8]) -> Result<Vec<u8>, LoaderError> {
        let (object, vtable) = self.parts()?;
        let mut output = vec![0u8; INITIAL_OUTPUT_CAPACITY];

        for attempt in 0..2 {
            let mut written = 0usize;
            let mut error = PlugHeapError::default();

            let code = (vtable.invoke)(
                object.as_ptr(),
                input.as_ptr(),
                input.len(),
                output.as_mut_ptr(),
                output.len(),
                &mut written,
                &mut error,
            );

            match code {
                PlugHeapErrorCode::Success => {
                    output.truncate(written.min(output.len()));
                    return Ok(output);
                }
                PlugHeapErrorCode::ErrorBufferTooSmall if attempt == 0 && written > output.len() => {
                    debug!("Growing response buffer to {} bytes", written);
                    output.resize(written, 0);
                }
                code => {
                    return Err(LoaderError::Invocation {
                        code,
                        message: error.message_str(),
                    });
                }
            }
        }

        Err(LoaderError::Invocation {
            code: PlugHeapErrorCode::ErrorBufferTooSmall,
            message: "response size changed between attempts".to_string(),
        })
    }

    /// Register a closure for the object's events, replacing any previous one
    pub fn set_listener<F>(&mut self, listener: F) -> Result<(), LoaderError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let (object, vtable) = self.parts()?;

        let slot: Box<Listener> = Box::new(Box::new(listener));
        let slot = NonNull::from(Box::leak(slot));
        (vtable.set_listener)(object.as_ptr(), Some(listener_trampoline), slot.as_ptr().cast::<c_void>());

        // The module no longer refers to the previous closure
        if let Some(previous) = self.listener.replace(slot) {
            drop(unsafe { Box::from_raw(previous.as_ptr()) });
        }
        Ok(())
    }

    /// Unregister the event listener
    pub fn clear_listener(&mut self) -> Result<(), LoaderError> {
        let (object, vtable) = self.parts()?;
        (vtable.set_listener)(object.as_ptr(), None, ptr::null_mut());
        self.free_listener();
        Ok(())
    }

    /// Destroy the object now. Idempotent; later operations fail with
    /// `LoaderError::Released`.
    pub fn destroy(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };

        debug!("Releasing object {:p} from {}", object, self.module.path().display());

        // SAFETY: the object came from this module and `take` guarantees
        // this is the only destroy for it
        unsafe { self.module.destroy_raw(object.as_ptr()) };

        // Only after destroy: the module may emit events while tearing down
        self.free_listener();
    }

    fn free_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            drop(unsafe { Box::from_raw(listener.as_ptr()) });
        }
    }
}

impl Drop for ModuleObject {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ModuleObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleObject")
            .field("module", &self.module.path())
            .field("object", &self.object)
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

/// C callback handed to modules; `user_data` is the boxed closure
extern "C" fn listener_trampoline(user_data: *mut c_void, event: *const u8, length: usize) {
    if user_data.is_null() {
        return;
    }

    let listener = unsafe { &mut *user_data.cast::<Listener>() };
    let event: &[u8] = if event.is_null() || length == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(event, length) }
    };

    // Unwinding into the module is undefined behavior
    if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        error!("Caught panic in object listener; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::module::loader::{LoaderOptions, ModuleLoader};
    use crate::module::mock::{self, MockImage, MockOpener, Tally};
    use plugheap_abi::export;

    extern "C" fn oversized_name(_object: *const PlugHeapObject, _buffer: *mut c_char, _capacity: usize) -> usize {
        usize::MAX
    }

    static OVERSIZED_NAME_VTABLE: PlugHeapObjectVTable = PlugHeapObjectVTable {
        name: oversized_name,
        ..export::vtable_for::<Tally>()
    };

    const TALLY: &str = "/mock/libplugheap_tally.so";

    fn open_tally() -> (ModuleLoader, Arc<Module>) {
        let loader = ModuleLoader::with_opener(
            MockOpener::new().with(TALLY, MockImage::complete),
            LoaderOptions::default(),
        );
        let module = loader.open(TALLY).unwrap();
        (loader, module)
    }

    #[test]
    fn test_scope_exit_destroys_once() {
        let (_loader, module) = open_tally();
        {
            let _object = module.create("").unwrap();
            assert_eq!(module.live_objects(), 1);
        }
        assert_eq!(module.live_objects(), 0);
        assert_eq!(mock::destroy_calls(), 1);
    }

    #[test]
    fn test_double_destroy_calls_module_once() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        object.destroy();
        object.destroy();
        drop(object);

        assert_eq!(mock::destroy_calls(), 1);
        assert_eq!(module.live_objects(), 0);
    }

    #[test]
    fn test_operations_after_destroy_are_released() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();
        object.destroy();

        assert!(!object.is_alive());
        assert!(matches!(object.name(), Err(LoaderError::Released)));
        assert!(matches!(object.invoke(b"ping"), Err(LoaderError::Released)));
        assert!(matches!(object.set_listener(|_| {}), Err(LoaderError::Released)));
    }

    #[test]
    fn test_two_objects_destroy_independently() {
        let (_loader, module) = open_tally();
        let mut first = module.create("first").unwrap();
        let mut second = module.create("second").unwrap();
        assert_eq!(module.live_objects(), 2);

        first.destroy();
        assert_eq!(mock::destroy_calls(), 1);
        assert_eq!(second.name().unwrap(), "second");
        assert_eq!(second.invoke(b"still here").unwrap(), b"still here");

        drop(second);
        drop(first);
        assert_eq!(mock::destroy_calls(), 2);
        assert_eq!(module.live_objects(), 0);
    }

    #[test]
    fn test_ownership_handoff() {
        let (_loader, module) = open_tally();
        let object = module.create("").unwrap();

        let mut owners = Vec::new();
        owners.push(object);
        assert_eq!(mock::destroy_calls(), 0);

        owners.clear();
        assert_eq!(mock::destroy_calls(), 1);
    }

    #[test]
    fn test_name_from_module() {
        let (_loader, module) = open_tally();
        let object = module.create("").unwrap();
        assert_eq!(object.name().unwrap(), "tally");

        let long_label = "n".repeat(NAME_BUFFER_SIZE * 3);
        let object = module.create(&long_label).unwrap();
        assert_eq!(object.name().unwrap(), long_label);
    }

    #[test]
    fn test_invoke_grows_buffer() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        let response = object.invoke(b"big").unwrap();
        assert_eq!(response.len(), 4096);
        assert!(response.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_invoke_error_is_reported() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        match object.invoke(b"fail") {
            Err(LoaderError::Invocation { code, message }) => {
                assert_eq!(code, PlugHeapErrorCode::ErrorInvalidArgument);
                assert_eq!(message, "tally was asked to fail");
            }
            other => panic!("expected Invocation error, got {:?}", other),
        }
    }

    #[test]
    fn test_listener_receives_events() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        object.set_listener(move |event| sink.lock().unwrap().push(event.to_vec())).unwrap();

        object.invoke(b"one").unwrap();
        object.invoke(b"two").unwrap();
        object.clear_listener().unwrap();
        object.invoke(b"three").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[b"seen:one".to_vec(), b"seen:two".to_vec()]);
    }

    #[test]
    fn test_listener_replaced_and_freed() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        let first = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&first);
        object.set_listener(move |_| *counter.lock().unwrap() += 1).unwrap();
        object.invoke(b"a").unwrap();

        let second = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&second);
        object.set_listener(move |_| *counter.lock().unwrap() += 1).unwrap();
        object.invoke(b"b").unwrap();

        assert_eq!(*first.lock().unwrap(), 1);
        assert_eq!(*second.lock().unwrap(), 1);
        // The replaced closure has been dropped along with its Arc clone
        assert_eq!(Arc::strong_count(&first), 1);

        drop(object);
        assert_eq!(Arc::strong_count(&second), 1);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let (_loader, module) = open_tally();
        let mut object = module.create("").unwrap();

        object.set_listener(|_| panic!("listener blew up")).unwrap();
        assert_eq!(object.invoke(b"ok").unwrap(), b"ok");
    }

    #[test]
    fn test_oversized_name_is_an_error() {
        let (_loader, module) = open_tally();
        let object = module.create("").unwrap();

        let raw = object.object.unwrap();
        unsafe { (*raw.as_ptr()).vtable = &OVERSIZED_NAME_VTABLE };

        match object.name() {
            Err(LoaderError::Invocation { code, .. }) => assert_eq!(code, PlugHeapErrorCode::ErrorGeneric),
            other => panic!("expected Invocation error, got {:?}", other),
        }

        // Destroy goes through the entry point, not the vtable
        drop(object);
        assert_eq!(mock::destroy_calls(), 1);
    }
}
