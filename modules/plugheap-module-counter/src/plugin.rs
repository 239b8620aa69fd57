/*
 *  PlugHeap Counter Module - Object Implementation
 *
 *  Implements the counter object and its vtable by hand
 */

use std::ffi::{c_char, c_void};
use std::ptr;

use plugheap_abi::{
    catch_panic,
    copy_str_to_buffer,
    write_error,
    PlugHeapError,
    PlugHeapErrorCode,
    PlugHeapListenerFn,
    PlugHeapObject,
    PlugHeapObjectVTable,
    PLUGHEAP_ABI_VERSION,
};

const COUNTER_NAME: &str = "counter";

/// Counter state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    start: i64,
    value: i64,
    step: i64,
}

impl Counter {
    /// Parse construction arguments
    pub fn from_args(args: &str) -> Result<Self, String> {
        let mut start = 0i64;
        let mut step = 1i64;

        for pair in args.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=')
                .ok_or_else(|| format!("Expected key=value, got '{}'", pair))?;

            let parsed: i64 = value.trim().parse()
                .map_err(|_| format!("Invalid number for {}: '{}'", key, value))?;

            match key.trim() {
                "start" => start = parsed,
                "step" => step = parsed,
                other => return Err(format!("Unknown argument: {}", other)),
            }
        }

        Ok(Self { start, value: start, step })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Apply one request; returns whether the value changed
    pub fn apply(&mut self, request: &str) -> Result<bool, String> {
        let mut parts = request.split_whitespace();
        let command = parts.next().unwrap_or("");

        let next = match command {
            "get" => return Ok(false),
            "inc" => self.value.checked_add(self.step),
            "dec" => self.value.checked_sub(self.step),
            "reset" => Some(self.start),
            "add" => {
                let amount: i64 = parts.next()
                    .ok_or("add needs an amount")?
                    .parse()
                    .map_err(|_| "add amount must be an integer".to_string())?;
                self.value.checked_add(amount)
            }
            "" => return Err("Empty request".to_string()),
            other => return Err(format!("Unknown request: {}", other)),
        };

        let next = next.ok_or("Counter overflow")?;
        let changed = next != self.value;
        self.value = next;
        Ok(changed)
    }
}

/// Heap layout handed to the host. The header must stay first.
#[repr(C)]
struct CounterObject {
    header: PlugHeapObject,
    listener: Option<PlugHeapListenerFn>,
    user_data: *mut c_void,
    counter: Counter,
}

impl CounterObject {
    fn emit(&self, event: &str) {
        if let Some(listener) = self.listener {
            listener(self.user_data, event.as_ptr(), event.len());
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Create a new counter
#[no_mangle]
pub extern "C" fn plugheap_create(
    args: *const u8,
    args_len: usize,
    error: *mut PlugHeapError,
) -> *mut PlugHeapObject {
    let mut object: *mut PlugHeapObject = ptr::null_mut();

    let code = catch_panic!(error, {
        let args = if args.is_null() || args_len == 0 {
            ""
        } else {
            match std::str::from_utf8(unsafe { std::slice::from_raw_parts(args, args_len) }) {
                Ok(s) => s,
                Err(_) => {
                    unsafe {
                        write_error(error, PlugHeapErrorCode::ErrorInvalidArgument, "Arguments must be UTF-8");
                    }
                    return PlugHeapErrorCode::ErrorInvalidArgument;
                }
            }
        };

        let counter = match Counter::from_args(args) {
            Ok(c) => c,
            Err(e) => {
                unsafe { write_error(error, PlugHeapErrorCode::ErrorInitialization, &e) };
                return PlugHeapErrorCode::ErrorInitialization;
            }
        };

        #[cfg(feature = "debug-logging")]
        log::debug!("counter created at {}", counter.value());

        let boxed = Box::new(CounterObject {
            header: PlugHeapObject { vtable: &VTABLE },
            listener: None,
            user_data: ptr::null_mut(),
            counter,
        });
        object = Box::into_raw(boxed) as *mut PlugHeapObject;

        PlugHeapErrorCode::Success
    });

    if code != PlugHeapErrorCode::Success {
        return ptr::null_mut();
    }
    object
}

/// Destroy a counter created by `plugheap_create`
#[no_mangle]
pub extern "C" fn plugheap_destroy(object: *mut PlugHeapObject) {
    if !object.is_null() {
        #[cfg(feature = "debug-logging")]
        log::debug!("counter destroyed");

        unsafe {
            let _ = Box::from_raw(object as *mut CounterObject);
        }
    }
}

/// ABI version this module was built against
#[no_mangle]
pub extern "C" fn plugheap_version() -> u32 {
    PLUGHEAP_ABI_VERSION
}

// ============================================================================
// Vtable implementations
// ============================================================================

extern "C" fn name(object: *const PlugHeapObject, buffer: *mut c_char, capacity: usize) -> usize {
    if object.is_null() {
        return 0;
    }
    unsafe { copy_str_to_buffer(COUNTER_NAME, buffer, capacity) };
    COUNTER_NAME.len()
}

extern "C" fn invoke(
    object: *mut PlugHeapObject,
    input: *const u8,
    input_len: usize,
    output: *mut u8,
    output_capacity: usize,
    written: *mut usize,
    error: *mut PlugHeapError,
) -> PlugHeapErrorCode {
    catch_panic!(error, {
        if object.is_null() || written.is_null() || (input.is_null() && input_len > 0) {
            unsafe {
                write_error(error, PlugHeapErrorCode::ErrorNullPointer, "Null pointer passed to invoke");
            }
            return PlugHeapErrorCode::ErrorNullPointer;
        }

        let counter_object = unsafe { &mut *(object as *mut CounterObject) };
        let request = if input_len == 0 {
            String::new()
        } else {
            String::from_utf8_lossy(unsafe { std::slice::from_raw_parts(input, input_len) }).into_owned()
        };

        // Work on a copy; nothing is committed until the response fits
        let mut next = counter_object.counter.clone();
        let changed = match next.apply(request.trim()) {
            Ok(changed) => changed,
            Err(e) => {
                unsafe { write_error(error, PlugHeapErrorCode::ErrorInvalidArgument, &e) };
                return PlugHeapErrorCode::ErrorInvalidArgument;
            }
        };

        let response = next.value().to_string();
        unsafe { *written = response.len() };

        if output.is_null() || response.len() > output_capacity {
            unsafe {
                write_error(error, PlugHeapErrorCode::ErrorBufferTooSmall, "Output buffer too small");
            }
            return PlugHeapErrorCode::ErrorBufferTooSmall;
        }

        unsafe { ptr::copy_nonoverlapping(response.as_ptr(), output, response.len()) };
        counter_object.counter = next;

        if changed {
            counter_object.emit(&format!("changed:{}", response));
        }

        PlugHeapErrorCode::Success
    })
}

extern "C" fn set_listener(
    object: *mut PlugHeapObject,
    listener: Option<PlugHeapListenerFn>,
    user_data: *mut c_void,
) {
    if object.is_null() {
        return;
    }

    let counter_object = unsafe { &mut *(object as *mut CounterObject) };
    counter_object.listener = listener;
    counter_object.user_data = if listener.is_some() { user_data } else { ptr::null_mut() };
}

/// Static vtable
static VTABLE: PlugHeapObjectVTable = PlugHeapObjectVTable {
    name,
    invoke,
    set_listener,
};
