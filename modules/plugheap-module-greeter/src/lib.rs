/*
 *  PlugHeap Greeter Module
 *
 *  A dynamic module for PlugHeap built on the component export layer.
 *  It exports no version entry point.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # PlugHeap Greeter Module
//!
//! Construction arguments are the greeting itself (default `Hello`). The
//! factory rejects greetings that are not UTF-8 or contain control
//! characters.
//!
//! Each request is a name; the response is `<greeting>, <name>!` and a
//! `greeted:<name>` event is emitted.

use plugheap_abi::export::{Component, ComponentError, Events};

const DEFAULT_GREETING: &str = "Hello";

pub struct Greeter {
    greeting: String,
    greeted: usize,
}

impl Component for Greeter {
    fn create(args: &[u8]) -> Result<Self, String> {
        let greeting = std::str::from_utf8(args)
            .map_err(|_| "Greeting must be UTF-8".to_string())?
            .trim();

        if greeting.chars().any(char::is_control) {
            return Err("Greeting must not contain control characters".to_string());
        }

        let greeting = if greeting.is_empty() { DEFAULT_GREETING } else { greeting };
        Ok(Self { greeting: greeting.to_string(), greeted: 0 })
    }

    fn name(&self) -> &str {
        "greeter"
    }

    fn invoke(&mut self, input: &[u8], events: &mut Events) -> Result<Vec<u8>, ComponentError> {
        let name = std::str::from_utf8(input)
            .map_err(|_| ComponentError::invalid_argument("Name must be UTF-8"))?
            .trim();

        if name.is_empty() {
            return Err(ComponentError::invalid_argument("Nobody to greet"));
        }

        self.greeted += 1;
        events.emit(format!("greeted:{}", name).as_bytes());

        Ok(format!("{}, {}!", self.greeting, name).into_bytes())
    }
}

plugheap_abi::export_component!(Greeter);

#[cfg(test)]
mod tests {
    use super::*;
    use plugheap_abi::{PlugHeapError, PlugHeapErrorCode};

    #[test]
    fn test_default_greeting() {
        let mut greeter = Greeter::create(b"  ").unwrap();
        let response = greeter.invoke(b"world", &mut Events::silent()).unwrap();
        assert_eq!(response, b"Hello, world!");
        assert_eq!(greeter.greeted, 1);
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut greeter = Greeter::create(b"Hi").unwrap();
        let error = greeter.invoke(b"   ", &mut Events::silent()).unwrap_err();
        assert_eq!(error.code, PlugHeapErrorCode::ErrorInvalidArgument);
        assert_eq!(greeter.greeted, 0);
    }

    #[test]
    fn test_rejects_control_characters() {
        let args = b"Hi\x07";
        let mut error = PlugHeapError::default();
        let object = plugheap_create(args.as_ptr(), args.len(), &mut error);
        assert!(object.is_null());
        assert_eq!(error.code, PlugHeapErrorCode::ErrorInitialization);
        assert!(error.message_str().contains("control"));
    }

    #[test]
    fn test_exported_roundtrip() {
        let args = b"Howdy";
        let mut error = PlugHeapError::default();
        let object = plugheap_create(args.as_ptr(), args.len(), &mut error);
        assert!(!object.is_null());

        let vtable = unsafe { &*(*object).vtable };
        let input = b"partner";
        let mut output = [0u8; 64];
        let mut written = 0usize;
        let code = (vtable.invoke)(
            object,
            input.as_ptr(),
            input.len(),
            output.as_mut_ptr(),
            output.len(),
            &mut written,
            &mut error,
        );
        assert_eq!(code, PlugHeapErrorCode::Success);
        assert_eq!(&output[..written], b"Howdy, partner!");

        plugheap_destroy(object);
    }
}
