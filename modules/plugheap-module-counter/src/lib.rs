/*
 *  PlugHeap Counter Module
 *
 *  A dynamic module for PlugHeap exposing a simple counter object,
 *  written directly against the C ABI.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # PlugHeap Counter Module
//!
//! Exports `plugheap_create`, `plugheap_destroy` and `plugheap_version`.
//!
//! ## Construction arguments
//!
//! Comma or whitespace separated `key=value` pairs:
//!
//! - `start=<i64>` initial value (default 0)
//! - `step=<i64>` increment used by `inc`/`dec` (default 1)
//!
//! ## Requests
//!
//! - `inc`, `dec`, `get`, `reset`, `add <n>`
//!
//! Every request answers with the current value in decimal. Each change
//! emits a `changed:<value>` event to the registered listener.

mod plugin;

pub use plugin::{plugheap_create, plugheap_destroy, plugheap_version};
