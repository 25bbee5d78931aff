//! Core value types, symbols, the object model and error handling.
//!
//! This crate provides the foundational types shared by every other
//! component of the Ember script VM.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of script values
//! - [`Symbol`] / [`SymbolTable`] - Interned identifiers
//! - [`ObjectRef`] - Reference-counted prototype-based objects
//! - [`Trace`] / [`Tracer`] - Capability used by the cycle collector
//! - [`VmError`] / [`ErrorKind`] - VM errors and their fatality
//!
//! # Examples
//!
//! ```
//! use core_types::{ObjectRef, SymbolTable, Value};
//!
//! let mut symbols = SymbolTable::new();
//! let x = symbols.intern("x");
//! assert_eq!(symbols.intern("x"), x);
//!
//! let object = ObjectRef::new();
//! object.set(x, Value::Number(42.0));
//! assert_eq!(object.get(x), Value::Number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod object;
mod symbol;
mod trace;
mod value;

pub use error::{ErrorKind, VmError, VmResult};
pub use object::{NativeRelay, ObjectRef, ScriptObject, WeakObjectRef};
pub use symbol::{Symbol, SymbolTable};
pub use trace::{Trace, Tracer};
pub use value::Value;
