//! Native host runtime: type handles, values and the member registry.
//!
//! This module provides:
//! - Type handles and registered classes
//! - Runtime values, sequences and delegates
//! - A registry of methods, properties and constructors with builtin query operators

pub mod builtins;
pub mod registry;
pub mod types;
pub mod value;

pub use registry::{
    type_key, Constructor, Member, MemberKind, Method, MethodDef, PropertyDef, TypeRegistry,
};
pub use types::{ClassInfo, FieldInfo, Type};
pub use value::{Deferred, Function, Object, ResourceDescriptor, Sequence, SequenceKind, Value};
