//! Portable, serializable form of expression trees.
//!
//! Every node carries structural type references instead of live handles, so
//! a tree built in one process can be resolved again in another.

pub mod constant;
pub mod node;
pub mod type_ref;

pub use constant::{ConstantValue, DynValue, PortableConstant, Primitive, PropertyBag, ResourceRef};
pub use node::{
    PortableCatchBlock, PortableElementInit, PortableExpr, PortableLabel, PortableMemberBinding,
    PortableParameter, PortableSwitchCase,
};
pub use type_ref::{ConstructorRef, MemberRef, MethodRef, ParameterRef, TypeRef};
