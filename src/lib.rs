pub mod expression;
pub mod network;
pub mod portable;
pub mod query;
pub mod runtime;
pub mod service;
pub mod translate;
