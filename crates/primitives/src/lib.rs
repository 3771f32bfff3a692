//! `primitives` crate: the `Primitive` trait, parameter declarations and
//! the primitive implementations the engine ships with.
//!
//! Every leaf behavior, built-in or library-provided, must
//! implement [`Primitive`]. The engine crate invokes primitives through this
//! trait object.

pub mod defined;
pub mod error;
pub mod mock;
pub mod parameter;
pub mod traits;

pub use defined::DefinedPrimitive;
pub use error::BehaviorError;
pub use parameter::{BehaviorId, Direction, Parameter, ParameterValue, ParameterValueMap};
pub use traits::{Consumption, Primitive};
