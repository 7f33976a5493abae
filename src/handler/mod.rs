//! Message dispatch: a discriminator-keyed [`HandlerRegistry`] generic
//! over its context type, plus the system handlers every [`crate::agent::Agent`]
//! registers for itself (§4.4).

pub mod control;
pub mod registry;
pub mod rpc;

pub use control::control_handler;
pub use registry::{HandlerError, HandlerFn, HandlerRegistry};
pub use rpc::rpc_handler;
