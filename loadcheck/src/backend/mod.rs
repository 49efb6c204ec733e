mod base;
pub mod memory;
pub mod postgres;

pub use base::{
    Backend, ClientResponse, ProcedureCall, ProcedureCallback, ProcedureKind, ResponseStatus,
    RoutingKey, ScalarQuery,
};
