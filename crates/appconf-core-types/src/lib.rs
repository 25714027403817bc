//! Core types shared by the appconf crates
//!
//! - **Correlation types**: RequestId, TraceId, RequestContext
//! - **Sensitive data**: `Sensitive<T>` keeps setting values out of logs
//! - **Schema constants**: canonical structured-log field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{RequestContext, RequestId, TraceId};
pub use sensitive::Sensitive;
