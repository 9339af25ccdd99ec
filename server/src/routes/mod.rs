pub mod api;
pub mod broker;
pub mod sse;
