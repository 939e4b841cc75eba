//! The request dispatch engine: path routing, header sanitization, rotating
//! egress selection, bounded forwarding, and retry orchestration.

pub mod egress;
pub mod forward;
pub mod headers;
pub mod retry;
pub mod router;
