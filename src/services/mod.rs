//! Read/write facades over the store and the resolution state machine.
//! Thin by design: validation lives in the types, queries in `db`, and
//! transitions in `resolution` — these functions are the public surface a
//! host application calls.

pub mod issues;
pub mod signals;
