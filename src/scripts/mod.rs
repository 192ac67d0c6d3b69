//! Typed argument structs for scripts ms-util invokes.
//!
//! Each struct implements `ScriptArgs` so the runner never sees raw
//! argument vectors.

pub mod action;
