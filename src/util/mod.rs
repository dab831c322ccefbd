//! Capability ports and helpers shared by the state layer.
//!
//! SYSTEM CONTEXT
//! ==============
//! Utility modules isolate environment concerns (cookies, visibility,
//! timers) from the session logic so it runs headless in tests.

pub mod auth;
pub mod cookie_store;
pub mod refresh;
pub mod visibility;
