//! rustytime web client core.
//!
//! SYSTEM CONTEXT
//! ==============
//! The front-end of the rustytime time tracker keeps one authenticated
//! session per client context. This crate holds that session logic:
//!
//! - `net`: backend HTTP client, auth endpoints, server-rendering auth load
//! - `state`: observable auth state, snapshot cache, session controller,
//!   page data loaders
//! - `util`: cookie and visibility ports, the visibility-aware refresh
//!   scheduler, route auth gating
//!
//! Browser globals (cookies, timers, visibility, navigation) are injected
//! as ports, so everything runs headless under tokio.

pub mod config;
pub mod net;
pub mod state;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;
