//! Realtime services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own presence, authorization and fanout logic so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod access;
pub mod auth;
pub mod authorizer;
pub mod broker;
pub mod fanout;
pub mod lifecycle;
pub mod notify;
pub mod presence;
pub mod session;
