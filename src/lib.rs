//! Realtime collaboration layer for boards.
//!
//! Clients hold one socket, subscribe to board topics and private queues,
//! and announce presence with board commands. Other services push their
//! mutations through the board event endpoint and the fanout delivers them.

pub mod config;
pub mod destination;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
