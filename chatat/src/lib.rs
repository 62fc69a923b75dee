//! `ChatAt` — real-time conversation sync core.
//!
//! Keeps a chat client's view of a conversation consistent across three
//! independently timed sources: a request/response history fetch, locally
//! created optimistic messages, and the live push stream on the persistent
//! relay connection.

pub mod chat;
pub mod config;
pub mod connection;
pub mod dispatch;
