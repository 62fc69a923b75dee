//! Shared protocol definitions for the `ChatAt` wire format.

pub mod codec;
pub mod content;
pub mod frame;
pub mod id;
pub mod message;
