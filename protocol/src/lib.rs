//! Shared wire and capability types for the NanoEdge runtime.
//!
//! This crate is intentionally small: the permission model granted to
//! sandboxed children and the message frames exchanged with them over the
//! adapter channel. Everything else lives with the component that owns it.

mod messages;
mod permissions;

pub use messages::ChildEvent;
pub use messages::ChildMessage;
pub use messages::ConsoleLevel;
pub use messages::ContentTypeFrame;
pub use messages::HostMessage;
pub use permissions::Permissions;
