//! Live audience comment overlay for presentations.
//!
//! The overlay process follows a session's comment stream and draws it over
//! the presenter's screen. The control panel writes presenter settings to a
//! shared store, and the coordinator relays session data and setting changes
//! between the two.

pub mod ambient;
pub mod animation;
pub mod app;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod dispatch;
pub mod events;
pub mod overlay;
pub mod pipeline;
pub mod presenter;
pub mod protocol;
pub mod session;
pub mod store;
pub mod stream;
