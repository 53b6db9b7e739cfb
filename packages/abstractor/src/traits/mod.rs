//! Seams the controller is built against.
//!
//! Hosts inject implementations of these traits; tests use the mocks in
//! [`crate::testing`].

pub mod clock;
pub mod gateway;
pub mod ids;
pub mod sink;
