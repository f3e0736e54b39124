//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod devices;
pub mod health;
pub mod session;
