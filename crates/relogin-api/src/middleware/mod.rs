//! HTTP middleware
//!
//! Author: hephaex@gmail.com

pub mod auth;

pub use auth::{relogin_middleware, AuthContext, RequestContext};
