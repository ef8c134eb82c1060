//! Concord operator - runs the identity broker's controllers and credential request server

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod crds;
