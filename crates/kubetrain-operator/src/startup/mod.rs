//! Startup tasks run before the controllers

pub mod crds;

pub use crds::ensure_crds;
