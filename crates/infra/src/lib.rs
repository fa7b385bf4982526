//! Infrastructure layer: item store, cache, blobs, broker transports, and the
//! catalog services wired over them.

pub mod blob;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod event_bus;
pub mod repository;
pub mod store;
pub mod workers;
