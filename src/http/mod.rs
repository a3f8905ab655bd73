//! HTTP surface consumed by the storage host.

pub mod handler;
