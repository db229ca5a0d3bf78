//! Builders for the Kubernetes objects making up a proxy.
//!
//! They are not _pure_ builders: some fill in the fixed values every proxy shares, so the renderers only
//! supply what actually varies between proxies.
pub mod container;
pub mod meta;
pub mod pod;
