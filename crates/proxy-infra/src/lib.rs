//! Renders the Kubernetes resources running an Envoy proxy fleet.
//!
//! The entry point is [`render`], which takes the [`ProxyIdentity`](identity::ProxyIdentity) of a proxy, the
//! [`DefaultPolicy`](config::defaults::DefaultPolicy) and any number of
//! [`ProxyInfraOverride`](config::overrides::ProxyInfraOverride) layers and returns the Deployment, Service,
//! ConfigMap, ServiceAccount and (optionally) HorizontalPodAutoscaler of the proxy.
//!
//! Rendering performs no I/O. Applying the resources to a cluster is up to the caller.

pub mod bootstrap;
pub mod builder;
pub mod cli;
pub mod config;
pub mod identity;
pub mod naming;
pub mod proxy_logging;
pub mod quantity;
pub mod render;

pub use render::{RenderedResources, ResourceRender, render};

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;
