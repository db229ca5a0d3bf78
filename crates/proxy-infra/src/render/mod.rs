//! Renders the Kubernetes resources of one proxy.
//!
//! Rendering is a pure function of the [`ProxyIdentity`], the [`DefaultPolicy`] and the override layers. All
//! validation happens up front in [`ResourceRender::new`], so either every resource is rendered or none is.
use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, Service, ServiceAccount},
};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::{
    config::{
        defaults::DefaultPolicy,
        overrides::ProxyInfraOverride,
        validated::{MergedSettings, ValidationError},
    },
    identity::ProxyIdentity,
    naming::{self, ResourceNames},
};

mod autoscaler;
mod config_map;
mod deployment;
mod service;
mod service_account;

pub use deployment::ENVOY_CONTAINER_NAME;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("failed to derive resource names for proxy {name:?}"))]
    ResourceNames { source: naming::Error, name: String },

    #[snafu(display("invalid configuration for proxy {name:?}"))]
    InvalidSettings {
        source: ValidationError,
        name: String,
    },
}

/// Every resource making up one proxy.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedResources {
    pub service_account: ServiceAccount,
    pub config_map: ConfigMap,
    pub deployment: Deployment,
    pub service: Service,

    /// Only rendered if one of the layers configured an autoscaler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<HorizontalPodAutoscaler>,
}

/// Validated inputs of a single render, shared by all individual renderers.
#[derive(Debug)]
pub struct ResourceRender<'a> {
    identity: &'a ProxyIdentity,
    names: ResourceNames,
    settings: MergedSettings,
}

impl<'a> ResourceRender<'a> {
    /// Merges `layers` (lowest precedence first) onto `policy` and validates the result.
    #[instrument(skip_all, fields(proxy = %identity.name, namespace = %identity.namespace))]
    pub fn new(
        identity: &'a ProxyIdentity,
        policy: &DefaultPolicy,
        layers: &[ProxyInfraOverride],
    ) -> Result<Self> {
        let names = ResourceNames::new(identity).with_context(|_| ResourceNamesSnafu {
            name: identity.name.clone(),
        })?;
        let settings = MergedSettings::validate(policy.merge(&names, layers), policy)
            .with_context(|_| InvalidSettingsSnafu {
                name: identity.name.clone(),
            })?;

        debug!(resource_name = names.name(), "prepared proxy render");
        Ok(Self {
            identity,
            names,
            settings,
        })
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Renders every resource of the proxy.
    pub fn render_all(&self) -> RenderedResources {
        RenderedResources {
            service_account: self.service_account(),
            config_map: self.config_map(),
            deployment: self.deployment(),
            service: self.service(),
            autoscaler: self.autoscaler(),
        }
    }

    /// Labels of the proxy pods, which the Deployment and the Service select on.
    fn pod_labels(&self) -> BTreeMap<String, String> {
        self.names.pod_labels(&self.settings.deployment.pod.labels)
    }
}

/// Renders all resources of the proxy described by `identity`.
///
/// `layers` are ordered from the lowest to the highest precedence, `policy` is the implicit bottom layer.
#[instrument(skip_all, fields(proxy = %identity.name, namespace = %identity.namespace))]
pub fn render(
    identity: &ProxyIdentity,
    policy: &DefaultPolicy,
    layers: &[ProxyInfraOverride],
) -> Result<RenderedResources> {
    let resources = ResourceRender::new(identity, policy, layers)?.render_all();
    debug!(
        autoscaled = resources.autoscaler.is_some(),
        "rendered proxy resources"
    );
    Ok(resources)
}
