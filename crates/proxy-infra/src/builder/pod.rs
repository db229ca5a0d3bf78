use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
    api::core::v1::{
        Affinity, Container, PodSecurityContext, PodSpec, PodTemplateSpec, Toleration, Volume,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use tracing::warn;

/// A builder to build [`PodTemplateSpec`] objects.
///
/// Volumes and init containers keep the order they were added in. Colliding volume names are reported, but the
/// volumes are kept, it is up to the API server to reject them.
#[derive(Clone, Debug, Default)]
pub struct PodBuilder {
    metadata: Option<ObjectMeta>,
    containers: Vec<Container>,
    init_containers: Option<Vec<Container>>,
    volumes: Vec<Volume>,
    host_network: bool,
    node_selector: Option<BTreeMap<String, String>>,
    affinity: Option<Affinity>,
    security_context: Option<PodSecurityContext>,
    tolerations: Option<Vec<Toleration>>,
    service_account_name: Option<String>,
    termination_grace_period_seconds: Option<i64>,
}

impl PodBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&mut self, metadata: impl Into<ObjectMeta>) -> &mut Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn service_account_name(&mut self, value: impl Into<String>) -> &mut Self {
        self.service_account_name = Some(value.into());
        self
    }

    pub fn host_network(&mut self, host_network: bool) -> &mut Self {
        self.host_network = host_network;
        self
    }

    pub fn node_selector_opt(
        &mut self,
        node_selector: Option<BTreeMap<String, String>>,
    ) -> &mut Self {
        self.node_selector = node_selector.filter(|selector| !selector.is_empty());
        self
    }

    pub fn affinity_opt(&mut self, affinity: Option<Affinity>) -> &mut Self {
        self.affinity = affinity;
        self
    }

    pub fn security_context_opt(
        &mut self,
        security_context: Option<PodSecurityContext>,
    ) -> &mut Self {
        self.security_context = security_context;
        self
    }

    pub fn add_tolerations(
        &mut self,
        tolerations: impl IntoIterator<Item = Toleration>,
    ) -> &mut Self {
        self.tolerations
            .get_or_insert_with(Vec::new)
            .extend(tolerations);
        self
    }

    pub fn add_container(&mut self, container: Container) -> &mut Self {
        self.containers.push(container);
        self
    }

    pub fn add_init_containers(
        &mut self,
        containers: impl IntoIterator<Item = Container>,
    ) -> &mut Self {
        self.init_containers
            .get_or_insert_with(Vec::new)
            .extend(containers);
        self
    }

    pub fn add_volumes(&mut self, volumes: impl IntoIterator<Item = Volume>) -> &mut Self {
        self.volumes.extend(volumes);
        self
    }

    pub fn termination_grace_period_seconds(&mut self, seconds: i64) -> &mut Self {
        self.termination_grace_period_seconds = Some(seconds);
        self
    }

    /// Returns a [`PodTemplateSpec`], usable for building a [`Deployment`](k8s_openapi::api::apps::v1::Deployment)
    pub fn build_template(&self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: self.metadata.clone(),
            spec: Some(self.build_spec()),
        }
    }

    fn build_spec(&self) -> PodSpec {
        let mut seen = BTreeSet::new();
        for volume in &self.volumes {
            if !seen.insert(volume.name.as_str()) {
                warn!(
                    colliding_volume_name = volume.name.as_str(),
                    "Colliding volume name in pod volumes, the API server will reject the pod"
                );
            }
        }

        let dns_policy = if self.host_network {
            "ClusterFirstWithHostNet"
        } else {
            "ClusterFirst"
        };

        PodSpec {
            containers: self.containers.clone(),
            init_containers: self
                .init_containers
                .clone()
                .filter(|containers| !containers.is_empty()),
            volumes: (!self.volumes.is_empty()).then(|| self.volumes.clone()),
            host_network: self.host_network.then_some(true),
            dns_policy: Some(dns_policy.to_owned()),
            node_selector: self.node_selector.clone(),
            affinity: self.affinity.clone(),
            security_context: self.security_context.clone(),
            tolerations: self
                .tolerations
                .clone()
                .filter(|tolerations| !tolerations.is_empty()),
            service_account_name: self.service_account_name.clone(),
            // The proxy never talks to the API server
            automount_service_account_token: Some(false),
            restart_policy: Some("Always".to_owned()),
            scheduler_name: Some("default-scheduler".to_owned()),
            termination_grace_period_seconds: self.termination_grace_period_seconds,
            ..PodSpec::default()
        }
    }
}
