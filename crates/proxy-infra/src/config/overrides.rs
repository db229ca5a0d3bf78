//! Override layers. Every field is optional; an absent field falls through to the next lower layer.
//!
//! These are the types users write (usually embedded in a CRD), so they derive [`Deserialize`] and [`JsonSchema`].
//! Renderers never read them directly, they only see [`MergedSettings`](super::validated::MergedSettings).
use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::DeploymentStrategy,
    autoscaling::v2::{HorizontalPodAutoscalerBehavior, MetricSpec},
    core::v1::{
        Affinity, Container, EnvVar, PodSecurityContext, ResourceRequirements, SecurityContext,
        Toleration, Volume, VolumeMount,
    },
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    config::merge::{AppendList, Atomic, Merge},
    proxy_logging::{LogComponent, LogLevel},
};

/// One complete override layer.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfraOverride {
    #[serde(default)]
    pub deployment: DeploymentOverride,

    #[serde(default)]
    pub service: ServiceOverride,

    /// The autoscaler is only rendered if at least one layer sets this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerOverride>,

    #[serde(default)]
    pub settings: ProxySettingsOverride,
}

impl Merge for ProxyInfraOverride {
    fn merge(&mut self, defaults: &Self) {
        self.deployment.merge(&defaults.deployment);
        self.service.merge(&defaults.service);
        self.autoscaler.merge(&defaults.autoscaler);
        self.settings.merge(&defaults.settings);
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,

    #[serde(default)]
    pub pod: PodOverride,

    #[serde(default)]
    pub container: ContainerOverride,

    /// Appended after the init containers of lower layers.
    #[serde(default, skip_serializing_if = "AppendList::is_empty")]
    pub init_containers: AppendList<Container>,
}

impl Merge for DeploymentOverride {
    fn merge(&mut self, defaults: &Self) {
        self.replicas.merge(&defaults.replicas);
        self.strategy.merge(&defaults.strategy);
        self.pod.merge(&defaults.pod);
        self.container.merge(&defaults.container);
        self.init_containers.merge(&defaults.init_containers);
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Appended after the volumes of lower layers.
    #[serde(default, skip_serializing_if = "AppendList::is_empty")]
    pub volumes: AppendList<Volume>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
}

impl Merge for PodOverride {
    fn merge(&mut self, defaults: &Self) {
        self.annotations.merge(&defaults.annotations);
        self.labels.merge(&defaults.labels);
        self.security_context.merge(&defaults.security_context);
        self.affinity.merge(&defaults.affinity);
        self.tolerations.merge(&defaults.tolerations);
        self.node_selector.merge(&defaults.node_selector);
        self.volumes.merge(&defaults.volumes);
        self.host_network.merge(&defaults.host_network);
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    /// Replaces the environment of lower layers as a whole, variables are not merged one by one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    /// Appended after the volume mounts of lower layers.
    #[serde(default, skip_serializing_if = "AppendList::is_empty")]
    pub volume_mounts: AppendList<VolumeMount>,
}

impl Merge for ContainerOverride {
    fn merge(&mut self, defaults: &Self) {
        self.image.merge(&defaults.image);
        self.resources.merge(&defaults.resources);
        self.security_context.merge(&defaults.security_context);
        self.env.merge(&defaults.env);
        self.volume_mounts.merge(&defaults.volume_mounts);
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    LoadBalancer,
    NodePort,
}

impl Atomic for ServiceType {}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<ServiceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_class: Option<String>,
}

impl Merge for ServiceOverride {
    fn merge(&mut self, defaults: &Self) {
        self.type_.merge(&defaults.type_);
        self.annotations.merge(&defaults.annotations);
        self.load_balancer_class.merge(&defaults.load_balancer_class);
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Passed to the HorizontalPodAutoscaler as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

impl Merge for AutoscalerOverride {
    fn merge(&mut self, defaults: &Self) {
        self.min_replicas.merge(&defaults.min_replicas);
        self.max_replicas.merge(&defaults.max_replicas);
        self.metrics.merge(&defaults.metrics);
        self.behavior.merge(&defaults.behavior);
    }
}

// Unlike the other sub-objects, the presence of the autoscaler is significant
impl Merge for Option<AutoscalerOverride> {
    fn merge(&mut self, defaults: &Self) {
        match (self.as_mut(), defaults) {
            (Some(overrides), Some(defaults)) => overrides.merge(defaults),
            (None, Some(_)) => self.clone_from(defaults),
            (_, None) => {}
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum BootstrapType {
    /// The supplied text is the final bootstrap configuration.
    #[default]
    Replace,

    /// The supplied text is layered onto the generated bootstrap.
    Merge,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyBootstrap {
    #[serde(default, rename = "type")]
    pub type_: BootstrapType,
    pub value: String,
}

impl ProxyBootstrap {
    pub fn replace(value: impl Into<String>) -> Self {
        Self {
            type_: BootstrapType::Replace,
            value: value.into(),
        }
    }
}

impl Atomic for ProxyBootstrap {}
impl Atomic for BTreeMap<LogComponent, LogLevel> {}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettingsOverride {
    /// Absent means the generated default bootstrap is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<ProxyBootstrap>,

    #[serde(default)]
    pub logging: LoggingOverride,

    #[serde(default)]
    pub telemetry: TelemetryOverride,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i32>,
}

impl Merge for ProxySettingsOverride {
    fn merge(&mut self, defaults: &Self) {
        self.bootstrap.merge(&defaults.bootstrap);
        self.logging.merge(&defaults.logging);
        self.telemetry.merge(&defaults.telemetry);
        self.concurrency.merge(&defaults.concurrency);
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingOverride {
    /// Log level per component. Replaces the levels of lower layers as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<BTreeMap<LogComponent, LogLevel>>,
}

impl Merge for LoggingOverride {
    fn merge(&mut self, defaults: &Self) {
        self.level.merge(&defaults.level);
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryOverride {
    /// Whether the proxy exposes Prometheus metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_enabled: Option<bool>,
}

impl Merge for TelemetryOverride {
    fn merge(&mut self, defaults: &Self) {
        self.metrics_enabled.merge(&defaults.metrics_enabled);
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::config::merge::merge;

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_owned(),
            value: Some(value.to_owned()),
            ..EnvVar::default()
        }
    }

    #[test]
    fn deserialize_layer() {
        let layer: ProxyInfraOverride = serde_yaml::from_str(indoc! {"
            deployment:
              replicas: 2
              pod:
                annotations:
                  prometheus.io/scrape: 'true'
                hostNetwork: true
              container:
                image: envoyproxy/envoy:v1.2.3
                env:
                  - name: env_a
                    value: env_a_value
            service:
              type: LoadBalancer
            autoscaler:
              maxReplicas: 10
            settings:
              logging:
                level:
                  default: error
                  filter: info
              telemetry:
                metricsEnabled: false
              concurrency: 4
        "})
        .expect("layer must deserialize");

        assert_eq!(layer.deployment.replicas, Some(2));
        assert_eq!(layer.deployment.pod.host_network, Some(true));
        assert_eq!(
            layer.deployment.container.image.as_deref(),
            Some("envoyproxy/envoy:v1.2.3")
        );
        assert_eq!(layer.service.type_, Some(ServiceType::LoadBalancer));
        assert_eq!(
            layer.autoscaler.and_then(|autoscaler| autoscaler.max_replicas),
            Some(10)
        );
        assert_eq!(layer.settings.telemetry.metrics_enabled, Some(false));
        assert_eq!(layer.settings.concurrency, Some(4));
        assert_eq!(
            layer.settings.logging.level,
            Some(BTreeMap::from([
                (LogComponent::Default, LogLevel::Error),
                (LogComponent::Filter, LogLevel::Info),
            ]))
        );
    }

    #[test]
    fn empty_layer_deserializes_to_default() {
        let layer: ProxyInfraOverride = serde_yaml::from_str("{}").expect("layer must deserialize");
        assert_eq!(layer, ProxyInfraOverride::default());
    }

    #[test]
    fn env_is_replaced_as_a_whole() {
        let overrides = ContainerOverride {
            env: Some(vec![env("A", "a"), env("B", "b")]),
            ..ContainerOverride::default()
        };
        let defaults = ContainerOverride {
            env: Some(vec![env("C", "c")]),
            image: Some("envoyproxy/envoy-dev:latest".to_owned()),
            ..ContainerOverride::default()
        };

        let merged = merge(overrides, &defaults);
        assert_eq!(merged.env, Some(vec![env("A", "a"), env("B", "b")]));
        assert_eq!(merged.image.as_deref(), Some("envoyproxy/envoy-dev:latest"));
    }

    #[test]
    fn absent_env_keeps_default() {
        let defaults = ContainerOverride {
            env: Some(vec![env("C", "c")]),
            ..ContainerOverride::default()
        };

        let merged = merge(ContainerOverride::default(), &defaults);
        assert_eq!(merged.env, Some(vec![env("C", "c")]));
    }

    #[test]
    fn autoscaler_presence_is_kept() {
        let overrides = Some(AutoscalerOverride {
            max_replicas: Some(10),
            ..AutoscalerOverride::default()
        });
        let defaults = Some(AutoscalerOverride {
            min_replicas: Some(1),
            ..AutoscalerOverride::default()
        });

        assert_eq!(
            merge(overrides.clone(), &None),
            overrides,
            "a present autoscaler must survive an absent default"
        );
        assert_eq!(
            merge(overrides, &defaults),
            Some(AutoscalerOverride {
                min_replicas: Some(1),
                max_replicas: Some(10),
                ..AutoscalerOverride::default()
            })
        );
        assert_eq!(merge(None::<AutoscalerOverride>, &None), None);
    }

    #[test]
    fn bootstrap_type_defaults_to_replace() {
        let bootstrap: ProxyBootstrap =
            serde_yaml::from_str("value: test bootstrap config").expect("bootstrap must parse");
        assert_eq!(bootstrap, ProxyBootstrap::replace("test bootstrap config"));

        let unknown = serde_yaml::from_str::<ProxyBootstrap>("{type: Patch, value: foo}");
        assert!(unknown.is_err());
    }
}
