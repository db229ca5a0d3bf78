//! The default policy: the lowest-precedence layer every render starts from.
use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            ConfigMapVolumeSource, EnvVar, EnvVarSource, KeyToPath, ObjectFieldSelector,
            ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bootstrap::{
        BOOTSTRAP_FILE_NAME, BOOTSTRAP_MOUNT_PATH, CERTS_MOUNT_PATH, CERTS_SECRET_NAME,
        SDS_MOUNT_PATH, XDS_CERTIFICATE_FILE_NAME, XDS_TRUSTED_CA_FILE_NAME, XdsEndpoint,
    },
    config::{
        merge::{AppendList, Merge, merge_layers},
        overrides::{
            AutoscalerOverride, ContainerOverride, DeploymentOverride, LoggingOverride,
            PodOverride, ProxyInfraOverride, ProxySettingsOverride, ServiceOverride, ServiceType,
            TelemetryOverride,
        },
    },
    naming::ResourceNames,
    proxy_logging::{LogComponent, LogLevel},
};

pub const DEFAULT_IMAGE: &str = "envoyproxy/envoy-dev:latest";
pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const DEFAULT_MEMORY_REQUEST: &str = "512Mi";
pub const DEFAULT_AUTOSCALER_MIN_REPLICAS: i32 = 1;

pub const ENVOY_GATEWAY_NAMESPACE_ENV: &str = "ENVOY_GATEWAY_NAMESPACE";
pub const ENVOY_POD_NAME_ENV: &str = "ENVOY_POD_NAME";

pub const CERTS_VOLUME_NAME: &str = "certs";
pub const BOOTSTRAP_VOLUME_NAME: &str = "bootstrap";
pub const SDS_VOLUME_NAME: &str = "sds";

/// `rw-r--r--`
const DEFAULT_FILE_MODE: i32 = 0o644;

/// Baseline values for every proxy, overridable by the controller operator.
///
/// The policy is only ever read. [`DefaultPolicy::merge`] builds a fresh baseline layer for every render.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultPolicy {
    pub image: String,
    pub replicas: i32,
    pub cpu_request: Quantity,
    pub memory_request: Quantity,
    pub service_type: ServiceType,
    pub log_level: LogLevel,
    pub metrics_enabled: bool,
    pub xds: XdsEndpoint,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            replicas: 1,
            cpu_request: Quantity(DEFAULT_CPU_REQUEST.to_owned()),
            memory_request: Quantity(DEFAULT_MEMORY_REQUEST.to_owned()),
            service_type: ServiceType::default(),
            log_level: LogLevel::default(),
            metrics_enabled: true,
            xds: XdsEndpoint::default(),
        }
    }
}

impl DefaultPolicy {
    /// Folds `layers` (lowest precedence first) onto the baseline of the proxy named by `names`.
    ///
    /// An autoscaler requested by any layer additionally falls back to [`Self::autoscaler_baseline`].
    pub fn merge(
        &self,
        names: &ResourceNames,
        layers: &[ProxyInfraOverride],
    ) -> ProxyInfraOverride {
        debug!(layers = layers.len(), "merging override layers onto default policy");

        let mut merged = merge_layers(&self.baseline(names), layers);
        if let Some(autoscaler) = merged.autoscaler.as_mut() {
            autoscaler.merge(&Self::autoscaler_baseline());
        }
        merged
    }

    /// The lowest layer. Every field the renderers require is set here.
    pub fn baseline(&self, names: &ResourceNames) -> ProxyInfraOverride {
        ProxyInfraOverride {
            deployment: DeploymentOverride {
                replicas: Some(self.replicas),
                strategy: Some(Self::rolling_update()),
                pod: PodOverride {
                    volumes: Self::volumes(names.name()),
                    ..PodOverride::default()
                },
                container: ContainerOverride {
                    image: Some(self.image.clone()),
                    resources: Some(ResourceRequirements {
                        requests: Some(BTreeMap::from([
                            ("cpu".to_owned(), self.cpu_request.clone()),
                            ("memory".to_owned(), self.memory_request.clone()),
                        ])),
                        ..ResourceRequirements::default()
                    }),
                    env: Some(Self::env()),
                    volume_mounts: Self::volume_mounts(),
                    ..ContainerOverride::default()
                },
                init_containers: AppendList::default(),
            },
            service: ServiceOverride {
                type_: Some(self.service_type),
                ..ServiceOverride::default()
            },
            autoscaler: None,
            settings: ProxySettingsOverride {
                bootstrap: None,
                logging: LoggingOverride {
                    level: Some(BTreeMap::from([(LogComponent::Default, self.log_level)])),
                },
                telemetry: TelemetryOverride {
                    metrics_enabled: Some(self.metrics_enabled),
                },
                concurrency: None,
            },
        }
    }

    /// Defaults for an autoscaler that at least one layer asked for.
    pub fn autoscaler_baseline() -> AutoscalerOverride {
        AutoscalerOverride {
            min_replicas: Some(DEFAULT_AUTOSCALER_MIN_REPLICAS),
            ..AutoscalerOverride::default()
        }
    }

    fn rolling_update() -> DeploymentStrategy {
        DeploymentStrategy {
            type_: Some("RollingUpdate".to_owned()),
            rolling_update: Some(RollingUpdateDeployment {
                max_surge: Some(IntOrString::String("25%".to_owned())),
                max_unavailable: Some(IntOrString::String("25%".to_owned())),
            }),
        }
    }

    fn env() -> Vec<EnvVar> {
        [
            (ENVOY_GATEWAY_NAMESPACE_ENV, "metadata.namespace"),
            (ENVOY_POD_NAME_ENV, "metadata.name"),
        ]
        .into_iter()
        .map(|(name, field_path)| EnvVar {
            name: name.to_owned(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_owned()),
                    field_path: field_path.to_owned(),
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        })
        .collect()
    }

    fn volumes(config_map_name: &str) -> AppendList<Volume> {
        AppendList(vec![
            Volume {
                name: CERTS_VOLUME_NAME.to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(CERTS_SECRET_NAME.to_owned()),
                    default_mode: Some(DEFAULT_FILE_MODE),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: BOOTSTRAP_VOLUME_NAME.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.to_owned(),
                    items: Some(vec![KeyToPath {
                        key: BOOTSTRAP_FILE_NAME.to_owned(),
                        path: BOOTSTRAP_FILE_NAME.to_owned(),
                        mode: None,
                    }]),
                    default_mode: Some(DEFAULT_FILE_MODE),
                    optional: Some(false),
                }),
                ..Volume::default()
            },
            Volume {
                name: SDS_VOLUME_NAME.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.to_owned(),
                    items: Some(
                        [XDS_TRUSTED_CA_FILE_NAME, XDS_CERTIFICATE_FILE_NAME]
                            .into_iter()
                            .map(|file| KeyToPath {
                                key: file.to_owned(),
                                path: file.to_owned(),
                                mode: None,
                            })
                            .collect(),
                    ),
                    default_mode: Some(DEFAULT_FILE_MODE),
                    optional: Some(false),
                }),
                ..Volume::default()
            },
        ])
    }

    fn volume_mounts() -> AppendList<VolumeMount> {
        [
            (CERTS_VOLUME_NAME, CERTS_MOUNT_PATH),
            (BOOTSTRAP_VOLUME_NAME, BOOTSTRAP_MOUNT_PATH),
            (SDS_VOLUME_NAME, SDS_MOUNT_PATH),
        ]
        .into_iter()
        .map(|(name, mount_path)| VolumeMount {
            name: name.to_owned(),
            mount_path: mount_path.to_owned(),
            read_only: Some(true),
            ..VolumeMount::default()
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::identity::ProxyIdentity;

    #[fixture]
    fn names() -> ResourceNames {
        ResourceNames::new(&ProxyIdentity::for_gateway(
            "default/eg",
            "envoy-gateway-system",
            "default",
            "eg",
        ))
        .expect("identity is valid")
    }

    #[rstest]
    fn merge_without_layers_is_baseline(names: ResourceNames) {
        let policy = DefaultPolicy::default();
        assert_eq!(policy.merge(&names, &[]), policy.baseline(&names));
    }

    #[rstest]
    fn baseline_mounts_every_volume(names: ResourceNames) {
        let baseline = DefaultPolicy::default().baseline(&names);

        let volumes: Vec<_> = baseline
            .deployment
            .pod
            .volumes
            .iter()
            .map(|volume| volume.name.as_str())
            .collect();
        let mounts: Vec<_> = baseline
            .deployment
            .container
            .volume_mounts
            .iter()
            .map(|mount| mount.name.as_str())
            .collect();
        assert_eq!(volumes, mounts);

        let config_map = baseline.deployment.pod.volumes.0[1]
            .config_map
            .as_ref()
            .expect("bootstrap volume is a config map");
        assert_eq!(config_map.name, names.name());
    }

    #[rstest]
    fn autoscaler_min_replicas_is_defaulted(names: ResourceNames) {
        let policy = DefaultPolicy::default();
        let layer = ProxyInfraOverride {
            autoscaler: Some(AutoscalerOverride {
                max_replicas: Some(1),
                ..AutoscalerOverride::default()
            }),
            ..ProxyInfraOverride::default()
        };

        let merged = policy.merge(&names, &[layer]);
        let autoscaler = merged.autoscaler.expect("autoscaler was requested");
        assert_eq!(autoscaler.min_replicas, Some(1));
        assert_eq!(autoscaler.max_replicas, Some(1));

        assert_eq!(policy.merge(&names, &[]).autoscaler, None);
    }

    #[test]
    fn policy_from_yaml() {
        let policy: DefaultPolicy = serde_yaml::from_str(
            "{image: 'envoyproxy/envoy:distroless-v1.31.0', xds: {host: eg.local, port: 18001}}",
        )
        .expect("policy must parse");

        assert_eq!(policy.image, "envoyproxy/envoy:distroless-v1.31.0");
        assert_eq!(policy.xds.port, 18001);
        assert_eq!(policy.replicas, 1);
        assert_eq!(policy.cpu_request, Quantity("100m".to_owned()));
    }
}
