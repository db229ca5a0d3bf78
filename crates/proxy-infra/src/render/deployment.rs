use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec},
    core::v1::Container,
};
use tracing::{debug, instrument};

use super::ResourceRender;
use crate::{
    bootstrap::{BOOTSTRAP_CONFIG_PATH, PROMETHEUS_PATH, READINESS_PATH, READINESS_PORT},
    builder::{container::ContainerBuilder, meta::ObjectMetaBuilder, pod::PodBuilder},
    config::defaults::ENVOY_POD_NAME_ENV,
    naming::ResourceNames,
};

pub const ENVOY_CONTAINER_NAME: &str = "envoy";
const ENVOY_COMMAND: &str = "envoy";

const PROMETHEUS_SCRAPE_ANNOTATION: &str = "prometheus.io/scrape";
const PROMETHEUS_PORT_ANNOTATION: &str = "prometheus.io/port";
const PROMETHEUS_PATH_ANNOTATION: &str = "prometheus.io/path";

const READINESS_PERIOD_SECONDS: i32 = 5;
const REVISION_HISTORY_LIMIT: i32 = 10;
const PROGRESS_DEADLINE_SECONDS: i32 = 600;
/// Gives the proxy time to drain its connections.
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 300;

impl ResourceRender<'_> {
    #[instrument(skip_all, fields(proxy = self.names.name()))]
    pub fn deployment(&self) -> Deployment {
        let deployment = &self.settings.deployment;
        let pod_labels = self.pod_labels();

        let mut pod_builder = PodBuilder::new();
        pod_builder
            .metadata(
                ObjectMetaBuilder::new()
                    .labels(pod_labels.clone())
                    .with_annotations(&self.pod_annotations())
                    .build(),
            )
            .add_init_containers(deployment.init_containers.iter().cloned())
            .add_container(self.envoy_container())
            .add_volumes(deployment.pod.volumes.iter().cloned())
            .host_network(deployment.pod.host_network)
            .node_selector_opt(Some(deployment.pod.node_selector.clone()))
            .affinity_opt(deployment.pod.affinity.clone())
            .security_context_opt(deployment.pod.security_context.clone())
            .add_tolerations(deployment.pod.tolerations.iter().cloned())
            .service_account_name(self.names.name())
            .termination_grace_period_seconds(TERMINATION_GRACE_PERIOD_SECONDS);

        // The autoscaler owns the replica count once there is one
        let replicas = self
            .settings
            .autoscaler
            .is_none()
            .then_some(deployment.replicas);
        debug!(?replicas, "rendering deployment");

        Deployment {
            metadata: ObjectMetaBuilder::for_proxy(&self.names).build(),
            spec: Some(DeploymentSpec {
                replicas,
                // Immutable once created, so custom pod labels stay out of it
                selector: ResourceNames::selector(self.names.labels()),
                strategy: Some(deployment.strategy.clone()),
                revision_history_limit: Some(REVISION_HISTORY_LIMIT),
                progress_deadline_seconds: Some(PROGRESS_DEADLINE_SECONDS),
                template: pod_builder.build_template(),
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    /// Prometheus scrape annotations (if metrics are enabled), overlaid with the annotations of the pod override.
    fn pod_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if self.settings.proxy.metrics_enabled {
            annotations.extend([
                (PROMETHEUS_SCRAPE_ANNOTATION.to_owned(), "true".to_owned()),
                (PROMETHEUS_PORT_ANNOTATION.to_owned(), READINESS_PORT.to_string()),
                (PROMETHEUS_PATH_ANNOTATION.to_owned(), PROMETHEUS_PATH.to_owned()),
            ]);
        }
        annotations.extend(self.settings.deployment.pod.annotations.clone());
        annotations
    }

    fn envoy_container(&self) -> Container {
        let container = &self.settings.deployment.container;

        let mut env = container.env.clone();
        env.sort_by(|a, b| a.name.cmp(&b.name));

        ContainerBuilder::new(ENVOY_CONTAINER_NAME)
            .image(&container.image)
            .command([ENVOY_COMMAND])
            .args(self.envoy_args())
            .add_env_vars(env)
            .add_listener_ports(&self.identity.listeners)
            .resources(container.resources.clone())
            .security_context(container.security_context.clone())
            .add_volume_mounts(container.volume_mounts.iter().cloned())
            .http_readiness_probe(READINESS_PORT, READINESS_PATH, READINESS_PERIOD_SECONDS)
            .build()
    }

    fn envoy_args(&self) -> Vec<String> {
        let proxy = &self.settings.proxy;

        let mut args = vec![
            "--service-cluster".to_owned(),
            self.names.name().to_owned(),
            "--service-node".to_owned(),
            format!("$({ENVOY_POD_NAME_ENV})"),
            "--config-path".to_owned(),
            BOOTSTRAP_CONFIG_PATH.to_owned(),
            "--log-level".to_owned(),
            proxy.logging.default_level().to_string(),
            "--cpuset-threads".to_owned(),
        ];
        if let Some(component_levels) = proxy.logging.component_levels() {
            args.extend(["--component-log-level".to_owned(), component_levels]);
        }
        if let Some(concurrency) = proxy.concurrency {
            args.extend(["--concurrency".to_owned(), concurrency.to_string()]);
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::api::core::v1::EnvVar;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        config::{defaults::DefaultPolicy, overrides::ProxyInfraOverride},
        identity::{ListenerPort, ProxyIdentity, Protocol},
    };

    #[fixture]
    fn identity() -> ProxyIdentity {
        ProxyIdentity::for_gateway("default/eg", "envoy-gateway-system", "default", "eg")
            .with_listener(ListenerPort::new("EnvoyHTTPPort", Protocol::Tcp, 8080))
            .with_listener(ListenerPort::new("EnvoyHTTPSPort", Protocol::Tcp, 8443))
    }

    fn deployment(identity: &ProxyIdentity, layers: &[&str]) -> Deployment {
        let layers: Vec<ProxyInfraOverride> = layers
            .iter()
            .map(|layer| serde_yaml::from_str(layer).expect("layer must parse"))
            .collect();
        ResourceRender::new(identity, &DefaultPolicy::default(), &layers)
            .expect("render must succeed")
            .deployment()
    }

    fn envoy_container(deployment: &Deployment) -> &Container {
        deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|spec| {
                spec.containers
                    .iter()
                    .find(|container| container.name == ENVOY_CONTAINER_NAME)
            })
            .expect("envoy container is always rendered")
    }

    #[rstest]
    fn default_args(identity: ProxyIdentity) {
        let deployment = deployment(&identity, &[]);
        let name = deployment.metadata.name.clone().expect("name is set");

        assert_eq!(
            envoy_container(&deployment).args,
            Some(vec![
                "--service-cluster".to_owned(),
                name,
                "--service-node".to_owned(),
                "$(ENVOY_POD_NAME)".to_owned(),
                "--config-path".to_owned(),
                "/etc/envoy/bootstrap.yaml".to_owned(),
                "--log-level".to_owned(),
                "warn".to_owned(),
                "--cpuset-threads".to_owned(),
            ])
        );
    }

    #[rstest]
    fn component_levels_and_concurrency(identity: ProxyIdentity) {
        let deployment = deployment(
            &identity,
            &[indoc! {"
                settings:
                  logging:
                    level:
                      default: error
                      upstream: debug
                      filter: info
                  concurrency: 4
            "}],
        );
        let args = envoy_container(&deployment)
            .args
            .clone()
            .expect("args are set");

        assert_eq!(
            args[6..],
            [
                "--log-level",
                "error",
                "--cpuset-threads",
                "--component-log-level",
                "filter:info,upstream:debug",
                "--concurrency",
                "4",
            ]
        );
    }

    #[rstest]
    fn env_is_sorted(identity: ProxyIdentity) {
        let deployment = deployment(
            &identity,
            &["deployment: {container: {env: [{name: b, value: '2'}, {name: a, value: '1'}]}}"],
        );

        let names: Vec<_> = envoy_container(&deployment)
            .env
            .iter()
            .flatten()
            .map(|env| env.name.as_str())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[rstest]
    fn default_env_uses_downward_api(identity: ProxyIdentity) {
        let deployment = deployment(&identity, &[]);
        let env = envoy_container(&deployment).env.clone().unwrap_or_default();

        let field_paths: Vec<_> = env
            .iter()
            .map(|EnvVar { name, value_from, .. }| {
                (
                    name.as_str(),
                    value_from
                        .as_ref()
                        .and_then(|source| source.field_ref.as_ref())
                        .map(|field| field.field_path.as_str()),
                )
            })
            .collect();
        assert_eq!(
            field_paths,
            [
                ("ENVOY_GATEWAY_NAMESPACE", Some("metadata.namespace")),
                ("ENVOY_POD_NAME", Some("metadata.name")),
            ]
        );
    }

    #[rstest]
    fn prometheus_annotations(identity: ProxyIdentity) {
        let annotations = |deployment: Deployment| {
            deployment
                .spec
                .and_then(|spec| spec.template.metadata)
                .and_then(|meta| meta.annotations)
                .unwrap_or_default()
        };

        let enabled = annotations(deployment(
            &identity,
            &["deployment: {pod: {annotations: {prometheus.io/scrape: 'false', foo: bar}}}"],
        ));
        assert_eq!(
            enabled,
            BTreeMap::from([
                ("foo".to_owned(), "bar".to_owned()),
                ("prometheus.io/path".to_owned(), "/stats/prometheus".to_owned()),
                ("prometheus.io/port".to_owned(), "19001".to_owned()),
                ("prometheus.io/scrape".to_owned(), "false".to_owned()),
            ])
        );

        let disabled = annotations(deployment(
            &identity,
            &["settings: {telemetry: {metricsEnabled: false}}"],
        ));
        assert!(disabled.is_empty());
    }

    #[rstest]
    fn init_containers_and_volumes_are_appended(identity: ProxyIdentity) {
        let deployment = deployment(
            &identity,
            &[
                indoc! {"
                    deployment:
                      initContainers:
                        - name: first
                          image: busybox
                      pod:
                        volumes:
                          - name: extra
                            emptyDir: {}
                "},
                indoc! {"
                    deployment:
                      initContainers:
                        - name: second
                          image: busybox
                "},
            ],
        );
        let spec = deployment
            .spec
            .and_then(|spec| spec.template.spec)
            .expect("pod spec is set");

        let init_containers: Vec<_> = spec
            .init_containers
            .unwrap_or_default()
            .into_iter()
            .map(|container| container.name)
            .collect();
        assert_eq!(init_containers, ["first", "second"]);

        let volumes: Vec<_> = spec
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| volume.name)
            .collect();
        assert_eq!(volumes, ["certs", "bootstrap", "sds", "extra"]);
    }

    #[rstest]
    fn selector_ignores_custom_pod_labels(identity: ProxyIdentity) {
        let owner_labels = ResourceNames::new(&identity)
            .expect("identity is valid")
            .labels()
            .clone();

        for value in ["v1", "v2"] {
            let layer = format!("deployment: {{pod: {{labels: {{foo.bar: {value}}}}}}}");
            let deployment = deployment(&identity, &[layer.as_str()]);
            let spec = deployment.spec.expect("spec is set");
            let template_labels = spec
                .template
                .metadata
                .and_then(|meta| meta.labels)
                .unwrap_or_default();

            assert_eq!(spec.selector.match_labels.as_ref(), Some(&owner_labels));
            assert_eq!(template_labels.get("foo.bar").map(String::as_str), Some(value));
            for (key, value) in &owner_labels {
                assert_eq!(template_labels.get(key), Some(value));
            }
        }
    }

    #[rstest]
    fn autoscaled_deployment_has_no_replicas(identity: ProxyIdentity) {
        let deployment = deployment(&identity, &["autoscaler: {maxReplicas: 3}"]);
        assert_eq!(deployment.spec.and_then(|spec| spec.replicas), None);
    }

    #[rstest]
    fn deployment_spec_defaults(identity: ProxyIdentity) {
        let deployment = deployment(&identity, &[]);
        let spec = deployment.spec.expect("spec is set");
        let pod = spec.template.spec.expect("pod spec is set");

        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.revision_history_limit, Some(10));
        assert_eq!(spec.progress_deadline_seconds, Some(600));
        assert_eq!(pod.termination_grace_period_seconds, Some(300));
        assert_eq!(pod.service_account_name, deployment.metadata.name);
        assert_eq!(pod.automount_service_account_token, Some(false));
    }
}
