use k8s_openapi::{
    api::core::v1::{
        Container, ContainerPort, EnvVar, HTTPGetAction, Probe, ResourceRequirements,
        SecurityContext, VolumeMount,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};

use crate::identity::ListenerPort;

pub const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";

/// A builder to build [`Container`] objects.
///
/// Every built container uses the `IfNotPresent` pull policy and the default termination message settings.
#[derive(Clone, Debug, Default)]
pub struct ContainerBuilder {
    args: Option<Vec<String>>,
    container_ports: Option<Vec<ContainerPort>>,
    command: Option<Vec<String>>,
    env: Option<Vec<EnvVar>>,
    image: Option<String>,
    name: String,
    resources: Option<ResourceRequirements>,
    volume_mounts: Option<Vec<VolumeMount>>,
    readiness_probe: Option<Probe>,
    security_context: Option<SecurityContext>,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn add_env_vars(&mut self, env_vars: impl IntoIterator<Item = EnvVar>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).extend(env_vars);
        self
    }

    pub fn command(&mut self, command: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = Some(args);
        self
    }

    /// Exposes every listener port under its own name and protocol, in the given order.
    pub fn add_listener_ports<'a>(
        &mut self,
        listeners: impl IntoIterator<Item = &'a ListenerPort>,
    ) -> &mut Self {
        self.container_ports
            .get_or_insert_with(Vec::new)
            .extend(listeners.into_iter().map(|listener| ContainerPort {
                name: Some(listener.name.clone()),
                container_port: listener.container_port,
                protocol: Some(listener.protocol.to_string()),
                ..ContainerPort::default()
            }));
        self
    }

    pub fn resources(&mut self, resources: Option<ResourceRequirements>) -> &mut Self {
        self.resources = resources;
        self
    }

    pub fn add_volume_mounts(
        &mut self,
        volume_mounts: impl IntoIterator<Item = VolumeMount>,
    ) -> &mut Self {
        self.volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(volume_mounts);
        self
    }

    /// An HTTP GET readiness probe with a one second timeout, checking every `period_seconds`.
    ///
    /// A single failure marks the container unready.
    pub fn http_readiness_probe(
        &mut self,
        port: u16,
        path: impl Into<String>,
        period_seconds: i32,
    ) -> &mut Self {
        self.readiness_probe = Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.into()),
                port: IntOrString::Int(port.into()),
                scheme: Some("HTTP".to_owned()),
                ..HTTPGetAction::default()
            }),
            timeout_seconds: Some(1),
            period_seconds: Some(period_seconds),
            success_threshold: Some(1),
            failure_threshold: Some(1),
            ..Probe::default()
        });
        self
    }

    pub fn security_context(&mut self, context: Option<SecurityContext>) -> &mut Self {
        self.security_context = context;
        self
    }

    pub fn build(&self) -> Container {
        Container {
            args: self.args.clone(),
            command: self.command.clone(),
            env: self.env.clone().filter(|env| !env.is_empty()),
            image: self.image.clone(),
            image_pull_policy: Some("IfNotPresent".to_owned()),
            resources: self.resources.clone(),
            name: self.name.clone(),
            ports: self
                .container_ports
                .clone()
                .filter(|ports| !ports.is_empty()),
            volume_mounts: self.volume_mounts.clone(),
            readiness_probe: self.readiness_probe.clone(),
            security_context: self.security_context.clone(),
            termination_message_path: Some(TERMINATION_MESSAGE_PATH.to_owned()),
            termination_message_policy: Some("File".to_owned()),
            ..Container::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Protocol;

    #[test]
    fn container_builder() {
        let listeners = [
            ListenerPort::new("EnvoyHTTPPort", Protocol::Tcp, 8080),
            ListenerPort::new("EnvoyDNSPort", Protocol::Udp, 5353),
        ];

        let container = ContainerBuilder::new("envoy")
            .image("envoyproxy/envoy-dev:latest")
            .command(["envoy"])
            .add_listener_ports(&listeners)
            .add_volume_mounts([VolumeMount {
                name: "certs".to_owned(),
                mount_path: "/certs".to_owned(),
                ..VolumeMount::default()
            }])
            .http_readiness_probe(19001, "/ready", 5)
            .build();

        assert_eq!(container.name, "envoy");
        assert_eq!(container.command, Some(vec!["envoy".to_owned()]));
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(
            container
                .ports
                .as_ref()
                .map(|ports| ports
                    .iter()
                    .map(|port| (
                        port.name.as_deref(),
                        port.container_port,
                        port.protocol.as_deref()
                    ))
                    .collect::<Vec<_>>()),
            Some(vec![
                (Some("EnvoyHTTPPort"), 8080, Some("TCP")),
                (Some("EnvoyDNSPort"), 5353, Some("UDP")),
            ])
        );
        assert_eq!(container.volume_mounts.as_ref().map(Vec::len), Some(1));

        let probe = container.readiness_probe.expect("readiness probe is set");
        assert_eq!(probe.period_seconds, Some(5));
        assert_eq!(
            probe.http_get.map(|action| action.port),
            Some(IntOrString::Int(19001))
        );
    }

    #[test]
    fn container_builder_without_ports() {
        let container = ContainerBuilder::new("envoy")
            .add_listener_ports(&[])
            .build();
        assert_eq!(container.ports, None);
        assert_eq!(container.env, None);
    }
}
