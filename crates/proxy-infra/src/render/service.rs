use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use tracing::{debug, instrument};

use super::ResourceRender;
use crate::{builder::meta::ObjectMetaBuilder, config::overrides::ServiceType};

impl ResourceRender<'_> {
    /// The Service exposing every listener port of the proxy.
    ///
    /// Its selector is exactly the label set of the Deployment pod template.
    #[instrument(skip_all, fields(proxy = self.names.name()))]
    pub fn service(&self) -> Service {
        let service = &self.settings.service;

        let ports: Vec<_> = self
            .identity
            .listeners
            .iter()
            .map(|listener| ServicePort {
                name: Some(listener.name.clone()),
                protocol: Some(listener.protocol.to_string()),
                port: listener.container_port,
                target_port: Some(IntOrString::Int(listener.container_port)),
                ..ServicePort::default()
            })
            .collect();
        debug!(ports = ports.len(), service_type = %service.type_, "rendering service");

        // Keeps the client source address and avoids a second hop
        let external_traffic_policy =
            (service.type_ == ServiceType::LoadBalancer).then(|| "Local".to_owned());

        Service {
            metadata: ObjectMetaBuilder::for_proxy(&self.names)
                .with_annotations(&self.identity.annotations)
                .with_annotations(&service.annotations)
                .build(),
            spec: Some(ServiceSpec {
                type_: Some(service.type_.to_string()),
                selector: Some(self.pod_labels()),
                ports: (!ports.is_empty()).then_some(ports),
                session_affinity: Some("None".to_owned()),
                external_traffic_policy,
                load_balancer_class: service.load_balancer_class.clone(),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        config::{defaults::DefaultPolicy, overrides::ProxyInfraOverride},
        identity::{ListenerPort, Protocol, ProxyIdentity},
    };

    #[fixture]
    fn identity() -> ProxyIdentity {
        let mut identity =
            ProxyIdentity::for_gateway("default/eg", "envoy-gateway-system", "default", "eg")
                .with_listener(ListenerPort::new("EnvoyHTTPPort", Protocol::Tcp, 8080))
                .with_listener(ListenerPort::new("EnvoyDNSPort", Protocol::Udp, 5353));
        identity.annotations = BTreeMap::from([
            ("anno1".to_owned(), "value1".to_owned()),
            ("anno2".to_owned(), "value2".to_owned()),
        ]);
        identity
    }

    fn service(identity: &ProxyIdentity, layer: &str) -> Service {
        let layer: ProxyInfraOverride = serde_yaml::from_str(layer).expect("layer must parse");
        ResourceRender::new(identity, &DefaultPolicy::default(), &[layer])
            .expect("render must succeed")
            .service()
    }

    #[rstest]
    fn default_service(identity: ProxyIdentity) {
        let service = service(&identity, "{}");
        let spec = service.spec.expect("spec is set");

        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.external_traffic_policy, None);
        assert_eq!(spec.session_affinity.as_deref(), Some("None"));
        assert_eq!(
            spec.ports
                .unwrap_or_default()
                .into_iter()
                .map(|port| (port.name, port.protocol, port.port, port.target_port))
                .collect::<Vec<_>>(),
            [
                (
                    Some("EnvoyHTTPPort".to_owned()),
                    Some("TCP".to_owned()),
                    8080,
                    Some(IntOrString::Int(8080))
                ),
                (
                    Some("EnvoyDNSPort".to_owned()),
                    Some("UDP".to_owned()),
                    5353,
                    Some(IntOrString::Int(5353))
                ),
            ]
        );
        assert_eq!(
            service.metadata.annotations,
            Some(BTreeMap::from([
                ("anno1".to_owned(), "value1".to_owned()),
                ("anno2".to_owned(), "value2".to_owned()),
            ]))
        );
    }

    #[rstest]
    fn load_balancer_service(identity: ProxyIdentity) {
        let service = service(
            &identity,
            indoc! {"
                service:
                  type: LoadBalancer
                  loadBalancerClass: example.com/lb
                  annotations:
                    anno2: custom
            "},
        );
        let spec = service.spec.expect("spec is set");

        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.external_traffic_policy.as_deref(), Some("Local"));
        assert_eq!(spec.load_balancer_class.as_deref(), Some("example.com/lb"));
        assert_eq!(
            service.metadata.annotations,
            Some(BTreeMap::from([
                ("anno1".to_owned(), "value1".to_owned()),
                ("anno2".to_owned(), "custom".to_owned()),
            ]))
        );
    }

    #[rstest]
    fn service_without_listeners(mut identity: ProxyIdentity) {
        identity.listeners.clear();
        let spec = service(&identity, "{}").spec.expect("spec is set");
        assert_eq!(spec.ports, None);
    }
}
