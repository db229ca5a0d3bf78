use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::{
        CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    },
};
use kube::Resource;
use tracing::{debug, instrument};

use super::ResourceRender;
use crate::builder::meta::ObjectMetaBuilder;

impl ResourceRender<'_> {
    /// The HorizontalPodAutoscaler scaling the proxy Deployment, if any layer asked for one.
    ///
    /// Metrics and behavior are passed through as configured. Without metrics Kubernetes scales on CPU
    /// utilization.
    #[instrument(skip_all, fields(proxy = self.names.name()))]
    pub fn autoscaler(&self) -> Option<HorizontalPodAutoscaler> {
        let autoscaler = self.settings.autoscaler.as_ref()?;
        debug!(
            min_replicas = autoscaler.min_replicas,
            max_replicas = autoscaler.max_replicas,
            "rendering autoscaler"
        );

        Some(HorizontalPodAutoscaler {
            metadata: ObjectMetaBuilder::for_proxy(&self.names)
                .with_annotations(&self.identity.annotations)
                .build(),
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some(Deployment::api_version(&()).into_owned()),
                    kind: Deployment::kind(&()).into_owned(),
                    name: self.names.name().to_owned(),
                },
                min_replicas: Some(autoscaler.min_replicas),
                max_replicas: autoscaler.max_replicas,
                metrics: autoscaler.metrics.clone(),
                behavior: autoscaler.behavior.clone(),
            }),
            ..HorizontalPodAutoscaler::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::{defaults::DefaultPolicy, overrides::ProxyInfraOverride},
        identity::ProxyIdentity,
    };

    fn autoscaler(layer: &str) -> Option<HorizontalPodAutoscaler> {
        let identity =
            ProxyIdentity::for_gateway("default/eg", "envoy-gateway-system", "default", "eg");
        let layer: ProxyInfraOverride = serde_yaml::from_str(layer).expect("layer must parse");
        ResourceRender::new(&identity, &DefaultPolicy::default(), &[layer])
            .expect("render must succeed")
            .autoscaler()
    }

    #[test]
    fn no_autoscaler_by_default() {
        assert_eq!(autoscaler("{}"), None);
    }

    #[rstest]
    #[case("autoscaler: {maxReplicas: 1}", 1, 1)]
    #[case("autoscaler: {minReplicas: 5, maxReplicas: 10}", 5, 10)]
    fn autoscaler_bounds(#[case] layer: &str, #[case] min: i32, #[case] max: i32) {
        let hpa = autoscaler(layer).expect("autoscaler was requested");
        let spec = hpa.spec.expect("spec is set");

        assert_eq!(spec.min_replicas, Some(min));
        assert_eq!(spec.max_replicas, max);
        assert_eq!(spec.scale_target_ref.api_version.as_deref(), Some("apps/v1"));
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(Some(spec.scale_target_ref.name), hpa.metadata.name);
        assert_eq!(spec.metrics, None);
    }

    #[test]
    fn metrics_are_passed_through() {
        let hpa = autoscaler(indoc! {"
            autoscaler:
              minReplicas: 5
              maxReplicas: 10
              metrics:
                - type: Resource
                  resource:
                    name: cpu
                    target:
                      type: Utilization
                      averageUtilization: 60
                - type: Resource
                  resource:
                    name: memory
                    target:
                      type: Utilization
                      averageUtilization: 70
        "})
        .expect("autoscaler was requested");

        let utilization: Vec<_> = hpa
            .spec
            .and_then(|spec| spec.metrics)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|metric| metric.resource)
            .map(|resource| (resource.name, resource.target.average_utilization))
            .collect();
        assert_eq!(
            utilization,
            [("cpu".to_owned(), Some(60)), ("memory".to_owned(), Some(70))]
        );
    }
}
