//! Command line options for the [`DefaultPolicy`].
//!
//! Embed [`DefaultPolicyOptions`] into the argument set of the controller binary:
//!
//! ```rust
//! use clap::Parser;
//! use proxy_infra::{cli::DefaultPolicyOptions, config::defaults::DefaultPolicy};
//!
//! #[derive(clap::Parser, Debug)]
//! struct Run {
//!     #[command(flatten)]
//!     policy: DefaultPolicyOptions,
//! }
//!
//! let run = Run::parse_from(["controller", "--proxy-image", "envoyproxy/envoy:v1.31.0"]);
//! let policy = DefaultPolicy::from(run.policy);
//! assert_eq!(policy.image, "envoyproxy/envoy:v1.31.0");
//! ```
use clap::Args;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;

use crate::{
    bootstrap::XdsEndpoint,
    config::{
        defaults::{DEFAULT_CPU_REQUEST, DEFAULT_IMAGE, DEFAULT_MEMORY_REQUEST, DefaultPolicy},
        overrides::ServiceType,
    },
    proxy_logging::LogLevel,
    quantity::{ParseQuantityError, Quantity},
};

#[derive(Clone, Debug, PartialEq, Args)]
#[command(next_help_heading = "Default proxy policy")]
pub struct DefaultPolicyOptions {
    /// Image of the proxy container, unless an override sets one
    #[arg(long, env, default_value = DEFAULT_IMAGE)]
    pub proxy_image: String,

    /// Number of proxy replicas, unless an override or an autoscaler sets one
    #[arg(long, env, default_value_t = 1)]
    pub proxy_replicas: i32,

    #[arg(long, env, default_value = DEFAULT_CPU_REQUEST, value_parser = parse_quantity)]
    pub proxy_cpu_request: K8sQuantity,

    #[arg(long, env, default_value = DEFAULT_MEMORY_REQUEST, value_parser = parse_quantity)]
    pub proxy_memory_request: K8sQuantity,

    /// Type of the proxy Service: ClusterIP, LoadBalancer or NodePort
    #[arg(long, env, default_value_t = ServiceType::ClusterIP)]
    pub proxy_service_type: ServiceType,

    /// Log level of every proxy component without an explicit level
    #[arg(long, env, default_value_t = LogLevel::Warn)]
    pub proxy_log_level: LogLevel,

    /// Do not expose Prometheus metrics, unless an override enables them
    #[arg(long, env)]
    pub disable_proxy_metrics: bool,

    /// Host of the xDS control plane, used by the generated bootstrap
    #[arg(long, env, default_value_t = XdsEndpoint::default().host)]
    pub xds_host: String,

    #[arg(long, env, default_value_t = XdsEndpoint::default().port)]
    pub xds_port: u16,
}

fn parse_quantity(input: &str) -> Result<K8sQuantity, ParseQuantityError> {
    input.parse::<Quantity>()?;
    Ok(K8sQuantity(input.to_owned()))
}

impl From<DefaultPolicyOptions> for DefaultPolicy {
    fn from(options: DefaultPolicyOptions) -> Self {
        Self {
            image: options.proxy_image,
            replicas: options.proxy_replicas,
            cpu_request: options.proxy_cpu_request,
            memory_request: options.proxy_memory_request,
            service_type: options.proxy_service_type,
            log_level: options.proxy_log_level,
            metrics_enabled: !options.disable_proxy_metrics,
            xds: XdsEndpoint {
                host: options.xds_host,
                port: options.xds_port,
            },
        }
    }
}
