//! The generated default bootstrap configuration and the SDS files it refers to.
//!
//! All file locations are derived from the constants below, the Deployment renderer mounts the ConfigMap
//! using the very same constants.
use const_format::concatcp;
use indoc::formatdoc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Key of the bootstrap configuration in the ConfigMap.
pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.yaml";
pub const BOOTSTRAP_MOUNT_PATH: &str = "/etc/envoy";
pub const BOOTSTRAP_CONFIG_PATH: &str = concatcp!(BOOTSTRAP_MOUNT_PATH, "/", BOOTSTRAP_FILE_NAME);

pub const SDS_MOUNT_PATH: &str = "/sds";
pub const XDS_TRUSTED_CA_FILE_NAME: &str = "xds-trusted-ca.json";
pub const XDS_CERTIFICATE_FILE_NAME: &str = "xds-certificate.json";
pub const XDS_TRUSTED_CA_PATH: &str = concatcp!(SDS_MOUNT_PATH, "/", XDS_TRUSTED_CA_FILE_NAME);
pub const XDS_CERTIFICATE_PATH: &str = concatcp!(SDS_MOUNT_PATH, "/", XDS_CERTIFICATE_FILE_NAME);

/// Where the client certificate of the proxy is mounted.
pub const CERTS_MOUNT_PATH: &str = "/certs";
pub const CERTS_SECRET_NAME: &str = "envoy";
const CA_CERT_PATH: &str = concatcp!(CERTS_MOUNT_PATH, "/ca.crt");
const TLS_CERT_PATH: &str = concatcp!(CERTS_MOUNT_PATH, "/tls.crt");
const TLS_KEY_PATH: &str = concatcp!(CERTS_MOUNT_PATH, "/tls.key");

pub const ADMIN_ADDRESS: &str = "127.0.0.1";
pub const ADMIN_PORT: u16 = 19000;
pub const READINESS_PORT: u16 = 19001;
pub const READINESS_PATH: &str = "/ready";
pub const PROMETHEUS_PATH: &str = "/stats/prometheus";

const XDS_SERVER_SAN: &str = "envoy-gateway";
const SDS_SECRET_TYPE: &str = "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Address of the xDS control plane the proxies connect to.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XdsEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for XdsEndpoint {
    fn default() -> Self {
        Self {
            host: "envoy-gateway.envoy-gateway-system.svc.cluster.local".to_owned(),
            port: 18000,
        }
    }
}

/// Generates the bootstrap configuration used when no layer supplies one.
///
/// The proxy exposes its admin interface on loopback only. The readiness listener answers `/ready` and, if
/// `metrics_enabled` is set, proxies `/stats/prometheus` to the admin interface. Everything else is fetched
/// from `xds` over an mTLS-secured ADS stream.
pub fn default_bootstrap(xds: &XdsEndpoint, metrics_enabled: bool) -> String {
    let (virtual_hosts, stats_cluster) = if metrics_enabled {
        (
            indented(&prometheus_virtual_host(), 12),
            indented(&prometheus_cluster(), 2),
        )
    } else {
        ("            virtual_hosts: []".to_owned(), String::new())
    };

    let XdsEndpoint {
        host: xds_host,
        port: xds_port,
    } = xds;

    let bootstrap = formatdoc! {r#"
        admin:
          access_log:
          - name: envoy.access_loggers.file
            typed_config:
              "@type": type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog
              path: /dev/null
          address:
            socket_address:
              address: {ADMIN_ADDRESS}
              port_value: {ADMIN_PORT}
        layered_runtime:
          layers:
          - name: global_config
            static_layer:
              envoy.restart_features.use_eds_cache_for_ads: true
              re2.max_program_size.error_level: 4294967295
              re2.max_program_size.warn_level: 1000
        dynamic_resources:
          ads_config:
            api_type: DELTA_GRPC
            transport_api_version: V3
            grpc_services:
            - envoy_grpc:
                cluster_name: xds_cluster
            set_node_on_first_message_only: true
          lds_config:
            ads: {{}}
            resource_api_version: V3
          cds_config:
            ads: {{}}
            resource_api_version: V3
        static_resources:
          listeners:
          - name: envoy-gateway-proxy-ready-0.0.0.0-{READINESS_PORT}
            address:
              socket_address:
                address: 0.0.0.0
                port_value: {READINESS_PORT}
                protocol: TCP
            filter_chains:
            - filters:
              - name: envoy.filters.network.http_connection_manager
                typed_config:
                  "@type": type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager
                  stat_prefix: eg-ready-http
                  route_config:
                    name: local_route
        {virtual_hosts}
                  http_filters:
                  - name: envoy.filters.http.health_check
                    typed_config:
                      "@type": type.googleapis.com/envoy.extensions.filters.http.health_check.v3.HealthCheck
                      pass_through_mode: false
                      headers:
                      - name: ":path"
                        string_match:
                          exact: {READINESS_PATH}
                  - name: envoy.filters.http.router
                    typed_config:
                      "@type": type.googleapis.com/envoy.extensions.filters.http.router.v3.Router
          clusters:
        {stats_cluster}
          - name: xds_cluster
            connect_timeout: 10s
            type: STRICT_DNS
            lb_policy: ROUND_ROBIN
            load_assignment:
              cluster_name: xds_cluster
              endpoints:
              - lb_endpoints:
                - endpoint:
                    address:
                      socket_address:
                        address: {xds_host}
                        port_value: {xds_port}
            typed_extension_protocol_options:
              envoy.extensions.upstreams.http.v3.HttpProtocolOptions:
                "@type": type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions
                explicit_http_config:
                  http2_protocol_options:
                    connection_keepalive:
                      interval: 30s
                      timeout: 5s
            transport_socket:
              name: envoy.transport_sockets.tls
              typed_config:
                "@type": type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext
                common_tls_context:
                  tls_params:
                    tls_maximum_protocol_version: TLSv1_3
                  tls_certificate_sds_secret_configs:
                  - name: xds_certificate
                    sds_config:
                      path_config_source:
                        path: {XDS_CERTIFICATE_PATH}
                      resource_api_version: V3
                  validation_context_sds_secret_config:
                    name: xds_trusted_ca
                    sds_config:
                      path_config_source:
                        path: {XDS_TRUSTED_CA_PATH}
                      resource_api_version: V3
    "#};

    // Drop the blank line left behind by an empty stats cluster
    bootstrap
        .lines()
        .filter(|line| !line.trim().is_empty())
        .fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
}

/// The SDS resource with the CA that signed the control plane certificate.
pub fn xds_trusted_ca() -> String {
    let secret = json!({
        "resources": [{
            "@type": SDS_SECRET_TYPE,
            "name": "xds_trusted_ca",
            "validation_context": {
                "trusted_ca": { "filename": CA_CERT_PATH },
                "match_typed_subject_alt_names": [{
                    "san_type": "DNS",
                    "matcher": { "exact": XDS_SERVER_SAN },
                }],
            },
        }],
    });
    format!("{secret:#}")
}

/// The SDS resource with the client certificate of the proxy.
pub fn xds_certificate() -> String {
    let secret = json!({
        "resources": [{
            "@type": SDS_SECRET_TYPE,
            "name": "xds_certificate",
            "tls_certificate": {
                "certificate_chain": { "filename": TLS_CERT_PATH },
                "private_key": { "filename": TLS_KEY_PATH },
            },
        }],
    });
    format!("{secret:#}")
}

fn prometheus_virtual_host() -> String {
    formatdoc! {r#"
        virtual_hosts:
        - name: prometheus_stats
          domains:
          - "*"
          routes:
          - match:
              prefix: {PROMETHEUS_PATH}
            route:
              cluster: prometheus_stats
    "#}
}

fn prometheus_cluster() -> String {
    formatdoc! {"
        - name: prometheus_stats
          connect_timeout: 0.250s
          type: STATIC
          lb_policy: ROUND_ROBIN
          load_assignment:
            cluster_name: prometheus_stats
            endpoints:
            - lb_endpoints:
              - endpoint:
                  address:
                    socket_address:
                      address: {ADMIN_ADDRESS}
                      port_value: {ADMIN_PORT}
    "}
}

fn indented(block: &str, width: usize) -> String {
    block
        .lines()
        .map(|line| format!("{:width$}{line}", ""))
        .collect::<Vec<_>>()
        .join("\n")
}
