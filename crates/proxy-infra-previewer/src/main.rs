//! Renders the resources of a single proxy and prints them as a multi-document YAML stream.
//!
//! The render request is read from the given file, or from stdin if no file is given:
//!
//! ```yaml
//! identity:
//!   name: default/eg
//!   namespace: envoy-gateway-system
//!   labels:
//!     gateway.envoyproxy.io/owning-gateway-namespace: default
//!     gateway.envoyproxy.io/owning-gateway-name: eg
//!   listeners:
//!     - name: EnvoyHTTPPort
//!       containerPort: 8080
//! layers:
//!   - autoscaler:
//!       maxReplicas: 3
//! ```
use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

use clap::Parser;
use proxy_infra::{
    RenderedResources,
    cli::DefaultPolicyOptions,
    config::{defaults::DefaultPolicy, overrides::ProxyInfraOverride},
    identity::ProxyIdentity,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "PROXY_INFRA_LOG";
const DOCUMENT_SEPARATOR: &str = "---\n";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to open render request {path:?}"))]
    OpenRequest { source: io::Error, path: PathBuf },

    #[snafu(display("failed to read render request"))]
    ReadRequest { source: io::Error },

    #[snafu(display("failed to deserialize render request"))]
    DeserializeRequest { source: serde_yaml::Error },

    #[snafu(display("failed to render proxy resources"))]
    Render { source: proxy_infra::render::Error },

    #[snafu(display("failed to serialize {kind} to YAML"))]
    SerializeResource {
        source: serde_yaml::Error,
        kind: &'static str,
    },
}

/// Previews the Kubernetes resources rendered for one proxy
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    policy: DefaultPolicyOptions,

    /// Render request to read, stdin if omitted
    request: Option<PathBuf>,
}

/// A proxy identity and its override layers, lowest precedence first.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest {
    identity: ProxyIdentity,

    #[serde(default)]
    layers: Vec<ProxyInfraOverride>,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var(LOG_ENV_VAR)
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let request = match &cli.request {
        Some(path) => parse_request(File::open(path).context(OpenRequestSnafu { path })?)?,
        None => parse_request(io::stdin().lock())?,
    };

    let policy = DefaultPolicy::from(cli.policy);
    info!(proxy = %request.identity.name, layers = request.layers.len(), "rendering proxy");

    let resources =
        proxy_infra::render(&request.identity, &policy, &request.layers).context(RenderSnafu)?;
    print!("{}", to_yaml_stream(&resources)?);
    Ok(())
}

fn parse_request(mut reader: impl Read) -> Result<RenderRequest, Error> {
    let mut input = String::new();
    reader.read_to_string(&mut input).context(ReadRequestSnafu)?;
    serde_yaml::from_str(&input).context(DeserializeRequestSnafu)
}

/// Serializes every resource into its own YAML document, in the order they would be applied.
fn to_yaml_stream(resources: &RenderedResources) -> Result<String, Error> {
    let mut documents = vec![
        to_yaml(&resources.service_account, "ServiceAccount")?,
        to_yaml(&resources.config_map, "ConfigMap")?,
        to_yaml(&resources.deployment, "Deployment")?,
        to_yaml(&resources.service, "Service")?,
    ];
    if let Some(autoscaler) = &resources.autoscaler {
        documents.push(to_yaml(autoscaler, "HorizontalPodAutoscaler")?);
    }

    Ok(documents
        .into_iter()
        .map(|document| format!("{DOCUMENT_SEPARATOR}{document}"))
        .collect())
}

fn to_yaml(resource: &impl Serialize, kind: &'static str) -> Result<String, Error> {
    serde_yaml::to_string(resource).context(SerializeResourceSnafu { kind })
}
