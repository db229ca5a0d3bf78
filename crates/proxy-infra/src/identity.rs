//! The proxy identity: the caller-owned descriptor of one logical proxy fleet.
use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

use crate::naming::{OWNING_GATEWAY_NAME_LABEL, OWNING_GATEWAY_NAMESPACE_LABEL};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("proxy identity must have a non-empty {field}"))]
    EmptyField { field: &'static str },

    #[snafu(display("proxy identity is missing the owning gateway label {label:?}"))]
    MissingOwningLabel { label: &'static str },

    #[snafu(display("listener port name {name:?} is used more than once"))]
    DuplicateListenerPort { name: String },

    #[snafu(display("listener ports must have a non-empty name"))]
    EmptyListenerPortName,

    #[snafu(display(
        "listener port {name:?} has container port {port}, which is outside of 1..=65535"
    ))]
    ListenerPortOutOfRange { name: String, port: i32 },
}

/// Transport protocol of a [`ListenerPort`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// A named port the proxy process binds to.
#[derive(Clone, Debug, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPort {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub container_port: i32,
}

impl ListenerPort {
    pub fn new(name: impl Into<String>, protocol: Protocol, container_port: i32) -> Self {
        Self {
            name: name.into(),
            protocol,
            container_port,
        }
    }
}

/// Stable identification of one proxy fleet.
///
/// The `labels` must contain the owning gateway namespace and name labels, every rendered resource derives its
/// name and label set from this struct through [`ResourceNames`](crate::naming::ResourceNames).
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyIdentity {
    pub name: String,
    pub namespace: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Propagated to the Service and HorizontalPodAutoscaler.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub listeners: Vec<ListenerPort>,
}

impl ProxyIdentity {
    /// Creates an identity owned by the gateway `gateway_namespace/gateway_name`.
    pub fn for_gateway(
        name: impl Into<String>,
        namespace: impl Into<String>,
        gateway_namespace: impl Into<String>,
        gateway_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::from([
                (
                    OWNING_GATEWAY_NAMESPACE_LABEL.to_owned(),
                    gateway_namespace.into(),
                ),
                (OWNING_GATEWAY_NAME_LABEL.to_owned(), gateway_name.into()),
            ]),
            ..Self::default()
        }
    }

    pub fn with_listener(mut self, port: ListenerPort) -> Self {
        self.listeners.push(port);
        self
    }

    /// Checks the structural requirements every renderer relies on.
    ///
    /// Label syntax is checked separately when the label set is built, see
    /// [`ResourceNames::new`](crate::naming::ResourceNames::new).
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), EmptyFieldSnafu { field: "name" });
        ensure!(
            !self.namespace.is_empty(),
            EmptyFieldSnafu { field: "namespace" }
        );

        for label in [OWNING_GATEWAY_NAMESPACE_LABEL, OWNING_GATEWAY_NAME_LABEL] {
            ensure!(
                self.labels.contains_key(label),
                MissingOwningLabelSnafu { label }
            );
        }

        let mut seen = BTreeSet::new();
        for port in &self.listeners {
            ensure!(!port.name.is_empty(), EmptyListenerPortNameSnafu);
            ensure!(
                (1..=65535).contains(&port.container_port),
                ListenerPortOutOfRangeSnafu {
                    name: port.name.clone(),
                    port: port.container_port,
                }
            );
            ensure!(
                seen.insert(port.name.as_str()),
                DuplicateListenerPortSnafu {
                    name: port.name.clone()
                }
            );
        }

        Ok(())
    }
}
