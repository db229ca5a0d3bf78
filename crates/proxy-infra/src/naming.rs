//! Names and labels shared by every rendered resource.
//!
//! All renderers obtain resource names, owner labels and selectors from [`ResourceNames`], which is derived once per
//! render from the [`ProxyIdentity`]. No renderer computes any of these on its own.
//!
//! See <https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/> for the label format.
use std::{collections::BTreeMap, sync::LazyLock};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu, ensure};

use crate::identity::{self, ProxyIdentity};

pub const OWNING_GATEWAY_NAMESPACE_LABEL: &str = "gateway.envoyproxy.io/owning-gateway-namespace";
pub const OWNING_GATEWAY_NAME_LABEL: &str = "gateway.envoyproxy.io/owning-gateway-name";

pub const K8S_APP_NAME_KEY: &str = "app.kubernetes.io/name";
pub const K8S_APP_COMPONENT_KEY: &str = "app.kubernetes.io/component";
pub const K8S_APP_MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";

pub const APP_NAME: &str = "envoy";
pub const APP_COMPONENT: &str = "proxy";
pub const MANAGED_BY: &str = "envoy-gateway";

/// Prefix of every rendered resource name.
pub const RESOURCE_NAME_PREFIX: &str = "envoy";

const RESOURCE_NAME_MAX_LEN: usize = 63;
const NAME_HASH_LEN: usize = 8;

const KEY_PREFIX_MAX_LEN: usize = 253;
const KEY_NAME_MAX_LEN: usize = 63;
const LABEL_VALUE_MAX_LEN: usize = 63;

// Lazily initialized regular expressions
static KEY_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z](\.?[a-zA-Z0-9-])*\.[a-zA-Z]{2,}\.?$")
        .expect("failed to compile key prefix regex")
});

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9A-Z]([a-z0-9A-Z-_.]*[a-z0-9A-Z]+)?$")
        .expect("failed to compile label name regex")
});

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("invalid proxy identity"))]
    InvalidIdentity { source: identity::Error },

    #[snafu(display("invalid label {key:?}={value:?}"))]
    InvalidLabel {
        source: LabelError,
        key: String,
        value: String,
    },
}

/// The error type for label key and value validation.
#[derive(Debug, PartialEq, Snafu)]
pub enum LabelError {
    #[snafu(display("label key cannot be empty"))]
    EmptyKey,

    #[snafu(display("label key prefixes cannot be nested, only use a single slash"))]
    NestedPrefix,

    #[snafu(display("label key prefix exceeds the maximum length - expected {KEY_PREFIX_MAX_LEN} characters or less, got {length}"))]
    PrefixTooLong { length: usize },

    #[snafu(display("label key prefix violates kubernetes format"))]
    PrefixInvalid,

    #[snafu(display("label key name exceeds the maximum length - expected {KEY_NAME_MAX_LEN} characters or less, got {length}"))]
    NameTooLong { length: usize },

    #[snafu(display("label key name violates kubernetes format"))]
    NameInvalid,

    #[snafu(display("label value exceeds the maximum length - expected {LABEL_VALUE_MAX_LEN} characters or less, got {length}"))]
    ValueTooLong { length: usize },

    #[snafu(display("label value violates kubernetes format"))]
    ValueInvalid,
}

/// Validates a label key of the form `(<PREFIX>/)<NAME>`.
pub fn validate_label_key(key: &str) -> Result<(), LabelError> {
    ensure!(!key.is_empty(), EmptyKeySnafu);

    let (prefix, name) = match key.split('/').collect::<Vec<_>>()[..] {
        [name] => (None, name),
        [prefix, name] => (Some(prefix), name),
        _ => return NestedPrefixSnafu.fail(),
    };

    if let Some(prefix) = prefix {
        ensure!(
            prefix.len() <= KEY_PREFIX_MAX_LEN,
            PrefixTooLongSnafu {
                length: prefix.len()
            }
        );
        ensure!(KEY_PREFIX_REGEX.is_match(prefix), PrefixInvalidSnafu);
    }

    ensure!(
        name.len() <= KEY_NAME_MAX_LEN,
        NameTooLongSnafu { length: name.len() }
    );
    ensure!(NAME_REGEX.is_match(name), NameInvalidSnafu);

    Ok(())
}

/// Validates a label value. Empty values are allowed.
pub fn validate_label_value(value: &str) -> Result<(), LabelError> {
    ensure!(
        value.len() <= LABEL_VALUE_MAX_LEN,
        ValueTooLongSnafu {
            length: value.len()
        }
    );
    ensure!(
        value.is_empty() || NAME_REGEX.is_match(value),
        ValueInvalidSnafu
    );
    Ok(())
}

/// Validates every key/value pair of `labels`, reporting the first offending pair.
pub fn validate_labels(labels: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in labels {
        validate_label_key(key)
            .and_then(|()| validate_label_value(value))
            .with_context(|_| InvalidLabelSnafu {
                key: key.clone(),
                value: value.clone(),
            })?;
    }
    Ok(())
}

/// Returns the name shared by all resources of the proxy called `name`.
///
/// The result has the form `envoy-<name>-<hash>`, where `<hash>` is the first eight hex digits of the SHA-256 of
/// the full `name`. The readable part is sanitized and truncated so that the result is a valid DNS label.
pub fn hashed_resource_name(name: &str) -> String {
    let hash = format!("{:x}", Sha256::digest(name.as_bytes()));
    let hash = &hash[..NAME_HASH_LEN];

    let max_readable_len = RESOURCE_NAME_MAX_LEN - RESOURCE_NAME_PREFIX.len() - NAME_HASH_LEN - 2;
    let readable: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(max_readable_len)
        .collect();
    let readable = readable.trim_matches('-');

    if readable.is_empty() {
        format!("{RESOURCE_NAME_PREFIX}-{hash}")
    } else {
        format!("{RESOURCE_NAME_PREFIX}-{readable}-{hash}")
    }
}

/// Names and labels derived from one [`ProxyIdentity`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
}

impl ResourceNames {
    /// Validates `identity` and derives the shared name and label set from it.
    pub fn new(identity: &ProxyIdentity) -> Result<Self> {
        identity.validate().context(InvalidIdentitySnafu)?;
        validate_labels(&identity.labels)?;

        let mut labels = identity.labels.clone();
        labels.extend([
            (K8S_APP_NAME_KEY.to_owned(), APP_NAME.to_owned()),
            (K8S_APP_COMPONENT_KEY.to_owned(), APP_COMPONENT.to_owned()),
            (K8S_APP_MANAGED_BY_KEY.to_owned(), MANAGED_BY.to_owned()),
        ]);

        Ok(Self {
            name: hashed_resource_name(&identity.name),
            namespace: identity.namespace.clone(),
            labels,
        })
    }

    /// The name of every rendered resource.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The owner labels put on the metadata of every rendered resource.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// The labels of the proxy pods, which double as the Deployment and Service selector.
    ///
    /// `extra` comes from the pod override. Entries colliding with the owner labels are ignored, so the
    /// selector always contains the full owner label set.
    pub fn pod_labels(&self, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut labels = extra.clone();
        labels.extend(
            self.labels
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        labels
    }

    /// A selector matching exactly `labels`.
    pub fn selector(labels: &BTreeMap<String, String>) -> LabelSelector {
        LabelSelector {
            match_labels: Some(labels.clone()),
            ..LabelSelector::default()
        }
    }
}
