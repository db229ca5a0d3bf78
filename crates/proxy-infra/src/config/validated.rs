//! Merged override layers are validated into the settings the renderers consume.
//!
//! Validation turns every "maybe set" field of a merged [`ProxyInfraOverride`] into a concrete value, failing with
//! the dotted path of the first offending field (`deployment.container.image`).
use std::{
    collections::BTreeMap,
    fmt::{Display, Write},
};

use k8s_openapi::api::{
    apps::v1::DeploymentStrategy,
    autoscaling::v2::{HorizontalPodAutoscalerBehavior, MetricSpec},
    core::v1::{
        Affinity, Container, EnvVar, PodSecurityContext, ResourceRequirements, SecurityContext,
        Toleration, Volume, VolumeMount,
    },
};
use snafu::Snafu;
use tracing::debug;

use super::merge::Atomic;
use crate::{
    bootstrap::default_bootstrap,
    config::{
        defaults::DefaultPolicy,
        overrides::{
            AutoscalerOverride, BootstrapType, ContainerOverride, DeploymentOverride, PodOverride,
            ProxyBootstrap, ProxyInfraOverride, ProxySettingsOverride, ServiceOverride,
            ServiceType,
        },
    },
    naming,
    proxy_logging::ProxyLogging,
    quantity::{ParseQuantityError, Quantity},
};

/// Contains context used for generating validation errors
///
/// Constructed internally in [`MergedSettings::validate`]
pub struct Validator<'a> {
    ident: Option<&'a dyn Display>,
    parent: Option<&'a Validator<'a>>,
}

impl Validator<'_> {
    fn root() -> Validator<'static> {
        Validator {
            ident: None,
            parent: None,
        }
    }

    /// Creates a `Validator` for a subfield of the current object
    pub fn field<'b>(&'b self, ident: &'b dyn Display) -> Validator<'b> {
        Validator {
            ident: Some(ident),
            parent: Some(self),
        }
    }

    /// Returns an error describing `problem` at the field the `Validator` refers to
    pub fn error(self, problem: ValidationProblem) -> ValidationError {
        let mut idents = Vec::new();
        let mut curr = Some(&self);
        while let Some(curr_some) = curr {
            if let Some(ident) = curr_some.ident {
                idents.push(ident.to_string());
            }
            curr = curr_some.parent;
        }
        ValidationError {
            path: FieldPath { idents },
            problem,
        }
    }

    /// Returns an error indicating that the `Validator` refers to a required field that is currently not provided
    pub fn error_required(self) -> ValidationError {
        self.error(ValidationProblem::FieldRequired)
    }
}

#[derive(Debug, PartialEq)]
struct FieldPath {
    idents: Vec<String>,
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, ident) in self.idents.iter().rev().enumerate() {
            if i > 0 {
                f.write_char('.')?;
            }
            f.write_str(ident)?;
        }
        Ok(())
    }
}

/// An error that occurred when validating merged settings.
///
/// It is constructed by calling one of the `error*` methods on [`Validator`].
#[derive(Debug, PartialEq, Snafu)]
#[snafu(display("failed to validate {path}"))]
pub struct ValidationError {
    path: FieldPath,
    #[snafu(source)]
    problem: ValidationProblem,
}

impl ValidationError {
    /// The dotted path of the offending field.
    pub fn path(&self) -> String {
        self.path.to_string()
    }

    pub fn problem(&self) -> &ValidationProblem {
        &self.problem
    }
}

/// A problem that was discovered during validation, with no additional context.
#[derive(Debug, PartialEq, Snafu)]
pub enum ValidationProblem {
    #[snafu(display("field is required"))]
    FieldRequired,

    #[snafu(display("field must not be empty"))]
    EmptyValue,

    #[snafu(display("{value:?} is not a valid quantity"))]
    InvalidQuantity {
        source: ParseQuantityError,
        value: String,
    },

    #[snafu(display("quantity {quantity} must not be negative"))]
    NegativeQuantity { quantity: Quantity },

    #[snafu(display("value must be positive, got {value}"))]
    NotPositive { value: i64 },

    #[snafu(display("value must not be negative, got {value}"))]
    Negative { value: i64 },

    #[snafu(display("invalid pod label"))]
    InvalidLabel { source: naming::Error },

    #[snafu(display("bootstrap mode {mode} is not supported, only {} is", BootstrapType::Replace))]
    UnsupportedBootstrapMode { mode: BootstrapType },

    #[snafu(display("maxReplicas ({max}) must not be less than minReplicas ({min})"))]
    AutoscalerBounds { min: i32, max: i32 },
}

/// A type that can be constructed by validating its merged override ("fragment") type.
pub trait FromFragment: Sized {
    /// The fragment type of `Self`.
    ///
    /// For [`Atomic`] types this is [`Option`](`Option<Self>`).
    type Fragment;

    /// Try to validate a [`Self::Fragment`] into `Self`.
    ///
    /// `validator` contains additional error reporting context, such as the path to the field from the root fragment.
    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError>;
}

impl<T: Atomic> FromFragment for T {
    type Fragment = Option<T>;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        fragment.ok_or_else(|| validator.error_required())
    }
}

/// Everything the renderers need, with every default applied.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedSettings {
    pub deployment: DeploymentSettings,
    pub service: ServiceSettings,
    pub autoscaler: Option<AutoscalerSettings>,
    pub proxy: ProxySettings,
}

impl MergedSettings {
    /// Validates `merged`, the result of [`DefaultPolicy::merge`].
    ///
    /// `policy` supplies what is not part of any layer, such as the control plane address of the generated
    /// bootstrap.
    pub fn validate(
        merged: ProxyInfraOverride,
        policy: &DefaultPolicy,
    ) -> Result<Self, ValidationError> {
        let ProxyInfraOverride {
            deployment,
            service,
            autoscaler,
            settings,
        } = merged;
        let validator = Validator::root();

        let settings = Self {
            deployment: DeploymentSettings::from_fragment(
                deployment,
                validator.field(&"deployment"),
            )?,
            service: ServiceSettings::from_fragment(service, validator.field(&"service"))?,
            autoscaler: autoscaler
                .map(|autoscaler| {
                    AutoscalerSettings::from_fragment(autoscaler, validator.field(&"autoscaler"))
                })
                .transpose()?,
            proxy: ProxySettings::from_fragment(settings, policy, &validator.field(&"settings"))?,
        };

        debug!(
            replicas = settings.deployment.replicas,
            autoscaled = settings.autoscaler.is_some(),
            "validated merged settings"
        );
        Ok(settings)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentSettings {
    pub replicas: i32,
    pub strategy: DeploymentStrategy,
    pub pod: PodSettings,
    pub container: ContainerSettings,
    pub init_containers: Vec<Container>,
}

impl FromFragment for DeploymentSettings {
    type Fragment = DeploymentOverride;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        let replicas = i32::from_fragment(fragment.replicas, validator.field(&"replicas"))?;
        if replicas < 0 {
            return Err(validator.field(&"replicas").error(ValidationProblem::Negative {
                value: replicas.into(),
            }));
        }

        Ok(Self {
            replicas,
            strategy: DeploymentStrategy::from_fragment(
                fragment.strategy,
                validator.field(&"strategy"),
            )?,
            pod: PodSettings::from_fragment(fragment.pod, validator.field(&"pod"))?,
            container: ContainerSettings::from_fragment(
                fragment.container,
                validator.field(&"container"),
            )?,
            init_containers: fragment.init_containers.into_inner(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodSettings {
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub security_context: Option<PodSecurityContext>,
    pub affinity: Option<Affinity>,
    pub tolerations: Vec<Toleration>,
    pub node_selector: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub host_network: bool,
}

impl FromFragment for PodSettings {
    type Fragment = PodOverride;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        let labels = fragment.labels.unwrap_or_default();
        // Pod labels end up in the selectors, so they have to be valid labels
        naming::validate_labels(&labels).map_err(|source| {
            validator
                .field(&"labels")
                .error(ValidationProblem::InvalidLabel { source })
        })?;

        Ok(Self {
            annotations: fragment.annotations.unwrap_or_default(),
            labels,
            security_context: fragment.security_context,
            affinity: fragment.affinity,
            tolerations: fragment.tolerations.unwrap_or_default(),
            node_selector: fragment.node_selector.unwrap_or_default(),
            volumes: fragment.volumes.into_inner(),
            host_network: fragment.host_network.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerSettings {
    pub image: String,
    pub resources: Option<ResourceRequirements>,
    pub security_context: Option<SecurityContext>,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
}

impl FromFragment for ContainerSettings {
    type Fragment = ContainerOverride;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        let image = String::from_fragment(fragment.image, validator.field(&"image"))?;
        if image.trim().is_empty() {
            return Err(validator
                .field(&"image")
                .error(ValidationProblem::EmptyValue));
        }

        if let Some(resources) = &fragment.resources {
            validate_quantities(resources, &validator.field(&"resources"))?;
        }

        Ok(Self {
            image,
            resources: fragment.resources,
            security_context: fragment.security_context,
            env: fragment.env.unwrap_or_default(),
            volume_mounts: fragment.volume_mounts.into_inner(),
        })
    }
}

fn validate_quantities(
    resources: &ResourceRequirements,
    validator: &Validator,
) -> Result<(), ValidationError> {
    for (kind, quantities) in [
        ("requests", &resources.requests),
        ("limits", &resources.limits),
    ] {
        let kind_validator = validator.field(&kind);
        for (resource, quantity) in quantities.iter().flatten() {
            let problem = match Quantity::try_from(quantity) {
                Ok(parsed) if parsed.is_negative() => {
                    ValidationProblem::NegativeQuantity { quantity: parsed }
                }
                Ok(_) => continue,
                Err(source) => ValidationProblem::InvalidQuantity {
                    source,
                    value: quantity.0.clone(),
                },
            };
            return Err(kind_validator.field(resource).error(problem));
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSettings {
    pub type_: ServiceType,
    pub annotations: BTreeMap<String, String>,
    pub load_balancer_class: Option<String>,
}

impl FromFragment for ServiceSettings {
    type Fragment = ServiceOverride;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            type_: ServiceType::from_fragment(fragment.type_, validator.field(&"type"))?,
            annotations: fragment.annotations.unwrap_or_default(),
            load_balancer_class: fragment.load_balancer_class,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutoscalerSettings {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metrics: Option<Vec<MetricSpec>>,
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

impl FromFragment for AutoscalerSettings {
    type Fragment = AutoscalerOverride;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: Validator,
    ) -> Result<Self, ValidationError> {
        let min_replicas =
            i32::from_fragment(fragment.min_replicas, validator.field(&"minReplicas"))?;
        let max_replicas =
            i32::from_fragment(fragment.max_replicas, validator.field(&"maxReplicas"))?;

        if min_replicas < 1 {
            return Err(validator
                .field(&"minReplicas")
                .error(ValidationProblem::NotPositive {
                    value: min_replicas.into(),
                }));
        }
        if max_replicas < min_replicas {
            return Err(validator
                .field(&"maxReplicas")
                .error(ValidationProblem::AutoscalerBounds {
                    min: min_replicas,
                    max: max_replicas,
                }));
        }

        Ok(Self {
            min_replicas,
            max_replicas,
            metrics: fragment.metrics,
            behavior: fragment.behavior,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProxySettings {
    /// The final bootstrap configuration text.
    pub bootstrap: String,
    pub logging: ProxyLogging,
    pub metrics_enabled: bool,
    pub concurrency: Option<i32>,
}

impl ProxySettings {
    fn from_fragment(
        fragment: ProxySettingsOverride,
        policy: &DefaultPolicy,
        validator: &Validator,
    ) -> Result<Self, ValidationError> {
        let metrics_enabled = bool::from_fragment(
            fragment.telemetry.metrics_enabled,
            validator.field(&"telemetry").field(&"metricsEnabled"),
        )?;

        if let Some(concurrency) = fragment.concurrency
            && concurrency < 1
        {
            return Err(validator
                .field(&"concurrency")
                .error(ValidationProblem::NotPositive {
                    value: concurrency.into(),
                }));
        }

        let bootstrap = match fragment.bootstrap {
            None => default_bootstrap(&policy.xds, metrics_enabled),
            Some(ProxyBootstrap {
                type_: BootstrapType::Replace,
                value,
            }) => {
                if value.trim().is_empty() {
                    let bootstrap = validator.field(&"bootstrap");
                    return Err(bootstrap
                        .field(&"value")
                        .error(ValidationProblem::EmptyValue));
                }
                value
            }
            Some(ProxyBootstrap {
                type_: mode @ BootstrapType::Merge,
                ..
            }) => {
                return Err(validator
                    .field(&"bootstrap")
                    .error(ValidationProblem::UnsupportedBootstrapMode { mode }));
            }
        };

        Ok(Self {
            bootstrap,
            logging: ProxyLogging::new(
                fragment.logging.level.unwrap_or_default(),
                policy.log_level,
            ),
            metrics_enabled,
            concurrency: fragment.concurrency,
        })
    }
}
