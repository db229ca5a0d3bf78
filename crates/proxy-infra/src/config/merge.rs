use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::DeploymentStrategy,
        autoscaling::v2::{HorizontalPodAutoscalerBehavior, MetricSpec},
        core::v1::{
            Affinity, Container, EnvVar, PodSecurityContext, ResourceRequirements,
            SecurityContext, Toleration, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::api::resource::Quantity,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A type that can be merged with itself
///
/// Every override layer implements this. Merging always happens in place on the *higher* precedence
/// layer, with the lower precedence layer (ultimately the [`DefaultPolicy`](super::defaults::DefaultPolicy)
/// baseline) passed by shared reference. Lower layers are never modified.
///
/// # Example
///
/// ```
/// # use proxy_infra::config::merge::Merge;
/// struct Foo {
///     bar: Option<u8>,
///     baz: Option<u8>,
/// }
///
/// impl Merge for Foo {
///     fn merge(&mut self, defaults: &Self) {
///         self.bar.merge(&defaults.bar);
///         self.baz.merge(&defaults.baz);
///     }
/// }
///
/// let mut config = Foo {
///     bar: Some(0),
///     baz: None,
/// };
/// config.merge(&Foo {
///     bar: Some(1),
///     baz: Some(2),
/// });
/// assert_eq!(config.bar, Some(0)); // Overridden by `bar: Some(0)` above
/// assert_eq!(config.baz, Some(2)); // Fallback is used
/// ```
pub trait Merge {
    /// Merge with `defaults`, preferring values from `self` if they are set there
    fn merge(&mut self, defaults: &Self);
}

/// Moving version of [`Merge::merge`], to produce slightly nicer test output
pub fn merge<T: Merge>(mut overrides: T, defaults: &T) -> T {
    overrides.merge(defaults);
    overrides
}

/// Folds `layers` (ordered from lowest to highest precedence) onto `baseline`.
///
/// The highest layer is cloned and every lower layer, ending with `baseline`, is merged into that clone.
/// Neither `baseline` nor any element of `layers` is modified.
pub fn merge_layers<T: Merge + Clone>(baseline: &T, layers: &[T]) -> T {
    let mut layers = layers.iter().rev();
    let Some(top) = layers.next() else {
        return baseline.clone();
    };

    let mut merged = top.clone();
    for layer in layers {
        merged.merge(layer);
    }
    merged.merge(baseline);
    merged
}

/// A marker trait for types that are merged atomically (as one single value) rather than
/// trying to merge each field individually
///
/// Maps are atomic as well. Supplying a map replaces the lower layer's map entirely.
pub trait Atomic: Clone {}
impl Atomic for u8 {}
impl Atomic for u16 {}
impl Atomic for u32 {}
impl Atomic for u64 {}
impl Atomic for i32 {}
impl Atomic for i64 {}
impl Atomic for bool {}
impl Atomic for String {}
impl Atomic for Quantity {}
impl Atomic for BTreeMap<String, String> {}
impl Atomic for Vec<EnvVar> {}
impl Atomic for Vec<Toleration> {}
impl Atomic for Vec<MetricSpec> {}
impl Atomic for Affinity {}
impl Atomic for DeploymentStrategy {}
impl Atomic for HorizontalPodAutoscalerBehavior {}
impl Atomic for PodSecurityContext {}
impl Atomic for ResourceRequirements {}
impl Atomic for SecurityContext {}

impl<T: Atomic> Merge for Option<T> {
    fn merge(&mut self, defaults: &Self) {
        if self.is_none() {
            self.clone_from(defaults);
        }
    }
}

/// A list whose entries accumulate across layers.
///
/// Merging appends the entries of `self` after the entries of the lower layer, preserving the order of both.
/// Entries are never deduplicated, colliding names are left for the API server to reject.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AppendList<T>(pub Vec<T>);

impl<T> Default for AppendList<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> AppendList<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<'a, T> IntoIterator for &'a AppendList<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<T> for AppendList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Marker for element types that may be accumulated in an [`AppendList`]
pub trait Appendable: Clone {}
impl Appendable for Container {}
impl Appendable for Volume {}
impl Appendable for VolumeMount {}

impl<T: Appendable> Merge for AppendList<T> {
    fn merge(&mut self, defaults: &Self) {
        if defaults.0.is_empty() {
            return;
        }

        let mut merged = Vec::with_capacity(defaults.0.len() + self.0.len());
        merged.extend(defaults.0.iter().cloned());
        merged.append(&mut self.0);
        self.0 = merged;
    }
}
