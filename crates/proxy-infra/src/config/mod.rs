//! Layered proxy configuration.
//!
//! A proxy is configured by a stack of override layers (see [`overrides`]), ordered from the lowest to the
//! highest precedence. The [`DefaultPolicy`](defaults::DefaultPolicy) supplies the implicit bottom layer. The
//! layers are combined using [`Merge`](merge::Merge), where each field class has its own rule:
//!
//! - Plain values are replaced by the highest layer that sets them.
//! - Maps (environment, annotations, labels, log levels) are replaced as a whole, they are never unioned.
//! - [`AppendList`](merge::AppendList)s (volumes, volume mounts, init containers) accumulate across layers.
//!
//! The merged result still has optional fields everywhere. [`MergedSettings::validate`](validated::MergedSettings::validate)
//! turns it into the fully defaulted settings the renderers work with, or reports the offending field.
pub mod defaults;
pub mod merge;
pub mod overrides;
pub mod validated;
