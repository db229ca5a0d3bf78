//! Log level settings of the proxy process.
use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Logging components of the proxy. [`LogComponent::Default`] applies to every component without its own entry.
#[derive(
    Clone,
    Copy,
    Debug,
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogComponent {
    Default,
    Upstream,
    Http,
    Connection,
    Admin,
    Client,
    Filter,
    Main,
    Router,
    Runtime,
}

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

/// Effective log levels of one proxy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProxyLogging {
    levels: BTreeMap<LogComponent, LogLevel>,
    fallback: LogLevel,
}

impl ProxyLogging {
    /// `fallback` is used for the default component when `levels` has no entry for it.
    pub fn new(levels: BTreeMap<LogComponent, LogLevel>, fallback: LogLevel) -> Self {
        Self { levels, fallback }
    }

    /// Level of the default component, which every component without an explicit level uses.
    pub fn default_level(&self) -> LogLevel {
        self.levels
            .get(&LogComponent::Default)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Level of `component`, falling back to [`Self::default_level`].
    pub fn level(&self, component: LogComponent) -> LogLevel {
        self.levels
            .get(&component)
            .copied()
            .unwrap_or_else(|| self.default_level())
    }

    /// The `component:level` list for every component with an explicit, non-default level, ordered by
    /// component name.
    ///
    /// Returns [`None`] if no component has its own level.
    pub fn component_levels(&self) -> Option<String> {
        let mut levels: Vec<_> = self
            .levels
            .iter()
            .filter(|(component, _)| **component != LogComponent::Default)
            .map(|(component, level)| (component.to_string(), level))
            .collect();
        levels.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

        let levels: Vec<_> = levels
            .into_iter()
            .map(|(component, level)| format!("{component}:{level}"))
            .collect();
        (!levels.is_empty()).then(|| levels.join(","))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn default_level_falls_back() {
        let logging = ProxyLogging::new(BTreeMap::new(), LogLevel::Warn);

        assert_eq!(logging.default_level(), LogLevel::Warn);
        assert_eq!(logging.level(LogComponent::Router), LogLevel::Warn);
        assert_eq!(logging.component_levels(), None);
    }

    #[test]
    fn component_levels_are_sorted() {
        let logging = ProxyLogging::new(
            BTreeMap::from([
                (LogComponent::Router, LogLevel::Debug),
                (LogComponent::Default, LogLevel::Error),
                (LogComponent::Filter, LogLevel::Info),
            ]),
            LogLevel::Warn,
        );

        assert_eq!(logging.default_level(), LogLevel::Error);
        assert_eq!(logging.level(LogComponent::Http), LogLevel::Error);
        assert_eq!(logging.level(LogComponent::Router), LogLevel::Debug);
        assert_eq!(
            logging.component_levels().as_deref(),
            Some("filter:info,router:debug")
        );
    }

    #[rstest]
    #[case::declaration_order_differs(
        &[(LogComponent::Upstream, LogLevel::Debug), (LogComponent::Filter, LogLevel::Info)],
        "filter:info,upstream:debug",
    )]
    #[case::all_named(
        &[
            (LogComponent::Runtime, LogLevel::Trace),
            (LogComponent::Admin, LogLevel::Error),
            (LogComponent::Http, LogLevel::Info),
            (LogComponent::Connection, LogLevel::Debug),
        ],
        "admin:error,connection:debug,http:info,runtime:trace",
    )]
    fn component_levels_ordered_by_name(
        #[case] levels: &[(LogComponent, LogLevel)],
        #[case] expected: &str,
    ) {
        let logging = ProxyLogging::new(levels.iter().copied().collect(), LogLevel::Warn);
        assert_eq!(logging.component_levels().as_deref(), Some(expected));
    }

    #[test]
    fn levels_from_yaml() {
        let levels: BTreeMap<LogComponent, LogLevel> =
            serde_yaml::from_str("{default: error, filter: info}").expect("levels must parse");

        assert_eq!(
            levels,
            BTreeMap::from([
                (LogComponent::Default, LogLevel::Error),
                (LogComponent::Filter, LogLevel::Info),
            ])
        );
    }
}
