use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// How a single attribute is reconciled when merging source into target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Copy the source value whenever it is non-null, overwriting the target.
    #[serde(rename = "source")]
    UseSource,
    /// Keep the target value.
    #[serde(rename = "target")]
    UseTarget,
    /// Leave the attribute out of the merge entirely.
    #[serde(rename = "skip")]
    Skip,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UseSource => "source",
            Self::UseTarget => "target",
            Self::Skip => "skip",
        }
    }
}

/// Error returned when a strategy string is not one of `source`, `target`, `skip`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge strategy: {0}")]
pub struct ParseStrategyError(pub String);

impl FromStr for MergeStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::UseSource),
            "target" => Ok(Self::UseTarget),
            "skip" => Ok(Self::Skip),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attribute merge policy.
///
/// Attributes without an entry follow the default additive policy: the
/// target keeps its value, and only null target attributes are filled in
/// from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeConfig {
    map: BTreeMap<String, MergeStrategy>,
}

impl MergeConfig {
    pub fn new(map: BTreeMap<String, MergeStrategy>) -> Self {
        Self { map }
    }

    /// Builds a config from `(attribute, strategy)` pairs.
    pub fn make<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, MergeStrategy)>,
        S: Into<String>,
    {
        Self {
            map: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Builds a config from `(attribute, "source" | "target" | "skip")` pairs.
    pub fn parse<I, K, V>(pairs: I) -> Result<Self, ParseStrategyError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| Ok((k.into(), v.as_ref().parse()?)))
            .collect::<Result<_, ParseStrategyError>>()?;
        Ok(Self { map })
    }

    pub fn map(&self) -> &BTreeMap<String, MergeStrategy> {
        &self.map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn strategy_for(&self, attribute: &str) -> Option<MergeStrategy> {
        self.map.get(attribute).copied()
    }

    pub fn should_merge_from_source(&self, attribute: &str) -> bool {
        self.strategy_for(attribute) == Some(MergeStrategy::UseSource)
    }

    pub fn should_keep_on_target(&self, attribute: &str) -> bool {
        self.strategy_for(attribute) == Some(MergeStrategy::UseTarget)
    }

    pub fn should_skip(&self, attribute: &str) -> bool {
        self.strategy_for(attribute) == Some(MergeStrategy::Skip)
    }
}
