//! Build target groups and per-group configuration values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BuildTargetGroup {
    Default,
    Standalone,
    #[serde(rename = "iOS")]
    Ios,
    Android,
    #[serde(rename = "WebGL")]
    WebGl,
    #[serde(rename = "tvOS")]
    Tvos,
    #[serde(rename = "PS4")]
    Ps4,
    XboxOne,
    Switch,
}

impl BuildTargetGroup {
    pub const ALL: [BuildTargetGroup; 9] = [
        Self::Default,
        Self::Standalone,
        Self::Ios,
        Self::Android,
        Self::WebGl,
        Self::Tvos,
        Self::Ps4,
        Self::XboxOne,
        Self::Switch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Standalone => "Standalone",
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::WebGl => "WebGL",
            Self::Tvos => "tvOS",
            Self::Ps4 => "PS4",
            Self::XboxOne => "XboxOne",
            Self::Switch => "Switch",
        }
    }

    pub fn is_default(self) -> bool {
        self == Self::Default
    }
}

impl fmt::Display for BuildTargetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildTargetGroup {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|group| group.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown build target group '{trimmed}'"))
    }
}

/// A value with an explicit default entry plus per-group overrides.
///
/// Reads of a group without an override fall back to the default entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiTarget<T> {
    values: BTreeMap<BuildTargetGroup, T>,
}

impl<T> Default for MultiTarget<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<T> MultiTarget<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(value: T) -> Self {
        let mut values = BTreeMap::new();
        values.insert(BuildTargetGroup::Default, value);
        Self { values }
    }

    pub fn get(&self, group: BuildTargetGroup) -> Option<&T> {
        self.values
            .get(&group)
            .or_else(|| self.values.get(&BuildTargetGroup::Default))
    }

    pub fn default_value(&self) -> Option<&T> {
        self.values.get(&BuildTargetGroup::Default)
    }

    pub fn set(&mut self, group: BuildTargetGroup, value: T) -> Option<T> {
        self.values.insert(group, value)
    }

    pub fn set_default(&mut self, value: T) -> Option<T> {
        self.set(BuildTargetGroup::Default, value)
    }

    pub fn remove(&mut self, group: BuildTargetGroup) -> Option<T> {
        self.values.remove(&group)
    }

    /// True only for an explicit entry; the default fallback does not count.
    pub fn contains(&self, group: BuildTargetGroup) -> bool {
        self.values.contains_key(&group)
    }

    pub fn overrides(&self) -> impl Iterator<Item = (BuildTargetGroup, &T)> + '_ {
        self.values
            .iter()
            .filter(|(group, _)| !group.is_default())
            .map(|(group, value)| (*group, value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Clone + Default> MultiTarget<T> {
    pub fn resolve(&self, group: BuildTargetGroup) -> T {
        self.get(group).cloned().unwrap_or_default()
    }
}

impl<T> FromIterator<(BuildTargetGroup, T)> for MultiTarget<T> {
    fn from_iter<I: IntoIterator<Item = (BuildTargetGroup, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_without_override_expected_default_fallback() {
        let value = MultiTarget::with_default("Textures".to_string());

        assert_eq!(
            value.get(BuildTargetGroup::Ios).map(String::as_str),
            Some("Textures")
        );
        assert!(!value.contains(BuildTargetGroup::Ios));
    }

    #[test]
    fn set_default_expected_overrides_preserved() {
        let mut value = MultiTarget::with_default(1);
        value.set(BuildTargetGroup::Android, 2);
        value.set_default(3);

        assert_eq!(value.get(BuildTargetGroup::Android), Some(&2));
        assert_eq!(value.get(BuildTargetGroup::Ios), Some(&3));
    }

    #[test]
    fn remove_override_expected_reads_fall_back_to_default() {
        let mut value = MultiTarget::with_default("a".to_string());
        value.set(BuildTargetGroup::WebGl, "b".to_string());
        value.remove(BuildTargetGroup::WebGl);

        assert_eq!(value.resolve(BuildTargetGroup::WebGl), "a");
    }

    #[test]
    fn resolve_empty_map_expected_type_default() {
        let value: MultiTarget<String> = MultiTarget::new();
        assert_eq!(value.resolve(BuildTargetGroup::Switch), "");
    }

    #[test]
    fn serde_map_form_expected_group_names_as_keys() {
        let value: MultiTarget<String> =
            serde_json::from_str(r#"{"Default":"x","iOS":"y"}"#).expect("map should parse");

        assert_eq!(value.resolve(BuildTargetGroup::Ios), "y");
        assert_eq!(value.resolve(BuildTargetGroup::Android), "x");
        assert_eq!(
            value.overrides().collect::<Vec<_>>(),
            vec![(BuildTargetGroup::Ios, &"y".to_string())]
        );
    }

    #[test]
    fn from_str_case_insensitive_expected_group() {
        assert_eq!("ios".parse::<BuildTargetGroup>(), Ok(BuildTargetGroup::Ios));
        assert!("Dreamcast".parse::<BuildTargetGroup>().is_err());
    }
}
