use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Group label used when an operation emits a single ungrouped set.
pub const DEFAULT_GROUP_KEY: &str = "0";

/// Group label -> ordered assets.
pub type AssetGroups = BTreeMap<String, Vec<AssetRef>>;

/// Output point id -> asset groups emitted on that point.
pub type PointOutputs = BTreeMap<String, AssetGroups>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Texture,
    Model,
    Audio,
    Video,
    Material,
    Shader,
    Animation,
    AnimatorController,
    Prefab,
    Scene,
    Font,
    Text,
    ScriptableObject,
    AssetBundle,
    BundleManifest,
    Unknown,
}

impl AssetType {
    /// Classifies a path by its extension. Editor sidecar files (`.meta`)
    /// and unrecognized extensions are `Unknown`.
    pub fn from_path(path: &str) -> Self {
        let Some(extension) = Path::new(path)
            .extension()
            .and_then(|extension| extension.to_str())
        else {
            return Self::Unknown;
        };

        match extension.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "tga" | "psd" | "bmp" | "gif" | "tif" | "tiff" | "exr"
            | "hdr" => Self::Texture,
            "fbx" | "obj" | "dae" | "blend" | "3ds" | "max" => Self::Model,
            "wav" | "mp3" | "ogg" | "aif" | "aiff" | "flac" => Self::Audio,
            "mp4" | "mov" | "webm" => Self::Video,
            "mat" => Self::Material,
            "shader" | "cginc" | "hlsl" | "compute" => Self::Shader,
            "anim" => Self::Animation,
            "controller" => Self::AnimatorController,
            "prefab" => Self::Prefab,
            "unity" => Self::Scene,
            "ttf" | "otf" | "fontsettings" => Self::Font,
            "txt" | "json" | "xml" | "csv" | "bytes" | "yaml" | "md" | "html" => Self::Text,
            "asset" => Self::ScriptableObject,
            "manifest" => Self::BundleManifest,
            _ => Self::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Texture => "Texture",
            Self::Model => "Model",
            Self::Audio => "Audio",
            Self::Video => "Video",
            Self::Material => "Material",
            Self::Shader => "Shader",
            Self::Animation => "Animation",
            Self::AnimatorController => "AnimatorController",
            Self::Prefab => "Prefab",
            Self::Scene => "Scene",
            Self::Font => "Font",
            Self::Text => "Text",
            Self::ScriptableObject => "ScriptableObject",
            Self::AssetBundle => "AssetBundle",
            Self::BundleManifest => "BundleManifest",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        const NAMED: [AssetType; 16] = [
            AssetType::Texture,
            AssetType::Model,
            AssetType::Audio,
            AssetType::Video,
            AssetType::Material,
            AssetType::Shader,
            AssetType::Animation,
            AssetType::AnimatorController,
            AssetType::Prefab,
            AssetType::Scene,
            AssetType::Font,
            AssetType::Text,
            AssetType::ScriptableObject,
            AssetType::AssetBundle,
            AssetType::BundleManifest,
            AssetType::Unknown,
        ];
        let trimmed = value.trim();
        NAMED
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown asset type '{trimmed}'"))
    }
}

/// A file-backed asset and where it came from.
///
/// Values are never mutated once built; deriving a new artifact (an exported
/// copy, a built bundle) produces a new `AssetRef`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub source_absolute_path: PathBuf,
    #[serde(default)]
    pub imported_relative_path: Option<String>,
    #[serde(default)]
    pub export_absolute_path: Option<PathBuf>,
    pub asset_type: AssetType,
    /// Set by the bundle configurator on assets routed to a variant output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_variant: Option<String>,
}

impl AssetRef {
    pub fn from_loader(source_absolute_path: impl Into<PathBuf>, relative_path: impl Into<String>) -> Self {
        let relative_path = relative_path.into();
        Self {
            source_absolute_path: source_absolute_path.into(),
            asset_type: AssetType::from_path(&relative_path),
            imported_relative_path: Some(relative_path),
            export_absolute_path: None,
            bundle_variant: None,
        }
    }

    pub fn derived(
        source_absolute_path: impl Into<PathBuf>,
        relative_path: impl Into<String>,
        asset_type: AssetType,
    ) -> Self {
        Self {
            source_absolute_path: source_absolute_path.into(),
            imported_relative_path: Some(relative_path.into()),
            export_absolute_path: None,
            asset_type,
            bundle_variant: None,
        }
    }

    pub fn exported(&self, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_absolute_path: self.source_absolute_path.clone(),
            imported_relative_path: self.imported_relative_path.clone(),
            export_absolute_path: Some(destination.into()),
            asset_type: self.asset_type,
            bundle_variant: self.bundle_variant.clone(),
        }
    }

    pub fn with_bundle_variant(&self, variant: impl Into<String>) -> Self {
        Self {
            bundle_variant: Some(variant.into()),
            ..self.clone()
        }
    }

    /// Non-empty project-relative path, if the asset has one.
    pub fn relative_path(&self) -> Option<&str> {
        self.imported_relative_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
    }

    /// Path used for keyword and wildcard matching.
    pub fn match_path(&self) -> String {
        match self.relative_path() {
            Some(path) => path.to_string(),
            None => self.source_absolute_path.to_string_lossy().replace('\\', "/"),
        }
    }

    /// The file that backs the asset right now: the exported copy when
    /// present, the source file otherwise.
    pub fn materialized_path(&self) -> &Path {
        self.export_absolute_path
            .as_deref()
            .unwrap_or(&self.source_absolute_path)
    }
}

pub fn merge_groups(into: &mut AssetGroups, from: &AssetGroups) {
    for (group_key, assets) in from {
        into.entry(group_key.clone())
            .or_default()
            .extend(assets.iter().cloned());
    }
}

pub fn asset_types(groups: &AssetGroups) -> BTreeSet<AssetType> {
    groups
        .values()
        .flatten()
        .map(|asset| asset.asset_type)
        .collect()
}

pub fn asset_count(groups: &AssetGroups) -> usize {
    groups.values().map(Vec::len).sum()
}
