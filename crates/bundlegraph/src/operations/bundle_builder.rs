use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{
    AssetRef, AssetType, BuildTargetGroup, BundleGraphError, BundleOptions, configuration_error,
    runtime_error,
};
use async_trait::async_trait;
use bundlegraph_cache::Fingerprinter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const BUNDLE_MAGIC: &[u8] = b"BGBUNDLE1\n";
pub const MANIFEST_EXTENSION: &str = "manifest";

/// Sidecar written next to every built bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle_name: String,
    pub variant: Option<String>,
    pub target: BuildTargetGroup,
    pub content_hash: String,
    pub options: Vec<String>,
    pub assets: Vec<String>,
}

/// Packages each incoming group (keyed by bundle name) into one archive under
/// the target's bundle cache folder.
#[derive(Debug, Default)]
pub struct BundleBuilderOperation;

impl BundleBuilderOperation {
    fn options(request: &OperationRequest<'_>) -> Result<BundleOptions, BundleGraphError> {
        let options = request
            .node
            .settings
            .bundle_options
            .resolve(request.target);
        if options.contains(BundleOptions::DISABLE_WRITE_TYPE_TREE)
            && options.contains(BundleOptions::IGNORE_TYPE_TREE_CHANGES)
        {
            return Err(configuration_error(
                request.node,
                "disable_write_type_tree and ignore_type_tree_changes cannot both be set",
            ));
        }
        Ok(options)
    }
}

#[async_trait]
impl NodeOperation for BundleBuilderOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::options(request)?;
        Ok(NodeOutput::declared(request.node))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let options = Self::options(request)?;
        let force = options.contains(BundleOptions::FORCE_REBUILD) || !request.cache_hints.cache_enabled;
        let env = request.env;
        let node = request.node;
        let cache_dir = env.layout.bundle_cache_dir(request.target);
        let point_id = node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();

        for (bundle_key, assets) in request.inputs {
            let mut entries = Vec::with_capacity(assets.len());
            for asset in assets {
                match env.fs.read(asset.materialized_path()).await {
                    Ok(contents) => entries.push((asset.match_path(), contents)),
                    Err(error) => output.record_failure(asset.match_path(), error.to_string()),
                }
            }
            entries.sort_by(|left, right| left.0.cmp(&right.0));

            let content_hash = bundle_hash(request.target, bundle_key, options, &entries);
            let file_name = if options.contains(BundleOptions::APPEND_HASH) {
                format!("{bundle_key}_{}", &content_hash[..16])
            } else {
                bundle_key.clone()
            };
            let bundle_path = cache_dir.join(&file_name);
            let manifest_path = cache_dir.join(format!("{file_name}.{MANIFEST_EXTENSION}"));

            let up_to_date = !force
                && env.fs.is_file(&bundle_path).await
                && read_manifest(request, &manifest_path)
                    .await
                    .is_some_and(|manifest| manifest.content_hash == content_hash);

            if up_to_date {
                debug!(node_id = %node.id, bundle = %bundle_key, "bundle unchanged");
            } else {
                let (bundle_name, variant) = split_variant(bundle_key, assets);
                let manifest = BundleManifest {
                    bundle_name,
                    variant,
                    target: request.target,
                    content_hash: content_hash.clone(),
                    options: options.names().into_iter().map(str::to_string).collect(),
                    assets: entries.iter().map(|(path, _)| path.clone()).collect(),
                };
                let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|error| {
                    runtime_error(node, format!("manifest serialization failed: {error}"))
                })?;

                env.fs
                    .write_if_changed(&bundle_path, &encode_archive(&entries))
                    .await
                    .map_err(|error| runtime_error(node, error.to_string()))?;
                env.fs
                    .write_if_changed(&manifest_path, &manifest_bytes)
                    .await
                    .map_err(|error| runtime_error(node, error.to_string()))?;
                info!(
                    node_id = %node.id,
                    bundle = %bundle_key,
                    assets = entries.len(),
                    "bundle built"
                );
            }

            let derived = |path: &Path, asset_type: AssetType| {
                let relative = env
                    .layout
                    .relative(path)
                    .unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"));
                AssetRef::derived(path, relative, asset_type)
            };
            output.emit(&point_id, bundle_key, derived(&bundle_path, AssetType::AssetBundle));
            output.emit(&point_id, bundle_key, derived(&manifest_path, AssetType::BundleManifest));
        }

        Ok(output)
    }
}

fn bundle_hash(
    target: BuildTargetGroup,
    bundle_key: &str,
    options: BundleOptions,
    entries: &[(String, Vec<u8>)],
) -> String {
    let mut hasher = Fingerprinter::new();
    hasher
        .str_part(target.as_str())
        .str_part(bundle_key)
        .part(&options.0.to_le_bytes());
    for (path, contents) in entries {
        hasher.str_part(path).part(contents);
    }
    hasher.finish()
}

async fn read_manifest(request: &OperationRequest<'_>, path: &Path) -> Option<BundleManifest> {
    let bytes = request.env.fs.read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Bundle name and variant of a group. The variant comes from the assets the
/// configurator routed to a variant output; dots in plain names stay put.
pub fn split_variant(bundle_key: &str, assets: &[AssetRef]) -> (String, Option<String>) {
    let Some(variant) = assets.iter().find_map(|asset| asset.bundle_variant.clone()) else {
        return (bundle_key.to_string(), None);
    };
    let name = bundle_key
        .strip_suffix(&format!(".{variant}"))
        .unwrap_or(bundle_key);
    (name.to_string(), Some(variant))
}

/// Magic header, then per entry: u32 path length, path, u64 content length,
/// content. Little endian.
pub fn encode_archive(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let capacity = BUNDLE_MAGIC.len()
        + entries
            .iter()
            .map(|(path, contents)| 12 + path.len() + contents.len())
            .sum::<usize>();
    let mut archive = Vec::with_capacity(capacity);
    archive.extend_from_slice(BUNDLE_MAGIC);
    for (path, contents) in entries {
        archive.extend_from_slice(&(path.len() as u32).to_le_bytes());
        archive.extend_from_slice(path.as_bytes());
        archive.extend_from_slice(&(contents.len() as u64).to_le_bytes());
        archive.extend_from_slice(contents);
    }
    archive
}

pub fn decode_archive(bytes: &[u8]) -> Option<Vec<(String, Vec<u8>)>> {
    let mut rest = bytes.strip_prefix(BUNDLE_MAGIC)?;
    let mut entries = Vec::new();
    while !rest.is_empty() {
        let (len, tail) = rest.split_first_chunk::<4>()?;
        let (path, tail) = tail.split_at_checked(u32::from_le_bytes(*len) as usize)?;
        let (len, tail) = tail.split_first_chunk::<8>()?;
        let (contents, tail) = tail.split_at_checked(usize::try_from(u64::from_le_bytes(*len)).ok()?)?;
        entries.push((String::from_utf8(path.to_vec()).ok()?, contents.to_vec()));
        rest = tail;
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetGroups;
    use crate::operations::CacheHints;
    use crate::operations::test_support::{env, request, seed};
    use crate::{MultiTarget, NodeKind, NodeSpec};
    use tempfile::TempDir;

    fn node(options: BundleOptions) -> NodeSpec {
        let mut node = NodeSpec::new("b", "Builder", NodeKind::BundleBuilder)
            .with_input("in")
            .with_output("out", "-");
        node.settings.bundle_options = MultiTarget::with_default(options);
        node
    }

    fn cached() -> CacheHints {
        CacheHints {
            cache_enabled: true,
            previous_outputs: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bundle_builder_setup_conflicting_type_tree_flags_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let inputs = AssetGroups::new();
        let hints = cached();
        let node = node(
            BundleOptions::DISABLE_WRITE_TYPE_TREE.with(BundleOptions::IGNORE_TYPE_TREE_CHANGES),
        );

        assert!(matches!(
            BundleBuilderOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await,
            Err(BundleGraphError::NodeConfiguration(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bundle_builder_run_expected_archive_and_manifest_under_target_folder() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let assets = seed(
            temp.path(),
            &[("Assets/hero/a.png", b"aa"), ("Assets/hero/b.png", b"bbb")],
        );
        let assets: Vec<AssetRef> = assets
            .iter()
            .map(|asset| asset.with_bundle_variant("hd"))
            .collect();
        let inputs = AssetGroups::from([("chars_hero.hd".to_string(), assets)]);
        let hints = cached();
        let node = node(BundleOptions::NONE);

        let output = BundleBuilderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");

        let built = &output.points["out"]["chars_hero.hd"];
        assert_eq!(built[0].asset_type, AssetType::AssetBundle);
        assert_eq!(
            built[0].relative_path(),
            Some("Assets/BundleGraph/Cache/BundleBuilder/Default/chars_hero.hd")
        );
        let archive = std::fs::read(&built[0].source_absolute_path).expect("bundle should exist");
        let entries = decode_archive(&archive).expect("archive should decode");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("Assets/hero/a.png".to_string(), b"aa".to_vec()));

        let manifest: BundleManifest = serde_json::from_slice(
            &std::fs::read(&built[1].source_absolute_path).expect("manifest should exist"),
        )
        .expect("manifest should parse");
        assert_eq!(manifest.bundle_name, "chars_hero");
        assert_eq!(manifest.variant.as_deref(), Some("hd"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bundle_builder_run_dotted_name_without_variant_expected_no_variant() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let assets = seed(temp.path(), &[("Assets/ui/atlas.png", b"px")]);
        let inputs = AssetGroups::from([("ui.atlas".to_string(), assets)]);
        let hints = cached();
        let node = node(BundleOptions::NONE);

        let output = BundleBuilderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");

        let built = &output.points["out"]["ui.atlas"];
        let manifest: BundleManifest = serde_json::from_slice(
            &std::fs::read(&built[1].source_absolute_path).expect("manifest should exist"),
        )
        .expect("manifest should parse");
        assert_eq!(manifest.bundle_name, "ui.atlas");
        assert_eq!(manifest.variant, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bundle_builder_run_twice_unchanged_expected_no_rewrite() {
        let temp = TempDir::new().expect("temp dir should create");
        let counting = crate::testing::CountingFileSystem::default();
        let env = crate::operations::OperationEnv {
            fs: std::sync::Arc::new(counting.clone()),
            ..env(temp.path())
        };
        let inputs = AssetGroups::from([(
            "shared".to_string(),
            seed(temp.path(), &[("Assets/a.txt", b"a")]),
        )]);
        let hints = cached();
        let node = node(BundleOptions::APPEND_HASH);

        BundleBuilderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("first run should succeed");
        counting.reset();
        let output = BundleBuilderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("second run should succeed");

        assert_eq!(counting.counts().total(), 0);
        let name = output.points["out"]["shared"][0]
            .relative_path()
            .expect("relative path");
        assert!(name.contains("/Default/shared_"));
    }

    #[test]
    fn decode_archive_truncated_expected_none() {
        let archive = encode_archive(&[("a".to_string(), b"abc".to_vec())]);
        assert!(decode_archive(&archive[..archive.len() - 1]).is_none());
        assert_eq!(decode_archive(BUNDLE_MAGIC), Some(Vec::new()));
    }
}
