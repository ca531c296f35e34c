//! 本地蓝图目录与资源加载
//!
//! 目录：walkdir 扫描 `catalog_dir` 下的 *.json，可选 `catalog.toml` 提供名称与别名。
//! 相似度：去掉虚词后取 normalized Levenshtein 与 Sørensen–Dice 的较大值（同时比对别名）。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blueprint::Blueprint;

/// 可被识别为显式资源引用的扩展名
pub const ASSET_EXTENSIONS: &[&str] = &["json", "schem", "schematic", "nbt", "litematic"];

const ALIAS_INDEX_FILE: &str = "catalog.toml";

const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "build", "make", "create", "construct", "me", "please", "for", "i", "want",
    "some", "us", "can", "you", "of",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Failed to read asset {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid blueprint in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unsupported asset format '.{extension}' for {path}")]
    UnsupportedFormat { path: String, extension: String },
}

/// 目录命中
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogMatch {
    pub name: String,
    pub path: PathBuf,
    pub score: f64,
}

/// 目录查找边界
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_best_match(&self, text: &str, threshold: f64) -> Option<CatalogMatch>;
}

/// 资源加载边界
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Blueprint, AssetError>;
}

/// 请求中恰好一个带资源扩展名的词时，视为显式资源引用
pub fn explicit_asset_reference(request: &str) -> Option<String> {
    let mut found = request
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';' | '(' | ')' | '`')))
        .filter(|t| {
            Path::new(t)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ASSET_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        });
    let first = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(first.to_string())
}

/// 小写、下划线与连字符转空格、去掉虚词
pub fn normalize_query(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !FILLER_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_query(a);
    let b = normalize_query(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    f64::max(
        strsim::normalized_levenshtein(&a, &b),
        strsim::sorensen_dice(&a, &b),
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AliasIndex {
    #[serde(default)]
    entry: Vec<AliasEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AliasEntry {
    file: String,
    name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    name: String,
    path: PathBuf,
    aliases: Vec<String>,
}

/// 本地目录（启动时扫描一次）
#[derive(Debug, Clone, Default)]
pub struct LocalCatalog {
    entries: Vec<CatalogEntry>,
}

impl LocalCatalog {
    /// 扫描目录；目录不存在时为空目录
    pub fn open(dir: &Path) -> Self {
        let mut entries: Vec<CatalogEntry> = Vec::new();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "Catalog directory not found, catalog is empty");
            return Self { entries };
        }

        for entry in walkdir::WalkDir::new(dir)
            .max_depth(5)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
                .unwrap_or_default();
            entries.push(CatalogEntry {
                name,
                path: path.to_path_buf(),
                aliases: Vec::new(),
            });
        }

        let index_path = dir.join(ALIAS_INDEX_FILE);
        if let Ok(text) = std::fs::read_to_string(&index_path) {
            match toml::from_str::<AliasIndex>(&text) {
                Ok(index) => {
                    for alias in index.entry {
                        let target = dir.join(&alias.file);
                        if let Some(entry) = entries.iter_mut().find(|e| e.path == target) {
                            if let Some(name) = alias.name {
                                entry.name = name;
                            }
                            entry.aliases = alias.aliases;
                        } else {
                            tracing::warn!(file = %alias.file, "Catalog alias refers to a missing blueprint");
                        }
                    }
                }
                Err(e) => tracing::warn!(path = %index_path.display(), "Invalid catalog index: {}", e),
            }
        }

        tracing::info!(dir = %dir.display(), entries = entries.len(), "Catalog loaded");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Catalog for LocalCatalog {
    async fn find_best_match(&self, text: &str, threshold: f64) -> Option<CatalogMatch> {
        let mut best: Option<CatalogMatch> = None;
        for entry in &self.entries {
            let score = std::iter::once(&entry.name)
                .chain(entry.aliases.iter())
                .map(|candidate| similarity(text, candidate))
                .fold(0.0, f64::max);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(CatalogMatch {
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    score,
                });
            }
        }
        let best = best.filter(|m| m.score >= threshold);
        if let Some(ref m) = best {
            tracing::debug!(name = %m.name, score = m.score, "Catalog match");
        }
        best
    }
}

/// 文件资源加载：JSON 蓝图；其它已知格式报不支持
#[derive(Debug, Clone, Default)]
pub struct FileAssetLoader {
    base_dir: Option<PathBuf>,
}

impl FileAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 相对路径在当前目录找不到时，再到 base_dir 下找
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() && !path.exists() {
            if let Some(base) = &self.base_dir {
                let candidate = base.join(path);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        path.to_path_buf()
    }
}

#[async_trait]
impl AssetLoader for FileAssetLoader {
    async fn load(&self, path: &Path) -> Result<Blueprint, AssetError> {
        let path = self.resolve(path);
        let display = path.display().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if extension != "json" {
            return Err(AssetError::UnsupportedFormat {
                path: display,
                extension,
            });
        }

        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound(display.clone())
            } else {
                AssetError::Io {
                    path: display.clone(),
                    message: e.to_string(),
                }
            }
        })?;
        let blueprint: Blueprint = serde_json::from_str(&text).map_err(|e| AssetError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?;
        if blueprint.palette.is_empty() {
            let rebuilt = Blueprint::new(blueprint.size, blueprint.operations);
            return Ok(rebuilt.with_build_type(blueprint.build_type));
        }
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_blueprint(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let bp = json!({
            "size": {"width": 5, "height": 4, "depth": 5},
            "operations": [{"type": "hollow_box", "from": [0, 0, 0], "to": [4, 3, 4], "block": "oak_planks"}],
            "build_type": "house"
        });
        std::fs::write(&path, bp.to_string()).unwrap();
        path
    }

    #[test]
    fn test_explicit_asset_needs_exactly_one_reference() {
        assert_eq!(
            explicit_asset_reference("load \"builds/tower.json\" here"),
            Some("builds/tower.json".to_string())
        );
        assert_eq!(explicit_asset_reference("paste castle.SCHEM"), Some("castle.SCHEM".to_string()));
        assert_eq!(explicit_asset_reference("a.json and b.json"), None);
        assert_eq!(explicit_asset_reference("build a json-style house"), None);
    }

    #[test]
    fn test_similarity_ignores_filler_and_separators() {
        assert_eq!(similarity("build me a medieval cottage", "medieval_cottage"), 1.0);
        assert!(similarity("giant glass pyramid", "medieval cottage") < 0.6);
    }

    #[tokio::test]
    async fn test_catalog_matches_name_and_alias() {
        let dir = tempfile::tempdir().unwrap();
        write_blueprint(dir.path(), "medieval_cottage.json");
        write_blueprint(dir.path(), "watch_tower.json");
        std::fs::write(
            dir.path().join("catalog.toml"),
            "[[entry]]\nfile = \"watch_tower.json\"\naliases = [\"lookout post\"]\n",
        )
        .unwrap();

        let catalog = LocalCatalog::open(dir.path());
        assert_eq!(catalog.len(), 2);

        let m = catalog.find_best_match("a medieval cottage", 0.6).await.unwrap();
        assert_eq!(m.name, "medieval cottage");
        let m = catalog.find_best_match("build a lookout post", 0.6).await.unwrap();
        assert!(m.path.ends_with("watch_tower.json"));
        assert!(catalog.find_best_match("underwater glass dome", 0.6).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_catalog_dir_is_empty() {
        let catalog = LocalCatalog::open(Path::new("/nonexistent/catalog"));
        assert!(catalog.is_empty());
        assert!(catalog.find_best_match("anything", 0.0).await.is_none());
    }

    #[tokio::test]
    async fn test_loader_reads_json_and_rebuilds_palette() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blueprint(dir.path(), "hut.json");
        let bp = FileAssetLoader::new().load(&path).await.unwrap();
        assert_eq!(bp.palette, vec!["oak_planks".to_string()]);
        assert_eq!(bp.build_type, "house");
    }

    #[tokio::test]
    async fn test_loader_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileAssetLoader::new().with_base_dir(dir.path());

        let err = loader.load(Path::new("missing.json")).await.unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));

        let err = loader.load(Path::new("castle.litematic")).await.unwrap_err();
        assert!(matches!(err, AssetError::UnsupportedFormat { .. }));

        std::fs::write(dir.path().join("broken.json"), "{\"size\": 3}").unwrap();
        let err = loader.load(Path::new("broken.json")).await.unwrap_err();
        assert!(matches!(err, AssetError::Parse { .. }));
    }
}
