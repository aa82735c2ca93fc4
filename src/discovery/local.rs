//! Local model cache scanning
//!
//! Blocking filesystem walk; callers run it under `spawn_blocking`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::discovery::roles::infer_roles;
use crate::system::platform::Platform;
use crate::types::{Backend, DiscoveredModel};

/// Layout of a cache directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// `models--{org}--{name}` directories
    HubCache,
    /// `{org}/{name}` directories
    LmStudio,
    /// Ollama model store with `manifests/` and `blobs/`
    Ollama,
}

/// A directory to scan for installed models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRoot {
    pub kind: CacheKind,
    pub path: PathBuf,
}

impl CacheRoot {
    pub fn new(kind: CacheKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

const OLLAMA_REGISTRY: &str = "registry.ollama.ai";

/// `models--{org}--{name}`, or `models--{name}` for repos without an org
static HUB_DIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^models--(?:(.+?)--)?(.+)$").expect("valid hub cache pattern")
});

/// Default cache locations under the user's home directory
pub fn well_known_roots() -> Vec<CacheRoot> {
    let Some(dirs) = directories::BaseDirs::new() else {
        tracing::warn!("No home directory, skipping local model scan");
        return Vec::new();
    };
    let home = dirs.home_dir();

    vec![
        CacheRoot::new(CacheKind::HubCache, home.join(".cache/huggingface/hub")),
        CacheRoot::new(CacheKind::LmStudio, home.join(".lmstudio/models")),
        CacheRoot::new(CacheKind::LmStudio, home.join(".cache/lm-studio/models")),
        CacheRoot::new(CacheKind::Ollama, home.join(".ollama/models")),
    ]
}

/// Scan every root. Missing or unreadable roots contribute nothing; the first
/// occurrence of an id wins.
pub fn scan_roots(roots: &[CacheRoot], platform: &Platform) -> Vec<DiscoveredModel> {
    let mut seen = HashSet::new();
    let mut models = Vec::new();

    for root in roots {
        if !root.path.is_dir() {
            tracing::debug!("Cache root {:?} not present", root.path);
            continue;
        }

        let found = match root.kind {
            CacheKind::HubCache => scan_hub_cache(&root.path, platform),
            CacheKind::LmStudio => scan_lm_studio(&root.path, platform),
            CacheKind::Ollama => scan_ollama(&root.path),
        };

        match found {
            Ok(found) => {
                for model in found {
                    if seen.insert(model.id.clone()) {
                        models.push(model);
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to scan {:?}: {}", root.path, e),
        }
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    models
}

fn scan_hub_cache(root: &Path, platform: &Platform) -> io::Result<Vec<DiscoveredModel>> {
    let mut models = Vec::new();
    for entry in visible_dirs(root)? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(id) = hub_repo_id(&name) else {
            continue;
        };
        let path = entry.path();
        let size = dir_size(&path);
        let backend = infer_backend(&id, platform);
        models.push(installed_model(id, path, Some(size), backend));
    }
    Ok(models)
}

/// Repo id of a hub cache directory name
fn hub_repo_id(dir_name: &str) -> Option<String> {
    let caps = HUB_DIR_RE.captures(dir_name)?;
    let name = &caps[2];
    Some(match caps.get(1) {
        Some(org) => format!("{}/{}", org.as_str(), name),
        None => name.to_string(),
    })
}

fn scan_lm_studio(root: &Path, platform: &Platform) -> io::Result<Vec<DiscoveredModel>> {
    let mut models = Vec::new();
    for org in visible_dirs(root)? {
        let org_name = org.file_name().to_string_lossy().to_string();
        let model_dirs = match visible_dirs(&org.path()) {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::debug!("Skipping {:?}: {}", org.path(), e);
                continue;
            }
        };
        for model in model_dirs {
            let id = format!("{}/{}", org_name, model.file_name().to_string_lossy());
            let path = model.path();
            let size = dir_size(&path);
            let backend = infer_backend(&id, platform);
            models.push(installed_model(id, path, Some(size), backend));
        }
    }
    Ok(models)
}

#[derive(Debug, Deserialize)]
struct OllamaManifest {
    #[serde(default)]
    config: Option<OllamaLayer>,
    #[serde(default)]
    layers: Vec<OllamaLayer>,
}

#[derive(Debug, Deserialize)]
struct OllamaLayer {
    #[serde(default)]
    size: u64,
}

fn scan_ollama(root: &Path) -> io::Result<Vec<DiscoveredModel>> {
    let library = root.join("manifests").join(OLLAMA_REGISTRY).join("library");
    if !library.is_dir() {
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for name in visible_dirs(&library)? {
        let model_name = name.file_name().to_string_lossy().to_string();
        let tags = match fs::read_dir(name.path()) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::debug!("Skipping {:?}: {}", name.path(), e);
                continue;
            }
        };
        for tag in tags.flatten() {
            if !tag.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let id = format!("{}:{}", model_name, tag.file_name().to_string_lossy());
            let path = tag.path();
            let size = manifest_size(&path);
            models.push(installed_model(id, path, size, Backend::Ollama));
        }
    }
    Ok(models)
}

/// Sum of the config and layer sizes of an Ollama manifest
fn manifest_size(path: &Path) -> Option<u64> {
    let json = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<OllamaManifest>(&json) {
        Ok(manifest) => {
            let layers: u64 = manifest.layers.iter().map(|l| l.size).sum();
            Some(layers + manifest.config.map(|c| c.size).unwrap_or(0))
        }
        Err(e) => {
            tracing::debug!("Unreadable manifest {:?}: {}", path, e);
            None
        }
    }
}

/// Non-hidden subdirectories of `path`. Only failing to open `path` itself
/// is an error; unreadable entries are skipped.
fn visible_dirs(path: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping entry of {:?}: {}", path, e);
                continue;
            }
        };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry);
        }
    }
    Ok(dirs)
}

/// Total size of the regular files under `path`. Symlinks are not followed.
pub fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = fs::symlink_metadata(entry.path()) else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }
    total
}

/// Quantization hinted by a model name
pub fn infer_quantization(id: &str) -> Option<String> {
    let lowered = id.to_lowercase();
    let quant = if lowered.contains("4bit") || lowered.contains("q4") {
        "4bit"
    } else if lowered.contains("8bit") || lowered.contains("q8") {
        "8bit"
    } else if lowered.contains("fp16") {
        "fp16"
    } else {
        return None;
    };
    Some(quant.to_string())
}

/// Backend able to serve a locally cached model
pub fn infer_backend(id: &str, platform: &Platform) -> Backend {
    let lowered = id.to_lowercase();
    if lowered.contains("mlx") {
        Backend::Mlx
    } else if lowered.contains("gguf") {
        Backend::LlamaCpp
    } else {
        Backend::preferred_on(platform)
    }
}

/// Split `org/name` into author and display name
pub(crate) fn split_id(id: &str) -> (Option<String>, String) {
    match id.split_once('/') {
        Some((org, name)) if !org.is_empty() => (Some(org.to_string()), name.to_string()),
        _ => (None, id.to_string()),
    }
}

fn installed_model(
    id: String,
    path: PathBuf,
    size_bytes: Option<u64>,
    backend: Backend,
) -> DiscoveredModel {
    let (author, display_name) = split_id(&id);
    DiscoveredModel {
        display_name,
        author,
        downloads: None,
        size_bytes,
        quantization: infer_quantization(&id),
        backend,
        installed: true,
        install_path: Some(path),
        recommended_roles: infer_roles(&id),
        id,
    }
}
