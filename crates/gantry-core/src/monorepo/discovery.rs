//! Workspace discovery from package.json manifests

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkspaceError};

use super::workspace::Workspace;

const MANIFEST: &str = "package.json";
const PNPM_WORKSPACE: &str = "pnpm-workspace.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    name: Option<String>,
    workspaces: Option<WorkspacesField>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    peer_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, serde_json::Value>,
}

impl PackageJson {
    fn dependency_names(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .chain(self.peer_dependencies.keys())
            .chain(self.optional_dependencies.keys())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkspacesField {
    Array(Vec<String>),
    Object { packages: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct PnpmWorkspace {
    packages: Option<Vec<String>>,
}

/// Discovers the workspaces of a JavaScript-style monorepo
pub struct WorkspaceDiscovery {
    root: PathBuf,
}

impl WorkspaceDiscovery {
    /// Create a discovery rooted at the repository root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover all workspaces, root first, members sorted by path
    pub fn discover(&self) -> Result<Vec<Workspace>> {
        let root_manifest = self.root.join(MANIFEST);
        if !root_manifest.exists() {
            return Err(WorkspaceError::RootManifestNotFound(self.root.clone()).into());
        }
        let root_pkg = read_manifest(&root_manifest)?;

        let patterns = self.member_patterns(&root_pkg)?;
        debug!(root = %self.root.display(), patterns = patterns.len(), "discovering workspaces");

        let (includes, excludes): (Vec<_>, Vec<_>) =
            patterns.iter().partition(|p| !p.starts_with('!'));
        let excludes = excludes
            .into_iter()
            .map(|p| compile_pattern(&p[1..]))
            .collect::<Result<Vec<_>>>()?;

        let mut manifests: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for pattern in includes {
            let full_pattern = self.root.join(pattern).to_string_lossy().to_string();
            let entries = glob(&full_pattern).map_err(|e| WorkspaceError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            for path in entries.flatten() {
                if !path.is_dir() || path == self.root {
                    continue;
                }
                let relative = path.strip_prefix(&self.root).unwrap_or(&path);
                if excludes.iter().any(|ex| ex.matches_path(relative)) {
                    debug!(path = %relative.display(), "excluded by negated pattern");
                    continue;
                }
                let manifest = path.join(MANIFEST);
                if manifest.exists() && seen.insert(manifest.clone()) {
                    manifests.push(manifest);
                }
            }
        }
        manifests.sort();

        // First pass: parse member manifests
        let mut members: Vec<(Workspace, PackageJson)> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        for manifest in &manifests {
            let pkg = read_manifest(manifest)?;
            let Some(name) = pkg.name.clone() else {
                warn!(manifest = %manifest.display(), "skipping package without a name");
                continue;
            };
            if !names.insert(name.clone()) {
                return Err(WorkspaceError::DuplicateName(name).into());
            }
            let dir = manifest.parent().unwrap_or(Path::new(".")).to_path_buf();
            let mut workspace = Workspace::new(name, dir);
            workspace.scripts = pkg.scripts.clone();
            members.push((workspace, pkg));
        }

        // Second pass: keep only dependencies on other workspaces
        let mut workspaces = Vec::with_capacity(members.len() + 1);
        let mut root = Workspace::root(self.root.clone());
        root.scripts = root_pkg.scripts;
        workspaces.push(root);

        for (mut workspace, pkg) in members {
            let mut deps: Vec<String> = pkg
                .dependency_names()
                .filter(|dep| names.contains(*dep) && **dep != workspace.name)
                .cloned()
                .collect();
            deps.sort();
            deps.dedup();
            workspace.dependencies = deps;
            workspaces.push(workspace);
        }

        info!(count = workspaces.len(), "discovered workspaces");
        Ok(workspaces)
    }

    /// Member glob patterns from package.json `workspaces` or pnpm-workspace.yaml
    fn member_patterns(&self, root_pkg: &PackageJson) -> Result<Vec<String>> {
        match &root_pkg.workspaces {
            Some(WorkspacesField::Array(patterns)) => return Ok(patterns.clone()),
            Some(WorkspacesField::Object { packages }) => return Ok(packages.clone()),
            None => {}
        }

        let pnpm = self.root.join(PNPM_WORKSPACE);
        if pnpm.exists() {
            let content = std::fs::read_to_string(&pnpm)?;
            let config: PnpmWorkspace =
                serde_yaml::from_str(&content).map_err(|e| WorkspaceError::ManifestParseError {
                    path: pnpm.clone(),
                    reason: e.to_string(),
                })?;
            return Ok(config.packages.unwrap_or_default());
        }

        debug!("no workspace patterns declared, treating repository as a single package");
        Ok(Vec::new())
    }
}

fn read_manifest(path: &Path) -> Result<PackageJson> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        WorkspaceError::ManifestParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| {
        WorkspaceError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
