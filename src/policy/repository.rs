//! Policy repository: a single scan of the policy root.
//!
//! Every recognised source file is read, checked by the rule evaluator, and
//! recorded with its domain (the first directory under the root). Loading is
//! all-or-nothing; listing never touches the filesystem.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::evaluator::RuleEvaluator;
use super::{PolicyError, PolicyModule};

/// File extension of policy sources.
pub const POLICY_EXTENSION: &str = "rego";

/// Immutable set of policy modules discovered under one root.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    modules: Vec<PolicyModule>,
}

impl Repository {
    /// Scan `root` recursively and load every policy source beneath it.
    ///
    /// Files are visited in lexical order per directory. Hidden entries
    /// (names starting with `.`) are skipped.
    ///
    /// # Errors
    ///
    /// Fails as a whole if the tree cannot be walked, any file cannot be
    /// read, or the evaluator rejects any module.
    pub fn load(root: &Path, evaluator: &dyn RuleEvaluator) -> Result<Self, PolicyError> {
        let mut modules = Vec::new();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_policy_source(path) {
                continue;
            }

            let relative_path = relative_slash_path(root, path);
            let raw_content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            evaluator
                .check(&relative_path, &raw_content)
                .map_err(|e| PolicyError::Parse {
                    path: relative_path.clone(),
                    message: e.to_string(),
                })?;

            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();

            debug!(module = %relative_path, "loaded policy module");
            modules.push(PolicyModule {
                name,
                domain: domain_of(&relative_path).to_owned(),
                description: extract_description(&raw_content),
                relative_path,
                raw_content,
            });
        }

        let repository = Self {
            root: root.to_path_buf(),
            modules,
        };
        info!(
            root = %root.display(),
            modules = repository.len(),
            domains = repository.domains().len(),
            "policy repository loaded"
        );
        Ok(repository)
    }

    /// Modules under `domain`, in discovery order.
    ///
    /// The empty domain lists every module. A domain that names nothing
    /// yields an empty list.
    pub fn list(&self, domain: &str) -> Vec<&PolicyModule> {
        self.modules
            .iter()
            .filter(|module| is_under_domain(&module.relative_path, domain))
            .collect()
    }

    /// Whether any module lives under `domain`.
    pub fn has_domain(&self, domain: &str) -> bool {
        self.modules
            .iter()
            .any(|module| is_under_domain(&module.relative_path, domain))
    }

    /// Distinct non-empty domains, sorted.
    pub fn domains(&self) -> BTreeSet<&str> {
        self.modules
            .iter()
            .map(|module| module.domain.as_str())
            .filter(|domain| !domain.is_empty())
            .collect()
    }

    /// Root directory the repository was loaded from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of loaded modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules were found.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Domain of a module given its `/`-separated relative path.
///
/// Root-level modules have the empty domain.
pub fn domain_of(relative_path: &str) -> &str {
    match relative_path.split_once('/') {
        Some((domain, _)) => domain,
        None => "",
    }
}

/// First line that starts with `# `, without the marker; empty if none.
pub fn extract_description(content: &str) -> String {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(|rest| rest.trim().to_owned())
        .unwrap_or_default()
}

/// Whether a path has the policy source extension.
pub fn is_policy_source(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(POLICY_EXTENSION)
}

/// Component-wise prefix test: is the module strictly below `domain`?
fn is_under_domain(relative_path: &str, domain: &str) -> bool {
    if domain.starts_with('/') {
        return false;
    }
    let wanted: Vec<&str> = domain
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if wanted.iter().any(|part| *part == "..") {
        return false;
    }

    let mut parts = relative_path.split('/');
    for expected in &wanted {
        if parts.next() != Some(*expected) {
            return false;
        }
    }
    // The module must sit inside the domain directory, not be named like it.
    parts.next().is_some()
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
