// src/venv/resolver.rs

//! Dependency-aware environment construction
//!
//! Resolution happens in two phases. `load` walks the requested packages and
//! their dependencies into a `WorkingSet`: leaves go to `standard`, packages
//! with dependencies go to `dependent` after all of their dependencies have
//! been loaded. `flush` then merges every loaded declaration onto a target
//! simulator, standard packages first.

use super::VenvDeclaration;
use crate::bucket::normalize_name;
use crate::environment::Simulator;
use crate::error::{Error, Result};
use crate::local::LocalStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Depth beyond which a dependency chain is truncated into a leaf
pub const MAX_DEPTH: usize = 31;

/// Variable naming the managed root inside package expansions
pub const ROOT_VAR: &str = "HAUL_ROOT";

/// Variable naming the current package's install directory
pub const PKGROOT_VAR: &str = "HAUL_PKGROOT";

const INCLUDE_VAR: &str = "INCLUDE";
const LIB_VAR: &str = "LIB";

/// A package whose declaration has been loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPackage {
    pub name: String,
    pub declaration: VenvDeclaration,
}

/// Packages loaded by one resolution call
#[derive(Debug, Default)]
pub struct WorkingSet {
    /// Leaves, in declaration order
    pub standard: Vec<LoadedPackage>,
    /// Packages with dependencies, in resolution order
    pub dependent: Vec<LoadedPackage>,
    /// Packages recorded as leaves because the depth ceiling was hit
    pub truncated: Vec<String>,
    in_progress: Vec<String>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.standard
            .iter()
            .chain(self.dependent.iter())
            .any(|p| p.name == name)
    }

    /// Flush order: standard first, then dependent
    pub fn packages(&self) -> impl Iterator<Item = &LoadedPackage> {
        self.standard.iter().chain(self.dependent.iter())
    }

    pub fn len(&self) -> usize {
        self.standard.len() + self.dependent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of a simulator after resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub vars: BTreeMap<String, String>,
    pub paths: Vec<String>,
}

impl From<&Simulator> for ResolvedEnvironment {
    fn from(sim: &Simulator) -> Self {
        Self {
            vars: sim.vars().clone(),
            paths: sim.paths().to_vec(),
        }
    }
}

/// Builds environments from installed packages' declarations
pub struct Resolver<'a> {
    store: &'a LocalStore,
    base: Simulator,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self {
            store,
            base: Simulator::clean(),
        }
    }

    /// Replace the base every per-package fork starts from
    pub fn with_base(mut self, base: Simulator) -> Self {
        self.base = base;
        self
    }

    /// Load, flush onto `target`, and snapshot the result
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
        target: &mut Simulator,
    ) -> Result<ResolvedEnvironment> {
        let mut set = WorkingSet::new();
        self.load(names, &mut set)?;
        self.flush(&set, target)?;
        Ok(ResolvedEnvironment::from(&*target))
    }

    /// Load the requested packages and their dependency closure
    pub fn load<S: AsRef<str>>(&self, names: &[S], set: &mut WorkingSet) -> Result<()> {
        for name in names {
            self.load_one(name.as_ref(), 1, set)?;
        }
        Ok(())
    }

    fn load_one(&self, name: &str, depth: usize, set: &mut WorkingSet) -> Result<()> {
        let name = normalize_name(name);
        if set.contains(&name) {
            return Ok(());
        }

        if let Some(start) = set.in_progress.iter().position(|p| *p == name) {
            let mut chain = set.in_progress[start..].to_vec();
            chain.push(name);
            return Err(Error::CyclicDependency(chain));
        }

        let declaration = match self.store.venv_declaration(&name)? {
            Some(declaration) => declaration,
            None if depth <= 1 => {
                debug!("{} is not installed, nothing to resolve", name);
                return Ok(());
            }
            None => {
                return Err(Error::NotFound(format!(
                    "dependency '{}' is not installed",
                    name
                )));
            }
        };

        if !declaration.has_dependencies() {
            set.standard.push(LoadedPackage { name, declaration });
            return Ok(());
        }

        if depth > MAX_DEPTH {
            let degraded = Error::DepthExceeded {
                package: name.clone(),
                depth: MAX_DEPTH,
            };
            warn!("{}; treating it as a leaf", degraded);
            set.truncated.push(name.clone());
            set.standard.push(LoadedPackage { name, declaration });
            return Ok(());
        }

        set.in_progress.push(name.clone());
        let result = declaration
            .effective_dependencies()
            .iter()
            .try_for_each(|dep| self.load_one(dep, depth + 1, set));
        set.in_progress.pop();
        result?;

        debug!("Resolved {} at depth {}", name, depth);
        set.dependent.push(LoadedPackage { name, declaration });
        Ok(())
    }

    /// Merge every loaded declaration onto `target`
    ///
    /// Each package's search paths are placed ahead of those of packages
    /// flushed before it, so later packages shadow earlier ones. The combined
    /// list is then pushed in front of `target`'s existing paths.
    pub fn flush(&self, set: &WorkingSet, target: &mut Simulator) -> Result<()> {
        let paths = self.store.paths();
        let root = paths.root.to_string_lossy().into_owned();
        let mut accumulated: Vec<String> = Vec::new();
        let mut written: BTreeSet<String> = BTreeSet::new();

        for package in set.packages() {
            let decl = &package.declaration;
            let pkg_root = paths.pkg_dir(&package.name);

            let mut fork = self.base.fork();
            fork.set_env(ROOT_VAR, root.clone(), true);
            fork.set_env(PKGROOT_VAR, pkg_root.to_string_lossy().into_owned(), true);

            let mut own: Vec<String> = decl
                .search_paths
                .iter()
                .map(|p| expand_path(&fork, p, &pkg_root))
                .collect();
            own.append(&mut accumulated);
            accumulated = own;

            for dir in &decl.mkdir_paths {
                let dir = expand_path(&fork, dir, &pkg_root);
                fs::create_dir_all(&dir).map_err(|e| {
                    Error::IoError(format!("Failed to create directory {}: {}", dir, e))
                })?;
            }

            for include in &decl.include_paths {
                target.append_env(INCLUDE_VAR, &expand_path(&fork, include, &pkg_root));
            }
            for lib in &decl.lib_paths {
                target.append_env(LIB_VAR, &expand_path(&fork, lib, &pkg_root));
            }

            for assignment in &decl.env_assignments {
                let (key, value) = assignment
                    .split_once('=')
                    .map(|(k, v)| (k.trim(), v))
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| {
                        Error::malformed(
                            format!("env entry of {}", package.name),
                            format!("'{}' is not KEY=VALUE", assignment),
                        )
                    })?;

                let value = fork.expand_env(value);
                if written.insert(key.to_string()) {
                    target.set_env(key, value, true);
                } else {
                    target.append_env(key, &value);
                }
            }
        }

        target.path_push_front(accumulated);
        Ok(())
    }
}

/// Expand a path-valued entry; relative results are anchored at the package root
fn expand_path(sim: &Simulator, entry: &str, pkg_root: &Path) -> String {
    let expanded = sim.path_expand(entry);
    if Path::new(&expanded).is_absolute() {
        expanded
    } else {
        pkg_root.join(expanded).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Paths;
    use crate::local::LocalInstallRecord;
    use tempfile::tempdir;

    fn install(store: &LocalStore, name: &str, venv: VenvDeclaration) {
        store
            .save(&LocalInstallRecord::new(name, "1.0", "main", &venv))
            .unwrap();
    }

    fn leaf(path: &str) -> VenvDeclaration {
        VenvDeclaration {
            search_paths: vec![path.to_string()],
            ..Default::default()
        }
    }

    fn depends_on(path: &str, deps: &[&str]) -> VenvDeclaration {
        VenvDeclaration {
            search_paths: vec![path.to_string()],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_requested_package_is_noop() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(&Paths::new(dir.path()));
        let resolver = Resolver::new(&store).with_base(Simulator::empty());

        let mut set = WorkingSet::new();
        resolver.load(&["ghost"], &mut set).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_missing_dependency_fails() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(&Paths::new(dir.path()));
        install(&store, "app", depends_on("bin", &["ghost"]));

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        let err = resolver.load(&["app"], &mut WorkingSet::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cycle_is_reported() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(&Paths::new(dir.path()));
        install(&store, "a", depends_on("bin", &["b"]));
        install(&store, "b", depends_on("bin", &["a"]));

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        match resolver.load(&["a"], &mut WorkingSet::new()) {
            Err(Error::CyclicDependency(chain)) => assert_eq!(chain, ["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_dependencies_load_before_dependents() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(&Paths::new(dir.path()));
        install(&store, "cmake", leaf("bin"));
        install(&store, "ninja", leaf("."));
        install(&store, "llvm", depends_on("bin", &["cmake", "ninja"]));

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        let mut set = WorkingSet::new();
        resolver.load(&["llvm"], &mut set).unwrap();

        let standard: Vec<&str> = set.standard.iter().map(|p| p.name.as_str()).collect();
        let dependent: Vec<&str> = set.dependent.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(standard, ["cmake", "ninja"]);
        assert_eq!(dependent, ["llvm"]);
    }

    #[test]
    fn test_env_assignments_override_then_append() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let store = LocalStore::new(&paths);
        install(
            &store,
            "a",
            VenvDeclaration {
                env_assignments: vec!["FLAGS=-O2".to_string(), "HOME_HINT=~/x".to_string()],
                include_paths: vec!["include".to_string()],
                ..Default::default()
            },
        );
        install(
            &store,
            "b",
            VenvDeclaration {
                env_assignments: vec!["FLAGS=-I%HAUL_PKGROOT%".to_string()],
                ..Default::default()
            },
        );

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        let mut target = Simulator::from_vars([("FLAGS", "ambient")]);
        let env = resolver.resolve(&["a", "b"], &mut target).unwrap();

        let sep = crate::environment::LIST_SEPARATOR;
        let b_root = paths.pkg_dir("b").to_string_lossy().into_owned();
        assert_eq!(env.vars["FLAGS"], format!("-O2{}-I{}", sep, b_root));
        assert_eq!(env.vars["HOME_HINT"], "~/x");
        assert_eq!(
            env.vars["INCLUDE"],
            paths.pkg_dir("a").join("include").to_string_lossy()
        );
    }

    #[test]
    fn test_bad_env_entry_is_malformed() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(&Paths::new(dir.path()));
        install(
            &store,
            "a",
            VenvDeclaration {
                env_assignments: vec!["NOEQUALS".to_string()],
                ..Default::default()
            },
        );

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        let result = resolver.resolve(&["a"], &mut Simulator::empty());
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_mkdir_entries_are_created() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let store = LocalStore::new(&paths);
        install(
            &store,
            "node",
            VenvDeclaration {
                mkdir_paths: vec!["cache/npm".to_string()],
                ..Default::default()
            },
        );

        let resolver = Resolver::new(&store).with_base(Simulator::empty());
        resolver.resolve(&["node"], &mut Simulator::empty()).unwrap();
        assert!(paths.pkg_dir("node").join("cache/npm").is_dir());
    }
}
