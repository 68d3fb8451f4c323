// src/environment.rs

//! In-memory environment simulator
//!
//! A `Simulator` holds named variables plus an ordered, de-duplicated search
//! path list. Per-package environments start from `Simulator::clean()` so that
//! nothing from the invoking shell leaks into a constructed toolchain
//! environment; `exec` starts from `Simulator::inherit()` so resolved paths
//! shadow the ambient `PATH`.

use std::collections::BTreeMap;
#[cfg(windows)]
use std::path::PathBuf;

/// Separator between entries of path-list variables (`PATH`, `INCLUDE`, ...)
#[cfg(windows)]
pub const LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const LIST_SEPARATOR: char = ':';

#[cfg(windows)]
const PATH_KEY: &str = "Path";
#[cfg(not(windows))]
const PATH_KEY: &str = "PATH";

/// Variables a process needs to function at all
#[cfg(windows)]
const REQUIRED_KEYS: &[&str] = &[
    "SystemRoot",
    "SystemDrive",
    "windir",
    "ComSpec",
    "PATHEXT",
    "TEMP",
    "TMP",
    "USERPROFILE",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "ProgramData",
    "ProgramFiles",
    "NUMBER_OF_PROCESSORS",
    "PROCESSOR_ARCHITECTURE",
];
#[cfg(not(windows))]
const REQUIRED_KEYS: &[&str] = &["HOME", "USER", "LOGNAME", "SHELL", "TERM", "LANG", "TMPDIR"];

#[cfg(not(windows))]
const BASELINE_PATHS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"];

/// Environment variable map plus search path list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Simulator {
    vars: BTreeMap<String, String>,
    paths: Vec<String>,
}

impl Simulator {
    /// An empty simulator with no variables and no paths
    pub fn empty() -> Self {
        Self::default()
    }

    /// Minimal deterministic baseline from the current process
    pub fn clean() -> Self {
        Self::clean_from(|key| std::env::var(key).ok())
    }

    /// Minimal baseline using `lookup` for the OS-required variables
    pub fn clean_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut sim = Self::empty();
        for key in REQUIRED_KEYS {
            if let Some(value) = lookup(key) {
                sim.vars.insert(normalize_key(key), value);
            }
        }
        sim.paths = baseline_paths(&sim);
        sim
    }

    /// Copy of the full process environment, `PATH` split into the path list
    pub fn inherit() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit pairs; a `PATH` entry is split into the path list
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut sim = Self::empty();
        for (key, value) in vars {
            let key = key.into();
            let value = value.into();
            if key.eq_ignore_ascii_case("PATH") {
                let entries: Vec<String> = split_list(&value);
                sim.path_append(entries);
            } else {
                sim.vars.insert(normalize_key(&key), value);
            }
        }
        sim
    }

    /// Fork for a dependency; an independent copy
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Set `key`; an existing value is only replaced when `overwrite` is set.
    /// Returns whether the value was written.
    pub fn set_env(&mut self, key: &str, value: impl Into<String>, overwrite: bool) -> bool {
        let key = normalize_key(key);
        if !overwrite && self.vars.contains_key(&key) {
            return false;
        }
        self.vars.insert(key, value.into());
        true
    }

    /// Append to an existing value with the list separator, or set it
    pub fn append_env(&mut self, key: &str, value: &str) {
        let key = normalize_key(key);
        match self.vars.get_mut(&key) {
            Some(existing) if !existing.is_empty() => {
                existing.push(LIST_SEPARATOR);
                existing.push_str(value);
            }
            _ => {
                self.vars.insert(key, value.to_string());
            }
        }
    }

    /// Prepend `entries` in order; duplicates already present move to the front
    pub fn path_push_front<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut front: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.into();
            if entry.is_empty() || front.iter().any(|p| same_path(p, &entry)) {
                continue;
            }
            front.push(entry);
        }
        self.paths.retain(|p| !front.iter().any(|f| same_path(f, p)));
        front.append(&mut self.paths);
        self.paths = front;
    }

    /// Append `entries` that are not already present
    pub fn path_append<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in entries {
            let entry = entry.into();
            if entry.is_empty() || self.paths.iter().any(|p| same_path(p, &entry)) {
                continue;
            }
            self.paths.push(entry);
        }
    }

    /// Substitute `%VAR%` references; unknown references are left verbatim
    pub fn expand_env(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('%') {
                Some(end) if end > 0 => match self.lookup(&after[..end]) {
                    Some(value) => {
                        out.push_str(&value);
                        rest = &after[end + 1..];
                    }
                    None => {
                        // The closing '%' may open the next reference
                        out.push('%');
                        rest = after;
                    }
                },
                Some(_) => {
                    // "%%" is a literal percent sign
                    out.push('%');
                    rest = &after[1..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// `expand_env` plus a leading `~` home-directory token. Only for paths.
    pub fn path_expand(&self, input: &str) -> String {
        let expanded = self.expand_env(input);
        let Some(tail) = expanded.strip_prefix('~') else {
            return expanded;
        };
        if !(tail.is_empty() || tail.starts_with('/') || tail.starts_with('\\')) {
            // "~user" is not supported
            return expanded;
        }
        match self.home() {
            Some(home) => format!("{}{}", home.trim_end_matches(['/', '\\']), tail),
            None => expanded,
        }
    }

    /// Variables as key/value pairs with the path list joined into `PATH`
    pub fn environ(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.push((PATH_KEY.to_string(), self.joined_paths()));
        out
    }

    pub fn joined_paths(&self) -> String {
        let separator = LIST_SEPARATOR.to_string();
        self.paths.join(&separator)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("PATH") {
            return Some(self.joined_paths());
        }
        self.get(name).map(str::to_string)
    }

    fn home(&self) -> Option<String> {
        self.get("HOME")
            .or_else(|| self.get("USERPROFILE"))
            .map(str::to_string)
            .or_else(|| dirs::home_dir().map(|h| h.to_string_lossy().into_owned()))
    }
}

/// Split a list-valued variable on the platform separator
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(LIST_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(windows)]
fn baseline_paths(sim: &Simulator) -> Vec<String> {
    let Some(root) = sim.get("SystemRoot") else {
        return Vec::new();
    };
    let root = PathBuf::from(root);
    [
        root.join("System32"),
        root.clone(),
        root.join("System32").join("Wbem"),
        root.join("System32").join("WindowsPowerShell").join("v1.0"),
    ]
    .iter()
    .map(|p| p.to_string_lossy().into_owned())
    .collect()
}

#[cfg(not(windows))]
fn baseline_paths(_sim: &Simulator) -> Vec<String> {
    BASELINE_PATHS.iter().map(|p| p.to_string()).collect()
}

// Windows variable names and paths are case-insensitive
#[cfg(windows)]
fn normalize_key(key: &str) -> String {
    key.to_ascii_uppercase()
}
#[cfg(not(windows))]
fn normalize_key(key: &str) -> String {
    key.to_string()
}

#[cfg(windows)]
fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('\\').eq_ignore_ascii_case(b.trim_end_matches('\\'))
}
#[cfg(not(windows))]
fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}
