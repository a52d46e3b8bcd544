//! `clouds.yaml` profiles.
//!
//! A named cloud is assembled from up to three files: the vendor defaults
//! (`clouds-public.yaml`, selected by the entry's `profile` key), the user file
//! (`clouds.yaml`) and the secrets overlay (`secure.yaml`). Later layers win.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::Environment;
use crate::error::{ProviderError, ResultExt};

const CONFIG_FILE: &str = "clouds.yaml";
const SECURE_FILE: &str = "secure.yaml";
const VENDOR_FILE: &str = "clouds-public.yaml";

/// Locations of the three cloud files, where they exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudFiles {
    /// The user's `clouds.yaml`.
    pub config: Option<PathBuf>,
    /// The secrets overlay.
    pub secure: Option<PathBuf>,
    /// Vendor defaults.
    pub vendor: Option<PathBuf>,
}

impl CloudFiles {
    /// Find the files named by `OS_CLIENT_*_FILE`, falling back to the
    /// current directory, `~/.config/openstack` and `/etc/openstack`.
    pub fn locate(env: &Environment) -> Self {
        let dirs = search_dirs();
        Self {
            config: find(env, "OS_CLIENT_CONFIG_FILE", CONFIG_FILE, &dirs),
            secure: find(env, "OS_CLIENT_SECURE_FILE", SECURE_FILE, &dirs),
            vendor: find(env, "OS_CLIENT_VENDOR_FILE", VENDOR_FILE, &dirs),
        }
    }

    /// Assemble the named cloud entry.
    ///
    /// Fails when none of the files mention `name`.
    pub fn load(&self, name: &str) -> Result<Value, ProviderError> {
        let user = self.entry(self.config.as_deref(), "clouds", name)?;
        let secure = self.entry(self.secure.as_deref(), "clouds", name)?;
        if user.is_none() && secure.is_none() {
            return Err(ProviderError::Configuration(format!(
                "cloud \"{}\" not found in {}",
                name, CONFIG_FILE
            )));
        }

        let mut cloud = user.unwrap_or_else(|| Value::Mapping(Mapping::new()));
        if let Some(secure) = secure {
            merge(&mut cloud, secure);
        }

        if let Some(profile) = lookup(&cloud, "profile") {
            let vendor = self.entry(self.vendor.as_deref(), "public-clouds", &profile)?;
            match vendor {
                Some(mut base) => {
                    merge(&mut base, cloud);
                    cloud = base;
                },
                None => debug!(profile = %profile, "vendor profile not found"),
            }
        }
        Ok(cloud)
    }

    fn entry(&self, file: Option<&Path>, section: &str, name: &str) -> Result<Option<Value>, ProviderError> {
        let Some(file) = file else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let doc: Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
        Ok(doc.get(section).and_then(|s| s.get(name)).cloned())
    }
}

fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".config").join("openstack"));
    }
    dirs.push(PathBuf::from("/etc/openstack"));
    dirs
}

fn find(env: &Environment, var: &str, file_name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = env.get(var) {
        return Some(PathBuf::from(path));
    }
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|path| path.is_file())
}

/// Merge `overlay` into `base`. Mappings merge key by key; anything else in
/// the overlay replaces the base value.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

/// Read a scalar at a dotted path as a string.
pub fn lookup(cloud: &Value, path: &str) -> Option<String> {
    let mut current = cloud;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
