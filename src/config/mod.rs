pub mod xml;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DfsError, Result};

pub const FS_DEFAULT_NAME_KEY: &str = "fs.defaultFS";
pub const FS_DEFAULT_NAME_DEFAULT: &str = "file:///";
pub const IO_FILE_BUFFER_SIZE_KEY: &str = "io.file.buffer.size";
pub const IO_FILE_BUFFER_SIZE_DEFAULT: u64 = 4096;
pub const IPC_CLIENT_CONNECT_TIMEOUT_KEY: &str = "ipc.client.connect.timeout";
pub const IPC_CLIENT_CONNECT_TIMEOUT_DEFAULT: u64 = 20_000;
pub const DFS_CLIENT_SOCKET_TIMEOUT_KEY: &str = "dfs.client.socket-timeout";
pub const DFS_CLIENT_SOCKET_TIMEOUT_DEFAULT: u64 = 60_000;

/// Directory searched for resources that are not found as given.
pub const CONF_DIR_ENV: &str = "DFS_CONF_DIR";

const MAX_SUBST: usize = 20;

/// String key/value settings loaded from XML resources.
///
/// Resources are applied in the order they are added; a later resource
/// overrides an earlier one unless the earlier property was marked final.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    properties: HashMap<String, String>,
    finals: HashSet<String>,
    resources: Vec<String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a resource name to a file: the name itself, then the same
    /// name under `$DFS_CONF_DIR`.
    pub fn locate_resource(name: impl AsRef<Path>) -> Option<PathBuf> {
        let name = name.as_ref();
        if name.is_file() {
            return Some(name.to_path_buf());
        }
        if name.is_absolute() {
            return None;
        }
        let dir = std::env::var_os(CONF_DIR_ENV)?;
        let candidate = PathBuf::from(dir).join(name);
        candidate.is_file().then_some(candidate)
    }

    pub fn add_resource(&mut self, name: impl AsRef<Path>) -> Result<()> {
        let name = name.as_ref();
        let path = Self::locate_resource(name)
            .ok_or_else(|| DfsError::InvalidConfig(format!("{} not found", name.display())))?;
        let text = std::fs::read_to_string(&path)?;
        self.add_resource_str(&path.display().to_string(), &text)
    }

    pub fn add_resource_str(&mut self, resource: &str, text: &str) -> Result<()> {
        let properties = xml::parse_properties(resource, text)?;
        debug!("Loading {} properties from {}", properties.len(), resource);
        for property in properties {
            if self.finals.contains(&property.name) {
                if self.properties.get(&property.name) != property.value.as_ref() {
                    warn!(
                        "{}: attempt to override final parameter {}; ignoring",
                        resource, property.name
                    );
                }
                continue;
            }
            if let Some(value) = property.value {
                self.properties.insert(property.name.clone(), value);
            }
            if property.is_final {
                self.finals.insert(property.name);
            }
        }
        self.resources.push(resource.to_string());
        Ok(())
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Applies a `key=value` override.
    pub fn set_pair(&mut self, pair: &str) -> Result<()> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                self.set(key.trim(), value.trim());
                Ok(())
            }
            _ => Err(DfsError::InvalidConfig(format!(
                "expected key=value, got {:?}",
                pair
            ))),
        }
    }

    /// The value as written, without variable expansion.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The value with `${name}` and `${env.NAME}` references expanded.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_raw(key).map(|value| self.substitute(value))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| {
                DfsError::InvalidConfig(format!("{} is not a number: {:?}", key, value))
            }),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) if value == "true" => Ok(true),
            Some(value) if value == "false" => Ok(false),
            Some(value) => Err(DfsError::InvalidConfig(format!(
                "{} is not a boolean: {:?}",
                key, value
            ))),
        }
    }

    pub fn default_fs(&self) -> String {
        self.get_or(FS_DEFAULT_NAME_KEY, FS_DEFAULT_NAME_DEFAULT)
    }

    fn substitute(&self, value: &str) -> String {
        let mut expr = value.to_string();
        for _ in 0..MAX_SUBST {
            let Some((start, end)) = find_variable(&expr) else {
                return expr;
            };
            let name = &expr[start + 2..end];
            let replacement = match name.strip_prefix("env.") {
                Some(var) => std::env::var(var).ok(),
                None => self.get_raw(name).map(str::to_string),
            };
            let Some(replacement) = replacement else {
                // unresolved references are left in place
                return expr;
            };
            expr.replace_range(start..=end, &replacement);
        }
        warn!("Variable substitution depth too large: {} {}", MAX_SUBST, value);
        expr
    }
}

// Locates the first `${...}` with a non-empty name.
fn find_variable(expr: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = expr[from..].find("${") {
        let start = from + offset;
        let end = start + 2 + expr[start + 2..].find('}')?;
        if end > start + 2 {
            return Some((start, end));
        }
        from = end + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn resource(props: &[(&str, &str, bool)]) -> String {
        let mut xml = String::from("<configuration>\n");
        for (name, value, is_final) in props {
            xml.push_str(&format!(
                "<property><name>{}</name><value>{}</value><final>{}</final></property>\n",
                name, value, is_final
            ));
        }
        xml.push_str("</configuration>\n");
        xml
    }

    #[test]
    fn later_resources_override_earlier_ones() {
        let mut conf = Configuration::new();
        conf.add_resource_str(
            "hdfs-site.xml",
            &resource(&[("fs.defaultFS", "dfs://a:1", false), ("dfs.replication", "1", false)]),
        )
        .unwrap();
        conf.add_resource_str("core-site.xml", &resource(&[("fs.defaultFS", "dfs://b:2", false)]))
            .unwrap();

        assert_eq!(conf.default_fs(), "dfs://b:2");
        assert_eq!(conf.get("dfs.replication").as_deref(), Some("1"));
        assert_eq!(conf.resources(), ["hdfs-site.xml", "core-site.xml"]);
    }

    #[test]
    fn final_properties_are_not_overridden_by_resources() {
        let mut conf = Configuration::new();
        conf.add_resource_str("a", &resource(&[("io.file.buffer.size", "8192", true)]))
            .unwrap();
        conf.add_resource_str("b", &resource(&[("io.file.buffer.size", "1", false)]))
            .unwrap();
        assert_eq!(conf.get_u64(IO_FILE_BUFFER_SIZE_KEY, 0).unwrap(), 8192);

        conf.set(IO_FILE_BUFFER_SIZE_KEY, "16");
        assert_eq!(conf.get_u64(IO_FILE_BUFFER_SIZE_KEY, 0).unwrap(), 16);
    }

    #[test]
    fn defaults_and_typed_getters() {
        let mut conf = Configuration::new();
        assert_eq!(conf.default_fs(), FS_DEFAULT_NAME_DEFAULT);
        assert_eq!(conf.get_u64("missing", 7).unwrap(), 7);
        assert!(conf.get_bool("missing", true).unwrap());

        conf.set_pair("x.enabled = TRUE").unwrap();
        conf.set_pair("x.size=abc").unwrap();
        assert!(conf.get_bool("x.enabled", false).unwrap());
        assert!(conf.get_u64("x.size", 0).is_err());
        assert!(conf.set_pair("novalue").is_err());
        assert!(conf.set_pair("=1").is_err());
    }

    #[test]
    fn expands_variables() {
        let mut conf = Configuration::new();
        conf.set("hadoop.tmp.dir", "/tmp/hadoop-${user.name}");
        conf.set("user.name", "chris");
        conf.set("dfs.name.dir", "${hadoop.tmp.dir}/dfs/name");
        conf.set("unresolved", "${nope}/x");
        conf.set("loop", "${loop}");

        assert_eq!(conf.get("dfs.name.dir").as_deref(), Some("/tmp/hadoop-chris/dfs/name"));
        assert_eq!(conf.get_raw("dfs.name.dir"), Some("${hadoop.tmp.dir}/dfs/name"));
        assert_eq!(conf.get("unresolved").as_deref(), Some("${nope}/x"));
        assert_eq!(conf.get("loop").as_deref(), Some("${loop}"));
    }

    #[test]
    fn loads_resource_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core-site.xml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(resource(&[("fs.defaultFS", "file:///", false)]).as_bytes())
            .unwrap();

        let mut conf = Configuration::new();
        conf.add_resource(&path).unwrap();
        assert_eq!(conf.get_raw(FS_DEFAULT_NAME_KEY), Some("file:///"));

        let missing = dir.path().join("hdfs-site.xml");
        assert!(Configuration::locate_resource(&missing).is_none());
        assert!(matches!(
            conf.add_resource(&missing),
            Err(DfsError::InvalidConfig(_))
        ));
    }
}
