//! Package descriptor (META-INF/vessel-package.toml)

use serde::{Deserialize, Serialize};

/// Archive entry holding the descriptor
pub const DESCRIPTOR_ENTRY: &str = "META-INF/vessel-package.toml";

/// What an archive contributes to the container
///
/// ```toml
/// folders = ["skeleton/"]
/// files = ["bin/run.sh"]
/// resources = ["conf/app.conf"]
/// volatile-folders = ["skeleton/conf/"]
/// volatile-files = ["bin/run.sh"]
/// installer = "setup --quiet"
/// uninstaller = "teardown"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageDescriptor {
    /// Entry prefixes unpacked with the prefix stripped
    #[serde(default)]
    pub folders: Vec<String>,

    /// Exact entries unpacked to the same path
    #[serde(default)]
    pub files: Vec<String>,

    /// Names looked up on the library search path
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub volatile_folders: Vec<String>,

    #[serde(default)]
    pub volatile_files: Vec<String>,

    /// Hook run after installation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,

    /// Hook run before uninstallation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstaller: Option<String>,
}

impl PackageDescriptor {
    pub fn from_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Folder prefixes, each ending in `/`
    pub fn folder_prefixes(&self) -> Vec<String> {
        self.folders.iter().map(|f| with_trailing_slash(f)).collect()
    }

    /// True if the archive entry is volatile: under a volatile folder or
    /// named as a volatile file
    pub fn is_volatile(&self, entry: &str) -> bool {
        self.volatile_folders
            .iter()
            .any(|folder| entry.starts_with(&with_trailing_slash(folder)))
            || self.volatile_files.iter().any(|file| file == entry)
    }

    /// Hook strings, ignoring blank ones
    pub fn installer(&self) -> Option<&str> {
        non_blank(self.installer.as_deref())
    }

    pub fn uninstaller(&self) -> Option<&str> {
        non_blank(self.uninstaller.as_deref())
    }
}

fn with_trailing_slash(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

fn non_blank(hook: Option<&str>) -> Option<&str> {
    hook.map(str::trim).filter(|h| !h.is_empty())
}
