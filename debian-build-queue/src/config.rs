// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build queue configuration.

Configuration is typically read from a YAML document:

```yaml
mirror: http://archive.ubuntu.com/ubuntu
distribution: jammy
components:
  - main
  - universe
layout:
  incoming: /srv/build/incoming
  queued: /srv/build/queued
  built: /srv/build/complete
  work: /srv/build/work
```

Every key is optional. Missing keys take the defaults of [BuildQueueConfig::default()].
*/

use {
    crate::{environment::EnvironmentSettings, error::Result, queue_item::QueueLocation},
    log::info,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Directories backing each stage of the queue.
///
/// All files live directly inside these directories. There is no nesting.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct QueueLayout {
    /// Where new descriptors and their files are dropped.
    pub incoming: PathBuf,
    /// Where validated items wait to be built.
    pub queued: PathBuf,
    /// Where the builder writes its results.
    pub built: PathBuf,
    /// Scratch space. Holds operation journals.
    pub work: PathBuf,
}

impl Default for QueueLayout {
    fn default() -> Self {
        Self::under_root("/build")
    }
}

impl QueueLayout {
    /// Construct a layout with all directories under a common root.
    ///
    /// The built directory is named `complete`.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();

        Self {
            incoming: root.join("incoming"),
            queued: root.join("queued"),
            built: root.join("complete"),
            work: root.join("work"),
        }
    }

    /// The directory holding items at a given location.
    pub fn directory(&self, location: QueueLocation) -> &Path {
        match location {
            QueueLocation::Incoming => &self.incoming,
            QueueLocation::Queued => &self.queued,
        }
    }

    /// Iterate over all directories in the layout.
    pub fn iter_directories(&self) -> impl Iterator<Item = &Path> {
        [
            self.incoming.as_path(),
            self.queued.as_path(),
            self.built.as_path(),
            self.work.as_path(),
        ]
        .into_iter()
    }

    /// Create any directories of the layout that do not exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for path in self.iter_directories() {
            if !path.exists() {
                info!("creating {}", path.display());
                std::fs::create_dir_all(path)?;
            }
        }

        Ok(())
    }
}

/// Configuration for a [crate::build_queue::BuildQueue].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BuildQueueConfig {
    /// URL of the package mirror the build environment is bootstrapped from.
    pub mirror: String,

    /// Name of the distribution to build for.
    pub distribution: String,

    /// Archive components made available in addition to the mirror's defaults.
    pub components: Vec<String>,

    /// Directory layout of the queue.
    pub layout: QueueLayout,

    /// Filename suffix identifying descriptors.
    pub descriptor_extension: String,

    /// Program used to manage the build environment and build packages.
    pub cowbuilder: String,
}

impl Default for BuildQueueConfig {
    fn default() -> Self {
        Self {
            mirror: "http://192.168.1.1/ubuntu".to_string(),
            distribution: "gutsy".to_string(),
            components: vec!["universe".to_string(), "multiverse".to_string()],
            layout: QueueLayout::default(),
            descriptor_extension: ".dsc".to_string(),
            cowbuilder: "cowbuilder".to_string(),
        }
    }
}

impl BuildQueueConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Read a configuration from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let fh = std::fs::File::open(path.as_ref())?;

        Ok(serde_yaml::from_reader(fh)?)
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The `sources.list` line for the additional components.
    pub fn extra_sources(&self) -> String {
        let mut line = format!("deb {} {}", self.mirror, self.distribution);

        for component in &self.components {
            line.push(' ');
            line.push_str(component);
        }

        line
    }

    /// Settings to pass to the build environment.
    pub fn environment_settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            mirror: self.mirror.clone(),
            extra_sources: self.extra_sources(),
            distribution: self.distribution.clone(),
        }
    }

    /// Whether a filename names a descriptor.
    pub fn is_descriptor_filename(&self, filename: &str) -> bool {
        filename.len() > self.descriptor_extension.len()
            && filename.ends_with(&self.descriptor_extension)
    }
}
