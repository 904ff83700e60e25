// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        config::{BuildQueueConfig, QueueLayout},
        digest::{ChecksumType, ContentDigest},
        environment::{BuildEnvironment, CommandOutcome, EnvironmentSettings, PackageBuilder},
        error::Result,
    },
    std::path::{Path, PathBuf},
};

/// A queue layout backed by a temporary directory.
pub struct TestQueue {
    _td: tempfile::TempDir,
    pub layout: QueueLayout,
}

impl TestQueue {
    pub fn new() -> Result<Self> {
        let td = tempfile::Builder::new().prefix("dbq-test").tempdir()?;
        let layout = QueueLayout::under_root(td.path());
        layout.ensure_directories()?;

        Ok(Self { _td: td, layout })
    }

    pub fn config(&self) -> BuildQueueConfig {
        BuildQueueConfig {
            layout: self.layout.clone(),
            ..Default::default()
        }
    }
}

/// Render a descriptor for `<name>.tar.gz` with the given content.
pub fn descriptor_for(name: &str, content: &[u8]) -> String {
    format!(
        "Source: {}\nVersion: 1.0-1\nFiles:\n {} {} {}.tar.gz\n",
        name,
        ContentDigest::compute(ChecksumType::Md5, content),
        content.len(),
        name
    )
}

/// Write `<name>.dsc` and `<name>.tar.gz` into a directory.
pub fn write_package(dir: &Path, name: &str, content: &[u8]) -> Result<()> {
    std::fs::write(dir.join(format!("{}.tar.gz", name)), content)?;
    std::fs::write(
        dir.join(format!("{}.dsc", name)),
        descriptor_for(name, content),
    )?;

    Ok(())
}

/// Filenames in a directory, sorted.
pub fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .map(|entry| -> Result<String> { Ok(entry?.file_name().to_string_lossy().to_string()) })
        .collect::<Result<Vec<_>>>()?;
    names.sort();

    Ok(names)
}

/// An environment and builder that records calls instead of running anything.
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    pub creates: usize,
    pub updates: usize,
    pub builds: Vec<PathBuf>,
    /// Exit codes returned by successive builds. Builds succeed once exhausted.
    pub build_codes: Vec<i32>,
    /// Whether the descriptor existed when each build was invoked.
    pub present_at_build: Vec<bool>,
}

impl BuildEnvironment for RecordingBuilder {
    fn create(&mut self, _settings: &EnvironmentSettings) -> Result<CommandOutcome> {
        self.creates += 1;
        Ok(CommandOutcome::success())
    }

    fn update(&mut self, _settings: &EnvironmentSettings) -> Result<CommandOutcome> {
        self.updates += 1;
        Ok(CommandOutcome::success())
    }
}

impl PackageBuilder for RecordingBuilder {
    fn build(&mut self, descriptor_path: &Path, _results_dir: &Path) -> Result<CommandOutcome> {
        self.present_at_build.push(descriptor_path.exists());
        self.builds.push(descriptor_path.to_path_buf());

        Ok(if self.build_codes.is_empty() {
            CommandOutcome::success()
        } else {
            CommandOutcome::exited(self.build_codes.remove(0))
        })
    }
}
