// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The build queue.

[BuildQueue] owns an ordered collection of [QueueItem] and is the only thing that
moves items between stages. A typical pass looks like:

1. [BuildQueue::recover()] finishes interrupted file operations and picks up items
   already sitting in the queued directory.
2. [BuildQueue::import_incoming()] validates new descriptors and moves them to the
   queued directory.
3. [BuildQueue::build()] prepares the build environment and builds every queued item
   in order, removing each after its build attempt.

Everything is synchronous. Each external command blocks until it exits and at most
one build runs at a time. Running two passes against the same directories
concurrently is not supported.
*/

use {
    crate::{
        config::BuildQueueConfig,
        environment::{BuildEnvironment, CommandOutcome, EnvironmentSettings, PackageBuilder},
        error::{BuildQueueError, Result},
        journal,
        queue_item::{QueueItem, QueueLocation},
    },
    log::{debug, info, warn},
    std::{collections::VecDeque, path::PathBuf},
};

/// The result of building a single item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildRecord {
    /// Path of the descriptor handed to the builder.
    pub descriptor_path: PathBuf,
    /// Name of the source package.
    pub source: String,
    /// How the builder exited.
    pub outcome: CommandOutcome,
}

/// Summary of a [BuildQueue::build()] pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildReport {
    /// Items built, in build order.
    pub records: Vec<BuildRecord>,
}

impl BuildReport {
    /// Number of builds that exited successfully.
    pub fn succeeded(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    /// Number of builds that failed.
    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }
}

/// A FIFO queue of source packages to build.
pub struct BuildQueue<E, B> {
    config: BuildQueueConfig,
    settings: EnvironmentSettings,
    items: VecDeque<QueueItem>,
    environment: E,
    builder: B,
    environment_initialized: bool,
}

impl<E: BuildEnvironment, B: PackageBuilder> BuildQueue<E, B> {
    /// Construct an empty queue.
    pub fn new(config: BuildQueueConfig, environment: E, builder: B) -> Self {
        info!("build distribution: {}", config.distribution);
        info!("build mirror: {}", config.mirror);

        Self {
            settings: config.environment_settings(),
            config,
            items: VecDeque::new(),
            environment,
            builder,
            environment_initialized: false,
        }
    }

    /// The configuration of this queue.
    pub fn config(&self) -> &BuildQueueConfig {
        &self.config
    }

    /// The build environment.
    pub fn environment(&self) -> &E {
        &self.environment
    }

    /// The package builder.
    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Append an item to the tail of the queue.
    pub fn enqueue(&mut self, item: QueueItem) {
        debug!("adding {} to build queue", item);
        self.items.push_back(item);
    }

    /// Remove and return the item at the head of the queue.
    ///
    /// Returns [None] when the queue is empty.
    pub fn dequeue(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    /// The item at the head of the queue, without removing it.
    pub fn peek(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Number of items in the queue.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over queued items in build order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    /// Filenames of descriptors at a location, sorted by name.
    pub fn list_descriptors(&self, location: QueueLocation) -> Result<Vec<String>> {
        let mut names = vec![];

        for entry in std::fs::read_dir(self.config.layout.directory(location))? {
            let entry = entry?;

            let name = match entry.file_name().to_str() {
                Some(name) if self.config.is_descriptor_filename(name) => name.to_string(),
                _ => continue,
            };

            // Follows symlinks.
            if !entry.path().is_file() {
                debug!("ignoring {}: not a regular file", entry.path().display());
                continue;
            }

            names.push(name);
        }

        names.sort();

        Ok(names)
    }

    /// Validate descriptors in the incoming directory and queue the valid ones.
    ///
    /// Descriptors are considered in filename order. Invalid descriptors, descriptors
    /// that cannot be read or parsed, and items that cannot be moved (e.g. because a
    /// file of the same name is still queued) are logged and left in place so a later
    /// scan can try again.
    ///
    /// Returns the number of items queued.
    pub fn import_incoming(&mut self) -> Result<usize> {
        info!(
            "importing incoming directory {}",
            self.config.layout.incoming.display()
        );

        let mut count = 0;

        for name in self.list_descriptors(QueueLocation::Incoming)? {
            let mut item =
                match QueueItem::load(&self.config.layout, &name, QueueLocation::Incoming) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!("skipping {}: {}", name, e);
                        continue;
                    }
                };

            match item.validate() {
                Ok(true) => {
                    info!("validating {} ...... success", name);

                    match item.queue() {
                        Ok(()) => {
                            self.enqueue(item);
                            count += 1;
                        }
                        Err(e @ BuildQueueError::InvalidTransition { .. }) => return Err(e),
                        Err(e) => {
                            warn!("unable to queue {}: {}; leaving in incoming", name, e);
                        }
                    }
                }
                Ok(false) => {
                    warn!("validating {} ...... failed; leaving in incoming", name);
                }
                Err(e) => {
                    warn!("validating {} ...... failed: {}", name, e);
                }
            }
        }

        Ok(count)
    }

    /// Complete interrupted operations and enqueue items left in the queued directory.
    ///
    /// Items already in this queue are not added twice. Queued descriptors that fail
    /// validation are logged and left in place.
    ///
    /// Returns the number of items enqueued.
    pub fn recover(&mut self) -> Result<usize> {
        let replayed = journal::replay_pending(&self.config.layout.work)?;
        if replayed > 0 {
            info!("completed {} interrupted file operations", replayed);
        }

        let mut count = 0;

        for name in self.list_descriptors(QueueLocation::Queued)? {
            if self.items.iter().any(|item| item.descriptor_filename() == name) {
                continue;
            }

            let item = match QueueItem::load(&self.config.layout, &name, QueueLocation::Queued) {
                Ok(item) => item,
                Err(e) => {
                    warn!("skipping queued {}: {}", name, e);
                    continue;
                }
            };

            match item.validate() {
                Ok(true) => {
                    info!("recovered {} from a previous run", item);
                    self.enqueue(item);
                    count += 1;
                }
                Ok(false) => {
                    warn!("queued {} failed validation; leaving in place", name);
                }
                Err(e) => {
                    warn!("queued {} failed validation: {}", name, e);
                }
            }
        }

        Ok(count)
    }

    /// Create the build environment if this queue has not done so yet.
    pub fn ensure_environment(&mut self) -> Result<()> {
        if self.environment_initialized {
            return Ok(());
        }

        info!("initializing build environment");
        let outcome = self.environment.create(&self.settings)?;
        if outcome.is_success() {
            info!("initializing build environment complete");
        } else {
            // Creation fails when the environment already exists.
            warn!("creating build environment exited with {}", outcome);
        }

        self.environment_initialized = true;

        Ok(())
    }

    /// Update the build environment.
    pub fn refresh_environment(&mut self) -> Result<()> {
        info!("updating build environment");
        let outcome = self.environment.update(&self.settings)?;
        if outcome.is_success() {
            info!("updating build environment complete");
        } else {
            warn!("updating build environment exited with {}", outcome);
        }

        Ok(())
    }

    /// Build every queued item in FIFO order.
    ///
    /// Each item is removed after its build attempt whether or not the build
    /// succeeded. Failed builds are not retried.
    ///
    /// If the builder cannot be run at all, the error is returned and the item being
    /// built stays in the queued directory for [Self::recover()] to find.
    pub fn build(&mut self) -> Result<BuildReport> {
        self.ensure_environment()?;

        if !self.is_empty() {
            self.refresh_environment()?;
        }

        let mut report = BuildReport::default();

        while let Some(item) = self.dequeue() {
            let source = item.descriptor()?.source().to_string();
            let descriptor_path = item.path();

            info!("building {}", item);
            let outcome = self
                .builder
                .build(&descriptor_path, &self.config.layout.built)?;

            if outcome.is_success() {
                info!("building {} complete", source);
            } else {
                warn!(
                    "building {} failed with {}; removing from queue",
                    source, outcome
                );
            }

            item.finish()?;

            report.records.push(BuildRecord {
                descriptor_path,
                source,
                outcome,
            });
        }

        Ok(report)
    }
}
