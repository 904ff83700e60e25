// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A file-based build queue for Debian source packages.

Upstream processes drop a `.dsc` descriptor and the files it lists into an
*incoming* directory. This crate validates those drops, promotes valid ones to a
*queued* directory and feeds them one at a time, oldest first, to an external
builder such as `cowbuilder`.

# A Tour of Functionality

Descriptors are Debian source control files. The low-level paragraph parser lives
in the [control] module and [descriptor::DescriptorRecord] extracts the fields the
queue cares about: the source package name, its version and the checksummed list
of files making up the package. Checksums are represented by
[digest::ContentDigest].

[queue_item::QueueItem] represents a descriptor and its files at one stage of
the queue. It knows how to validate itself and how to move between directories.
Multi-file moves and removals are recorded in the [journal] first so a crash
never leaves an item split across directories.

[build_queue::BuildQueue] ties everything together. It scans the incoming
directory, keeps the FIFO of queued items and drives a
[environment::BuildEnvironment] and [environment::PackageBuilder]. The
[environment::Cowbuilder] type implements both on top of `cowbuilder`.

Source packages can be downloaded into the incoming directory with
[fetch::fetch_source_package()]. An HTTP implementation is available when the
`http` feature (enabled by default) is active.

Directory locations and build environment parameters are described by
[config::BuildQueueConfig], which can be loaded from YAML.
*/

pub mod build_queue;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod digest;
pub mod environment;
pub mod error;
pub mod fetch;
pub mod journal;
pub mod queue_item;

#[cfg(test)]
mod testutil;
