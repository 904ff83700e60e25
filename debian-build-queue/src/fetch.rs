// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Retrieving source packages into the incoming directory.

[fetch_source_package()] downloads a descriptor and every file it lists. Files
are staged under a `.partial` suffix and only renamed to their final names after
every checksum verifies, with the descriptor renamed last. An incoming scan
therefore never observes a partially downloaded item.
*/

use {
    crate::{
        descriptor::DescriptorRecord,
        digest::ContentDigest,
        error::{BuildQueueError, Result},
    },
    log::{info, warn},
    std::path::{Path, PathBuf},
};

const PARTIAL_SUFFIX: &str = ".partial";

/// Retrieves the content of a URL into a local file.
pub trait Fetcher {
    /// Write the content at `url` to `destination`, replacing any existing file.
    fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}

#[cfg(feature = "http")]
mod http {
    use {
        super::Fetcher,
        crate::error::{BuildQueueError, Result},
        log::debug,
        std::path::Path,
        url::Url,
    };

    /// Obtain an HTTP client, taking `*_proxy` environment variables into account.
    pub fn get_http_client() -> Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::ClientBuilder::new();

        for (key, value) in std::env::vars() {
            let key = key.to_lowercase();

            if let Some(scheme) = key.strip_suffix("_proxy") {
                let url = match Url::parse(&value) {
                    Ok(url) => url,
                    Err(_) => continue,
                };

                let proxy = match scheme {
                    "http" => reqwest::Proxy::http(url.as_str()),
                    "https" => reqwest::Proxy::https(url.as_str()),
                    _ => continue,
                };

                if let Ok(proxy) = proxy {
                    debug!("using {} proxy {}", scheme, url);
                    builder = builder.proxy(proxy);
                }
            }
        }

        Ok(builder.build()?)
    }

    /// A [Fetcher] issuing plain HTTP GET requests.
    #[derive(Debug)]
    pub struct HttpFetcher {
        client: reqwest::blocking::Client,
    }

    impl HttpFetcher {
        /// Construct an instance using a proxy-aware client.
        pub fn new() -> Result<Self> {
            Ok(Self::new_client(get_http_client()?))
        }

        /// Construct an instance using the given client.
        pub fn new_client(client: reqwest::blocking::Client) -> Self {
            Self { client }
        }
    }

    impl Fetcher for HttpFetcher {
        fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
            let parsed = Url::parse(url)?;
            let mut response = self.client.get(parsed).send()?;

            let status = response.status();
            if !status.is_success() {
                return Err(BuildQueueError::HttpStatus(
                    url.to_string(),
                    status.as_u16(),
                ));
            }

            let mut fh = std::fs::File::create(destination)?;
            let size = response.copy_to(&mut fh)?;
            debug!("fetched {} ({} bytes)", url, size);

            Ok(())
        }
    }
}

#[cfg(feature = "http")]
pub use http::{get_http_client, HttpFetcher};

/// Split a URL into its directory (with trailing `/`) and final path segment.
fn split_url(url: &str) -> Option<(&str, &str)> {
    let index = url.rfind('/')?;
    let (base, name) = url.split_at(index + 1);

    if name.is_empty() {
        None
    } else {
        Some((base, name))
    }
}

fn partial_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{}{}", filename, PARTIAL_SUFFIX))
}

fn remove_partials(dir: &Path, filenames: &[String]) {
    for name in filenames {
        let path = partial_path(dir, name);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("unable to remove {}: {}", path.display(), e);
            }
        }
    }
}

fn stage_package(
    fetcher: &impl Fetcher,
    base_url: &str,
    descriptor_filename: &str,
    incoming_dir: &Path,
    staged: &mut Vec<String>,
) -> Result<DescriptorRecord> {
    let descriptor_path = partial_path(incoming_dir, descriptor_filename);
    staged.push(descriptor_filename.to_string());
    fetcher.fetch(&format!("{}{}", base_url, descriptor_filename), &descriptor_path)?;

    let data = std::fs::read(&descriptor_path)
        .map_err(|e| BuildQueueError::FileUnreadable(descriptor_path.clone(), e))?;
    let record = DescriptorRecord::parse(&data)?;

    for filename in record.filenames() {
        let url = format!("{}{}", base_url, filename);
        info!("fetching {}", url);

        staged.push(filename.to_string());
        fetcher.fetch(&url, &partial_path(incoming_dir, filename))?;
    }

    for entry in record.iter_digests() {
        let path = partial_path(incoming_dir, &entry.filename);
        let actual = ContentDigest::compute_path(entry.digest.checksum_type(), &path)?;

        if actual != entry.digest {
            return Err(BuildQueueError::DigestMismatch {
                path: entry.filename.clone(),
                expected: entry.digest.digest_hex(),
                actual: actual.digest_hex(),
            });
        }
    }

    Ok(record)
}

/// Download a source package into the incoming directory.
///
/// `descriptor_url` names the `.dsc` file. Files it lists are fetched from the
/// same URL directory. On any error, staged files are removed and nothing is
/// left in `incoming_dir`.
pub fn fetch_source_package(
    fetcher: &impl Fetcher,
    descriptor_url: &str,
    incoming_dir: &Path,
) -> Result<DescriptorRecord> {
    let (base_url, descriptor_filename) = split_url(descriptor_url).ok_or_else(|| {
        BuildQueueError::MalformedDescriptor(format!(
            "URL does not name a descriptor file: {}",
            descriptor_url
        ))
    })?;

    info!("fetching {}", descriptor_url);

    let mut staged = vec![];

    let record = match stage_package(
        fetcher,
        base_url,
        descriptor_filename,
        incoming_dir,
        &mut staged,
    ) {
        Ok(record) => record,
        Err(e) => {
            remove_partials(incoming_dir, &staged);
            return Err(e);
        }
    };

    // The descriptor was staged first. Publish it last.
    for name in staged.iter().skip(1).chain(staged.iter().take(1)) {
        std::fs::rename(partial_path(incoming_dir, name), incoming_dir.join(name))?;
    }

    info!(
        "fetched {} {} into {}",
        record.source(),
        record.version(),
        incoming_dir.display()
    );

    Ok(record)
}
