//! Streaming downloads with hash verification and a single backoff retry.

use std::env;
use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::core::{FileHash, HashError};
use crate::install::verify;
use crate::internal::fsx;

/// Transport timeout, plus a short grace period so in-flight transfers can
/// drain on shutdown.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Environment booleans consumed only to annotate outgoing HTTP headers.
const CI_ENV_VARS: &[&str] = &["CI", "GITHUB_ACTIONS", "GITLAB_CI", "BUILDKITE", "TF_BUILD"];

#[derive(Debug)]
pub struct Downloader {
    client: reqwest::Client,
    offline: bool,
}

impl Downloader {
    pub fn new(offline: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let ci: Vec<&str> = CI_ENV_VARS
            .iter()
            .filter(|var| env::var_os(var).is_some_and(|v| !v.is_empty() && v != "false"))
            .copied()
            .collect();
        if !ci.is_empty() {
            headers.insert(
                "Julia-CI-Variables",
                HeaderValue::from_str(&ci.join(","))
                    .expect("CI variable names are valid header values"),
            );
        }

        let client = reqwest::Client::builder()
            .timeout(TRANSFER_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self { client, offline })
    }

    /// Streams `url` to `dest`.
    ///
    /// If `dest` already exists and matches `expected`, the download is
    /// skipped. If it exists and differs, it is redownloaded only with
    /// `force`; otherwise the mismatch is an error. Network failures and
    /// first-download hash mismatches are retried once.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn download(
        &self,
        url: &str,
        dest: &Utf8Path,
        expected: Option<FileHash>,
        force: bool,
    ) -> Result<()> {
        if dest.is_file() {
            match expected {
                Some(expected) if verify::verify(dest, expected)? => {
                    debug!("`{dest}` already downloaded and verified");
                    return Ok(());
                }
                Some(expected) => {
                    if !force {
                        return Err(HashError::Mismatch {
                            path: dest.to_string(),
                            expected: expected.to_string(),
                            computed: verify::file_hash(dest)?.to_string(),
                        }
                        .into());
                    }
                    warn!("`{dest}` exists with wrong hash; redownloading");
                    fsx::remove_file(dest)?;
                }
                None => {
                    debug!("`{dest}` already downloaded");
                    return Ok(());
                }
            }
        }

        if self.offline {
            bail!("cannot download `{url}`: offline mode is enabled");
        }

        match self.fetch_verified(url, dest, expected).await {
            Ok(()) => Ok(()),
            Err(first) => {
                // One automatic retry with backoff; persistent failure
                // surfaces.
                debug!("retrying `{url}` after: {first:#}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                match self.fetch_verified(url, dest, expected).await {
                    Ok(()) => Ok(()),
                    Err(_) if first.downcast_ref::<HashError>().is_some() => {
                        Err(HashError::MismatchAfterRetry {
                            path: dest.to_string(),
                        }
                        .into())
                    }
                    Err(second) => Err(second),
                }
            }
        }
    }

    async fn fetch_verified(
        &self,
        url: &str,
        dest: &Utf8Path,
        expected: Option<FileHash>,
    ) -> Result<()> {
        let parent = dest
            .parent()
            .with_context(|| format!("download target `{dest}` has no parent"))?;
        fsx::create_dir_all(parent)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".jlpkg-download-")
            .tempfile_in(parent)
            .with_context(|| format!("failed to create download staging in `{parent}`"))?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch `{url}`"))?;
        if !response.status().is_success() {
            bail!("fetching `{url}` returned HTTP {}", response.status());
        }
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("transfer of `{url}` was interrupted"))?
        {
            tmp.write_all(&chunk)
                .with_context(|| format!("failed to write download staging for `{dest}`"))?;
        }
        tmp.flush()?;

        if let Some(expected) = expected {
            let staged = Utf8Path::from_path(tmp.path()).context("staging path is not UTF-8")?;
            let computed = verify::file_hash(staged)?;
            if computed != expected {
                return Err(HashError::Mismatch {
                    path: dest.to_string(),
                    expected: expected.to_string(),
                    computed: computed.to_string(),
                }
                .into());
            }
        }

        tmp.persist(dest)
            .with_context(|| format!("failed to move download into `{dest}`"))?;
        if let Some(expected) = expected {
            // Seed the sidecar so later verifications are cache hits.
            let _ = verify::verify(dest, expected)?;
        }
        Ok(())
    }
}
