//! HTTP download of a single content item

use crate::config::Credentials;
use crate::error::FetchError;
use crate::types::ContentItem;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Download `item` to `part_path`, returning the SHA-256 of the bytes written
///
/// The partial file is removed on any failure. Digest checking happens in
/// the caller so that a mismatch is never retried.
pub(crate) async fn download_to(
    client: &reqwest::Client,
    item: &ContentItem,
    credentials: Option<&Credentials>,
    part_path: &Path,
) -> crate::Result<String> {
    let result = stream_to_file(client, item, credentials, part_path).await;
    if result.is_err() {
        // no .part file survives a failed transfer
        let _ = tokio::fs::remove_file(part_path).await;
    }
    result
}

async fn stream_to_file(
    client: &reqwest::Client,
    item: &ContentItem,
    credentials: Option<&Credentials>,
    part_path: &Path,
) -> crate::Result<String> {
    let url = url::Url::parse(&item.locator).map_err(|e| FetchError::InvalidLocator {
        locator: item.locator.clone(),
        reason: e.to_string(),
    })?;

    let mut request = client.get(url);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let mut response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            file_name: item.file_name.clone(),
            status: status.as_u16(),
        }
        .into());
    }

    let mut file = tokio::fs::File::create(part_path).await?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = item.size_bytes
        && expected != written
    {
        return Err(FetchError::Transfer {
            file_name: item.file_name.clone(),
            reason: format!("expected {expected} bytes, received {written}"),
        }
        .into());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a computed digest against the one the catalog published
pub(crate) fn verify_digest(item: &ContentItem, actual: &str) -> Result<(), FetchError> {
    match &item.sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(actual) => Err(FetchError::DigestMismatch {
            file_name: item.file_name.clone(),
            expected: expected.clone(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}
