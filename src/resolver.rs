use reqwest::header::{
    HeaderMap, HeaderName, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::{TransferError, TransferResult};
use crate::state::{Destination, TransferTarget};
use crate::utils::suggest_file_name;

/// What a HEAD walk learned about a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: String,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub suggested_file_name: String,
}

/// Follows 301/302 chains with HEAD requests up to a hop limit.
pub struct RedirectResolver {
    client: Client,
    max_redirects: usize,
}

impl RedirectResolver {
    pub fn new(client: Client, max_redirects: usize) -> Self {
        Self {
            client,
            max_redirects,
        }
    }

    pub async fn resolve(&self, target: &TransferTarget) -> TransferResult<ResolvedTarget> {
        let default_name = match &target.destination {
            Destination::Directory { default_name, .. } => default_name.clone(),
            Destination::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let mut current = target.url.clone();
        let mut hops = 0;

        loop {
            let response = self
                .client
                .head(&current)
                .query(&target.options.params)
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                if hops == self.max_redirects {
                    return Err(TransferError::TooManyRedirects {
                        url: target.url.clone(),
                        limit: self.max_redirects,
                    });
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| TransferError::MissingLocation {
                        url: current.clone(),
                    })?;
                let next = resolve_location(&current, location)?;
                debug!(from = %current, to = %next, status = status.as_u16(), "following redirect");
                current = next;
                hops += 1;
                continue;
            }

            if status != StatusCode::OK {
                return Err(TransferError::Upstream {
                    url: current,
                    status: status.as_u16(),
                });
            }

            let headers = response.headers();
            let content_length =
                header_str(headers, CONTENT_LENGTH).and_then(|s| s.trim().parse::<u64>().ok());
            let content_type = header_str(headers, CONTENT_TYPE).map(str::to_string);
            let suggested_file_name = suggest_file_name(
                content_type.as_deref(),
                header_str(headers, CONTENT_DISPOSITION),
                &current,
                &default_name,
            );

            return Ok(ResolvedTarget {
                url: current,
                content_length,
                content_type,
                suggested_file_name,
            });
        }
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absolute locations are taken verbatim; anything else is resolved against
/// the scheme and host of `current`.
pub fn resolve_location(current: &str, location: &str) -> TransferResult<String> {
    let lower = location.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(location.to_string());
    }
    let base = Url::parse(current)?;
    Ok(base.join(location)?.to_string())
}
