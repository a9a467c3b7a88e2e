use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Proxy};

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};

/// Per-request settings handed down from the caller to every HTTP call of a
/// transfer.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: vec![],
            params: vec![],
            proxy: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RequestOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            proxy: config.proxy.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Build a client for these options. Redirects are never followed
    /// automatically; the resolver handles them.
    pub fn build_client(&self, user_agent: &str) -> TransferResult<Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransferError::Config(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransferError::Config(format!("header value {value:?}: {e}")))?;
            headers.append(name, value);
        }

        let mut builder = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none());

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        } else {
            builder = builder.no_proxy();
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_header_names() {
        let options = RequestOptions::default().header("bad header", "x");
        assert!(matches!(
            options.build_client("test"),
            Err(TransferError::Config(_))
        ));
    }

    #[test]
    fn takes_proxy_and_timeout_from_config() {
        let config = TransferConfig {
            proxy: Some("http://127.0.0.1:3128".into()),
            timeout_secs: 7,
            ..TransferConfig::default()
        };
        let options = RequestOptions::from_config(&config);
        assert_eq!(options.timeout, Duration::from_secs(7));
        assert_eq!(options.proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert!(options.build_client("test").is_ok());
    }
}
