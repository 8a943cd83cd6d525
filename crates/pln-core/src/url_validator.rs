use std::net::Ipv4Addr;

use reqwest::Url;

use crate::error::{PipelineError, Result};

/// Checks that a journal-supplied URL is a plausible public http(s) address.
#[derive(Debug, Clone, Default)]
pub struct UrlValidator {
    forbidden_hosts: Vec<String>,
}

impl UrlValidator {
    pub fn new<I, S>(forbidden_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            forbidden_hosts: forbidden_hosts
                .into_iter()
                .map(|host| host.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn validate(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|err| PipelineError::Validation(format!("{url} is not a valid URL: {err}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::Validation(format!(
                "{url} must use http or https"
            )));
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => {
                return Err(PipelineError::Validation(format!("{url} has no host")));
            }
        };

        if host.contains(':') || host.starts_with('[') {
            return Err(PipelineError::Validation(format!(
                "{url} uses an IPv6 address"
            )));
        }

        if host.parse::<Ipv4Addr>().is_ok() {
            return Err(PipelineError::Validation(format!(
                "{url} uses an IP address"
            )));
        }

        if !host.contains('.') {
            return Err(PipelineError::Validation(format!(
                "{url} does not use a fully qualified host name"
            )));
        }

        if self.forbidden_hosts.iter().any(|forbidden| *forbidden == host) {
            return Err(PipelineError::Validation(format!(
                "{url} points at a forbidden host"
            )));
        }

        Ok(parsed)
    }

    pub fn is_valid(&self, url: &str) -> bool {
        self.validate(url).is_ok()
    }
}
