use anyhow::Result;

use crate::{error::Error, storage::StoreAddress};

/// Where a remote's root metadata object lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLocator {
    /// A fixed root object
    Direct(StoreAddress),
    /// A mutable naming record pointing at the current root
    Named(String),
}

impl RemoteLocator {
    /// Parse a remote URL.
    ///
    /// Git strips the `cas::` prefix before invoking us, but a user-written
    /// URL may still carry it, so both spellings are accepted:
    /// - `cas://<name>` / `/name/<name>`: naming record
    /// - `cas:///<address>` / `/object/<address>`: direct root address
    pub fn parse(url: &str) -> Result<Self> {
        let stripped = url.strip_prefix("cas::").unwrap_or(url);

        let locator = if let Some(rest) = stripped.strip_prefix("cas://") {
            match rest.strip_prefix('/') {
                Some(address) => RemoteLocator::Direct(address.to_string()),
                None => RemoteLocator::Named(rest.trim_end_matches('/').to_string()),
            }
        } else if let Some(address) = stripped.strip_prefix("/object/") {
            RemoteLocator::Direct(address.to_string())
        } else if let Some(name) = stripped.strip_prefix("/name/") {
            RemoteLocator::Named(name.to_string())
        } else {
            return Err(Error::InvalidUrl(url.to_string()).into());
        };

        let key = match &locator {
            RemoteLocator::Direct(key) | RemoteLocator::Named(key) => key,
        };
        if key.is_empty() || key.contains('/') {
            return Err(Error::InvalidUrl(url.to_string()).into());
        }

        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_forms() {
        for url in ["cas://node-a", "cas::cas://node-a", "/name/node-a", "cas::/name/node-a", "cas://node-a/"] {
            assert_eq!(
                RemoteLocator::parse(url).unwrap(),
                RemoteLocator::Named("node-a".to_string()),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_direct_forms() {
        for url in ["cas:///abc123", "/object/abc123", "cas::/object/abc123"] {
            assert_eq!(
                RemoteLocator::parse(url).unwrap(),
                RemoteLocator::Direct("abc123".to_string()),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_invalid_urls() {
        for url in ["/tmp/storage", "https://example.com/repo", "cas://", "/object/", "/name/a/b"] {
            let err = RemoteLocator::parse(url).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<Error>(), Some(Error::InvalidUrl(_))),
                "{}",
                url
            );
        }
    }
}
