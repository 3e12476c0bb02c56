//! Supplies the ordered list of trusted `(verify, derive)` thumbprint pairs.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// An ordered `(verifyThumbprint, deriveThumbprint)` tuple identifying an
/// acceptable advertisement key and the derivation key expected to
/// accompany it. Pairs are immutable for the lifetime of a [`Thumbprinter`];
/// `refresh` replaces the whole list atomically rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPair {
    /// Base64url-no-pad SHA-256 thumbprint of the advertisement's verify key.
    pub verify: String,
    /// Base64url-no-pad SHA-256 thumbprint of the advertisement's derive key.
    pub derive: String,
}

/// Supplies the ordered trust pairs, with a way to reload them.
#[async_trait]
pub trait Thumbprinter: Send + Sync {
    /// The ordered list of trusted pairs. Earlier entries are preferred.
    async fn thumbprints(&self) -> Vec<TrustPair>;

    /// Reloads the trust pairs from their source.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationError`] if the reloaded source is
    /// malformed.
    async fn refresh(&self) -> Result<()>;
}

/// Parses a comma-separated `verify/derive` thumbprint list.
///
/// Each entry is trimmed of surrounding whitespace; an entry without exactly
/// one `/` fails with [`Error::ConfigurationError`] (spec's `ThumbprintParse`
/// error kind).
fn parse_pairs(input: &str) -> Result<Vec<TrustPair>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(2, '/');
            let verify = parts.next().unwrap_or_default().trim();
            let derive = parts
                .next()
                .ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "malformed thumbprint pair (expected verify/derive): {entry}"
                    ))
                })?
                .trim();
            if verify.is_empty() || derive.is_empty() {
                return Err(Error::ConfigurationError(format!(
                    "malformed thumbprint pair (expected verify/derive): {entry}"
                )));
            }
            Ok(TrustPair {
                verify: verify.to_string(),
                derive: derive.to_string(),
            })
        })
        .collect()
}

/// Trust pairs loaded once from a static, caller-supplied string.
///
/// `refresh` is a no-op: there is no upstream source to reload from.
pub struct StaticThumbprinter {
    pairs: RwLock<Vec<TrustPair>>,
}

impl StaticThumbprinter {
    /// Parses `input` as a comma-separated list of `verify/derive` tokens.
    pub fn new(input: &str) -> Result<Self> {
        Ok(Self {
            pairs: RwLock::new(parse_pairs(input)?),
        })
    }
}

#[async_trait]
impl Thumbprinter for StaticThumbprinter {
    async fn thumbprints(&self) -> Vec<TrustPair> {
        self.pairs.read().await.clone()
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_single_pair() {
        let tp = StaticThumbprinter::new("abc/def").unwrap();
        let pairs = tp.thumbprints().await;
        assert_eq!(pairs, vec![TrustPair { verify: "abc".into(), derive: "def".into() }]);
    }

    #[tokio::test]
    async fn parses_multiple_pairs_preserving_order() {
        let tp = StaticThumbprinter::new(" abc/def , ghi/jkl ").unwrap();
        let pairs = tp.thumbprints().await;
        assert_eq!(
            pairs,
            vec![
                TrustPair { verify: "abc".into(), derive: "def".into() },
                TrustPair { verify: "ghi".into(), derive: "jkl".into() },
            ]
        );
    }

    #[test]
    fn rejects_malformed_entry() {
        let err = StaticThumbprinter::new("abc-def").unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn refresh_is_a_no_op() {
        let tp = StaticThumbprinter::new("abc/def").unwrap();
        tp.refresh().await.unwrap();
        assert_eq!(tp.thumbprints().await.len(), 1);
    }
}
