//! Host name resolution
//!
//! Maps a server's reported host string to the string the pool regexes are
//! matched against. In IP mode the balancer never calls into here; otherwise
//! IP literals are reverse-resolved to a name and plain names are validated
//! against DNS and returned unchanged.

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;

/// Resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to initialize system resolver: {0}")]
    Init(String),

    #[error("Unable to determine host name for {host}: {reason}")]
    Unresolvable { host: String, reason: String },
}

/// Maps a host string to the string that will be regex-matched.
///
/// Callers treat a resolution failure as "no regex matches", which lands the
/// server in the default pool.
#[async_trait::async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<String, ResolveError>;
}

/// System-DNS backed resolver. Results are not cached, so a server moving to
/// a new address is picked up on the next pool recheck.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Build a resolver from the host system's DNS configuration.
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ResolveError::Init(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait::async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<String, ResolveError> {
        match host.parse::<IpAddr>() {
            Ok(ip) => {
                // PTR lookup; trailing root dot stripped so the name compares
                // like the names servers report.
                let lookup =
                    self.inner
                        .reverse_lookup(ip)
                        .await
                        .map_err(|e| ResolveError::Unresolvable {
                            host: host.to_string(),
                            reason: e.to_string(),
                        })?;
                let name = lookup
                    .iter()
                    .next()
                    .ok_or_else(|| ResolveError::Unresolvable {
                        host: host.to_string(),
                        reason: "no PTR records".to_string(),
                    })?;
                Ok(name.to_utf8().trim_end_matches('.').to_string())
            }
            Err(_) => {
                // Already a name. Confirm it resolves, then match against the
                // name as reported.
                self.inner
                    .lookup_ip(host)
                    .await
                    .map_err(|e| ResolveError::Unresolvable {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(host.to_string())
            }
        }
    }
}
