//! GeoIP enrichment boundary
//!
//! Lookup is an external collaborator consumed through [`GeoResolver`].
//! Resolution never fails: any error degrades to an empty display
//! string.

/// Resolves an IP address to a "City, Country" display string
pub trait GeoResolver: Send + Sync {
    /// Resolve an IP to a display string; empty when unknown
    fn resolve(&self, ip: &str) -> String;
}

/// Resolver used when no GeoIP database is configured
pub struct NoopGeoResolver;

impl GeoResolver for NoopGeoResolver {
    fn resolve(&self, _ip: &str) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_resolver_is_empty() {
        assert_eq!(NoopGeoResolver.resolve("203.0.113.7"), "");
        assert_eq!(NoopGeoResolver.resolve("not-an-ip"), "");
    }
}
