//! Inbound path validation and domain-to-subdomain mapping.

use thiserror::Error;

/// The closed set of Roblox API subdomains the relay will forward to.
/// Order is irrelevant; membership is the only question asked.
pub const ALLOWED_DOMAINS: &[&str] = &[
    "apis",
    "assets",
    "assetdelivery",
    "avatar",
    "badges",
    "catalog",
    "chat",
    "contacts",
    "contentstore",
    "develop",
    "economy",
    "economycreatorstats",
    "followings",
    "friends",
    "games",
    "groups",
    "groupsmoderation",
    "inventory",
    "itemconfiguration",
    "locale",
    "notifications",
    "points",
    "presence",
    "privatemessages",
    "publish",
    "search",
    "thumbnails",
    "trades",
    "translations",
    "users",
];

/// A validated inbound path, split into its routing parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPath {
    /// First path segment, selects the upstream subdomain.
    pub domain: String,
    /// Remaining segments rejoined with `/` (may be empty).
    pub upstream_path: String,
}

/// Rejection of an inbound path before any outbound call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing domain. Use: /catalog/v1/...")]
    MissingDomain,
    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),
}

/// Split an inbound path into (domain label, upstream path).
///
/// Empty segments are discarded, so `//catalog//v1/foo` routes the same as
/// `/catalog/v1/foo`. The query string is not this function's concern.
pub fn route(path: &str) -> Result<RoutedPath, ValidationError> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    let domain = segments.next().ok_or(ValidationError::MissingDomain)?;
    if !ALLOWED_DOMAINS.contains(&domain) {
        return Err(ValidationError::DomainNotAllowed(domain.to_string()));
    }

    Ok(RoutedPath {
        domain: domain.to_string(),
        upstream_path: segments.collect::<Vec<_>>().join("/"),
    })
}

/// Build the full upstream URL for a routed path.
pub fn upstream_url(routed: &RoutedPath, upstream_host: &str, query: Option<&str>) -> String {
    let query = query.map(|q| format!("?{q}")).unwrap_or_default();
    format!(
        "https://{}.{}/{}{}",
        routed.domain, upstream_host, routed.upstream_path, query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_allowed_domain() {
        let routed = route("/catalog/v1/foo").unwrap();
        assert_eq!(routed.domain, "catalog");
        assert_eq!(routed.upstream_path, "v1/foo");
    }

    #[test]
    fn builds_upstream_url() {
        let routed = route("/catalog/v1/foo").unwrap();
        assert_eq!(
            upstream_url(&routed, "roblox.com", None),
            "https://catalog.roblox.com/v1/foo"
        );
        assert_eq!(
            upstream_url(&routed, "roblox.com", Some("limit=10&cursor=abc")),
            "https://catalog.roblox.com/v1/foo?limit=10&cursor=abc"
        );
    }

    #[test]
    fn rejects_unknown_domain() {
        assert_eq!(
            route("/nope/v1/foo"),
            Err(ValidationError::DomainNotAllowed("nope".to_string()))
        );
    }

    #[test]
    fn rejects_empty_path() {
        assert_eq!(route("/"), Err(ValidationError::MissingDomain));
        assert_eq!(route(""), Err(ValidationError::MissingDomain));
    }

    #[test]
    fn discards_empty_segments() {
        let routed = route("//users//v1/users/1").unwrap();
        assert_eq!(routed.domain, "users");
        assert_eq!(routed.upstream_path, "v1/users/1");
    }

    #[test]
    fn domain_only_path_has_empty_remainder() {
        let routed = route("/users").unwrap();
        assert_eq!(routed.upstream_path, "");
        assert_eq!(
            upstream_url(&routed, "roblox.com", None),
            "https://users.roblox.com/"
        );
    }
}
