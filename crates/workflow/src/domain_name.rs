//! Domain name helpers.

use common::DomainType;

use crate::error::{Result, WorkflowError};

/// Splits a domain at its first dot into `(base, subdomain)`.
///
/// `"mysite.example.com"` yields `("example.com", "mysite")`.
pub fn split(domain: &str) -> Result<(String, String)> {
    match domain.split_once('.') {
        Some((sub, base)) if !sub.is_empty() && !base.is_empty() => {
            Ok((base.to_string(), sub.to_string()))
        }
        _ => Err(WorkflowError::InvalidDomain(domain.to_string())),
    }
}

/// Hosted zone that holds the record for `domain`.
///
/// Default-domain sites live in the zone of the shared base domain; any
/// other domain is its own zone.
pub fn zone_apex(domain_type: DomainType, domain: &str) -> Result<String> {
    match domain_type {
        DomainType::DefaultDomain => split(domain).map(|(base, _)| base),
        DomainType::SeparateDomain | DomainType::BringYourDomain => Ok(domain.to_string()),
    }
}

/// Fully qualified name of a default-domain site.
pub fn default_domain(subdomain: &str, base_domain: &str) -> String {
    format!("{subdomain}.{base_domain}")
}
