//! Lifecycle states for sites, provisions and outbox rows.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a stored status string or code is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle status of a site.
///
/// Transitions only move forward in declaration order, with one exception:
/// a `Created` site may go back to `AwaitingDeactivation`.
///
/// ```text
/// InCreation ─► AwaitingProvision ─► AwaitingDeactivation ─► Created ─► Deactivated ─► Deleted
///                                            ▲                  │
///                                            └──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SiteStatus {
    #[default]
    InCreation,
    AwaitingProvision,
    AwaitingDeactivation,
    Created,
    Deactivated,
    Deleted,
}

impl SiteStatus {
    fn rank(&self) -> u8 {
        match self {
            SiteStatus::InCreation => 0,
            SiteStatus::AwaitingProvision => 1,
            SiteStatus::AwaitingDeactivation => 2,
            SiteStatus::Created => 3,
            SiteStatus::Deactivated => 4,
            SiteStatus::Deleted => 5,
        }
    }

    /// Returns true if a site may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SiteStatus) -> bool {
        if *self == SiteStatus::Created && next == SiteStatus::AwaitingDeactivation {
            return true;
        }
        next.rank() > self.rank()
    }

    /// Returns true if the site has a live distribution that must be torn
    /// down before it stops serving.
    pub fn is_live(&self) -> bool {
        matches!(self, SiteStatus::Created)
    }

    /// Returns true while the provisioning pipeline may act on the site.
    /// Any other status means the pipeline was overtaken and must stop.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, SiteStatus::AwaitingProvision)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::InCreation => "InCreation",
            SiteStatus::AwaitingProvision => "AwaitingProvision",
            SiteStatus::AwaitingDeactivation => "AwaitingDeactivation",
            SiteStatus::Created => "Created",
            SiteStatus::Deactivated => "Deactivated",
            SiteStatus::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InCreation" => Ok(SiteStatus::InCreation),
            "AwaitingProvision" => Ok(SiteStatus::AwaitingProvision),
            "AwaitingDeactivation" => Ok(SiteStatus::AwaitingDeactivation),
            "Created" => Ok(SiteStatus::Created),
            "Deactivated" => Ok(SiteStatus::Deactivated),
            "Deleted" => Ok(SiteStatus::Deleted),
            other => Err(ParseStatusError {
                kind: "site status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a site's public domain is obtained. Doubles as the provision type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainType {
    /// `{subdomain}.{base domain}` under the platform's own zone.
    DefaultDomain,
    /// A domain registered on the user's behalf.
    SeparateDomain,
    /// A domain the user already owns. Not provisioned yet.
    BringYourDomain,
}

impl DomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::DefaultDomain => "DefaultDomain",
            DomainType::SeparateDomain => "SeparateDomain",
            DomainType::BringYourDomain => "BringYourDomain",
        }
    }
}

impl std::fmt::Display for DomainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DomainType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DefaultDomain" => Ok(DomainType::DefaultDomain),
            "SeparateDomain" => Ok(DomainType::SeparateDomain),
            "BringYourDomain" => Ok(DomainType::BringYourDomain),
            other => Err(ParseStatusError {
                kind: "domain type",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of the cloud-side provisioning of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProvisionStatus {
    #[default]
    InProcess,
    Provisioned,
    InError,
    Deactivated,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStatus::InProcess => "InProcess",
            ProvisionStatus::Provisioned => "Provisioned",
            ProvisionStatus::InError => "InError",
            ProvisionStatus::Deactivated => "Deactivated",
        }
    }
}

impl std::fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProvisionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProcess" => Ok(ProvisionStatus::InProcess),
            "Provisioned" => Ok(ProvisionStatus::Provisioned),
            "InError" => Ok(ProvisionStatus::InError),
            "Deactivated" => Ok(ProvisionStatus::Deactivated),
            other => Err(ParseStatusError {
                kind: "provision status",
                value: other.to_string(),
            }),
        }
    }
}

/// Processing status of an outbox row, stored as a `SMALLINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    #[default]
    NotProcessed,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn code(&self) -> i16 {
        match self {
            OutboxStatus::NotProcessed => 0,
            OutboxStatus::Processed => 1,
            OutboxStatus::Failed => 2,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, ParseStatusError> {
        match code {
            0 => Ok(OutboxStatus::NotProcessed),
            1 => Ok(OutboxStatus::Processed),
            2 => Ok(OutboxStatus::Failed),
            other => Err(ParseStatusError {
                kind: "outbox status",
                value: other.to_string(),
            }),
        }
    }

    /// Processed and Failed rows are never picked up again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboxStatus::NotProcessed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::NotProcessed => "NotProcessed",
            OutboxStatus::Processed => "Processed",
            OutboxStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_SITE_STATUSES: [SiteStatus; 6] = [
        SiteStatus::InCreation,
        SiteStatus::AwaitingProvision,
        SiteStatus::AwaitingDeactivation,
        SiteStatus::Created,
        SiteStatus::Deactivated,
        SiteStatus::Deleted,
    ];

    #[test]
    fn site_transitions_are_forward_only() {
        assert!(SiteStatus::InCreation.can_transition_to(SiteStatus::AwaitingProvision));
        assert!(SiteStatus::AwaitingProvision.can_transition_to(SiteStatus::Created));
        assert!(SiteStatus::Created.can_transition_to(SiteStatus::Deactivated));
        assert!(SiteStatus::Deactivated.can_transition_to(SiteStatus::Deleted));

        assert!(!SiteStatus::Created.can_transition_to(SiteStatus::AwaitingProvision));
        assert!(!SiteStatus::Deleted.can_transition_to(SiteStatus::Deactivated));
        assert!(!SiteStatus::Deactivated.can_transition_to(SiteStatus::Created));
    }

    #[test]
    fn created_may_return_to_awaiting_deactivation() {
        assert!(SiteStatus::Created.can_transition_to(SiteStatus::AwaitingDeactivation));
    }

    #[test]
    fn only_awaiting_provision_is_provisioning() {
        let provisioning: Vec<_> = ALL_SITE_STATUSES
            .into_iter()
            .filter(SiteStatus::is_provisioning)
            .collect();
        assert_eq!(provisioning, vec![SiteStatus::AwaitingProvision]);
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in ALL_SITE_STATUSES {
            assert!(!status.can_transition_to(status), "{status}");
        }
    }

    #[test]
    fn site_status_round_trips_through_text() {
        for status in ALL_SITE_STATUSES {
            assert_eq!(status.as_str().parse::<SiteStatus>().unwrap(), status);
        }
        assert!("Archived".parse::<SiteStatus>().is_err());
    }

    #[test]
    fn domain_type_parses_known_values() {
        assert_eq!(
            "SeparateDomain".parse::<DomainType>().unwrap(),
            DomainType::SeparateDomain
        );
        let err = "Custom".parse::<DomainType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown domain type value: Custom");
    }

    #[test]
    fn provision_status_parses_known_values() {
        assert_eq!(
            "InError".parse::<ProvisionStatus>().unwrap(),
            ProvisionStatus::InError
        );
        assert!("Unknown".parse::<ProvisionStatus>().is_err());
    }

    #[test]
    fn outbox_status_codes() {
        assert_eq!(OutboxStatus::NotProcessed.code(), 0);
        assert_eq!(OutboxStatus::Processed.code(), 1);
        assert_eq!(OutboxStatus::Failed.code(), 2);
        assert_eq!(OutboxStatus::from_code(2).unwrap(), OutboxStatus::Failed);
        assert!(OutboxStatus::from_code(3).is_err());
    }

    #[test]
    fn outbox_terminal_states() {
        assert!(!OutboxStatus::NotProcessed.is_terminal());
        assert!(OutboxStatus::Processed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serialization() {
        let json = serde_json::to_string(&DomainType::DefaultDomain).unwrap();
        assert_eq!(json, "\"DefaultDomain\"");
        let status: SiteStatus = serde_json::from_str("\"Created\"").unwrap();
        assert_eq!(status, SiteStatus::Created);
    }
}
