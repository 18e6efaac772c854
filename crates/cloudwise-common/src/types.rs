use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cloud vendor whose billing and resource data is ingested.
///
/// # Examples
///
/// ```
/// use cloudwise_common::types::Provider;
///
/// let p: Provider = "azure".parse().unwrap();
/// assert_eq!(p, Provider::Azure);
/// assert_eq!(p.to_string(), "azure");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    /// All supported providers, in canonical order. Per-provider logic
    /// iterates this slice instead of branching three times.
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Azure, Provider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }

    /// Name of the provider-side account identifier, for error messages
    /// and API docs (AWS account ID / Azure subscription ID / GCP project ID).
    pub fn external_id_label(&self) -> &'static str {
        match self {
            Provider::Aws => "account ID",
            Provider::Azure => "subscription ID",
            Provider::Gcp => "project ID",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" => Ok(Provider::Gcp),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// A reference to a cloud account record, tagged by provider.
///
/// The `cost_data` / `resources` / `recommendations` tables carry a
/// `(provider, account_id)` column pair rather than a plain foreign key;
/// which table the id joins to is decided by the tag. Modeling the pair
/// as a sum type forces every join to pattern-match on the provider
/// instead of trusting a bare id column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "provider", content = "account_id", rename_all = "lowercase")]
pub enum AccountRef {
    Aws(String),
    Azure(String),
    Gcp(String),
}

impl AccountRef {
    pub fn new(provider: Provider, account_id: impl Into<String>) -> Self {
        match provider {
            Provider::Aws => AccountRef::Aws(account_id.into()),
            Provider::Azure => AccountRef::Azure(account_id.into()),
            Provider::Gcp => AccountRef::Gcp(account_id.into()),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            AccountRef::Aws(_) => Provider::Aws,
            AccountRef::Azure(_) => Provider::Azure,
            AccountRef::Gcp(_) => Provider::Gcp,
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            AccountRef::Aws(id) | AccountRef::Azure(id) | AccountRef::Gcp(id) => id,
        }
    }
}

/// The account ids a user owns, resolved per provider.
///
/// This is the input to every scope filter. "No accounts" is a valid
/// state, not an error; all three lists may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedAccountIds {
    pub aws: Vec<String>,
    pub azure: Vec<String>,
    pub gcp: Vec<String>,
}

impl OwnedAccountIds {
    pub fn for_provider(&self, provider: Provider) -> &[String] {
        match provider {
            Provider::Aws => &self.aws,
            Provider::Azure => &self.azure,
            Provider::Gcp => &self.gcp,
        }
    }

    pub fn for_provider_mut(&mut self, provider: Provider) -> &mut Vec<String> {
        match provider {
            Provider::Aws => &mut self.aws,
            Provider::Azure => &mut self.azure,
            Provider::Gcp => &mut self.gcp,
        }
    }

    /// True when the user owns no accounts on any provider. Callers use
    /// this to short-circuit to an empty result without issuing a query.
    pub fn is_empty(&self) -> bool {
        self.aws.is_empty() && self.azure.is_empty() && self.gcp.is_empty()
    }

    pub fn len(&self) -> usize {
        self.aws.len() + self.azure.len() + self.gcp.len()
    }

    /// In-memory equivalent of the SQL scope filter: does the referenced
    /// account belong to this owner set?
    pub fn contains(&self, account: &AccountRef) -> bool {
        self.for_provider(account.provider())
            .iter()
            .any(|id| id == account.account_id())
    }
}

/// Connection state of a cloud account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Connected,
    Error,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Pending => write!(f, "pending"),
            AccountStatus::Connected => write!(f, "connected"),
            AccountStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AccountStatus::Pending),
            "connected" => Ok(AccountStatus::Connected),
            "error" => Ok(AccountStatus::Error),
            _ => Err(format!("unknown account status: {s}")),
        }
    }
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use cloudwise_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Alert lifecycle state. Transitions only move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Read,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Forward-only: skipping ahead is allowed, going back is not.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        next > *self
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::New => write!(f, "new"),
            AlertStatus::Read => write!(f, "read"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(AlertStatus::New),
            "read" => Ok(AlertStatus::Read),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Alert category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Cost,
    Security,
    Performance,
    Availability,
    Other,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCategory::Cost => write!(f, "cost"),
            AlertCategory::Security => write!(f, "security"),
            AlertCategory::Performance => write!(f, "performance"),
            AlertCategory::Availability => write!(f, "availability"),
            AlertCategory::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for AlertCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cost" => Ok(AlertCategory::Cost),
            "security" => Ok(AlertCategory::Security),
            "performance" => Ok(AlertCategory::Performance),
            "availability" => Ok(AlertCategory::Availability),
            "other" => Ok(AlertCategory::Other),
            _ => Err(format!("unknown alert category: {s}")),
        }
    }
}

/// Recommendation lifecycle state.
///
/// Valid transitions: open → in_progress | dismissed | expired;
/// in_progress → implemented | dismissed | expired. The implemented,
/// dismissed, and expired states are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Open,
    InProgress,
    Implemented,
    Dismissed,
    Expired,
}

impl RecommendationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecommendationStatus::Implemented
                | RecommendationStatus::Dismissed
                | RecommendationStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: RecommendationStatus) -> bool {
        use RecommendationStatus::*;
        match (self, next) {
            (Open, InProgress) | (Open, Dismissed) | (Open, Expired) => true,
            (InProgress, Implemented) | (InProgress, Dismissed) | (InProgress, Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendationStatus::Open => write!(f, "open"),
            RecommendationStatus::InProgress => write!(f, "in_progress"),
            RecommendationStatus::Implemented => write!(f, "implemented"),
            RecommendationStatus::Dismissed => write!(f, "dismissed"),
            RecommendationStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(RecommendationStatus::Open),
            "in_progress" => Ok(RecommendationStatus::InProgress),
            "implemented" => Ok(RecommendationStatus::Implemented),
            "dismissed" => Ok(RecommendationStatus::Dismissed),
            "expired" => Ok(RecommendationStatus::Expired),
            _ => Err(format!("unknown recommendation status: {s}")),
        }
    }
}

/// Estimated impact of implementing a recommendation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Impact::High => write!(f, "high"),
            Impact::Medium => write!(f, "medium"),
            Impact::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Impact {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Impact::High),
            "medium" => Ok(Impact::Medium),
            "low" => Ok(Impact::Low),
            _ => Err(format!("unknown impact: {s}")),
        }
    }
}

/// One append-only entry in a recommendation's status history.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusHistoryEntry {
    pub previous_status: RecommendationStatus,
    pub new_status: RecommendationStatus,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

// User & Auth types

/// Login request.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    /// Login username (required)
    pub username: String,
    /// Password (required)
    pub password: String,
}

/// Login response.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LoginResponse {
    /// JWT access token
    pub token: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_strings() {
        for p in Provider::ALL {
            let parsed: Provider = p.as_str().parse().unwrap();
            assert_eq!(parsed, p);
        }
        assert!("openstack".parse::<Provider>().is_err());
    }

    #[test]
    fn account_ref_carries_provider_tag() {
        let r = AccountRef::new(Provider::Azure, "sub-123");
        assert_eq!(r.provider(), Provider::Azure);
        assert_eq!(r.account_id(), "sub-123");
    }

    #[test]
    fn owned_ids_contains_respects_provider() {
        let owned = OwnedAccountIds {
            aws: vec!["a1".into()],
            azure: vec![],
            gcp: vec!["g1".into()],
        };
        assert!(owned.contains(&AccountRef::Aws("a1".into())));
        // Same id under a different provider tag is a different account
        assert!(!owned.contains(&AccountRef::Azure("a1".into())));
        assert!(!owned.contains(&AccountRef::Gcp("g2".into())));
    }

    #[test]
    fn recommendation_transitions_follow_state_machine() {
        use RecommendationStatus::*;
        assert!(Open.can_transition_to(InProgress));
        assert!(Open.can_transition_to(Dismissed));
        assert!(Open.can_transition_to(Expired));
        assert!(InProgress.can_transition_to(Implemented));
        assert!(InProgress.can_transition_to(Dismissed));
        // Open cannot skip straight to implemented
        assert!(!Open.can_transition_to(Implemented));
        // Terminal states have no outgoing transitions
        for terminal in [Implemented, Dismissed, Expired] {
            assert!(terminal.is_terminal());
            for next in [Open, InProgress, Implemented, Dismissed, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn alert_status_is_forward_only() {
        use AlertStatus::*;
        assert!(New.can_transition_to(Read));
        assert!(New.can_transition_to(Resolved));
        assert!(Read.can_transition_to(Acknowledged));
        assert!(!Resolved.can_transition_to(New));
        assert!(!Acknowledged.can_transition_to(Read));
        assert!(!New.can_transition_to(New));
    }
}
