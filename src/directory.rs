//! Member model and the member-directory collaborator boundary
//!
//! The directory is an external collaborator: it owns member records and
//! this crate only reads them. The upstream exposes a "get members by
//! category" query; building the full population means calling it once per
//! tracked category and concatenating.
//!
//! Category detection is deliberately centralized: the upstream flags staff
//! via a free-form status string, and [`category_of`] is the only place
//! that text is ever parsed. Everything downstream operates on the enum.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::SessionContext;

/// Directory query failure
#[derive(Debug, thiserror::Error)]
#[error("Directory error: {0}")]
pub struct DirectoryError(pub String);

/// An external member record. Read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Opaque external key
    pub member_id: String,
    pub display_name: String,
    /// Outstanding balance; <= 0 means current
    pub past_due_amount: f64,
    /// Free-form upstream status string ("Staff", "Comp Membership", ...)
    #[serde(default)]
    pub status_text: String,
    /// Whether the member's facility access is currently locked (banned)
    #[serde(default)]
    pub is_locked: bool,
}

impl Member {
    /// Whether the member owes money
    pub fn is_past_due(&self) -> bool {
        self.past_due_amount > 0.0
    }
}

/// Structured member category, derived once from the free-text status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberCategory {
    Regular,
    Staff,
    Comp,
    PayPerVisit,
}

/// Classify a member from its free-text status string.
///
/// The only place the status text is parsed; the engine operates purely on
/// the returned enum.
pub fn category_of(member: &Member) -> MemberCategory {
    let status = member.status_text.to_lowercase();

    if status.contains("staff") {
        MemberCategory::Staff
    } else if status.contains("complimentary") || status.contains("comp") {
        MemberCategory::Comp
    } else if status.contains("pay per visit") || status.contains("paypervisit") {
        MemberCategory::PayPerVisit
    } else {
        MemberCategory::Regular
    }
}

/// The six upstream directory query categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberQuery {
    Regular,
    PastDue,
    Comp,
    PayPerVisit,
    Staff,
    Inactive,
}

impl MemberQuery {
    /// All tracked categories, in the order the population is assembled
    pub const ALL: [MemberQuery; 6] = [
        MemberQuery::Regular,
        MemberQuery::PastDue,
        MemberQuery::Comp,
        MemberQuery::PayPerVisit,
        MemberQuery::Staff,
        MemberQuery::Inactive,
    ];

    /// Upstream query parameter value
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberQuery::Regular => "regular",
            MemberQuery::PastDue => "pastDue",
            MemberQuery::Comp => "comp",
            MemberQuery::PayPerVisit => "payPerVisit",
            MemberQuery::Staff => "staff",
            MemberQuery::Inactive => "inactive",
        }
    }
}

/// Trait for the member-directory collaborator (allows mocking in tests)
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Fetch all members in one upstream query category
    async fn members_by_category(&self, query: MemberQuery)
        -> Result<Vec<Member>, DirectoryError>;

    /// Load the full member population across all tracked categories.
    ///
    /// One query per category, concatenated in category order. Any query
    /// failure aborts the load: a partial population would make a
    /// reconciliation pass silently incomplete.
    async fn load_population(&self) -> Result<Vec<Member>, DirectoryError> {
        let mut population = Vec::new();
        for query in MemberQuery::ALL {
            let mut members = self.members_by_category(query).await?;
            debug!(category = query.as_str(), count = members.len(), "Loaded members");
            population.append(&mut members);
        }
        Ok(population)
    }

    /// Find one member by external id
    async fn find_member(&self, member_id: &str) -> Result<Option<Member>, DirectoryError> {
        let population = self.load_population().await?;
        Ok(population.into_iter().find(|m| m.member_id == member_id))
    }
}

/// Production directory backed by the upstream members endpoint
pub struct HttpMemberDirectory {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    cookie_header: String,
}

impl HttpMemberDirectory {
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        session: &SessionContext,
        timeout: std::time::Duration,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            cookie_header: session.cookie_header(),
        })
    }
}

#[async_trait]
impl MemberDirectory for HttpMemberDirectory {
    async fn members_by_category(
        &self,
        query: MemberQuery,
    ) -> Result<Vec<Member>, DirectoryError> {
        let url = format!(
            "{}/api/v1/members?category={}&_ts={}",
            self.base_url,
            query.as_str(),
            chrono::Utc::now().timestamp_millis()
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Cookie", &self.cookie_header)
            .send()
            .await
            .map_err(|e| DirectoryError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DirectoryError(format!(
                "HTTP {} for category '{}'",
                response.status(),
                query.as_str()
            )));
        }

        response
            .json::<Vec<Member>>()
            .await
            .map_err(|e| DirectoryError(format!("Unparseable member list: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_with_status(status: &str) -> Member {
        Member {
            member_id: "m-1".into(),
            display_name: "Jordan Reyes".into(),
            past_due_amount: 0.0,
            status_text: status.into(),
            is_locked: false,
        }
    }

    #[test]
    fn test_staff_detected_from_status_text() {
        assert_eq!(category_of(&member_with_status("Staff")), MemberCategory::Staff);
        assert_eq!(
            category_of(&member_with_status("Front Desk Staff - Active")),
            MemberCategory::Staff
        );
    }

    #[test]
    fn test_comp_detected_from_status_text() {
        assert_eq!(
            category_of(&member_with_status("Comp Membership")),
            MemberCategory::Comp
        );
        assert_eq!(
            category_of(&member_with_status("Complimentary")),
            MemberCategory::Comp
        );
    }

    #[test]
    fn test_pay_per_visit_detected() {
        assert_eq!(
            category_of(&member_with_status("Pay Per Visit")),
            MemberCategory::PayPerVisit
        );
    }

    #[test]
    fn test_default_is_regular() {
        assert_eq!(category_of(&member_with_status("Active")), MemberCategory::Regular);
        assert_eq!(category_of(&member_with_status("")), MemberCategory::Regular);
    }

    #[test]
    fn test_query_parameter_values() {
        assert_eq!(MemberQuery::PastDue.as_str(), "pastDue");
        assert_eq!(MemberQuery::PayPerVisit.as_str(), "payPerVisit");
        assert_eq!(MemberQuery::ALL.len(), 6);
    }

    #[tokio::test]
    async fn test_load_population_concatenates_categories() {
        struct FakeDirectory;

        #[async_trait]
        impl MemberDirectory for FakeDirectory {
            async fn members_by_category(
                &self,
                query: MemberQuery,
            ) -> Result<Vec<Member>, DirectoryError> {
                Ok(vec![Member {
                    member_id: format!("m-{}", query.as_str()),
                    display_name: query.as_str().to_string(),
                    past_due_amount: 0.0,
                    status_text: String::new(),
                    is_locked: false,
                }])
            }
        }

        let population = FakeDirectory.load_population().await.unwrap();
        assert_eq!(population.len(), 6);
        assert_eq!(population[0].member_id, "m-regular");
        assert_eq!(population[5].member_id, "m-inactive");

        let found = FakeDirectory.find_member("m-staff").await.unwrap();
        assert_eq!(found.unwrap().display_name, "staff");

        let missing = FakeDirectory.find_member("nope").await.unwrap();
        assert!(missing.is_none());
    }
}
