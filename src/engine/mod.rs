//! Access-control decision and reconciliation engine
//!
//! Decides, and idempotently applies, facility-access lock/unlock state for
//! members based on payment status, and runs full-population reconciliation
//! passes.
//!
//! The upstream system is the source of truth for ban state and can report
//! "already banned"/"not banned" independently of this engine's last known
//! state (manual upstream edits happen). Treating those as idempotent
//! successes keeps reconciliation passes safe to re-run on any schedule.
//!
//! Batch passes are sequential loops: ban operations are not idempotent at
//! the network layer faster than round-trip latency, and sequential
//! execution avoids read-modify-write races on one member's external state.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::directory::{category_of, Member, MemberCategory, MemberDirectory};
use crate::types::GatekeeperError;
use crate::upstream::access::{classify_upstream_error, AccessApi, AccessApiError, UpstreamOutcome};

/// What happened to one member in one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Locked,
    Unlocked,
    AlreadyLocked,
    AlreadyUnlocked,
    SkippedStaff,
    Error,
}

impl LockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockAction::Locked => "locked",
            LockAction::Unlocked => "unlocked",
            LockAction::AlreadyLocked => "already_locked",
            LockAction::AlreadyUnlocked => "already_unlocked",
            LockAction::SkippedStaff => "skipped_staff",
            LockAction::Error => "error",
        }
    }
}

/// Per-member outcome of a lock/unlock attempt.
///
/// `skipped_staff` and `already_*` are successes, never errors.
#[derive(Debug, Clone)]
pub struct LockActionResult {
    pub member_id: String,
    pub success: bool,
    pub action: LockAction,
    pub error_detail: Option<String>,
}

impl LockActionResult {
    fn ok(member_id: &str, action: LockAction) -> Self {
        Self {
            member_id: member_id.to_string(),
            success: true,
            action,
            error_detail: None,
        }
    }

    fn error(member_id: &str, detail: String) -> Self {
        Self {
            member_id: member_id.to_string(),
            success: false,
            action: LockAction::Error,
            error_detail: Some(detail),
        }
    }
}

/// Aggregate outcome of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct BatchReconciliationResult {
    /// Members whose lock state actually changed
    pub changed: usize,
    /// Idempotent no-ops (already locked / already unlocked)
    pub already_in_state: usize,
    /// Staff members skipped without an upstream call
    pub skipped_staff: usize,
    /// Members evaluated in this pass
    pub total_processed: usize,
    /// Per-member failures; never abort the pass
    pub errors: Vec<String>,
}

impl BatchReconciliationResult {
    fn record(&mut self, result: &LockActionResult) {
        match result.action {
            LockAction::Locked | LockAction::Unlocked => self.changed += 1,
            LockAction::AlreadyLocked | LockAction::AlreadyUnlocked => self.already_in_state += 1,
            LockAction::SkippedStaff => self.skipped_staff += 1,
            LockAction::Error => self.errors.push(format!(
                "{}: {}",
                result.member_id,
                result.error_detail.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

impl fmt::Display for BatchReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} changed, {} already in state, {} staff skipped, {} errors",
            self.total_processed,
            self.changed,
            self.already_in_state,
            self.skipped_staff,
            self.errors.len()
        )
    }
}

/// Administrative override direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Lock,
    Unlock,
}

/// Whether a member should be locked out.
///
/// Staff and comp members are exempt regardless of balance.
pub fn should_lock(member: &Member) -> bool {
    if member.past_due_amount <= 0.0 {
        return false;
    }
    if member.is_locked {
        return false;
    }
    !matches!(
        category_of(member),
        MemberCategory::Staff | MemberCategory::Comp
    )
}

/// Whether a currently locked member should get access back.
///
/// Relies solely on the recomputed past-due amount; there is no distinct
/// "payment just received" signal at the billing boundary.
// TODO: react to payment webhooks if the billing collaborator ever grows
// them, instead of waiting for past_due_amount to be recomputed.
pub fn should_unlock(member: &Member) -> bool {
    member.is_locked && member.past_due_amount <= 0.0
}

/// The reconciliation engine
pub struct AccessControlEngine<A: AccessApi, D: MemberDirectory> {
    access: Arc<A>,
    directory: Arc<D>,
    /// Attribution for upstream ban notes (who acted)
    operator: String,
}

impl<A: AccessApi, D: MemberDirectory> AccessControlEngine<A, D> {
    pub fn new(access: Arc<A>, directory: Arc<D>, operator: impl Into<String>) -> Self {
        Self {
            access,
            directory,
            operator: operator.into(),
        }
    }

    /// Lock one member's facility access.
    ///
    /// Staff are never locked and never hit the upstream. An upstream
    /// "already banned"/"duplicate" answer is an idempotent success.
    pub async fn lock_member(&self, member: &Member) -> LockActionResult {
        if category_of(member) == MemberCategory::Staff {
            return LockActionResult::ok(&member.member_id, LockAction::SkippedStaff);
        }

        let note = format!(
            "Locked by {}: past due ${:.2}",
            self.operator, member.past_due_amount
        );

        match self.access.create_ban(&member.member_id, &note).await {
            Ok(()) => {
                info!(
                    member_id = %member.member_id,
                    past_due = member.past_due_amount,
                    "Member locked"
                );
                LockActionResult::ok(&member.member_id, LockAction::Locked)
            }
            Err(AccessApiError::Rejected(body)) => match classify_upstream_error(&body) {
                UpstreamOutcome::AlreadyInTargetState => {
                    LockActionResult::ok(&member.member_id, LockAction::AlreadyLocked)
                }
                UpstreamOutcome::GenuineError => {
                    warn!(member_id = %member.member_id, error = %body, "Lock failed");
                    LockActionResult::error(&member.member_id, body)
                }
            },
            Err(AccessApiError::Transport(e)) => {
                warn!(member_id = %member.member_id, error = %e, "Lock failed");
                LockActionResult::error(&member.member_id, e)
            }
        }
    }

    /// Unlock one member's facility access. Mirrors [`Self::lock_member`];
    /// an upstream "not banned" answer is an idempotent success.
    pub async fn unlock_member(&self, member: &Member) -> LockActionResult {
        if category_of(member) == MemberCategory::Staff {
            return LockActionResult::ok(&member.member_id, LockAction::SkippedStaff);
        }

        match self.access.remove_ban(&member.member_id).await {
            Ok(()) => {
                info!(member_id = %member.member_id, "Member unlocked");
                LockActionResult::ok(&member.member_id, LockAction::Unlocked)
            }
            Err(AccessApiError::Rejected(body)) => match classify_upstream_error(&body) {
                UpstreamOutcome::AlreadyInTargetState => {
                    LockActionResult::ok(&member.member_id, LockAction::AlreadyUnlocked)
                }
                UpstreamOutcome::GenuineError => {
                    warn!(member_id = %member.member_id, error = %body, "Unlock failed");
                    LockActionResult::error(&member.member_id, body)
                }
            },
            Err(AccessApiError::Transport(e)) => {
                warn!(member_id = %member.member_id, error = %e, "Unlock failed");
                LockActionResult::error(&member.member_id, e)
            }
        }
    }

    /// Lock every past-due, non-exempt, not-yet-locked member.
    ///
    /// Only a failed population load aborts the pass; per-member failures
    /// are accumulated and the loop continues.
    pub async fn check_and_lock_past_due_members(
        &self,
    ) -> Result<BatchReconciliationResult, GatekeeperError> {
        let members = self
            .directory
            .load_population()
            .await
            .map_err(|e| GatekeeperError::Upstream(format!("Population load failed: {}", e)))?;

        let mut batch = BatchReconciliationResult::default();
        for member in &members {
            batch.total_processed += 1;
            if should_lock(member) {
                let result = self.lock_member(member).await;
                batch.record(&result);
            }
        }

        info!(summary = %batch, "Lock reconciliation pass completed");
        Ok(batch)
    }

    /// Unlock every locked member whose balance is settled. Mirrors
    /// [`Self::check_and_lock_past_due_members`].
    pub async fn check_and_unlock_paid_members(
        &self,
    ) -> Result<BatchReconciliationResult, GatekeeperError> {
        let members = self
            .directory
            .load_population()
            .await
            .map_err(|e| GatekeeperError::Upstream(format!("Population load failed: {}", e)))?;

        let mut batch = BatchReconciliationResult::default();
        for member in &members {
            batch.total_processed += 1;
            if should_unlock(member) {
                let result = self.unlock_member(member).await;
                batch.record(&result);
            }
        }

        info!(summary = %batch, "Unlock reconciliation pass completed");
        Ok(batch)
    }

    /// Administrative override: lock or unlock directly, bypassing the
    /// decision rules. An unknown member id is a setup-level error.
    pub async fn manual_toggle_access(
        &self,
        member_id: &str,
        action: ToggleAction,
    ) -> Result<LockActionResult, GatekeeperError> {
        let member = self
            .directory
            .find_member(member_id)
            .await
            .map_err(|e| GatekeeperError::Upstream(format!("Member lookup failed: {}", e)))?
            .ok_or_else(|| GatekeeperError::NotFound(format!("Member '{}'", member_id)))?;

        let result = match action {
            ToggleAction::Lock => self.lock_member(&member).await,
            ToggleAction::Unlock => self.unlock_member(&member).await,
        };

        info!(
            member_id = member_id,
            action = result.action.as_str(),
            success = result.success,
            "Manual access toggle"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, MemberQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::RwLock;

    fn member(id: &str, past_due: f64, status: &str, locked: bool) -> Member {
        Member {
            member_id: id.into(),
            display_name: format!("Member {}", id),
            past_due_amount: past_due,
            status_text: status.into(),
            is_locked: locked,
        }
    }

    /// Access API double with scripted per-call outcomes and call counters
    struct MockAccessApi {
        ban_calls: AtomicU32,
        unban_calls: AtomicU32,
        /// Rejection body per call, pushed front-to-back; empty = success
        ban_script: RwLock<Vec<Result<(), AccessApiError>>>,
        unban_script: RwLock<Vec<Result<(), AccessApiError>>>,
        /// Member ids whose calls fail with a transport error
        fail_transport_for: Vec<String>,
    }

    impl MockAccessApi {
        fn succeeding() -> Self {
            Self {
                ban_calls: AtomicU32::new(0),
                unban_calls: AtomicU32::new(0),
                ban_script: RwLock::new(Vec::new()),
                unban_script: RwLock::new(Vec::new()),
                fail_transport_for: Vec::new(),
            }
        }

        fn with_ban_script(script: Vec<Result<(), AccessApiError>>) -> Self {
            Self {
                ban_script: RwLock::new(script),
                ..Self::succeeding()
            }
        }

        fn with_unban_script(script: Vec<Result<(), AccessApiError>>) -> Self {
            Self {
                unban_script: RwLock::new(script),
                ..Self::succeeding()
            }
        }

        fn failing_transport_for(ids: &[&str]) -> Self {
            Self {
                fail_transport_for: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::succeeding()
            }
        }
    }

    #[async_trait]
    impl AccessApi for MockAccessApi {
        async fn create_ban(&self, member_id: &str, _note: &str) -> Result<(), AccessApiError> {
            self.ban_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transport_for.iter().any(|id| id == member_id) {
                return Err(AccessApiError::Transport("connection reset".into()));
            }
            let mut script = self.ban_script.write().await;
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }

        async fn remove_ban(&self, member_id: &str) -> Result<(), AccessApiError> {
            self.unban_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transport_for.iter().any(|id| id == member_id) {
                return Err(AccessApiError::Transport("connection reset".into()));
            }
            let mut script = self.unban_script.write().await;
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }

    /// Directory double returning a fixed population from the regular
    /// category
    struct MockDirectory {
        members: Vec<Member>,
    }

    #[async_trait]
    impl MemberDirectory for MockDirectory {
        async fn members_by_category(
            &self,
            query: MemberQuery,
        ) -> Result<Vec<Member>, DirectoryError> {
            if query == MemberQuery::Regular {
                Ok(self.members.clone())
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn engine(
        access: Arc<MockAccessApi>,
        members: Vec<Member>,
    ) -> AccessControlEngine<MockAccessApi, MockDirectory> {
        AccessControlEngine::new(access, Arc::new(MockDirectory { members }), "reconciler")
    }

    // ------------------------------------------------------------------
    // Decision rules
    // ------------------------------------------------------------------

    #[test]
    fn test_should_lock_past_due_regular() {
        assert!(should_lock(&member("m-1", 45.0, "Active", false)));
    }

    #[test]
    fn test_should_not_lock_current_or_already_locked() {
        assert!(!should_lock(&member("m-1", 0.0, "Active", false)));
        assert!(!should_lock(&member("m-1", -5.0, "Active", false)));
        assert!(!should_lock(&member("m-1", 45.0, "Active", true)));
    }

    #[test]
    fn test_should_not_lock_exempt_categories() {
        assert!(!should_lock(&member("m-1", 45.0, "Staff", false)));
        assert!(!should_lock(&member("m-1", 45.0, "Comp Membership", false)));
        assert!(!should_lock(&member("m-1", 45.0, "Complimentary", false)));
    }

    #[test]
    fn test_should_unlock_only_locked_and_settled() {
        assert!(should_unlock(&member("m-1", 0.0, "Active", true)));
        assert!(should_unlock(&member("m-1", -10.0, "Active", true)));
        assert!(!should_unlock(&member("m-1", 45.0, "Active", true)));
        assert!(!should_unlock(&member("m-1", 0.0, "Active", false)));
    }

    // ------------------------------------------------------------------
    // Lock / unlock
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_lock_then_already_locked_are_both_successes() {
        let access = Arc::new(MockAccessApi::with_ban_script(vec![
            Ok(()),
            Err(AccessApiError::Rejected(
                r#"{"error":"Member is already banned"}"#.into(),
            )),
        ]));
        let target = member("m-1", 45.0, "Active", false);
        let engine = engine(Arc::clone(&access), vec![]);

        let first = engine.lock_member(&target).await;
        assert!(first.success);
        assert_eq!(first.action, LockAction::Locked);

        let second = engine.lock_member(&target).await;
        assert!(second.success);
        assert_eq!(second.action, LockAction::AlreadyLocked);
        assert!(second.error_detail.is_none());
    }

    #[tokio::test]
    async fn test_staff_never_reach_upstream() {
        let access = Arc::new(MockAccessApi::succeeding());
        let staff = member("m-1", 120.0, "Front Desk Staff", false);
        let engine = engine(Arc::clone(&access), vec![]);

        let lock = engine.lock_member(&staff).await;
        assert!(lock.success);
        assert_eq!(lock.action, LockAction::SkippedStaff);

        let unlock = engine.unlock_member(&staff).await;
        assert!(unlock.success);
        assert_eq!(unlock.action, LockAction::SkippedStaff);

        assert_eq!(access.ban_calls.load(Ordering::SeqCst), 0);
        assert_eq!(access.unban_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_genuine_upstream_error_surfaces() {
        let access = Arc::new(MockAccessApi::with_ban_script(vec![Err(
            AccessApiError::Rejected(r#"{"error":"Internal server error"}"#.into()),
        )]));
        let target = member("m-1", 45.0, "Active", false);
        let engine = engine(access, vec![]);

        let result = engine.lock_member(&target).await;
        assert!(!result.success);
        assert_eq!(result.action, LockAction::Error);
        assert!(result.error_detail.unwrap().contains("Internal server error"));
    }

    #[tokio::test]
    async fn test_unlock_not_banned_is_idempotent_success() {
        // Member with settled balance but still flagged locked; upstream
        // says they were never banned (manual upstream edit)
        let access = Arc::new(MockAccessApi::with_unban_script(vec![Err(
            AccessApiError::Rejected(r#"{"error":"Member is not banned"}"#.into()),
        )]));
        let target = member("m-1", 0.0, "Active", true);
        let engine = engine(Arc::clone(&access), vec![]);

        assert!(should_unlock(&target));
        let result = engine.unlock_member(&target).await;

        assert!(result.success);
        assert_eq!(result.action, LockAction::AlreadyUnlocked);
        assert_eq!(access.unban_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_end_to_end_single_upstream_call() {
        let access = Arc::new(MockAccessApi::succeeding());
        let target = member("m-1", 45.0, "Active", false);
        let engine = engine(Arc::clone(&access), vec![]);

        assert!(should_lock(&target));
        let result = engine.lock_member(&target).await;

        assert!(result.success);
        assert_eq!(result.action, LockAction::Locked);
        assert_eq!(access.ban_calls.load(Ordering::SeqCst), 1);
    }

    // ------------------------------------------------------------------
    // Batch reconciliation
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_batch_lock_partial_failure_does_not_abort() {
        let members = (1..=5)
            .map(|i| member(&format!("m-{}", i), 45.0, "Active", false))
            .collect();
        let access = Arc::new(MockAccessApi::failing_transport_for(&["m-3"]));
        let engine = engine(Arc::clone(&access), members);

        let batch = engine.check_and_lock_past_due_members().await.unwrap();

        assert_eq!(batch.total_processed, 5);
        assert_eq!(batch.changed, 4);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors[0].starts_with("m-3:"));
        // All five were attempted despite the mid-batch failure
        assert_eq!(access.ban_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_batch_lock_skips_exempt_and_current_members() {
        let members = vec![
            member("m-owes", 45.0, "Active", false),
            member("m-current", 0.0, "Active", false),
            member("m-staff", 90.0, "Staff", false),
            member("m-locked", 45.0, "Active", true),
        ];
        let access = Arc::new(MockAccessApi::succeeding());
        let engine = engine(Arc::clone(&access), members);

        let batch = engine.check_and_lock_past_due_members().await.unwrap();

        assert_eq!(batch.total_processed, 4);
        assert_eq!(batch.changed, 1);
        assert!(batch.errors.is_empty());
        assert_eq!(access.ban_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_unlock_paid_members() {
        let members = vec![
            member("m-paid", 0.0, "Active", true),
            member("m-owes", 30.0, "Active", true),
        ];
        let access = Arc::new(MockAccessApi::succeeding());
        let engine = engine(Arc::clone(&access), members);

        let batch = engine.check_and_unlock_paid_members().await.unwrap();

        assert_eq!(batch.total_processed, 2);
        assert_eq!(batch.changed, 1);
        assert_eq!(access.unban_calls.load(Ordering::SeqCst), 1);
    }

    // ------------------------------------------------------------------
    // Manual toggle
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_manual_toggle_bypasses_decision_rules() {
        // Balance is settled, decision rule would never lock; a manual
        // lock still goes through
        let members = vec![member("m-1", 0.0, "Active", false)];
        let access = Arc::new(MockAccessApi::succeeding());
        let engine = engine(Arc::clone(&access), members);

        let result = engine
            .manual_toggle_access("m-1", ToggleAction::Lock)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.action, LockAction::Locked);
        assert_eq!(access.ban_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_toggle_unknown_member_is_error() {
        let engine = engine(Arc::new(MockAccessApi::succeeding()), vec![]);

        let err = engine
            .manual_toggle_access("ghost", ToggleAction::Unlock)
            .await
            .unwrap_err();

        assert!(matches!(err, GatekeeperError::NotFound(_)));
    }
}
