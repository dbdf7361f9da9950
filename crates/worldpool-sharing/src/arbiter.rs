//! Sharing arbiter — dynamic lending of spare quota between worlds.
//!
//! A donor world whose sharing config is enabled and `Dynamic` offers part
//! of its unused quota to peers under the same pool. Loans are transient:
//! the donor's quota and allocation are untouched; the borrower's effective
//! availability grows by the borrowed amount until the loan is reclaimed.
//!
//! Reclamation is delayed: when the donor needs its capacity back, a
//! reclaim is scheduled `reclaim_delay_secs` out, and cancelled if the need
//! disappears first. On firing, the loan is revoked and the borrower is
//! notified to release any claim above quota within one evaluation tick.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use worldpool_core::{Clock, ResourcePriority, ResourceType, SharingMode, WorldId, WorldResources};

use crate::reclaim::{ReclaimKey, ReclaimSchedule};

/// An in-flight loan of spare capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub donor_id: WorldId,
    pub borrower_id: WorldId,
    pub resource: ResourceType,
    pub amount: f64,
    pub granted_at: u64,
}

/// A borrower's request for spare capacity from a donor.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareRequest {
    pub borrower_id: WorldId,
    pub priority: ResourcePriority,
    pub resource: ResourceType,
    pub amount: f64,
    pub requested_at: u64,
}

/// Emitted when a reclaim fires. The borrower must release any resource
/// claim above its own quota within one evaluation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimEvent {
    pub donor_id: WorldId,
    pub borrower_id: WorldId,
    pub resource: ResourceType,
    pub amount: f64,
}

/// Callback invoked for each fired reclaim, so the orchestrator can notify
/// the borrower.
pub type ReclaimCallback = Arc<dyn Fn(ReclaimEvent) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Arbitrates lending of spare capacity between worlds under one pool.
pub struct SharingArbiter {
    loans: Vec<Loan>,
    schedule: ReclaimSchedule,
    clock: Arc<dyn Clock>,
    /// Optional callback for fired reclaims.
    reclaim_fn: Option<ReclaimCallback>,
}

impl SharingArbiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            loans: Vec::new(),
            schedule: ReclaimSchedule::new(),
            clock,
            reclaim_fn: None,
        }
    }

    /// Set the callback invoked when a reclaim fires.
    pub fn with_reclaim_fn(mut self, f: ReclaimCallback) -> Self {
        self.reclaim_fn = Some(f);
        self
    }

    // ── Offers and grants ──────────────────────────────────────────

    /// Capacity a donor currently offers for one resource type.
    ///
    /// Spare quota (`quota - allocation`), capped by `max_share_percent`,
    /// less what the donor has already lent out. Zero unless the donor's
    /// sharing is enabled and `Dynamic`.
    pub fn offerable(&self, donor: &WorldResources, rtype: ResourceType) -> f64 {
        let config = donor.sharing();
        if !config.enabled || config.mode != SharingMode::Dynamic || donor.is_retired() {
            return 0.0;
        }
        let cap = donor.headroom(rtype) * config.max_share_percent / 100.0;
        (cap - self.loaned_by(donor.world_id(), rtype)).max(0.0)
    }

    /// Serve requests against a donor's offerable capacity.
    ///
    /// Requests are served in borrower priority order (High before Equal
    /// before Low), earliest-request-first within a priority. Partial
    /// grants are allowed; a request that arrives after the offer is
    /// exhausted gets nothing.
    pub fn grant(&mut self, donor: &WorldResources, requests: &[ShareRequest]) -> Vec<Loan> {
        let mut ordered: Vec<&ShareRequest> = requests
            .iter()
            .filter(|r| {
                r.borrower_id != donor.world_id() && r.amount.is_finite() && r.amount > 0.0
            })
            .collect();
        ordered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.requested_at.cmp(&b.requested_at))
        });

        let now = self.clock.epoch_secs();
        let mut granted = Vec::new();
        for request in ordered {
            let offerable = self.offerable(donor, request.resource);
            if offerable <= 0.0 {
                continue;
            }
            let amount = request.amount.min(offerable);
            let loan = Loan {
                donor_id: donor.world_id().to_string(),
                borrower_id: request.borrower_id.clone(),
                resource: request.resource,
                amount,
                granted_at: now,
            };
            debug!(
                donor_id = %loan.donor_id,
                borrower_id = %loan.borrower_id,
                resource = %loan.resource,
                amount,
                "loan granted"
            );
            self.record_loan(&loan);
            granted.push(loan);
        }
        granted
    }

    /// Merge a new grant into the loan table, one entry per
    /// `(donor, borrower, resource)`.
    fn record_loan(&mut self, loan: &Loan) {
        if let Some(existing) = self.loans.iter_mut().find(|l| {
            l.donor_id == loan.donor_id
                && l.borrower_id == loan.borrower_id
                && l.resource == loan.resource
        }) {
            existing.amount += loan.amount;
        } else {
            self.loans.push(loan.clone());
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Total amount a donor has lent out for one resource type.
    pub fn loaned_by(&self, donor_id: &str, rtype: ResourceType) -> f64 {
        self.loans
            .iter()
            .filter(|l| l.donor_id == donor_id && l.resource == rtype)
            .map(|l| l.amount)
            .sum()
    }

    /// Total amount a borrower currently holds on loan for one type.
    pub fn borrowed_by(&self, borrower_id: &str, rtype: ResourceType) -> f64 {
        self.loans
            .iter()
            .filter(|l| l.borrower_id == borrower_id && l.resource == rtype)
            .map(|l| l.amount)
            .sum()
    }

    /// A world's effective availability: its own unused quota plus whatever
    /// it has borrowed.
    pub fn effective_availability(&self, world: &WorldResources, rtype: ResourceType) -> f64 {
        world.headroom(rtype) + self.borrowed_by(world.world_id(), rtype)
    }

    pub fn active_loans(&self) -> &[Loan] {
        &self.loans
    }

    // ── Reclamation ────────────────────────────────────────────────

    /// Schedule reclamation of an outstanding loan at
    /// `now + donor.sharing().reclaim_delay_secs`.
    ///
    /// Returns the deadline, or `None` when no loan is outstanding. Calling
    /// again while pending keeps the earlier deadline.
    pub fn request_reclaim(
        &mut self,
        donor: &WorldResources,
        borrower_id: &str,
        rtype: ResourceType,
    ) -> Option<u64> {
        let has_loan = self.loans.iter().any(|l| {
            l.donor_id == donor.world_id() && l.borrower_id == borrower_id && l.resource == rtype
        });
        if !has_loan {
            return None;
        }

        let now = self.clock.epoch_secs();
        let fire_at = now + donor.sharing().reclaim_delay_secs;
        let key = ReclaimKey {
            donor_id: donor.world_id().to_string(),
            borrower_id: borrower_id.to_string(),
            resource: rtype,
        };
        self.schedule.schedule(key, fire_at);
        info!(
            donor_id = %donor.world_id(),
            borrower_id,
            resource = %rtype,
            fire_at,
            "reclaim scheduled"
        );
        Some(fire_at)
    }

    /// Cancel a pending reclaim because the donor's need disappeared.
    /// Idempotent: cancelling a non-existent or already-fired reclaim is a
    /// no-op.
    pub fn cancel_reclaim(&mut self, donor_id: &str, borrower_id: &str, rtype: ResourceType) {
        let key = ReclaimKey {
            donor_id: donor_id.to_string(),
            borrower_id: borrower_id.to_string(),
            resource: rtype,
        };
        if self.schedule.cancel(&key) {
            debug!(donor_id, borrower_id, resource = %rtype, "reclaim cancelled");
        }
    }

    pub fn reclaim_pending(&self, donor_id: &str, borrower_id: &str, rtype: ResourceType) -> bool {
        self.schedule.is_pending(&ReclaimKey {
            donor_id: donor_id.to_string(),
            borrower_id: borrower_id.to_string(),
            resource: rtype,
        })
    }

    /// Revoke every loan whose reclaim deadline has passed and return the
    /// borrower notifications.
    pub fn poll_reclaims(&mut self) -> Vec<ReclaimEvent> {
        let now = self.clock.epoch_secs();
        let mut events = Vec::new();
        for key in self.schedule.due(now) {
            let Some(pos) = self.loans.iter().position(|l| {
                l.donor_id == key.donor_id
                    && l.borrower_id == key.borrower_id
                    && l.resource == key.resource
            }) else {
                continue;
            };
            let loan = self.loans.remove(pos);
            info!(
                donor_id = %loan.donor_id,
                borrower_id = %loan.borrower_id,
                resource = %loan.resource,
                amount = loan.amount,
                "loan reclaimed"
            );
            events.push(ReclaimEvent {
                donor_id: loan.donor_id,
                borrower_id: loan.borrower_id,
                resource: loan.resource,
                amount: loan.amount,
            });
        }
        events
    }

    /// Run the reclaim polling loop, dispatching fired reclaims to the
    /// callback.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "sharing arbiter started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let events = self.poll_reclaims();
                    if let Some(ref reclaim_fn) = self.reclaim_fn {
                        for event in events {
                            reclaim_fn(event).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("sharing arbiter shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldpool_core::{ManualClock, SharingConfig};

    fn donor_world(quota: f64, allocation: f64, share_percent: f64) -> WorldResources {
        let mut world = WorldResources::new("donor", "owner-1", "asgard");
        world.set_quota(ResourceType::Cpu, quota).unwrap();
        world.set_allocation(ResourceType::Cpu, allocation).unwrap();
        let mut config = SharingConfig::dynamic(share_percent);
        config.reclaim_delay_secs = 60;
        world.configure_sharing(config).unwrap();
        world
    }

    fn request(
        borrower: &str,
        priority: ResourcePriority,
        amount: f64,
        requested_at: u64,
    ) -> ShareRequest {
        ShareRequest {
            borrower_id: borrower.to_string(),
            priority,
            resource: ResourceType::Cpu,
            amount,
            requested_at,
        }
    }

    fn harness() -> (SharingArbiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        (SharingArbiter::new(clock.clone()), clock)
    }

    #[test]
    fn disabled_or_static_donor_offers_nothing() {
        let (arbiter, _) = harness();

        let mut world = donor_world(100.0, 60.0, 50.0);
        world.disable_sharing();
        assert_eq!(arbiter.offerable(&world, ResourceType::Cpu), 0.0);

        let mut world = donor_world(100.0, 60.0, 50.0);
        let mut config = world.sharing().clone();
        config.mode = SharingMode::Static;
        world.configure_sharing(config).unwrap();
        assert_eq!(arbiter.offerable(&world, ResourceType::Cpu), 0.0);
    }

    #[test]
    fn offer_is_spare_capped_by_share_percent() {
        let (arbiter, _) = harness();
        // 40 spare, 50% shareable.
        let donor = donor_world(100.0, 60.0, 50.0);
        assert_eq!(arbiter.offerable(&donor, ResourceType::Cpu), 20.0);
    }

    #[test]
    fn high_priority_is_served_before_low() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);

        // Both want 20; only 20 is offerable. LOW arrived first but HIGH
        // still wins; LOW receives the remainder, which is zero.
        let requests = vec![
            request("low-world", ResourcePriority::Low, 20.0, 100),
            request("high-world", ResourcePriority::High, 20.0, 200),
        ];
        let grants = arbiter.grant(&donor, &requests);

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].borrower_id, "high-world");
        assert_eq!(grants[0].amount, 20.0);
        assert_eq!(arbiter.borrowed_by("low-world", ResourceType::Cpu), 0.0);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);

        let requests = vec![
            request("second", ResourcePriority::Equal, 15.0, 200),
            request("first", ResourcePriority::Equal, 15.0, 100),
        ];
        let grants = arbiter.grant(&donor, &requests);

        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].borrower_id, "first");
        assert_eq!(grants[0].amount, 15.0);
        // The later request gets the 5-unit remainder.
        assert_eq!(grants[1].borrower_id, "second");
        assert_eq!(grants[1].amount, 5.0);
    }

    #[test]
    fn loans_do_not_touch_the_donor_record() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);

        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 10.0, 100)],
        );
        assert_eq!(donor.quota(ResourceType::Cpu), 100.0);
        assert_eq!(donor.allocation(ResourceType::Cpu), 60.0);
        // Subsequent offers shrink by the outstanding loan.
        assert_eq!(arbiter.offerable(&donor, ResourceType::Cpu), 10.0);
    }

    #[test]
    fn borrowing_raises_effective_availability() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        let mut borrower = WorldResources::new("borrower", "owner-1", "midgard");
        borrower.set_quota(ResourceType::Cpu, 10.0).unwrap();
        borrower.set_allocation(ResourceType::Cpu, 8.0).unwrap();

        assert_eq!(
            arbiter.effective_availability(&borrower, ResourceType::Cpu),
            2.0
        );
        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 12.0, 100)],
        );
        assert_eq!(
            arbiter.effective_availability(&borrower, ResourceType::Cpu),
            14.0
        );
    }

    #[test]
    fn repeat_grants_merge_into_one_loan() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);

        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 5.0, 100)],
        );
        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 5.0, 200)],
        );

        assert_eq!(arbiter.active_loans().len(), 1);
        assert_eq!(arbiter.borrowed_by("borrower", ResourceType::Cpu), 10.0);
    }

    #[test]
    fn reclaim_fires_after_the_delay() {
        let (mut arbiter, clock) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 10.0, 100)],
        );

        let fire_at = arbiter
            .request_reclaim(&donor, "borrower", ResourceType::Cpu)
            .unwrap();
        assert_eq!(fire_at, 10_060);

        // Before the delay elapses nothing fires.
        clock.advance(30);
        assert!(arbiter.poll_reclaims().is_empty());
        assert_eq!(arbiter.borrowed_by("borrower", ResourceType::Cpu), 10.0);

        clock.advance(30);
        let events = arbiter.poll_reclaims();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, 10.0);
        assert_eq!(events[0].borrower_id, "borrower");
        // The loan is revoked.
        assert!(arbiter.active_loans().is_empty());
        assert_eq!(arbiter.borrowed_by("borrower", ResourceType::Cpu), 0.0);
    }

    #[test]
    fn withdrawn_need_cancels_the_reclaim() {
        let (mut arbiter, clock) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 10.0, 100)],
        );
        arbiter.request_reclaim(&donor, "borrower", ResourceType::Cpu);

        // The donor's need disappears halfway through the delay.
        clock.advance(30);
        arbiter.cancel_reclaim("donor", "borrower", ResourceType::Cpu);

        clock.advance(60);
        assert!(arbiter.poll_reclaims().is_empty());
        // The loan stays in place.
        assert_eq!(arbiter.borrowed_by("borrower", ResourceType::Cpu), 10.0);
    }

    #[test]
    fn cancel_reclaim_is_idempotent() {
        let (mut arbiter, _) = harness();
        // Nothing scheduled; cancelling is a no-op, not an error.
        arbiter.cancel_reclaim("donor", "borrower", ResourceType::Cpu);
        arbiter.cancel_reclaim("donor", "borrower", ResourceType::Cpu);
    }

    #[test]
    fn rerequest_keeps_the_earlier_deadline() {
        let (mut arbiter, clock) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        arbiter.grant(
            &donor,
            &[request("borrower", ResourcePriority::Equal, 10.0, 100)],
        );

        let first = arbiter
            .request_reclaim(&donor, "borrower", ResourceType::Cpu)
            .unwrap();
        clock.advance(30);
        arbiter.request_reclaim(&donor, "borrower", ResourceType::Cpu);

        clock.set(first);
        assert_eq!(arbiter.poll_reclaims().len(), 1);
    }

    #[test]
    fn reclaim_without_a_loan_is_not_scheduled() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        assert_eq!(
            arbiter.request_reclaim(&donor, "borrower", ResourceType::Cpu),
            None
        );
        assert!(!arbiter.reclaim_pending("donor", "borrower", ResourceType::Cpu));
    }

    #[test]
    fn self_requests_are_ignored() {
        let (mut arbiter, _) = harness();
        let donor = donor_world(100.0, 60.0, 50.0);
        let grants = arbiter.grant(
            &donor,
            &[request("donor", ResourcePriority::High, 10.0, 100)],
        );
        assert!(grants.is_empty());
    }
}
