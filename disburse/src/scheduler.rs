//! Scheduled batch disbursement runs.
//!
//! Each run pulls the tenant's eligible owners, caps work at the batch
//! size, spaces provider calls with a configurable delay and honours a
//! per-run deadline. A single owner failure never aborts the batch; owners
//! not processed are picked up by the next run.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use nyumbapay_common::{PayoutSchedule, TenantDirectory, TenantId};

use crate::error::DisburseError;
use crate::repository::PayoutDestinationDirectory;
use crate::service::{DisbursementRequest, DisbursementService};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Owners processed per run.
    pub batch_size: usize,
    /// Pause between provider calls to smooth rate limits.
    pub delay_between: std::time::Duration,
    /// Per-run deadline; unprocessed owners wait for the next run.
    pub run_deadline: std::time::Duration,
    /// How often the loop checks whether a run is due.
    pub poll_interval: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_between: std::time::Duration::from_millis(200),
            run_deadline: std::time::Duration::from_secs(600),
            poll_interval: std::time::Duration::from_secs(3600),
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub eligible: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_no_destination: usize,
    /// Owners left for the next run by the batch cap or deadline.
    pub deferred: usize,
}

fn schedule_is_due(schedule: &PayoutSchedule, date: NaiveDate) -> bool {
    match schedule {
        PayoutSchedule::Daily => true,
        PayoutSchedule::Weekly(weekday) => date.weekday() == *weekday,
        PayoutSchedule::Monthly(day) => date.day() == u32::from(*day),
    }
}

/// Runs owner payouts on the tenant's payout schedule.
pub struct DisbursementScheduler {
    service: Arc<DisbursementService>,
    destinations: Arc<dyn PayoutDestinationDirectory>,
    tenants: Arc<dyn TenantDirectory>,
    config: SchedulerConfig,
    last_run: Mutex<Option<NaiveDate>>,
}

impl DisbursementScheduler {
    pub fn new(
        service: Arc<DisbursementService>,
        destinations: Arc<dyn PayoutDestinationDirectory>,
        tenants: Arc<dyn TenantDirectory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            destinations,
            tenants,
            config,
            last_run: Mutex::new(None),
        }
    }

    /// Execute one batch immediately.
    #[instrument(skip(self))]
    pub async fn run_once(&self, tenant_id: &TenantId) -> Result<RunReport, DisburseError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await
            .ok_or_else(|| DisburseError::TenantNotFound(tenant_id.clone()))?;
        let owners = self
            .service
            .eligible_owners(tenant_id, tenant.payout.minimum_disbursement)
            .await?;

        let deadline = Instant::now() + self.config.run_deadline;
        let today = Utc::now().date_naive();
        let mut report = RunReport {
            eligible: owners.len(),
            ..RunReport::default()
        };

        for (index, owner) in owners.iter().enumerate() {
            if report.attempted >= self.config.batch_size || Instant::now() >= deadline {
                report.deferred = owners.len() - index;
                break;
            }

            let Some((destination, destination_type)) = self
                .destinations
                .destination_for(tenant_id, &owner.owner_id)
                .await
            else {
                warn!(owner_id = %owner.owner_id, "No payout destination on file, skipping");
                report.skipped_no_destination += 1;
                continue;
            };

            report.attempted += 1;
            let request = DisbursementRequest {
                tenant_id: tenant_id.clone(),
                owner_id: owner.owner_id.clone(),
                amount: None,
                destination,
                destination_type,
                // One payout per owner per scheduled day; reruns replay.
                idempotency_key: format!("sched-{tenant_id}-{}-{today}", owner.owner_id),
            };
            match self.service.process(request).await {
                Ok(result)
                    if result.disbursement.status
                        != crate::disbursement::DisbursementStatus::Failed =>
                {
                    report.succeeded += 1;
                }
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(owner_id = %owner.owner_id, error = %e, "Scheduled payout failed");
                    report.failed += 1;
                }
            }

            if index + 1 < owners.len() {
                tokio::time::sleep(self.config.delay_between).await;
            }
        }

        info!(
            eligible = report.eligible,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            "Disbursement batch finished"
        );
        Ok(report)
    }

    /// Run one batch if the tenant's schedule says today is a payout day
    /// and no run has happened today yet.
    pub async fn run_due(&self, tenant_id: &TenantId) -> Result<Option<RunReport>, DisburseError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await
            .ok_or_else(|| DisburseError::TenantNotFound(tenant_id.clone()))?;
        let today = Utc::now().date_naive();
        if *self.last_run.lock() == Some(today) {
            return Ok(None);
        }
        if !schedule_is_due(&tenant.payout.schedule, today) {
            return Ok(None);
        }
        let report = self.run_once(tenant_id).await?;
        *self.last_run.lock() = Some(today);
        Ok(Some(report))
    }

    /// Poll until the task is aborted.
    pub async fn run_loop(&self, tenant_id: TenantId) {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if let Err(e) = self.run_due(&tenant_id).await {
                warn!(error = %e, "Scheduled disbursement run failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn schedule_due_rules() {
        // 2026-02-13 is a Friday.
        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        assert!(schedule_is_due(&PayoutSchedule::Daily, friday));
        assert!(schedule_is_due(&PayoutSchedule::Weekly(Weekday::Fri), friday));
        assert!(!schedule_is_due(&PayoutSchedule::Weekly(Weekday::Mon), friday));
        assert!(schedule_is_due(&PayoutSchedule::Monthly(13), friday));
        assert!(!schedule_is_due(&PayoutSchedule::Monthly(1), friday));
    }
}
