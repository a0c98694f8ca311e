//! Bookkeeping for whoever drives the sweeper on a schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sweep::SweepReport;

/// Run history of the reminder scheduler. Owned by the caller and updated
/// around each sweep; never held across one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
  pub last_run_at: Option<DateTime<Utc>>,
  /// Sweeps started but not yet finished.
  pub in_flight:   u32,
  pub total_runs:  u64,
  pub last_report: Option<SweepReport>,
  pub last_error:  Option<String>,
}

impl SchedulerState {
  pub fn begin(&mut self) { self.in_flight += 1; }

  pub fn finish(&mut self, report: SweepReport) {
    self.in_flight = self.in_flight.saturating_sub(1);
    self.total_runs += 1;
    self.last_run_at = Some(report.ran_at);
    self.last_report = Some(report);
    self.last_error = None;
  }

  pub fn fail(&mut self, at: DateTime<Utc>, error: impl ToString) {
    self.in_flight = self.in_flight.saturating_sub(1);
    self.total_runs += 1;
    self.last_run_at = Some(at);
    self.last_error = Some(error.to_string());
  }
}
