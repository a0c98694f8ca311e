//! The background reminder loop.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use recart_core::{
  mail::Mailer,
  store::{CartStore, ProfileDirectory},
};
use recart_worker::{SchedulerState, SweepReport, Sweeper};
use tokio::{
  sync::Mutex,
  task::JoinHandle,
  time::MissedTickBehavior,
};

/// Run one sweep followed by the retention purge, recording the run in
/// `scheduler`. The lock is only taken to update the record.
pub async fn run_sweep<S, P, M>(
  sweeper: &Sweeper<S, P, M>,
  scheduler: &Mutex<SchedulerState>,
  now: DateTime<Utc>,
) -> Result<SweepReport, S::Error>
where
  S: CartStore,
  P: ProfileDirectory,
  M: Mailer,
{
  scheduler.lock().await.begin();

  match sweeper.sweep(now).await {
    Ok(report) => {
      if let Err(e) = sweeper.purge(now).await {
        tracing::warn!(error = %e, "retention purge failed");
      }
      scheduler.lock().await.finish(report.clone());
      Ok(report)
    }
    Err(e) => {
      scheduler.lock().await.fail(now, &e);
      Err(e)
    }
  }
}

/// Spawn the periodic sweep. The first run happens immediately.
pub fn spawn<S, P, M>(
  sweeper: Arc<Sweeper<S, P, M>>,
  scheduler: Arc<Mutex<SchedulerState>>,
  every: Duration,
) -> JoinHandle<()>
where
  S: CartStore + 'static,
  P: ProfileDirectory + 'static,
  M: Mailer + 'static,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      if let Err(e) = run_sweep(&sweeper, &scheduler, Utc::now()).await {
        tracing::error!(error = %e, "reminder sweep failed");
      }
    }
  })
}
