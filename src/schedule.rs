use crate::config::{PipelineConfig, ScheduleConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::run_once;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

/// Fires once a day at a wall-clock time in a fixed timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailySchedule {
    time: NaiveTime,
    tz: Tz,
}

impl DailySchedule {
    pub fn new(time: NaiveTime, tz: Tz) -> Self {
        Self { time, tz }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self::new(config.local_time()?, config.tz()?))
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Next occurrence strictly after `now`. When the wall-clock time repeats the earlier
    /// instant is used; when it falls in a DST gap the run moves one hour later.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = now.with_timezone(&self.tz).date_naive();
        // at most one calendar day can be skipped
        for _ in 0..3 {
            if let Some(at) = self.resolve(date.and_time(self.time)) {
                if at > now {
                    return Some(at);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn resolve(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Runs the pipeline every day until ctrl-c. A failed run is logged and the loop goes on.
pub async fn run_daily(config: PipelineConfig, schedule: DailySchedule) -> Result<()> {
    info!(
        time = %schedule.time().format("%H:%M"),
        timezone = %schedule.timezone(),
        "daily schedule started"
    );
    loop {
        let now = Utc::now();
        let next = schedule.next_run_after(now).ok_or_else(|| {
            PipelineError::Configuration("schedule has no upcoming occurrence".to_string())
        })?;
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "waiting for next scheduled run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, schedule stopped");
                return Ok(());
            }
        }

        match run_once(&config).await {
            Ok(report) => info!(
                run_id = %report.run_id,
                entities = ?report.rows_for("load_entities"),
                edges = ?report.rows_for("load_edges"),
                "scheduled run completed"
            ),
            Err(e) => error!(error_kind = e.kind(), error = %e, "scheduled run failed"),
        }
    }
}
