//! Periodic beat: emits the fixed schedule of maintenance jobs
//!
//! A singleton set of tickers submits the recurring jobs: hourly scan
//! trigger, summary backlog sweep, hourly daily-topics rebuild, and the
//! weekly topic pipeline. Each schedule carries an overrun guard: a tick is
//! skipped while the previously submitted instance has not reached a
//! terminal state, so at most one instance per schedule name runs at a time.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use shared::config::ScannerConfig;
use shared::task::{JobPayload, QueueClass};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::TaskRuntime;

/// When a schedule fires, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every hour at the given minute.
    HourlyAtMinute(u32),
    /// Every `n` minutes, aligned to the hour.
    EveryMinutes(u32),
    /// Once a week at the given weekday and time.
    WeeklyAt {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
}

impl Cadence {
    /// Next fire time strictly after `now`.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::HourlyAtMinute(minute) => {
                let base = now
                    .with_minute(minute)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                if base > now {
                    base
                } else {
                    base + ChronoDuration::hours(1)
                }
            }
            Cadence::EveryMinutes(step) => {
                let step = step.max(1);
                let minute = now.minute();
                let next_slot = ((minute / step) + 1) * step;
                let base = now
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                base + ChronoDuration::minutes(next_slot as i64)
            }
            Cadence::WeeklyAt {
                weekday,
                hour,
                minute,
            } => {
                let today_at = now
                    .with_hour(hour)
                    .and_then(|t| t.with_minute(minute))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                let days_ahead = (7 + weekday.num_days_from_monday() as i64
                    - now.weekday().num_days_from_monday() as i64)
                    % 7;
                let candidate = today_at + ChronoDuration::days(days_ahead);
                if candidate > now {
                    candidate
                } else {
                    candidate + ChronoDuration::days(7)
                }
            }
        }
    }
}

/// One periodic schedule entry.
struct ScheduleEntry {
    name: &'static str,
    cadence: Cadence,
    queue: QueueClass,
    priority: u8,
    payload: fn(&ScannerConfig) -> JobPayload,
}

/// The fixed schedule, all times UTC.
fn schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry {
            name: "scheduled-scan-trigger",
            cadence: Cadence::HourlyAtMinute(0),
            queue: QueueClass::Low,
            priority: 3,
            payload: |_| JobPayload::ScanTrigger {},
        },
        ScheduleEntry {
            name: "summary-backlog-sweep",
            cadence: Cadence::EveryMinutes(30),
            queue: QueueClass::Low,
            priority: 2,
            payload: |config| JobPayload::SummaryBacklogSweep {
                batch_size: config.summary_backlog_batch,
            },
        },
        ScheduleEntry {
            name: "daily-topics-rebuild",
            cadence: Cadence::HourlyAtMinute(0),
            queue: QueueClass::Low,
            priority: 2,
            payload: |_| JobPayload::DailyTopicsRebuild {},
        },
        ScheduleEntry {
            name: "weekly-topic-pipeline",
            cadence: Cadence::WeeklyAt {
                weekday: Weekday::Sun,
                hour: 2,
                minute: 0,
            },
            queue: QueueClass::Low,
            priority: 1,
            payload: |_| JobPayload::RollingTopicPipeline {},
        },
    ]
}

/// Singleton ticker process for the periodic schedule.
pub struct PeriodicBeat {
    runtime: Arc<TaskRuntime>,
    config: Arc<ScannerConfig>,
    shutdown: Arc<AtomicBool>,
    /// Last submitted task id per schedule name, for the overrun guard.
    last_submitted: Arc<Mutex<HashMap<&'static str, String>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PeriodicBeat {
    pub fn new(runtime: Arc<TaskRuntime>, config: Arc<ScannerConfig>) -> Self {
        Self {
            runtime,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_submitted: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns one ticker per schedule entry.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        for entry in schedule() {
            let runtime = self.runtime.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();
            let last_submitted = self.last_submitted.clone();

            handles.push(tokio::spawn(async move {
                run_ticker(entry, runtime, config, shutdown, last_submitted).await;
            }));
        }
        info!("Periodic beat started with {} schedules", handles.len());
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        info!("Periodic beat stopped");
    }
}

async fn run_ticker(
    entry: ScheduleEntry,
    runtime: Arc<TaskRuntime>,
    config: Arc<ScannerConfig>,
    shutdown: Arc<AtomicBool>,
    last_submitted: Arc<Mutex<HashMap<&'static str, String>>>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let now = Utc::now();
        let fire_at = entry.cadence.next_fire(now);
        let wait = (fire_at - now).to_std().unwrap_or_default();
        debug!(schedule = entry.name, "Next fire at {}", fire_at);
        tokio::time::sleep(wait).await;

        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        // Overrun guard: skip the tick while the previous instance of this
        // schedule has not reached a terminal state.
        let previous = last_submitted.lock().unwrap().get(entry.name).cloned();
        if let Some(previous_id) = previous {
            match runtime.get_status(&previous_id).await {
                Ok(Some(record)) if !record.state.is_terminal() => {
                    warn!(
                        schedule = entry.name,
                        task_id = %previous_id,
                        "Skipping tick, previous instance still {}",
                        record.state.as_str()
                    );
                    continue;
                }
                _ => {}
            }
        }

        let payload = (entry.payload)(&config);
        match runtime
            .submit(payload, entry.queue, entry.priority, None)
            .await
        {
            Ok(task_id) => {
                debug!(schedule = entry.name, task_id = %task_id, "Periodic job submitted");
                last_submitted
                    .lock()
                    .unwrap()
                    .insert(entry.name, task_id);
            }
            Err(e) => {
                warn!(schedule = entry.name, "Failed to submit periodic job: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hourly_at_minute_zero() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 15, 30).unwrap();
        let next = Cadence::HourlyAtMinute(0).next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_hourly_fires_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let next = Cadence::HourlyAtMinute(0).next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_every_thirty_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 5, 0).unwrap();
        let next = Cadence::EveryMinutes(30).next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 4, 10, 30, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 45, 0).unwrap();
        let next = Cadence::EveryMinutes(30).next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 4, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_weekly_sunday_two_am() {
        // 2024-03-04 is a Monday
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let next = Cadence::WeeklyAt {
            weekday: Weekday::Sun,
            hour: 2,
            minute: 0,
        }
        .next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn test_weekly_rolls_over_when_passed() {
        // Sunday 03:00, past the 02:00 slot
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();
        let next = Cadence::WeeklyAt {
            weekday: Weekday::Sun,
            hour: 2,
            minute: 0,
        }
        .next_fire(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 17, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_schedule_matches_cadence_table() {
        let entries = schedule();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].name, "scheduled-scan-trigger");
        assert_eq!(entries[0].priority, 3);
        assert_eq!(entries[1].name, "summary-backlog-sweep");
        assert_eq!(entries[1].cadence, Cadence::EveryMinutes(30));
        assert_eq!(entries[2].name, "daily-topics-rebuild");
        assert_eq!(entries[3].name, "weekly-topic-pipeline");
        assert_eq!(entries[3].priority, 1);
        for entry in &entries {
            assert_eq!(entry.queue, QueueClass::Low);
        }
    }
}
