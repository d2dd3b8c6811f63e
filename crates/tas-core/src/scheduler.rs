//! Recurring sweep schedule.
//!
//! - Standard 5-field cron syntax (min hour dom mon dow)
//! - Evaluated in one fixed calendar time zone from config
//! - Non-overlapping: a tick that fires while the previous sweep is still
//!   running is skipped, never queued or run concurrently
//!
//! The cron engine is self-contained; we intentionally avoid a cron
//! dependency to keep offline builds working.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{gatekeeper::Gatekeeper, Error, Result};

#[derive(Clone)]
pub struct SweepScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    expr: CronExpr,
    timezone: Tz,
    gatekeeper: Arc<Gatekeeper>,
    state: tokio::sync::Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    sweep_running: bool,
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl SweepScheduler {
    pub fn new(cron: &str, timezone: Tz, gatekeeper: Arc<Gatekeeper>) -> Result<Self> {
        let expr = CronExpr::parse(cron)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                expr,
                timezone,
                gatekeeper,
                state: tokio::sync::Mutex::new(SchedulerState::default()),
            }),
        })
    }

    pub async fn start(&self) {
        let mut st = self.inner.state.lock().await;
        if st.task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        st.cancel = Some(cancel.clone());

        let inner = self.inner.clone();
        st.task = Some(tokio::spawn(async move {
            tick_loop(inner, cancel).await;
        }));
        println!("[CRON] sweep schedule started ({})", self.inner.timezone);
    }

    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = st.task.take() {
            task.abort(); // best-effort
        }
    }
}

async fn tick_loop(inner: Arc<SchedulerInner>, cancel: CancellationToken) {
    loop {
        let now = Utc::now().with_timezone(&inner.timezone);
        let Some(next) = inner.expr.next_after(now) else {
            eprintln!("[CRON] schedule has no next fire time, stopping");
            break;
        };

        let now = Utc::now().with_timezone(&inner.timezone);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => fire(&inner).await,
        }
    }
}

/// Run one tick in the background, unless the previous one is still going.
async fn fire(inner: &Arc<SchedulerInner>) {
    {
        let mut st = inner.state.lock().await;
        if st.sweep_running {
            println!("[CRON] previous sweep still running, skipping tick");
            return;
        }
        st.sweep_running = true;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        if let Err(e) = inner.gatekeeper.heartbeat().await {
            eprintln!("[CRON] heartbeat failed: {e}");
        }
        if let Err(e) = inner.gatekeeper.sweep().await {
            eprintln!("[CRON] sweep failed: {e}");
        }
        inner.state.lock().await.sweep_running = false;
    });
}

// === Cron expression engine ===

#[derive(Clone, Debug)]
struct CronExpr {
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

impl CronExpr {
    fn parse(expr: &str) -> Result<Self> {
        let parts = expr
            .split_whitespace()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>();
        if parts.len() != 5 {
            return Err(Error::Config(format!(
                "expected 5 fields, got {}",
                parts.len()
            )));
        }

        let min = Field::parse(parts[0], 0, 59, false)?;
        let hour = Field::parse(parts[1], 0, 23, false)?;
        let dom = Field::parse(parts[2], 1, 31, false)?;
        let mon = Field::parse(parts[3], 1, 12, false)?;
        let dow = Field::parse(parts[4], 0, 6, true)?;

        Ok(Self {
            min,
            hour,
            dom,
            mon,
            dow,
        })
    }

    fn matches<Z: TimeZone>(&self, dt: &DateTime<Z>) -> bool {
        let minute = dt.minute();
        let hour = dt.hour();
        let dom = dt.day();
        let mon = dt.month();
        let dow = dt.weekday().num_days_from_sunday();

        if !self.min.contains(minute) {
            return false;
        }
        if !self.hour.contains(hour) {
            return false;
        }
        if !self.mon.contains(mon) {
            return false;
        }

        // Standard cron semantics: if both DOM and DOW are restricted, match when EITHER matches.
        let dom_match = self.dom.contains(dom);
        let dow_match = self.dow.contains(dow);

        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    fn next_after<Z: TimeZone>(&self, now: DateTime<Z>) -> Option<DateTime<Z>> {
        // Start at the next minute boundary.
        let mut t = now + chrono::Duration::minutes(1);
        t = t.with_second(0)?.with_nanosecond(0)?;

        // Hard cap to avoid infinite loops for impossible expressions.
        let max_iters = 366usize * 24 * 60;
        for _ in 0..max_iters {
            if self.matches(&t) {
                return Some(t);
            }
            t = t + chrono::Duration::minutes(1);
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, allow_7_as_0: bool) -> Result<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self {
                min,
                max,
                any: true,
                allowed: vec![true; (max + 1) as usize],
            });
        }

        let mut allowed = vec![false; (max + 1) as usize];
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if part == "*" {
                for v in min..=max {
                    allowed[v as usize] = true;
                }
                continue;
            }

            let (base, step) = if let Some((a, b)) = part.split_once('/') {
                let step: u32 = b
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid step: {b}")))?;
                if step == 0 {
                    return Err(Error::Config("step must be > 0".to_string()));
                }
                (a.trim(), Some(step))
            } else {
                (part, None)
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                let a = parse_u32(a.trim(), allow_7_as_0)?;
                let b = parse_u32(b.trim(), allow_7_as_0)?;
                (a, b)
            } else {
                let a = parse_u32(base.trim(), allow_7_as_0)?;
                if step.is_some() {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            let start = start.max(min);
            let end = end.min(max);
            if start > end {
                return Err(Error::Config(format!("invalid range: {base}")));
            }

            let step = step.unwrap_or(1);
            let mut v = start;
            while v <= end {
                allowed[v as usize] = true;
                v = v.saturating_add(step);
            }
        }

        // Determine "any" by checking if all values are allowed.
        let mut any = true;
        for v in min..=max {
            if !allowed[v as usize] {
                any = false;
                break;
            }
        }

        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        if v < self.min || v > self.max {
            return false;
        }
        self.allowed.get(v as usize).copied().unwrap_or(false)
    }
}

fn parse_u32(s: &str, allow_7_as_0: bool) -> Result<u32> {
    let mut v: u32 = s
        .parse()
        .map_err(|_| Error::Config(format!("invalid number: {s}")))?;
    if allow_7_as_0 && v == 7 {
        v = 0;
    }
    Ok(v)
}

// === Tests ===
