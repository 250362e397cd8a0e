use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

// IST, UTC+05:30.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

// NSE closes at 15:30 IST. Before this, the latest complete session is the
// previous business day.
const CLOSE_CUTOFF_HOUR_IST: u32 = 16;
const CLOSE_CUTOFF_MINUTE_IST: u32 = 0;

/// Market date a scan run is filed under: the explicit `YYYY-MM-DD` argument,
/// or the last completed trading session as of `now_utc`.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of-date {s:?} (expected YYYY-MM-DD)"));
    }

    let holidays = configured_holidays(std::env::var("MARKET_HOLIDAYS").ok().as_deref());
    last_session(now_utc, &holidays)
}

fn last_session(now_utc: DateTime<Utc>, holidays: &HashSet<NaiveDate>) -> anyhow::Result<NaiveDate> {
    let ist = chrono::FixedOffset::east_opt(IST_OFFSET_SECS).context("invalid IST offset")?;
    let now_ist = now_utc.with_timezone(&ist);

    let cutoff_reached =
        (now_ist.hour(), now_ist.minute()) >= (CLOSE_CUTOFF_HOUR_IST, CLOSE_CUTOFF_MINUTE_IST);
    let mut date = now_ist.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    while is_weekend(date) || holidays.contains(&date) {
        date -= Duration::days(1);
    }
    Ok(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

/// Fixed-date closures plus a comma-separated `YYYY-MM-DD` list.
/// Unparseable entries are skipped.
fn configured_holidays(extra: Option<&str>) -> HashSet<NaiveDate> {
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        // Republic Day, Independence Day, Gandhi Jayanti, Christmas.
        for (m, d) in [(1, 26), (8, 15), (10, 2), (12, 25)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    for part in extra.unwrap_or_default().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
            Ok(d) => {
                out.insert(d);
            }
            Err(_) => tracing::warn!(entry = part, "ignoring malformed MARKET_HOLIDAYS entry"),
        }
    }

    out
}
