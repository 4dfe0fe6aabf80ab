//! Wall-clock values for `__date` and `__time` (UTC).

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, 0 if the clock is before it.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Decompose days-since-epoch into (year, month 1-12, day 1-31).
/// Howard Hinnant's `civil_from_days`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mo = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe as i64 + era * 400 + if mo <= 2 { 1 } else { 0 };
    (y, mo, d)
}

/// `YYYY-MM-DD` for the given timestamp.
pub fn format_date(secs: i64) -> String {
    let (y, m, d) = civil_from_days(secs.div_euclid(86_400));
    format!("{y:04}-{m:02}-{d:02}")
}

/// `HH:MM:SS` for the given timestamp.
pub fn format_time(secs: i64) -> String {
    let day = secs.rem_euclid(86_400);
    format!("{:02}:{:02}:{:02}", day / 3600, (day % 3600) / 60, day % 60)
}

pub fn today() -> String {
    format_date(now_secs())
}

pub fn now() -> String {
    format_time(now_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch() {
        assert_eq!(format_date(0), "1970-01-01");
        assert_eq!(format_time(0), "00:00:00");
    }

    #[test]
    fn leap_day() {
        // 2024-02-29 13:45:07 UTC
        let secs = 1_709_214_307;
        assert_eq!(format_date(secs), "2024-02-29");
        assert_eq!(format_time(secs), "13:45:07");
    }

    #[test]
    fn before_epoch() {
        assert_eq!(format_date(-1), "1969-12-31");
        assert_eq!(format_time(-1), "23:59:59");
    }

    #[test]
    fn now_has_shape() {
        assert_eq!(today().len(), 10);
        assert_eq!(now().len(), 8);
    }
}
