//! Time conversions for the two containers: the packed 5-byte local-calendar
//! format used by KDB and the ISO-8601 UTC strings used by KDBX. Both formats
//! reserve a sentinel for "never", which maps to the Unix epoch in memory.

use chrono::offset::{Local, Utc};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike};

use crate::error::Error;

/// Packed KDB representation of "never".
const KDB_NEVER: [u8; 5] = [0x2e, 0xdf, 0x39, 0x7e, 0xfb];

/// KDBX string representation of "never".
const KDBX_NEVER: &str = "2999-12-28T22:59:59Z";

const KDBX_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The in-memory value both sentinels map to.
#[inline]
pub fn never() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Decodes a packed 5-byte KDB time:
/// `00YYYYYY YYYYYYMM MMDDDDDH HHHHMMMM MMSSSSSS`, local calendar.
pub fn decode_kdb_time(packed: &[u8; 5]) -> Result<DateTime<Utc>, Error> {
    if *packed == KDB_NEVER {
        return Ok(never());
    }

    // Widen to 16 bits so the shifts below stay in range.
    let p: Vec<u16> = packed.iter().map(|&b| u16::from(b)).collect();

    let year = u32::from((p[0] << 6) | (p[1] >> 2));
    let month = u32::from(((p[1] & 0x0003) << 2) | (p[2] >> 6));
    let day = u32::from((p[2] >> 1) & 0x001f);
    let hour = u32::from(((p[2] & 0x0001) << 4) | (p[3] >> 4));
    let minute = u32::from(((p[3] & 0x000f) << 2) | (p[4] >> 6));
    let second = u32::from(p[4] & 0x003f);

    debug_assert!(second <= 60 && minute <= 59 && hour <= 23);
    debug_assert!((1..=31).contains(&day) && (1..=12).contains(&month));

    Local
        .with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or(Error::Internal("KDB time out of range."))
}

/// Encodes a time into the packed 5-byte KDB format in the local calendar.
/// The epoch ("never") encodes as the sentinel.
pub fn encode_kdb_time(time: &DateTime<Utc>) -> [u8; 5] {
    if *time == never() {
        return KDB_NEVER;
    }

    let local = time.with_timezone(&Local);
    let year = local.year() as u32;
    let month = local.month();
    let day = local.day();
    let hour = local.hour();
    let minute = local.minute();
    let second = local.second();

    [
        (year >> 6) as u8,
        (((year & 0x3f) << 2) | (month >> 2)) as u8,
        (((month & 0x3) << 6) | (day << 1) | (hour >> 4)) as u8,
        (((hour & 0xf) << 4) | (minute >> 2)) as u8,
        (((minute & 0x3) << 6) | second) as u8,
    ]
}

/// Parses a KDBX ISO-8601 UTC timestamp. The sentinel date decodes to the
/// epoch.
pub fn parse_kdbx_time(text: &str) -> Result<DateTime<Utc>, Error> {
    if text == KDBX_NEVER {
        return Ok(never());
    }

    let trimmed = text.strip_suffix('Z').unwrap_or(text);
    NaiveDateTime::parse_from_str(trimmed, KDBX_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::Format("Invalid date/time in KDBX."))
}

/// Formats a timestamp the way KDBX stores it. The epoch formats as the
/// sentinel.
pub fn format_kdbx_time(time: &DateTime<Utc>) -> String {
    if *time == never() {
        return KDBX_NEVER.to_string();
    }

    format!("{}Z", time.format(KDBX_TIME_FORMAT))
}

/// Human readable local time, used by the JSON views.
pub fn format_local_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
