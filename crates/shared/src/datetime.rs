//! Timezone-aware date helpers shared by the scheduler, planners and renderer.

use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use time_tz::{timezones, Offset, TimeZone, ToTimezone, Tz};

/// Looks up a zone by IANA name, e.g. `Europe/London`.
pub fn find_zone(name: &str) -> Option<&'static Tz> {
    timezones::get_by_name(name)
}

/// Midnight at the start of `date` in the given zone, as an absolute instant.
pub fn local_midnight(date: Date, tz: &'static Tz) -> OffsetDateTime {
    let midnight = PrimitiveDateTime::new(date, Time::MIDNIGHT);
    // Resolve the zone offset iteratively: a first guess from the UTC reading
    // of that midnight, then once more in case the guess straddles a DST
    // transition.
    let guess = tz.get_offset_utc(&midnight.assume_utc()).to_utc();
    let offset = tz.get_offset_utc(&midnight.assume_offset(guess)).to_utc();
    midnight.assume_offset(offset)
}

/// Shifts an instant into the given zone without changing what moment it is.
pub fn localise(instant: OffsetDateTime, tz: &'static Tz) -> OffsetDateTime {
    instant.to_timezone(tz)
}

pub fn to_unix(instant: OffsetDateTime) -> i64 {
    instant.unix_timestamp()
}

pub fn from_unix(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Human-readable local date used in template variables, e.g. `3 September 2025`.
pub fn format_human_date(instant: OffsetDateTime, tz: &'static Tz) -> String {
    let local = localise(instant, tz);
    local
        .format(format_description!(
            "[day padding:none] [month repr:long] [year]"
        ))
        .unwrap_or_else(|_| local.date().to_string())
}
