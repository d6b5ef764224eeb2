use chrono::{DateTime, Days, Duration, LocalResult, NaiveTime, TimeZone};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("end '{end}' is before start '{start}'")]
    EndBeforeStart { start: String, end: String },
}

/// Returns the first instant of the calendar day after `when`, in the same
/// zone as `when`. When a DST transition erases local midnight, the day
/// starts at the earliest instant that does exist.
pub fn start_of_next_day<Tz: TimeZone>(when: &DateTime<Tz>) -> DateTime<Tz> {
    let mut local = (when.date_naive() + Days::new(1)).and_time(NaiveTime::MIN);
    loop {
        match when.timezone().from_local_datetime(&local) {
            LocalResult::Single(next) => return next,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => local += Duration::minutes(30),
        }
    }
}

/// Splits `[start, end)` into calendar-day-aligned segments, flattened into
/// an even-length sequence of boundary instants.
///
/// With start 2000-11-23 00:00 and end 2000-11-25 13:00 the result is
/// `[11-23 00:00, 11-24 00:00, 11-24 00:00, 11-25 00:00, 11-25 00:00,
/// 11-25 13:00]`: the first segment runs to the midnight after `start`,
/// intermediate segments cover whole days, and the last runs from the
/// midnight of `end`'s day to `end`. Inputs on the same calendar day come
/// back unchanged as `[start, end]`. Day boundaries use the inputs' zone.
pub fn split_across_days<Tz: TimeZone>(
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Result<Vec<DateTime<Tz>>, IntervalError> {
    if end < start {
        return Err(IntervalError::EndBeforeStart {
            start: start.naive_local().to_string(),
            end: end.naive_local().to_string(),
        });
    }

    if start.date_naive() == end.date_naive() {
        return Ok(vec![start.clone(), end.clone()]);
    }

    let mut result = Vec::new();

    let mut mid = start_of_next_day(start);
    result.push(start.clone());
    result.push(mid.clone());

    while mid.date_naive() < end.date_naive() {
        let next = start_of_next_day(&mid);
        result.push(mid);
        result.push(next.clone());
        mid = next;
    }

    result.push(mid);
    result.push(end.clone());

    Ok(result)
}
