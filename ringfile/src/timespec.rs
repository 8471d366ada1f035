//! English at-style time parsing.
//!
//! Accepts absolute dates (`HH:MM`, `MM/DD/YY`, `DD.MM.YY`, `YYYYMMDD`,
//! month names, weekdays, `today`/`yesterday`/`tomorrow`,
//! `noon`/`midnight`/`teatime`), the `now`/`start`/`end`/`epoch`
//! anchors, and signed offset chains (`now-5min`, `end-1d`,
//! `start+1w3h`). A bare `m` unit is disambiguated by context: after a
//! year/month/week/day unit it means months, after an hour/minute/second
//! unit it means minutes, and standing alone it means months when the
//! count is below 6, minutes otherwise.
//!
//! The parser holds all scanner state in the call frame; nothing is
//! shared between invocations.

use chrono::{Datelike, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike};

use crate::error::{Error, ErrorKind, Result};

/// What a parsed specification is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRef {
    Absolute,
    Epoch,
    /// Relative to the query's start time; resolved by
    /// [`resolve_start_end`].
    Start,
    /// Relative to the query's end time.
    End,
}

/// A parsed time specification: calendar fields plus a second offset.
/// For `Start`/`End` anchors the calendar fields are deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSpec {
    pub kind: TimeRef,
    offset: i64,
    year: i64,
    mon: i64,
    mday: i64,
    hour: i64,
    min: i64,
    sec: i64,
}

fn bad_time(msg: impl Into<String>) -> Error {
    Error::with_detail(ErrorKind::InvalidTime, msg)
}

fn local_fields(ts: i64) -> Result<(i64, i64, i64, i64, i64, i64, i64)> {
    let dt = Local
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| bad_time("timestamp out of range"))?;
    Ok((
        dt.year() as i64,
        dt.month0() as i64,
        dt.day() as i64,
        dt.hour() as i64,
        dt.minute() as i64,
        dt.second() as i64,
        dt.weekday().num_days_from_sunday() as i64,
    ))
}

/// Normalize possibly out-of-range calendar fields and resolve them in
/// the local time zone. Ambiguous wall times (DST fall-back) take the
/// earlier instant; nonexistent ones are an error.
fn resolve_local(year: i64, mon: i64, mday: i64, hour: i64, min: i64, sec: i64) -> Result<i64> {
    let year = year + mon.div_euclid(12);
    let mon = mon.rem_euclid(12);
    let base = NaiveDate::from_ymd_opt(year as i32, mon as u32 + 1, 1)
        .ok_or_else(|| bad_time("date out of range"))?;
    let date = base
        .checked_add_signed(Duration::days(mday - 1))
        .ok_or_else(|| bad_time("date out of range"))?;
    let naive = date.and_time(NaiveTime::MIN) + Duration::seconds(hour * 3600 + min * 60 + sec);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.timestamp()),
        LocalResult::Ambiguous(a, _) => Ok(a.timestamp()),
        LocalResult::None => Err(bad_time("the specified time does not exist (DST gap?)")),
    }
}

impl TimeSpec {
    /// Resolve an absolute or epoch-anchored specification to seconds
    /// since the epoch. `Start`/`End` anchors need
    /// [`resolve_start_end`].
    pub fn resolve(&self) -> Result<i64> {
        match self.kind {
            TimeRef::Absolute => {
                resolve_local(self.year, self.mon, self.mday, self.hour, self.min, self.sec)
                    .map(|t| t + self.offset)
            }
            TimeRef::Epoch => {
                let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                let year = 1970 + self.year + self.mon.div_euclid(12);
                let mon = self.mon.rem_euclid(12);
                let base = NaiveDate::from_ymd_opt(year as i32, mon as u32 + 1, 1)
                    .ok_or_else(|| bad_time("date out of range"))?;
                let days = base.signed_duration_since(date).num_days() + self.mday;
                Ok(days * 86_400 + self.hour * 3600 + self.min * 60 + self.sec + self.offset)
            }
            TimeRef::Start | TimeRef::End => Err(bad_time(
                "start/end reference is only valid inside a start/end pair",
            )),
        }
    }

    /// Apply this spec's calendar deltas and offset to a base instant.
    fn apply_to(&self, base: i64) -> Result<i64> {
        let (y, mo, d, h, mi, se, _) = local_fields(base)?;
        resolve_local(y + self.year, mo + self.mon, d + self.mday, h, mi, se)
            .map(|t| t + self.offset)
    }
}

/// Resolve a start/end pair, honoring cross references between the two.
pub fn resolve_start_end(start: &TimeSpec, end: &TimeSpec) -> Result<(i64, i64)> {
    if start.kind == TimeRef::End && end.kind == TimeRef::Start {
        return Err(bad_time("start and end cannot both be relative to each other"));
    }
    if start.kind == TimeRef::Start {
        return Err(bad_time("start cannot be relative to itself"));
    }
    if end.kind == TimeRef::End {
        return Err(bad_time("end cannot be relative to itself"));
    }

    let (start_t, end_t);
    if start.kind == TimeRef::End {
        end_t = end.resolve()?;
        start_t = start.apply_to(end_t)?;
    } else {
        start_t = start.resolve()?;
        end_t = if end.kind == TimeRef::Start {
            end.apply_to(start_t)?
        } else {
            end.resolve()?
        };
    }
    Ok((start_t, end_t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Eof,
    Number(i64, usize),
    Plus,
    Minus,
    Dot,
    Colon,
    Slash,
    Id,
    Midnight,
    Noon,
    Teatime,
    Pm,
    Am,
    Yesterday,
    Today,
    Tomorrow,
    Now,
    Start,
    End,
    Epoch,
    Month(i64),
    Wday(i64),
    Unit(Unit),
    /// A bare `m`, resolved by context to months or minutes.
    MonthsMinutes,
}

fn word_token(word: &str) -> Tok {
    match word.to_ascii_lowercase().as_str() {
        "midnight" => Tok::Midnight,
        "noon" => Tok::Noon,
        "teatime" => Tok::Teatime,
        "am" => Tok::Am,
        "pm" => Tok::Pm,
        "tomorrow" => Tok::Tomorrow,
        "yesterday" => Tok::Yesterday,
        "today" => Tok::Today,
        "now" | "n" => Tok::Now,
        "start" | "s" => Tok::Start,
        "end" | "e" => Tok::End,
        "epoch" => Tok::Epoch,
        "jan" | "january" => Tok::Month(0),
        "feb" | "february" => Tok::Month(1),
        "mar" | "march" => Tok::Month(2),
        "apr" | "april" => Tok::Month(3),
        "may" => Tok::Month(4),
        "jun" | "june" => Tok::Month(5),
        "jul" | "july" => Tok::Month(6),
        "aug" | "august" => Tok::Month(7),
        "sep" | "september" => Tok::Month(8),
        "oct" | "october" => Tok::Month(9),
        "nov" | "november" => Tok::Month(10),
        "dec" | "december" => Tok::Month(11),
        "sun" | "sunday" => Tok::Wday(0),
        "mon" | "monday" => Tok::Wday(1),
        "tue" | "tuesday" => Tok::Wday(2),
        "wed" | "wednesday" => Tok::Wday(3),
        "thu" | "thursday" => Tok::Wday(4),
        "fri" | "friday" => Tok::Wday(5),
        "sat" | "saturday" => Tok::Wday(6),
        _ => Tok::Id,
    }
}

fn unit_token(word: &str) -> Tok {
    match word.to_ascii_lowercase().as_str() {
        "second" | "seconds" | "sec" | "s" => Tok::Unit(Unit::Seconds),
        "minute" | "minutes" | "min" => Tok::Unit(Unit::Minutes),
        "m" => Tok::MonthsMinutes,
        "hour" | "hours" | "hr" | "h" => Tok::Unit(Unit::Hours),
        "day" | "days" | "d" => Tok::Unit(Unit::Days),
        "week" | "weeks" | "wk" | "w" => Tok::Unit(Unit::Weeks),
        "month" | "months" | "mon" => Tok::Unit(Unit::Months),
        "year" | "years" | "yr" | "y" => Tok::Unit(Unit::Years),
        _ => Tok::Id,
    }
}

struct TimeParser {
    input: Vec<u8>,
    pos: usize,
    /// Offset chains switch the keyword table to time units.
    units_context: bool,
    cur: Tok,
    spec: TimeSpec,
    wday: i64,
}

impl TimeParser {
    fn new(input: &str, now: i64) -> Result<Self> {
        let (year, mon, mday, hour, min, sec, wday) = local_fields(now)?;
        Ok(TimeParser {
            input: input.as_bytes().to_vec(),
            pos: 0,
            units_context: false,
            cur: Tok::Eof,
            spec: TimeSpec {
                kind: TimeRef::Absolute,
                offset: 0,
                year,
                mon,
                mday,
                hour,
                min,
                sec,
            },
            wday,
        })
    }

    fn save(&self) -> (usize, Tok) {
        (self.pos, self.cur.clone())
    }

    fn restore(&mut self, state: (usize, Tok)) {
        self.pos = state.0;
        self.cur = state.1;
    }

    fn advance(&mut self) -> Result<()> {
        // whitespace, underscores and commas are all separators
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_whitespace()
                || self.input[self.pos] == b'_'
                || self.input[self.pos] == b',')
        {
            self.pos += 1;
        }
        if self.pos >= self.input.len() {
            self.cur = Tok::Eof;
            return Ok(());
        }
        let b = self.input[self.pos];
        if b.is_ascii_digit() {
            let start = self.pos;
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap();
            let value = text.parse::<i64>().unwrap_or(i64::MAX);
            self.cur = Tok::Number(value, text.len());
            return Ok(());
        }
        if b.is_ascii_alphabetic() {
            let start = self.pos;
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_alphabetic() {
                self.pos += 1;
            }
            let word = std::str::from_utf8(&self.input[start..self.pos]).unwrap();
            let tok = if self.units_context {
                unit_token(word)
            } else {
                word_token(word)
            };
            if tok == Tok::Id {
                return Err(bad_time(format!("unrecognized word '{word}'")));
            }
            self.cur = tok;
            return Ok(());
        }
        self.pos += 1;
        self.cur = match b {
            b':' => Tok::Colon,
            b'.' => Tok::Dot,
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'/' => Tok::Slash,
            other => {
                return Err(bad_time(format!("unparsable character '{}'", other as char)));
            }
        };
        Ok(())
    }

    fn zero_calendar(&mut self) {
        self.spec.sec = 0;
        self.spec.min = 0;
        self.spec.hour = 0;
        self.spec.mday = 0;
        self.spec.mon = 0;
        self.spec.year = 0;
    }

    /// Store a date, windowing short year forms: 0..=37 means
    /// 2000..=2037, 70..=138 means 1970..=2038, anything above 1970 is
    /// taken literally.
    fn assign_date(&mut self, mday: i64, mon: i64, year_in: i64) -> Result<()> {
        let year = if year_in > 138 {
            if year_in > 1970 {
                year_in
            } else {
                return Err(bad_time(format!(
                    "invalid year {year_in} (should be either 00-99 or >1900)"
                )));
            }
        } else if (0..38).contains(&year_in) {
            year_in + 2000
        } else {
            year_in + 1900
        };
        if year < 1970 {
            return Err(bad_time("dates before the epoch (01/01/1970) are not handled"));
        }
        self.spec.mday = mday;
        self.spec.mon = mon;
        self.spec.year = year;
        Ok(())
    }

    /// TIME-OF-DAY-SPEC: `HH[:MM][am|pm]`, bailing out (with full
    /// rewind) when the number turns out to start a date instead.
    fn tod(&mut self) -> Result<()> {
        let (value, len) = match self.cur {
            Tok::Number(v, l) => (v, l),
            _ => return Ok(()),
        };
        if len > 2 {
            return Ok(());
        }
        let mut hour = value;
        let mut minute = 0;

        let entry = self.save();
        self.advance()?;
        if self.cur == Tok::Slash || self.cur == Tok::Dot {
            // looking at a date after all
            self.restore(entry);
            return Ok(());
        }
        if self.cur == Tok::Colon {
            self.advance()?;
            match self.cur {
                Tok::Number(m, _) => minute = m,
                _ => {
                    return Err(bad_time(
                        "parsing HH:MM syntax, expecting MM as number, got none",
                    ))
                }
            }
            if minute > 59 {
                return Err(bad_time(format!(
                    "parsing HH:MM syntax, got MM = {minute} (>59!)"
                )));
            }
            self.advance()?;
        }
        if self.cur == Tok::Am || self.cur == Tok::Pm {
            if hour > 12 {
                return Err(bad_time("there cannot be more than 12 AM or PM hours"));
            }
            if self.cur == Tok::Pm {
                if hour != 12 {
                    hour += 12;
                }
            } else if hour == 12 {
                hour = 0;
            }
            self.advance()?;
        } else if hour > 23 {
            // guess it was not a time then
            self.restore(entry);
            return Ok(());
        }
        self.spec.hour = hour;
        self.spec.min = minute;
        self.spec.sec = 0;
        if self.spec.hour == 24 {
            self.spec.hour = 0;
            self.spec.mday += 1;
        }
        Ok(())
    }

    /// DAY-SPEC: named days, month-name dates, numeric dates, weekday
    /// references, or seconds-since-epoch.
    fn day(&mut self) -> Result<()> {
        match self.cur.clone() {
            Tok::Yesterday => {
                self.spec.mday -= 1;
                self.advance()?;
            }
            Tok::Today => {
                self.advance()?;
            }
            Tok::Tomorrow => {
                self.spec.mday += 1;
                self.advance()?;
            }
            Tok::Month(mon) => {
                self.advance()?;
                let mday = match self.cur {
                    Tok::Number(d, _) => d,
                    _ => {
                        return Err(bad_time("the day of the month should follow month name"))
                    }
                };
                self.advance()?;
                let year = if let Tok::Number(y, _) = self.cur {
                    self.advance()?;
                    y
                } else {
                    self.spec.year
                };
                self.assign_date(mday, mon, year)?;
            }
            Tok::Wday(wday) => {
                self.spec.mday += wday - self.wday;
                self.advance()?;
            }
            Tok::Number(value, _) => {
                let mut mon = value;
                let mut mday = 0i64;
                let mut year = self.spec.year;

                if mon > 10 * 365 * 24 * 60 * 60 {
                    // raw seconds since the epoch
                    let (y, mo, d, h, mi, se, _) = local_fields(mon)?;
                    self.spec.year = y;
                    self.spec.mon = mo;
                    self.spec.mday = d;
                    self.spec.hour = h;
                    self.spec.min = mi;
                    self.spec.sec = se;
                    self.advance()?;
                    return Ok(());
                }

                if mon > 19_700_101 && mon < 24_000_101 {
                    // YYYYMMDD
                    year = mon / 10_000;
                    mday = mon % 100;
                    mon = (mon / 100) % 100;
                    self.advance()?;
                } else {
                    self.advance()?;
                    if mon <= 31 && (self.cur == Tok::Slash || self.cur == Tok::Dot) {
                        let sep = self.cur.clone();
                        self.advance()?;
                        mday = match self.cur {
                            Tok::Number(d, _) => d,
                            _ => {
                                return Err(bad_time(if sep == Tok::Dot {
                                    "there should be month number after '.'"
                                } else {
                                    "there should be day number after '/'"
                                }))
                            }
                        };
                        self.advance()?;
                        if self.cur == sep {
                            self.advance()?;
                            year = match self.cur {
                                Tok::Number(y, _) => y,
                                _ => return Err(bad_time("there should be year number after separator")),
                            };
                            self.advance()?;
                        }
                        if sep == Tok::Dot {
                            // European order: DD.MM.YY
                            std::mem::swap(&mut mday, &mut mon);
                        }
                    }
                }

                mon -= 1;
                if !(0..=11).contains(&mon) {
                    return Err(bad_time(format!("did you really mean month {}?", mon + 1)));
                }
                if !(1..=31).contains(&mday) {
                    return Err(bad_time(format!(
                        "{mday} is not a valid day of the month"
                    )));
                }
                self.assign_date(mday, mon, year)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// One `NUMBER UNIT` pair of an offset chain. `sign` is `None` when
    /// a bare number repeats the previous operator.
    fn plus_minus(
        &mut self,
        sign: Option<i64>,
        op: &mut i64,
        prev_unit: &mut Option<Unit>,
    ) -> Result<()> {
        if let Some(s) = sign {
            *op = s;
            *prev_unit = None;
            self.advance()?;
        }
        let delta = match self.cur {
            Tok::Number(v, _) => v,
            _ => {
                return Err(bad_time(format!(
                    "there should be a number after '{}'",
                    if *op > 0 { '+' } else { '-' }
                )))
            }
        };
        self.advance()?;

        let mut unit = match self.cur {
            Tok::Unit(u) => Some(u),
            Tok::MonthsMinutes => Some(match prev_unit {
                Some(Unit::Days) | Some(Unit::Weeks) | Some(Unit::Months) | Some(Unit::Years) => {
                    Unit::Months
                }
                Some(Unit::Seconds) | Some(Unit::Minutes) | Some(Unit::Hours) => Unit::Minutes,
                // out of context: small counts read as months
                _ => {
                    if delta < 6 {
                        Unit::Months
                    } else {
                        Unit::Minutes
                    }
                }
            }),
            _ => None,
        };
        *prev_unit = unit;
        let signed = *op * delta;
        match unit.take() {
            Some(Unit::Years) => self.spec.year += signed,
            Some(Unit::Months) => self.spec.mon += signed,
            Some(Unit::Weeks) => self.spec.mday += 7 * signed,
            Some(Unit::Days) => self.spec.mday += signed,
            Some(Unit::Hours) => self.spec.offset += 3600 * signed,
            Some(Unit::Minutes) => self.spec.offset += 60 * signed,
            // a bare count is seconds
            Some(Unit::Seconds) | None => self.spec.offset += signed,
        }
        Ok(())
    }

    fn run(mut self) -> Result<TimeSpec> {
        self.advance()?;
        match self.cur.clone() {
            Tok::Plus | Tok::Minus => {}
            anchor @ (Tok::Epoch | Tok::Start | Tok::End | Tok::Now) => {
                match anchor {
                    Tok::Epoch => {
                        self.spec.kind = TimeRef::Epoch;
                        self.zero_calendar();
                    }
                    Tok::Start => {
                        self.spec.kind = TimeRef::Start;
                        self.zero_calendar();
                    }
                    Tok::End => {
                        self.spec.kind = TimeRef::End;
                        self.zero_calendar();
                    }
                    _ => {}
                }
                self.advance()?;
                if self.cur != Tok::Plus && self.cur != Tok::Minus {
                    if anchor != Tok::Now {
                        return Err(bad_time("'start' or 'end' MUST be followed by +|- offset"));
                    }
                    if self.cur != Tok::Eof {
                        return Err(bad_time("if 'now' is followed by a token it must be +|- offset"));
                    }
                }
            }
            Tok::Number(..) => {
                let hour_sv = self.spec.hour;
                let year_sv = self.spec.year;
                self.spec.hour = 30;
                self.spec.year = 30_000;
                self.tod()?;
                self.day()?;
                if self.spec.hour == 30 && self.spec.year != 30_000 {
                    self.tod()?;
                }
                if self.spec.hour == 30 {
                    self.spec.hour = hour_sv;
                }
                if self.spec.year == 30_000 {
                    self.spec.year = year_sv;
                }
            }
            Tok::Month(_) => {
                self.day()?;
                if matches!(self.cur, Tok::Number(..)) {
                    self.tod()?;
                }
            }
            tok @ (Tok::Teatime | Tok::Noon | Tok::Midnight) => {
                self.spec.hour = match tok {
                    Tok::Teatime => 16,
                    Tok::Noon => 12,
                    _ => 0,
                };
                self.spec.min = 0;
                self.spec.sec = 0;
                self.advance()?;
                self.day()?;
            }
            Tok::Yesterday | Tok::Today | Tok::Tomorrow | Tok::Wday(_) => {
                self.day()?;
                if matches!(self.cur, Tok::Number(..)) {
                    self.tod()?;
                }
            }
            _ => return Err(bad_time("unparsable time")),
        }

        if self.cur == Tok::Plus || self.cur == Tok::Minus {
            self.units_context = true;
            let mut op = 1i64;
            let mut prev_unit = None;
            loop {
                match self.cur {
                    Tok::Number(..) => self.plus_minus(None, &mut op, &mut prev_unit)?,
                    Tok::Plus => self.plus_minus(Some(1), &mut op, &mut prev_unit)?,
                    Tok::Minus => self.plus_minus(Some(-1), &mut op, &mut prev_unit)?,
                    _ => {}
                }
                self.advance()?;
                if !matches!(self.cur, Tok::Plus | Tok::Minus | Tok::Number(..)) {
                    break;
                }
            }
        }

        if self.cur != Tok::Eof {
            return Err(bad_time("unparsable trailing text"));
        }
        Ok(self.spec)
    }
}

/// Parse an at-style time specification against the reference instant
/// `now` (injected for testability; callers pass the wall clock).
pub fn parse_timespec(input: &str, now: i64) -> Result<TimeSpec> {
    TimeParser::new(input, now)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> i64 {
        // fixed reference: 2008-09-22 16:40:00 UTC
        1_222_101_600
    }

    fn resolve(input: &str) -> i64 {
        parse_timespec(input, now()).unwrap().resolve().unwrap()
    }

    #[test]
    fn now_and_second_offsets() {
        assert_eq!(resolve("now"), now());
        assert_eq!(resolve("n"), now());
        assert_eq!(resolve("now-300"), now() - 300);
        assert_eq!(resolve("now-5min"), now() - 300);
        assert_eq!(resolve("now+2h"), now() + 7200);
        assert_eq!(resolve("now-1d"), now() - 86_400);
        assert_eq!(resolve("now-1w"), now() - 7 * 86_400);
        assert_eq!(resolve("-3h"), now() - 3 * 3600);
    }

    #[test]
    fn chained_offsets_share_context() {
        // m after an hour unit means minutes
        assert_eq!(resolve("now-3h20m"), now() - 3 * 3600 - 20 * 60);
        // bare m with a large count means minutes
        assert_eq!(resolve("now-25m"), now() - 25 * 60);
    }

    #[test]
    fn bare_small_m_means_months() {
        // two months back is between 58 and 63 days for any anchor
        let t = resolve("now-2m");
        let days = (now() - t) / 86_400;
        assert!((58..=63).contains(&days), "got {days} days");
    }

    #[test]
    fn m_after_year_unit_means_months() {
        let t = resolve("now-1y6m");
        let days = (now() - t) / 86_400;
        assert!((540..=560).contains(&days), "got {days} days");
    }

    #[test]
    fn raw_epoch_seconds_round_trip() {
        assert_eq!(resolve("1000000000"), 1_000_000_000);
    }

    #[test]
    fn epoch_anchor() {
        assert_eq!(resolve("epoch+1000s"), 1000);
    }

    #[test]
    fn yyyymmdd_parses_to_local_midnight() {
        let t = resolve("20080922");
        let dt = Local.timestamp_opt(t, 0).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2008, 9, 22));
        assert_eq!((dt.hour(), dt.minute()), (0, 0));
    }

    #[test]
    fn slash_and_dot_dates_swap_month_and_day() {
        let us = resolve("09/22/2008");
        let eu = resolve("22.09.2008");
        assert_eq!(us, eu);
    }

    #[test]
    fn month_name_dates_and_time_of_day() {
        let t = resolve("12:00 20080922");
        let dt = Local.timestamp_opt(t, 0).unwrap();
        assert_eq!((dt.hour(), dt.minute()), (12, 0));

        let t2 = resolve("noon sep 22 2008");
        assert_eq!(t, t2);
    }

    #[test]
    fn am_pm_hours() {
        let am = resolve("8:30am 20080922");
        let pm = resolve("8:30pm 20080922");
        assert_eq!(pm - am, 12 * 3600);

        let noon = resolve("12:00pm 20080922");
        assert_eq!(noon, resolve("noon 20080922"));
        let midnight = resolve("12:00am 20080922");
        assert_eq!(midnight, resolve("midnight 20080922"));
    }

    #[test]
    fn start_end_cross_references() {
        let start = parse_timespec("end-1d", now()).unwrap();
        assert_eq!(start.kind, TimeRef::End);
        let end = parse_timespec("now", now()).unwrap();
        let (s, e) = resolve_start_end(&start, &end).unwrap();
        assert_eq!(e, now());
        // one calendar day; DST may stretch or shrink it by an hour
        let diff = e - s;
        assert!((82_800..=90_000).contains(&diff), "got {diff}");

        let start = parse_timespec("now-2h", now()).unwrap();
        let end = parse_timespec("start+1h", now()).unwrap();
        let (s, e) = resolve_start_end(&start, &end).unwrap();
        assert_eq!(s, now() - 7200);
        assert_eq!(e, s + 3600);
    }

    #[test]
    fn invalid_references_and_garbage_fail() {
        assert!(parse_timespec("start", now()).is_err());
        assert!(parse_timespec("now gibberish", now()).is_err());
        assert!(parse_timespec("now@3", now()).is_err());
        assert!(parse_timespec("14:00:00", now()).is_err());

        let s = parse_timespec("start+1h", now()).unwrap();
        let e = parse_timespec("end-1h", now()).unwrap();
        assert!(resolve_start_end(&s, &e).is_err());
    }

    #[test]
    fn weekday_and_named_days_stay_near_the_anchor() {
        for spec in ["yesterday", "today", "tomorrow", "mon", "16:00 fri"] {
            let t = parse_timespec(spec, now()).unwrap().resolve().unwrap();
            assert!((t - now()).abs() < 8 * 86_400, "{spec} resolved to {t}");
        }
    }
}
