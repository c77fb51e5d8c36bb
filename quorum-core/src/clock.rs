//! Simulated clock over a fixed trading calendar.
//!
//! The clock starts on the first calendar session and moves forward exactly one
//! session per `advance()`. Once it sits on the last session, every further
//! `advance()` returns `ClockError::EndOfRun`, which the backtest driver treats
//! as its loop terminator.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Control signal: the calendar is exhausted.
    #[error("end of run: calendar exhausted")]
    EndOfRun,

    #[error("trading calendar is empty")]
    EmptyCalendar,

    #[error("trading calendar is not strictly increasing at {at}")]
    Unordered { at: NaiveDate },
}

/// Ordered, de-duplicated sequence of trading sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingCalendar {
    sessions: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build from sessions that must already be strictly increasing.
    pub fn new(sessions: Vec<NaiveDate>) -> Result<Self, ClockError> {
        if sessions.is_empty() {
            return Err(ClockError::EmptyCalendar);
        }
        if let Some(w) = sessions.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ClockError::Unordered { at: w[1] });
        }
        Ok(Self { sessions })
    }

    /// Build from an arbitrary collection of dates, sorting and de-duplicating
    /// them and keeping only those inside `[start, end]`.
    pub fn from_dates(
        dates: impl IntoIterator<Item = NaiveDate>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, ClockError> {
        let mut sessions: Vec<NaiveDate> = dates
            .into_iter()
            .filter(|d| *d >= start && *d <= end)
            .collect();
        sessions.sort_unstable();
        sessions.dedup();
        Self::new(sessions)
    }

    /// Monday–Friday sessions in `[start, end]`.
    pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Result<Self, ClockError> {
        let mut sessions = Vec::new();
        let mut current = start;
        while current <= end {
            if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                sessions.push(current);
            }
            current += Duration::days(1);
        }
        Self::new(sessions)
    }

    pub fn sessions(&self) -> &[NaiveDate] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn first(&self) -> NaiveDate {
        self.sessions[0]
    }

    pub fn last(&self) -> NaiveDate {
        self.sessions[self.sessions.len() - 1]
    }
}

/// Decision time handed to every temporally-guarded read.
///
/// `DataManager` and `MemoryStore` reads take an `AsOf` as a mandatory
/// parameter; the usual way to obtain one is `SimulatedClock::as_of()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AsOf(NaiveDate);

impl AsOf {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for AsOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns simulated "current time". Never regresses, never resets.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    calendar: TradingCalendar,
    cursor: usize,
    finished: bool,
}

impl SimulatedClock {
    pub fn new(calendar: TradingCalendar) -> Self {
        Self {
            calendar,
            cursor: 0,
            finished: false,
        }
    }

    /// Current simulated session.
    pub fn now(&self) -> NaiveDate {
        self.calendar.sessions[self.cursor]
    }

    pub fn as_of(&self) -> AsOf {
        AsOf(self.now())
    }

    /// Zero-based index of the current session.
    pub fn step_index(&self) -> usize {
        self.cursor
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Move to the next session, or report `EndOfRun` when already on the last.
    pub fn advance(&mut self) -> Result<NaiveDate, ClockError> {
        if self.cursor + 1 >= self.calendar.len() {
            self.finished = true;
            return Err(ClockError::EndOfRun);
        }
        self.cursor += 1;
        Ok(self.now())
    }

    /// True once `advance()` has reported `EndOfRun`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn remaining(&self) -> usize {
        self.calendar.len() - self.cursor - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn starts_on_first_session() {
        let clock = SimulatedClock::new(TradingCalendar::new(vec![d(2), d(3), d(4)]).unwrap());
        assert_eq!(clock.now(), d(2));
        assert!(!clock.is_finished());
        assert_eq!(clock.remaining(), 2);
    }

    #[test]
    fn end_of_run_after_last_session() {
        let mut clock = SimulatedClock::new(TradingCalendar::new(vec![d(2), d(3), d(4)]).unwrap());
        assert_eq!(clock.advance(), Ok(d(3)));
        assert_eq!(clock.advance(), Ok(d(4)));
        assert_eq!(clock.advance(), Err(ClockError::EndOfRun));
        assert!(clock.is_finished());
        assert_eq!(clock.advance(), Err(ClockError::EndOfRun));
        assert_eq!(clock.now(), d(4));
    }

    #[test]
    fn rejects_unordered_and_empty_calendars() {
        assert_eq!(TradingCalendar::new(vec![]), Err(ClockError::EmptyCalendar));
        assert_eq!(
            TradingCalendar::new(vec![d(3), d(2)]),
            Err(ClockError::Unordered { at: d(2) })
        );
        assert!(TradingCalendar::new(vec![d(2), d(2)]).is_err());
    }

    #[test]
    fn from_dates_sorts_dedups_and_clips() {
        let cal = TradingCalendar::from_dates(vec![d(5), d(2), d(3), d(2), d(9)], d(2), d(5)).unwrap();
        assert_eq!(cal.sessions(), &[d(2), d(3), d(5)]);
    }

    #[test]
    fn weekdays_skip_weekends() {
        // 2024-01-06 and 07 are Saturday/Sunday.
        let cal = TradingCalendar::weekdays(d(5), d(8)).unwrap();
        assert_eq!(cal.sessions(), &[d(5), d(8)]);
    }
}
