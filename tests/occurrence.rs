//! tests/occurrence.rs
//! Occurrence arithmetic across frequencies.

mod common;

use crate::common::{at, tz};
use chrono::{Datelike, Duration as ChronoDuration, FixedOffset, TimeZone, Timelike, Utc};
use duekeeper::occurrence::to_business;
use duekeeper::{next_occurrence, EngineError, Frequency, OccurrenceCalculator};

#[test]
fn weekly_adds_seven_days_and_keeps_gap() {
  let start = at(2024, 1, 1, 9, 0);
  let deadline = at(2024, 1, 3, 17, 0);

  let next = next_occurrence(Frequency::Weekly, start, deadline).unwrap();
  assert_eq!(next, at(2024, 1, 10, 17, 0));
}

#[test]
fn advance_produces_start_deadline_and_following_occurrence() {
  let calc = OccurrenceCalculator::default();
  let start = at(2024, 1, 1, 9, 0);
  let deadline = at(2024, 1, 3, 17, 0);

  let occ = calc.advance(Frequency::Weekly, start, deadline).unwrap();
  assert_eq!(occ.start, at(2024, 1, 8, 9, 0));
  assert_eq!(occ.deadline, at(2024, 1, 10, 17, 0));
  // One more week: 2024-01-15T09:00 start, so the deadline lands on the 17th.
  assert_eq!(occ.next_occurrence, at(2024, 1, 17, 17, 0));
  assert_eq!(occ.deadline - occ.start, deadline - start);
}

#[test]
fn gap_is_preserved_for_calendar_frequencies() {
  let calc = OccurrenceCalculator::default();
  let start = at(2023, 6, 12, 8, 30);
  let gaps = [
    ChronoDuration::minutes(45),
    ChronoDuration::hours(30),
    ChronoDuration::days(9),
  ];
  for frequency in [Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
    for gap in gaps {
      let occ = calc.advance(frequency, start, start + gap).unwrap();
      assert_eq!(occ.deadline - occ.start, gap, "{frequency} gap {gap}");
      assert!(occ.start > start);
      assert!(occ.next_occurrence > occ.deadline);
    }
  }
}

#[test]
fn monthly_clamps_to_end_of_february() {
  let start = at(2024, 1, 31, 9, 0);
  let deadline = at(2024, 2, 1, 9, 0);

  let next = next_occurrence(Frequency::Monthly, start, deadline).unwrap();
  // Jan 31 + 1 month clamps to Feb 29 (leap year), then + 1 day gap.
  assert_eq!(next, at(2024, 3, 1, 9, 0));

  let occ = OccurrenceCalculator::default()
    .advance(Frequency::Monthly, start, deadline)
    .unwrap();
  assert_eq!(occ.start, at(2024, 2, 29, 9, 0));
  assert_eq!(occ.start.month(), 2);
}

#[test]
fn yearly_clamps_leap_day() {
  let start = at(2024, 2, 29, 10, 0);
  let deadline = at(2024, 3, 2, 10, 0);

  let occ = OccurrenceCalculator::default()
    .advance(Frequency::Yearly, start, deadline)
    .unwrap();
  assert_eq!(occ.start, at(2025, 2, 28, 10, 0));
  assert_eq!(occ.deadline, at(2025, 3, 2, 10, 0));
}

#[test]
fn immediate_is_deadline_plus_one_minute() {
  let deadline = at(2024, 5, 5, 12, 0);
  // Start is ignored, even when it is not before the deadline.
  for start in [
    at(2024, 5, 1, 0, 0),
    at(2024, 5, 5, 11, 59),
    at(2024, 5, 5, 12, 0),
    at(2024, 5, 9, 8, 0),
  ] {
    let next = next_occurrence(Frequency::Immediate, start, deadline).unwrap();
    assert_eq!(next, at(2024, 5, 5, 12, 1));
  }
}

#[test]
fn immediate_buffer_is_configurable() {
  let calc = OccurrenceCalculator::new(ChronoDuration::minutes(15));
  let next = calc
    .next_deadline(Frequency::Immediate, at(2024, 5, 5, 9, 0), at(2024, 5, 5, 12, 0))
    .unwrap();
  assert_eq!(next, at(2024, 5, 5, 12, 15));
}

#[test]
fn unknown_frequency_is_rejected() {
  let err = "Quarterly".parse::<Frequency>().unwrap_err();
  assert_eq!(err, EngineError::UnsupportedFrequency("Quarterly".to_string()));

  // Parsing is case-sensitive.
  assert!("weekly".parse::<Frequency>().is_err());
  assert_eq!("Monthly".parse::<Frequency>().unwrap(), Frequency::Monthly);

  let decoded: Result<Frequency, _> = serde_json::from_str("\"Quarterly\"");
  assert!(decoded.is_err());
}

#[test]
fn non_positive_gap_is_a_validation_error() {
  let start = at(2024, 1, 3, 9, 0);
  for frequency in [Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
    let result = next_occurrence(frequency, start, start);
    assert!(matches!(result, Err(EngineError::Validation(_))), "{frequency}");
  }
}

#[test]
fn month_steps_use_the_business_calendar_date() {
  // 2024-01-31T20:00Z is already Feb 1 in UTC+8, so the month step starts
  // from Feb 1 and lands on Mar 1 local time.
  let start_utc = Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap();
  let start = to_business(&start_utc, &tz());
  let deadline = start + ChronoDuration::hours(2);
  assert_eq!(start.day(), 1);

  let occ = OccurrenceCalculator::default()
    .advance(Frequency::Monthly, start, deadline)
    .unwrap();
  assert_eq!((occ.start.month(), occ.start.day(), occ.start.hour()), (3, 1, 4));
  assert_eq!(*occ.start.offset(), FixedOffset::east_opt(8 * 3600).unwrap());
}
