use chrono::{DateTime, Days, Months, Utc};
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::{from_local, to_local_naive};
use crate::task::RecurrenceType;

/// Rolls a due date forward by one recurrence unit in local calendar terms.
///
/// Monthly and yearly steps clamp to the last day of a shorter month
/// (Jan 31 -> Feb 28/29, Feb 29 -> Feb 28).
#[must_use]
pub fn next_due_date(
    current: Option<DateTime<Utc>>,
    recurrence: RecurrenceType,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    let current = current?;
    let local = to_local_naive(current, tz);

    let advanced = match recurrence {
        RecurrenceType::None => return None,
        RecurrenceType::Daily => local.checked_add_days(Days::new(1)),
        RecurrenceType::Weekly => local.checked_add_days(Days::new(7)),
        RecurrenceType::Monthly => local.checked_add_months(Months::new(1)),
        RecurrenceType::Yearly => local.checked_add_months(Months::new(12)),
    }?;

    let next = from_local(advanced, tz)?;
    trace!(%current, %next, %recurrence, "advanced recurring due date");
    Some(next)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Days, Months, TimeZone, Utc};
    use chrono_tz::America::New_York;
    use chrono_tz::Tz;

    use super::next_due_date;
    use crate::datetime::{from_local, to_local_naive};
    use crate::task::RecurrenceType;

    const RECURRING: [RecurrenceType; 4] = [
        RecurrenceType::Daily,
        RecurrenceType::Weekly,
        RecurrenceType::Monthly,
        RecurrenceType::Yearly,
    ];

    fn local(tz: Tz, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn absent_inputs_yield_none() {
        let due = local(New_York, 2026, 5, 4, 9, 0);
        for recurrence in RECURRING {
            assert_eq!(next_due_date(None, recurrence, New_York), None);
        }
        assert_eq!(next_due_date(Some(due), RecurrenceType::None, New_York), None);
    }

    #[test]
    fn every_unit_moves_strictly_later_and_inverts() {
        let samples = [
            local(New_York, 2026, 1, 15, 9, 30),
            local(New_York, 2026, 6, 30, 0, 0),
            local(New_York, 2026, 12, 31, 23, 45),
        ];
        for due in samples {
            for recurrence in RECURRING {
                let next = next_due_date(Some(due), recurrence, New_York)
                    .expect("recurring date advances");
                assert!(next > due, "{recurrence} did not advance {due}");

                let next_local = to_local_naive(next, New_York);
                let back = match recurrence {
                    RecurrenceType::Daily => next_local.checked_sub_days(Days::new(1)),
                    RecurrenceType::Weekly => next_local.checked_sub_days(Days::new(7)),
                    RecurrenceType::Monthly => next_local.checked_sub_months(Months::new(1)),
                    RecurrenceType::Yearly => next_local.checked_sub_months(Months::new(12)),
                    RecurrenceType::None => None,
                }
                .expect("inverse step");
                if recurrence != RecurrenceType::Monthly {
                    assert_eq!(back, to_local_naive(due, New_York));
                }
            }
        }
    }

    #[test]
    fn monthly_clamps_to_end_of_month() {
        let jan_31 = local(chrono_tz::UTC, 2026, 1, 31, 8, 0);
        let next = next_due_date(Some(jan_31), RecurrenceType::Monthly, chrono_tz::UTC)
            .expect("advances");
        assert_eq!(next, local(chrono_tz::UTC, 2026, 2, 28, 8, 0));

        let leap = local(chrono_tz::UTC, 2028, 1, 31, 8, 0);
        let next = next_due_date(Some(leap), RecurrenceType::Monthly, chrono_tz::UTC)
            .expect("advances");
        assert_eq!(next, local(chrono_tz::UTC, 2028, 2, 29, 8, 0));
    }

    #[test]
    fn yearly_from_leap_day_clamps() {
        let leap_day = local(chrono_tz::UTC, 2028, 2, 29, 12, 0);
        let next = next_due_date(Some(leap_day), RecurrenceType::Yearly, chrono_tz::UTC)
            .expect("advances");
        assert_eq!(next, local(chrono_tz::UTC, 2029, 2, 28, 12, 0));
    }

    #[test]
    fn daily_keeps_wall_clock_across_dst() {
        // Spring forward in New York happens on 2026-03-08.
        let before = local(New_York, 2026, 3, 7, 9, 0);
        let next = next_due_date(Some(before), RecurrenceType::Daily, New_York)
            .expect("advances");
        assert_eq!(next, local(New_York, 2026, 3, 8, 9, 0));
        assert_eq!((next - before).num_hours(), 23);
    }

    #[test]
    fn landing_in_dst_gap_moves_forward() {
        let before = local(New_York, 2026, 3, 7, 2, 30);
        let next = next_due_date(Some(before), RecurrenceType::Daily, New_York)
            .expect("advances");
        let expected = from_local(
            chrono::NaiveDate::from_ymd_opt(2026, 3, 8)
                .expect("valid date")
                .and_hms_opt(3, 30, 0)
                .expect("valid time"),
            New_York,
        )
        .expect("resolves");
        assert_eq!(next, expected);
    }
}
