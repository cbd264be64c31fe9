use std::collections::BTreeMap;

use chrono::{DateTime, Utc, Weekday};
use log::warn;

use barsync_market_data::Resolution;

use crate::bars::PriceBar;

/// Rolls daily bars up into weekly bars.
///
/// Weeks end on `week_end` (Friday by default) and a weekly bar's
/// `period_start` is the first calendar day of its week. Open comes from the
/// first trading day, close from the last, high/low are the extremes and
/// volume is the sum. Weeks without daily bars produce nothing.
#[derive(Clone, Copy, Debug)]
pub struct WeeklySynthesizer {
    week_end: Weekday,
}

impl WeeklySynthesizer {
    pub fn new(week_end: Weekday) -> Self {
        Self { week_end }
    }

    /// Start of the week containing `ts`.
    pub fn week_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        Resolution::Weekly.floor_anchored(ts, self.week_end)
    }

    pub fn synthesize(&self, daily: &[PriceBar]) -> Vec<PriceBar> {
        let mut weeks: BTreeMap<(String, DateTime<Utc>), Vec<&PriceBar>> = BTreeMap::new();
        for bar in daily {
            if bar.resolution != Resolution::Daily {
                warn!(
                    "Skipping {} bar for {} in weekly synthesis",
                    bar.resolution, bar.instrument
                );
                continue;
            }
            weeks
                .entry((bar.instrument.clone(), self.week_start(bar.period_start)))
                .or_default()
                .push(bar);
        }

        weeks
            .into_iter()
            .filter_map(|((instrument, week_start), mut days)| {
                days.sort_by_key(|d| d.period_start);
                let first = days.first()?;
                let last = days.last()?;
                Some(PriceBar {
                    instrument,
                    resolution: Resolution::Weekly,
                    period_start: week_start,
                    open: first.open,
                    high: days.iter().map(|d| d.high).max()?,
                    low: days.iter().map(|d| d.low).min()?,
                    close: last.close,
                    volume: days
                        .iter()
                        .fold(0u64, |total, d| total.saturating_add(d.volume)),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn day(
        instrument: &str,
        date: DateTime<Utc>,
        o: Decimal,
        h: Decimal,
        l: Decimal,
        c: Decimal,
        v: u64,
    ) -> PriceBar {
        PriceBar {
            instrument: instrument.to_string(),
            resolution: Resolution::Daily,
            period_start: date,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        }
    }

    fn jan(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_single_week_rollup() {
        let closes = [dec!(10), dec!(11), dec!(9), dec!(12), dec!(13)];
        let daily: Vec<PriceBar> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| day("TST1", jan(1) + Duration::days(i as i64), *c, *c, *c, *c, 100))
            .collect();

        let weekly = WeeklySynthesizer::new(Weekday::Fri).synthesize(&daily);
        assert_eq!(weekly.len(), 1);
        let week = &weekly[0];
        assert_eq!(week.period_start, Utc.with_ymd_and_hms(2023, 12, 30, 0, 0, 0).unwrap());
        assert_eq!(week.open, dec!(10));
        assert_eq!(week.high, dec!(13));
        assert_eq!(week.low, dec!(9));
        assert_eq!(week.close, dec!(13));
        assert_eq!(week.volume, 500);
    }

    #[test]
    fn test_splits_on_week_end_and_skips_empty_weeks() {
        let daily = vec![
            // Friday Jan 5th closes the first week.
            day("TST1", jan(5), dec!(10), dec!(11), dec!(9), dec!(10), 10),
            // Nothing in the week of Jan 6th..12th.
            day("TST1", jan(15), dec!(20), dec!(21), dec!(19), dec!(20), 20),
            day("TST1", jan(16), dec!(20), dec!(25), dec!(18), dec!(24), 30),
        ];

        let weekly = WeeklySynthesizer::new(Weekday::Fri).synthesize(&daily);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].volume, 10);
        assert_eq!(weekly[1].period_start, jan(13));
        assert_eq!(weekly[1].high, dec!(25));
        assert_eq!(weekly[1].low, dec!(18));
        assert_eq!(weekly[1].close, dec!(24));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = day("TST1", jan(2), dec!(10), dec!(12), dec!(9), dec!(11), 1);
        let b = day("TST1", jan(3), dec!(11), dec!(14), dec!(10), dec!(13), 2);
        let synth = WeeklySynthesizer::new(Weekday::Fri);
        assert_eq!(
            synth.synthesize(&[a.clone(), b.clone()]),
            synth.synthesize(&[b, a])
        );
    }

    #[test]
    fn test_volume_saturates_instead_of_overflowing() {
        let daily = vec![
            day("TST1", jan(2), dec!(1), dec!(1), dec!(1), dec!(1), u64::MAX - 1),
            day("TST1", jan(3), dec!(1), dec!(1), dec!(1), dec!(1), 5),
        ];
        let weekly = WeeklySynthesizer::new(Weekday::Fri).synthesize(&daily);
        assert_eq!(weekly[0].volume, u64::MAX);
    }

    #[test]
    fn test_instruments_are_kept_apart() {
        let daily = vec![
            day("AAA", jan(2), dec!(1), dec!(1), dec!(1), dec!(1), 1),
            day("BBB", jan(2), dec!(2), dec!(2), dec!(2), dec!(2), 2),
        ];
        let weekly = WeeklySynthesizer::new(Weekday::Fri).synthesize(&daily);
        assert_eq!(weekly.len(), 2);
        assert!(weekly.iter().any(|w| w.instrument == "AAA" && w.volume == 1));
        assert!(weekly.iter().any(|w| w.instrument == "BBB" && w.volume == 2));
    }
}
