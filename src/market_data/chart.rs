// Synthetic price series for the detail view. There is no history store; points are
// jittered +-5% around the current price, one per day.

use rand::Rng;

use crate::market_data::types::unix_now;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    OneDay,
    SevenDays,
    OneMonth,
    OneYear,
    All,
}

impl TimeFilter {
    pub fn days(self) -> u64 {
        match self {
            TimeFilter::OneDay => 1,
            TimeFilter::SevenDays => 7,
            TimeFilter::OneMonth => 30,
            TimeFilter::OneYear => 365,
            TimeFilter::All => 1825,
        }
    }
}

impl std::str::FromStr for TimeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1D" => Ok(TimeFilter::OneDay),
            "7D" => Ok(TimeFilter::SevenDays),
            "1M" => Ok(TimeFilter::OneMonth),
            "1Y" => Ok(TimeFilter::OneYear),
            "ALL" => Ok(TimeFilter::All),
            other => Err(format!("unknown time filter {other:?} (expected 1D, 7D, 1M, 1Y or ALL)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartPoint {
    pub timestamp: u64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// Up when the last point is at or above the first; Flat with fewer than two points.
pub fn trend(points: &[ChartPoint]) -> Trend {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => {
            if last.price >= first.price {
                Trend::Up
            } else {
                Trend::Down
            }
        }
        _ => Trend::Flat,
    }
}

/// `days + 1` points ending today, oldest first.
pub fn synthetic_series(price: f64, filter: TimeFilter) -> Vec<ChartPoint> {
    synthetic_series_at(price, filter, unix_now(), &mut rand::thread_rng())
}

pub fn synthetic_series_at<R: Rng>(price: f64, filter: TimeFilter, now: u64, rng: &mut R) -> Vec<ChartPoint> {
    let days = filter.days();
    (0..=days)
        .rev()
        .map(|i| ChartPoint {
            timestamp: now.saturating_sub(i * DAY_SECS),
            price: price * (1.0 + (rng.gen::<f64>() - 0.5) * 0.1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_point_counts_and_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for (filter, days) in [
            (TimeFilter::OneDay, 1),
            (TimeFilter::SevenDays, 7),
            (TimeFilter::OneMonth, 30),
            (TimeFilter::OneYear, 365),
            (TimeFilter::All, 1825),
        ] {
            let series = synthetic_series_at(100.0, filter, 1_700_000_000, &mut rng);
            assert_eq!(series.len(), days + 1);
            assert!(series.iter().all(|p| (95.0..=105.0).contains(&p.price)));
            assert_eq!(series.last().map(|p| p.timestamp), Some(1_700_000_000));
            assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }

    #[test]
    fn test_trend() {
        let p = |price| ChartPoint { timestamp: 0, price };
        assert_eq!(trend(&[p(1.0), p(2.0)]), Trend::Up);
        assert_eq!(trend(&[p(2.0), p(2.0)]), Trend::Up);
        assert_eq!(trend(&[p(2.0), p(1.0)]), Trend::Down);
        assert_eq!(trend(&[p(2.0)]), Trend::Flat);
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!("1y".parse::<TimeFilter>(), Ok(TimeFilter::OneYear));
        assert_eq!("ALL".parse::<TimeFilter>(), Ok(TimeFilter::All));
        assert!("2W".parse::<TimeFilter>().is_err());
    }
}
