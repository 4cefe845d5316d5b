// Ranking helpers for the overview: biggest gainers and losers by change percent.

use std::cmp::Ordering;

use crate::market_data::types::Quote;

fn by_change_desc(a: &Quote, b: &Quote) -> Ordering {
    b.change_percent.partial_cmp(&a.change_percent).unwrap_or(Ordering::Equal)
}

/// Up to `n` quotes with the highest change percent, best first.
pub fn top_gainers(quotes: &[Quote], n: usize) -> Vec<Quote> {
    let mut sorted = quotes.to_vec();
    sorted.sort_by(by_change_desc);
    sorted.truncate(n);
    sorted
}

/// Up to `n` quotes with the lowest change percent, worst first.
pub fn top_losers(quotes: &[Quote], n: usize) -> Vec<Quote> {
    let mut sorted = quotes.to_vec();
    sorted.sort_by(|a, b| by_change_desc(b, a));
    sorted.truncate(n);
    sorted
}

/// 1.23T / 4.56B / 7.89M; smaller values are printed with thousands separators.
pub fn format_large_number(n: f64) -> String {
    const UNITS: [(f64, &str); 3] = [(1e12, "T"), (1e9, "B"), (1e6, "M")];
    for (scale, suffix) in UNITS {
        if n >= scale {
            return format!("{:.2}{suffix}", n / scale);
        }
    }
    group_thousands(n)
}

fn group_thousands(n: f64) -> String {
    let rounded = n.round();
    let digits = format!("{}", rounded.abs() as u64);
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
