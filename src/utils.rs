use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

/// Normalizes a header cell for matching: trimmed, inner whitespace
/// collapsed to one space, lowercased.
pub fn normalize_header(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parses a numeric cell. Empty, unparseable and non-finite values are `None`.
/// A single leading sign, a `$` and comma thousands separators are accepted.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let body = body.strip_prefix('$').unwrap_or(body);

    // Anything left must start like a plain decimal; "--5" or "$-5" is not one.
    if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let cleaned = strip_thousands_separators(body)?;
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(if negative { -value } else { value })
}

/// Removes commas from the integer part, provided they sit between
/// three-digit groups ("1,250" but not "1,2,3" or "12,50").
fn strip_thousands_separators(body: &str) -> Option<String> {
    if !body.contains(',') {
        return Some(body.to_string());
    }

    let (integer, fraction) = match body.find(|c: char| c == '.' || c == 'e' || c == 'E') {
        Some(i) => body.split_at(i),
        None => (body, ""),
    };
    if fraction.contains(',') {
        return None;
    }

    let mut groups = integer.split(',');
    let first = groups.next()?;
    let first_ok = (1..=3).contains(&first.len()) && first.bytes().all(|b| b.is_ascii_digit());
    let rest_ok = groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit()));
    if !(first_ok && rest_ok) {
        return None;
    }

    Some(format!("{}{}", integer.replace(',', ""), fraction))
}

/// Like [`parse_number`] but negative values are treated as missing.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    parse_number(raw).filter(|v| *v >= 0.0)
}

fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap()
}

/// Converts a spreadsheet serial day number to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    excel_epoch().checked_add_days(Days::new(serial.trunc() as u64))
}

/// Parses a date cell using `formats` in order, then an ISO date prefix,
/// then (optionally) a spreadsheet serial day number.
pub fn parse_date(raw: &str, formats: &[String], accept_serial: bool) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(datetime.date());
        }
    }

    // "2024-01-15" or "2024-01-15T00:00:00" and similar
    if let Some(prefix) = trimmed.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }

    if accept_serial {
        if let Ok(serial) = trimmed.parse::<f64>() {
            return excel_serial_to_date(serial);
        }
    }

    None
}

/// Month bucket label, "YYYY-MM".
pub fn month_label(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Compares strings so that embedded digit runs order numerically
/// ("SC2" < "SC10"). Falls back to byte order so the result is total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l, r) {
                    (Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
                    (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
                    (Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn cmp_digits(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;
        let is_digit = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != is_digit)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());

        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if is_digit {
            Chunk::Digits(chunk)
        } else {
            Chunk::Text(chunk)
        })
    }
}

/// Arithmetic mean; `None` for an empty input.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
