//! Structured extraction from downloaded files and page text.

pub mod pdf;
pub mod planning;
pub mod sheet;
pub mod tabular;
pub mod text;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use crate::records::{
    AgendaDocument, BudgetItem, MinutesDocument, PlanningApplication, SpendingRecord,
    StatisticalDatum,
};

/// Years outside this range are treated as parse noise.
pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2030;

lazy_static! {
    static ref ISO_DATE: Regex = Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap();
    static ref SLASH_DATE: Regex = Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})$").unwrap();
}

/// Everything one file produced.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBundle {
    pub budget_items: Vec<BudgetItem>,
    pub spending_records: Vec<SpendingRecord>,
    pub statistical_data: Vec<StatisticalDatum>,
    pub planning_applications: Vec<PlanningApplication>,
    pub agenda: Option<AgendaDocument>,
    pub minutes: Option<MinutesDocument>,
}

impl ExtractedBundle {
    pub fn total_items(&self) -> usize {
        self.budget_items.len()
            + self.spending_records.len()
            + self.statistical_data.len()
            + self.planning_applications.len()
            + self.agenda.as_ref().map_or(0, |a| a.agenda_items.len())
            + self.minutes.as_ref().map_or(0, |m| m.decisions.len())
    }

    /// Record kinds present, for the artifact summary.
    pub fn data_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        if !self.budget_items.is_empty() {
            types.push("budget".to_string());
        }
        if !self.spending_records.is_empty() {
            types.push("spending".to_string());
        }
        if !self.statistical_data.is_empty() {
            types.push("statistic".to_string());
        }
        if !self.planning_applications.is_empty() {
            types.push("planning_application".to_string());
        }
        if self.agenda.is_some() {
            types.push("agenda".to_string());
        }
        if self.minutes.is_some() {
            types.push("minutes".to_string());
        }
        types
    }

    pub fn is_empty(&self) -> bool {
        self.total_items() == 0 && self.agenda.is_none() && self.minutes.is_none()
    }
}

/// Parse a date in any accepted civic format: ISO `YYYY-MM-DD`,
/// UK `DD/MM/YYYY` or `DD-MM-YYYY`, or US `MM/DD/YY(YY)`. Two-digit
/// years map to `20YY`; UK reading wins when both are plausible.
/// Years outside 2000..=2030 are rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Some(cap) = ISO_DATE.captures(raw) {
        let year: i32 = cap[1].parse().ok()?;
        let month: u32 = cap[2].parse().ok()?;
        let day: u32 = cap[3].parse().ok()?;
        return checked_date(year, month, day);
    }

    if let Some(cap) = SLASH_DATE.captures(raw) {
        let first: u32 = cap[1].parse().ok()?;
        let second: u32 = cap[2].parse().ok()?;
        let mut year: i32 = cap[3].parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        // UK day-first reading, then US month-first.
        return checked_date(year, second, first).or_else(|| checked_date(year, first, second));
    }

    None
}

fn checked_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a monetary amount: strips `£`, `$`, commas and whitespace, then
/// reads a decimal. Parenthesised amounts are treated as negative, the
/// accountancy convention.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '£' && *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    let value: Decimal = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn iso_dates_parse() {
        assert_eq!(
            parse_date("2023-12-31"),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
    }

    #[test]
    fn uk_dates_win_over_us() {
        // Unambiguous UK: day 31
        assert_eq!(
            parse_date("31/12/2023"),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
        // Ambiguous: read day-first
        assert_eq!(
            parse_date("01/02/2023"),
            NaiveDate::from_ymd_opt(2023, 2, 1)
        );
        // Only the US reading is possible
        assert_eq!(
            parse_date("12/31/2023"),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
    }

    #[test]
    fn dashed_and_two_digit_years() {
        assert_eq!(
            parse_date("15-06-2022"),
            NaiveDate::from_ymd_opt(2022, 6, 15)
        );
        assert_eq!(parse_date("15/06/22"), NaiveDate::from_ymd_opt(2022, 6, 15));
    }

    #[test]
    fn out_of_range_years_rejected() {
        assert_eq!(parse_date("31/12/1999"), None);
        assert_eq!(parse_date("2031-01-01"), None);
        assert_eq!(parse_date("01/01/31"), None); // 2031
    }

    #[test]
    fn junk_dates_rejected() {
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("99/99/2023"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn amounts_strip_currency_marks() {
        assert_eq!(
            parse_amount("£1,234,567.89"),
            Some(Decimal::from_str("1234567.89").unwrap())
        );
        assert_eq!(parse_amount("$500"), Some(Decimal::from(500)));
        assert_eq!(parse_amount(" 42.50 "), Some(Decimal::from_str("42.50").unwrap()));
    }

    #[test]
    fn bracketed_amounts_are_negative() {
        assert_eq!(parse_amount("(£250.00)"), Some(Decimal::from_str("-250.00").unwrap()));
    }

    #[test]
    fn non_numeric_amounts_rejected() {
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("£"), None);
    }
}
