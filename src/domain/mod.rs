//! Domain types and DTOs
//!
//! Request and response shapes for the bid-estimation API. Money is carried as
//! `Decimal` inside the engines and as plain JSON numbers on the wire.

#![allow(dead_code)]

pub mod auth;
pub mod companies;
pub mod discrepancies;
pub mod documents;
pub mod estimates;
pub mod generated_quotes;
pub mod imports;
pub mod matching;
pub mod materials;
pub mod parsing;
pub mod projects;
pub mod quote_requests;
pub mod quotes;
pub mod takeoff;
pub mod vendors;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert Decimal to f64 for JSON responses
pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert a request number to Decimal; `None` for NaN and infinities
pub fn f64_to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(6).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_conversion_keeps_cents() {
        assert_eq!(f64_to_decimal(18.95), Some(Decimal::new(1895, 2)));
        assert_eq!(f64_to_decimal(f64::NAN), None);
        assert_eq!(decimal_to_f64(Decimal::new(-125, 1)), -12.5);
    }
}
