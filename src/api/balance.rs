//! Typed parser for the wallet balance printed by the execution tool.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// Why a balance could not be read from tool output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceParseError {
    #[error("balance output was empty")]
    Empty,
    #[error("no numeric balance found in output")]
    NoNumber,
}

/// Extract the wallet's total balance from tool output.
///
/// Prefers the first number on a line mentioning both "Total" and "Balance",
/// then falls back to the first decimal number anywhere in the text.
pub fn parse_wallet_balance(output: &str) -> Result<Decimal, BalanceParseError> {
    if output.trim().is_empty() {
        return Err(BalanceParseError::Empty);
    }

    let total_line = output
        .lines()
        .filter(|line| line.contains("Total") && line.contains("Balance"))
        .find_map(first_number_token);

    if let Some(value) = total_line {
        return Ok(value);
    }

    first_decimal_literal(output).ok_or(BalanceParseError::NoNumber)
}

/// First whitespace separated token that parses as a number once thousands
/// separators, currency glyphs and punctuation around it are stripped.
fn first_number_token(line: &str) -> Option<Decimal> {
    line.replace(',', "")
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-')))
        .filter(|tok| tok.chars().any(|c| c.is_ascii_digit()))
        .find_map(|tok| Decimal::from_str(tok).ok())
}

/// First `digits.digits` run in the text.
fn first_decimal_literal(text: &str) -> Option<Decimal> {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }

        if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
            let mut end = i + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            return Decimal::from_str(&text[start..end]).ok();
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_total_balance_line() {
        let output = "\
Wallet Coldkey Balance
Network: finney

 Wallet Name   Coldkey Address   Free Balance   Staked Value
 mirror        5CoLd...          τ 1.2000       τ 3.4500

 Total Balance                   τ 1,204.6500
";
        assert_eq!(parse_wallet_balance(output), Ok(dec!(1204.6500)));
    }

    #[test]
    fn test_total_balance_without_glyph() {
        assert_eq!(
            parse_wallet_balance("Total Balance: 42.5 TAO"),
            Ok(dec!(42.5))
        );
    }

    #[test]
    fn test_falls_back_to_first_decimal() {
        let output = "Coldkey 5CoLd free: τ0.7500 staked: τ2.0000";
        assert_eq!(parse_wallet_balance(output), Ok(dec!(0.7500)));
    }

    #[test]
    fn test_integers_alone_are_not_a_balance() {
        assert_eq!(
            parse_wallet_balance("wallet has 3 hotkeys on 2 subnets"),
            Err(BalanceParseError::NoNumber)
        );
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(parse_wallet_balance("  \n"), Err(BalanceParseError::Empty));
    }
}
