// src/validator.rs - Server-side numeric validation for stock edits
//
// The admin UI lets the cook type short arithmetic into the stock field
// ("50+10" after a delivery). That input is parsed by the strict grammar
// below - digits, decimal points, '+' and '-' only. It is never handed to
// any dynamic evaluator.

use crate::error::ApiError;
use crate::models::QuantityInput;

const MAX_QUANTITY: f64 = 1e9;

/// Grammar: expr := ['-'] number (('+' | '-') number)*
/// number := digits ['.' digits]
/// Whitespace around tokens is ignored.
pub fn parse_quantity_expr(input: &str) -> Result<f64, ApiError> {
    let mut chars = input.chars().peekable();
    let mut total = 0.0f64;
    let mut sign = 1.0f64;
    let mut expect_number = true;

    skip_spaces(&mut chars);
    if chars.peek() == Some(&'-') {
        chars.next();
        sign = -1.0;
    }

    loop {
        skip_spaces(&mut chars);

        if expect_number {
            let number = read_number(&mut chars)
                .ok_or_else(|| invalid_expr(input))?;
            total += sign * number;
            expect_number = false;
        } else {
            match chars.next() {
                None => break,
                Some('+') => sign = 1.0,
                Some('-') => sign = -1.0,
                Some(_) => return Err(invalid_expr(input)),
            }
            expect_number = true;
        }
    }

    if expect_number {
        // Trailing operator, e.g. "50+"
        return Err(invalid_expr(input));
    }

    Ok(total)
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::Chars>) {
    while chars.peek().map_or(false, |c| *c == ' ') {
        chars.next();
    }
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<f64> {
    let mut buf = String::new();
    while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
        buf.push(c);
        chars.next();
    }
    if chars.peek() == Some(&'.') {
        buf.push('.');
        chars.next();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
            buf.push(c);
            chars.next();
        }
    }
    if buf.is_empty() || buf == "." {
        return None;
    }
    buf.parse::<f64>().ok()
}

fn invalid_expr(input: &str) -> ApiError {
    ApiError::InvalidValue(format!(
        "'{}' is not a valid quantity expression (digits, '.', '+', '-' only)",
        input
    ))
}

/// Resolves a stock-edit input (plain number or expression) to a number.
pub fn resolve_quantity(input: &QuantityInput) -> Result<f64, ApiError> {
    let value = match input {
        QuantityInput::Number(n) => *n,
        QuantityInput::Expression(expr) => parse_quantity_expr(expr)?,
    };
    validate_quantity(value)?;
    Ok(value)
}

pub fn validate_quantity(quantity: f64) -> Result<(), ApiError> {
    if !quantity.is_finite() {
        return Err(ApiError::InvalidValue("Quantity must be a finite number".to_string()));
    }
    if quantity.abs() > MAX_QUANTITY {
        return Err(ApiError::InvalidValue("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_non_negative(quantity: f64) -> Result<(), ApiError> {
    validate_quantity(quantity)?;
    if quantity < 0.0 {
        return Err(ApiError::InvalidValue("Quantity cannot be negative".to_string()));
    }
    Ok(())
}

pub fn validate_positive(quantity: f64) -> Result<(), ApiError> {
    validate_quantity(quantity)?;
    if quantity <= 0.0 {
        return Err(ApiError::InvalidValue("Quantity must be positive".to_string()));
    }
    Ok(())
}
