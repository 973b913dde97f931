//! Arithmetic evaluation for `#Eval` rules.

use crate::error::{ImportError, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Evaluate `+ - * /`, unary minus and parentheses over decimal numbers.
pub fn evaluate(expr: &str) -> Result<f64> {
    let mut parser = ExprParser {
        chars: expr.chars().peekable(),
        source: expr,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some(&c) = parser.chars.peek() {
        return Err(parser.error(&format!("unexpected '{}'", c)));
    }
    Ok(value)
}

struct ExprParser<'a> {
    chars: Peekable<Chars<'a>>,
    source: &'a str,
}

impl<'a> ExprParser<'a> {
    fn error(&self, message: &str) -> ImportError {
        ImportError::Eval(format!("{} in '{}'", message, self.source))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.chars.next();
        }
    }

    fn next_op(&mut self, ops: &[char]) -> Option<char> {
        self.skip_whitespace();
        let matched = self.chars.peek().map(|c| ops.contains(c)).unwrap_or(false);
        if matched {
            self.chars.next()
        } else {
            None
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.next_op(&['+', '-']) {
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        while let Some(op) = self.next_op(&['*', '/']) {
            let rhs = self.factor()?;
            if op == '*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(self.error("division by zero"));
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some('-') => {
                self.chars.next();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                if self.next_op(&[')']).is_none() {
                    return Err(self.error("missing ')'"));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(self.error(&format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map_err(|_| self.error(&format!("invalid number '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("10 / 4 - 1").unwrap(), 1.5);
        assert_eq!(evaluate("-2 * -(3 + 1)").unwrap(), 8.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("3 apples").is_err());
        assert!(evaluate("1..2").is_err());
        let err = evaluate("4 )").unwrap_err();
        assert!(err.to_string().contains("unexpected ')' in '4 )'"));
    }
}
