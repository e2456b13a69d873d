//! Numeric expression scanner used for every parameter value in the score
//! language (spec.md §4.4 "Number scanner").
//!
//! Precedence, low to high: `+ -` < `* /` < `^` < atoms. Atoms are decimal
//! literals, caller-supplied named values (pan letters `C`/`L`/`R`, etc.),
//! or a parenthesized subexpression. A unary `+`/`-` is allowed directly on
//! an atom. Any subexpression that evaluates to infinity taints the whole
//! scan; `NaN` does too. Both cases emit a warning and reject the number
//! rather than return a partial value.

use crate::error::{Diagnostic, ErrorKind};
use crate::scanner::{is_ident_start, Scanner};

pub type NameLookup<'a> = dyn Fn(&str) -> Option<f64> + 'a;

pub struct NumExpr<'s, 'n> {
    scanner: &'s mut Scanner,
    lookup: &'n NameLookup<'n>,
}

impl<'s, 'n> NumExpr<'s, 'n> {
    pub fn new(scanner: &'s mut Scanner, lookup: &'n NameLookup<'n>) -> Self {
        Self { scanner, lookup }
    }

    /// Parses one complete numeric expression. `Ok(None)` means no
    /// expression was present at all (caller should treat this as "absent",
    /// not an error); `Err` means a value was present but tainted by NaN or
    /// infinity, and a warning has already been recorded.
    pub fn parse(&mut self) -> Result<Option<f64>, Diagnostic> {
        let c = self.scanner.get_c_skip_space();
        self.scanner.unget_c(c);
        if !self.starts_expr(c) {
            return Ok(None);
        }
        let v = self.additive()?;
        Ok(Some(v))
    }

    fn starts_expr(&self, c: u8) -> bool {
        c == b'(' || c == b'-' || c == b'+' || c.is_ascii_digit() || c == b'.' || is_ident_start(c)
    }

    fn additive(&mut self) -> Result<f64, Diagnostic> {
        let mut v = self.multiplicative()?;
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                b'+' => v = self.taint_check(v + self.multiplicative()?)?,
                b'-' => v = self.taint_check(v - self.multiplicative()?)?,
                _ => {
                    self.scanner.unget_c(c);
                    return Ok(v);
                }
            }
        }
    }

    fn multiplicative(&mut self) -> Result<f64, Diagnostic> {
        let mut v = self.power()?;
        loop {
            let c = self.scanner.get_c_skip_space();
            match c {
                b'*' => v = self.taint_check(v * self.power()?)?,
                b'/' => v = self.taint_check(v / self.power()?)?,
                _ => {
                    self.scanner.unget_c(c);
                    return Ok(v);
                }
            }
        }
    }

    fn power(&mut self) -> Result<f64, Diagnostic> {
        let base = self.unary()?;
        let c = self.scanner.get_c_skip_space();
        if c == b'^' {
            let exp = self.power()?;
            self.taint_check(base.powf(exp))
        } else {
            self.scanner.unget_c(c);
            Ok(base)
        }
    }

    fn unary(&mut self) -> Result<f64, Diagnostic> {
        let c = self.scanner.get_c_skip_space();
        match c {
            b'-' => Ok(-self.atom()?),
            b'+' => self.atom(),
            _ => {
                self.scanner.unget_c(c);
                self.atom()
            }
        }
    }

    fn atom(&mut self) -> Result<f64, Diagnostic> {
        let c = self.scanner.get_c_skip_space();
        if c == b'(' {
            let v = self.additive()?;
            let close = self.scanner.get_c_skip_space();
            if close != b')' {
                self.scanner.unget_c(close);
                return Err(self.error("unclosed '(' in numeric expression"));
            }
            return self.taint_check(v);
        }
        if c.is_ascii_digit() || c == b'.' {
            self.scanner.unget_c(c);
            return match self.scanner.get_float(false) {
                Some((v, _)) => self.taint_check(v),
                None => Err(self.error("expected a number")),
            };
        }
        if is_ident_start(c) {
            let ident = self.scanner.read_identifier(c);
            return match (self.lookup)(&ident) {
                Some(v) => self.taint_check(v),
                None => Err(self.error(format!("unknown named value '{ident}'"))),
            };
        }
        self.scanner.unget_c(c);
        Err(self.error("expected a number, name, or '('"))
    }

    fn taint_check(&mut self, v: f64) -> Result<f64, Diagnostic> {
        if v.is_nan() {
            return Err(self.error("NaN in numeric expression"));
        }
        if v.is_infinite() {
            return Err(self.error("infinity in numeric expression"));
        }
        Ok(v)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        let mut d = Diagnostic::new(
            ErrorKind::Numerical,
            self.scanner.line(),
            self.scanner.column(),
            message,
        );
        if let Some(p) = self.scanner.path() {
            d = d.with_path(p);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_source::TextSource;

    fn eval(src: &str) -> Result<Option<f64>, Diagnostic> {
        let mut scanner = Scanner::new(TextSource::from_str(src));
        let lookup = |name: &str| match name {
            "C" => Some(0.0),
            "L" => Some(-1.0),
            "R" => Some(1.0),
            _ => None,
        };
        let mut e = NumExpr::new(&mut scanner, &lookup);
        e.parse()
    }

    #[test]
    fn precedence_is_standard() {
        assert_eq!(eval("2 + 3 * 4").unwrap(), Some(14.0));
        assert_eq!(eval("(2 + 3) * 4").unwrap(), Some(20.0));
        assert_eq!(eval("2 ^ 3 + 1").unwrap(), Some(9.0));
    }

    #[test]
    fn unary_minus_on_atom() {
        assert_eq!(eval("-5 + 2").unwrap(), Some(-3.0));
    }

    #[test]
    fn named_values_resolve() {
        assert_eq!(eval("R").unwrap(), Some(1.0));
        assert_eq!(eval("L * 2").unwrap(), Some(-2.0));
    }

    #[test]
    fn infinity_taints_and_rejects() {
        assert!(eval("1 / 0").is_err());
    }

    #[test]
    fn absence_is_not_an_error() {
        assert_eq!(eval("").unwrap(), None);
    }
}
