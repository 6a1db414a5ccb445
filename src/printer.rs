//! Configurable value rendering.
//!
//! Every value has two printed forms: `str` (display text - a string prints
//! as its raw characters) and `repr` (a parseable form - strings come back
//! quoted and escaped, symbols carry their `#` quote prefix, floats keep a
//! decimal point so they re-read as floats). Numeric digits honor the
//! [`PrintConfig`]: positional printing in any base from 2 to 36, with
//! `0b`/`0o`/`0x` prefixes for the common bases or the `radix#digits`
//! quoted form for everything else.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::value::{ListElem, Pair, Payload, TypedValue};

/// Fractional digits rendered when a float is printed positionally.
const FLOAT_FRACTION_DIGITS: usize = 8;

/// Printer options, shared by the engine and every compiled interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintConfig {
    /// Output base for integer and float digits, 2 to 36.
    pub base: u32,
    /// Use the host float formatter when printing base-10 floats.
    pub allow_standard_printer: bool,
    /// Force the `radix#digits` quoted form for every base, including 10.
    pub uniform_base_notation: bool,
}

impl Default for PrintConfig {
    fn default() -> Self {
        PrintConfig {
            base: 10,
            allow_standard_printer: true,
            uniform_base_notation: false,
        }
    }
}

/// Shared mutable handle to the engine's print options. Compiled
/// interpolation instructions hold one so that later option changes are
/// visible to already-compiled code.
pub type PrintCfgHandle = Rc<RefCell<PrintConfig>>;

#[derive(Clone, Copy, PartialEq)]
enum Form {
    Str,
    Repr,
}

/// Display form of a value.
pub fn render_str(value: &TypedValue, cfg: &PrintConfig) -> String {
    render(value, cfg, Form::Str)
}

/// Parseable form of a value.
pub fn render_repr(value: &TypedValue, cfg: &PrintConfig) -> String {
    render(value, cfg, Form::Repr)
}

fn render(value: &TypedValue, cfg: &PrintConfig, form: Form) -> String {
    match value.payload() {
        Payload::Unit => "null".to_owned(),
        Payload::Bool(b) => b.to_string(),
        Payload::Int(n) => render_int(n, cfg),
        Payload::Float(x) => render_float(*x, cfg, form),
        Payload::Complex(z) => {
            let re = render_float(z.re, cfg, Form::Str);
            if z.im.is_sign_negative() {
                format!("{re}-{}i", render_float(-z.im, cfg, Form::Str))
            } else {
                format!("{re}+{}i", render_float(z.im, cfg, Form::Str))
            }
        }
        Payload::Str(s) => match form {
            Form::Str => s.clone(),
            Form::Repr => quote_string(s),
        },
        Payload::Sym(s) => match form {
            Form::Str => s.to_string(),
            Form::Repr => format!("#{s}"),
        },
        Payload::Pair(p) => render_pair(p, cfg),
        Payload::Code(_) => "<code>".to_owned(),
        Payload::Callable(c) => format!("<callable:{}>", c.name()),
        Payload::Object(o) => o.render(),
    }
}

/// Pair chains print as `[a, b, c]` when proper and as right-nested
/// `(a : (b : tail))` cons cells otherwise. Elements always use repr form
/// so strings inside containers stay distinguishable from symbols.
fn render_pair(pair: &Rc<Pair>, cfg: &PrintConfig) -> String {
    let mut items = Vec::new();
    let mut terminator = None;
    for elem in pair.walk() {
        match elem {
            ListElem::Item(v) => items.push(render(&v, cfg, Form::Repr)),
            ListElem::Tail(v) => terminator = Some(render(&v, cfg, Form::Repr)),
        }
    }
    match terminator {
        None => format!("[{}]", items.join(", ")),
        Some(tail) => {
            let mut out = tail;
            for item in items.into_iter().rev() {
                out = format!("({item} : {out})");
            }
            out
        }
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn render_int(n: &BigInt, cfg: &PrintConfig) -> String {
    if cfg.base == 10 && !cfg.uniform_base_notation {
        return n.to_string();
    }
    decorate_base(n.to_str_radix(cfg.base), cfg)
}

fn render_float(x: f64, cfg: &PrintConfig, form: Form) -> String {
    if x.is_nan() {
        return "NaN".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "+Inf" } else { "-Inf" }.to_owned();
    }
    if cfg.base == 10 && cfg.allow_standard_printer && !cfg.uniform_base_notation {
        let mut s = x.to_string();
        if form == Form::Repr && !s.contains(['.', 'e', 'E']) {
            s.push_str(".0");
        }
        return s;
    }
    let body = positional_float(x.abs(), cfg.base);
    let signed = if x < 0.0 { format!("-{body}") } else { body };
    decorate_base(signed, cfg)
}

/// Digits of a non-negative finite float in the given base, with at most
/// [`FLOAT_FRACTION_DIGITS`] fractional digits and trailing zeros dropped.
fn positional_float(x: f64, base: u32) -> String {
    let int_part = x.trunc();
    let mut out = match BigInt::from_f64(int_part) {
        Some(n) => n.to_str_radix(base),
        None => "0".to_owned(),
    };
    let mut frac = x - int_part;
    let mut digits = String::new();
    for _ in 0..FLOAT_FRACTION_DIGITS {
        if frac == 0.0 {
            break;
        }
        frac *= f64::from(base);
        let digit = (frac.trunc() as u32).min(base - 1);
        frac -= f64::from(digit);
        match char::from_digit(digit, base) {
            Some(c) => digits.push(c),
            None => break,
        }
    }
    while digits.ends_with('0') {
        digits.pop();
    }
    if !digits.is_empty() {
        out.push('.');
        out.push_str(&digits);
    }
    out
}

/// Attach base notation to a digit string: `0b`/`0o`/`0x` prefixes for the
/// common bases, `radix#digits` for the rest, and `radix#digits` for every
/// base under uniform notation. A leading minus stays outside the prefix so
/// the result re-reads as a negated literal.
fn decorate_base(digits: String, cfg: &PrintConfig) -> String {
    let (sign, body) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest.to_owned()),
        None => ("", digits),
    };
    let prefix = if cfg.uniform_base_notation {
        format!("{}#", cfg.base)
    } else {
        match cfg.base {
            2 => "0b".to_owned(),
            8 => "0o".to_owned(),
            10 => String::new(),
            16 => "0x".to_owned(),
            other => format!("{other}#"),
        }
    };
    format!("{sign}{prefix}{body}")
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::domain::DomainBuilder;
    use crate::value::TypeTag;
    use num_complex::Complex64;

    fn domain() -> Rc<crate::domain::TypeDomain> {
        let mut b = DomainBuilder::new();
        for tag in [
            TypeTag::Null,
            TypeTag::Bool,
            TypeTag::Int,
            TypeTag::Float,
            TypeTag::Complex,
            TypeTag::Str,
            TypeTag::Sym,
            TypeTag::Pair,
        ] {
            b.register_type(tag);
        }
        Rc::new(b.build())
    }

    fn base(b: u32) -> PrintConfig {
        PrintConfig {
            base: b,
            ..PrintConfig::default()
        }
    }

    #[test]
    fn integer_bases_and_prefixes() {
        let d = domain();
        let cases: Vec<(i64, PrintConfig, &str)> = vec![
            (42, base(10), "42"),
            (-42, base(10), "-42"),
            (31, base(16), "0x1f"),
            (-31, base(16), "-0x1f"),
            (5, base(2), "0b101"),
            (9, base(8), "0o11"),
            (35, base(36), "36#z"),
            (
                42,
                PrintConfig {
                    base: 10,
                    uniform_base_notation: true,
                    ..PrintConfig::default()
                },
                "10#42",
            ),
            (
                31,
                PrintConfig {
                    base: 16,
                    uniform_base_notation: true,
                    ..PrintConfig::default()
                },
                "16#1f",
            ),
        ];
        for (n, cfg, expected) in cases {
            assert_eq!(render_str(&d.int(n), &cfg), expected, "printing {n}");
        }
    }

    #[test]
    fn float_standard_and_positional() {
        let d = domain();
        let cfg = PrintConfig::default();
        assert_eq!(render_str(&d.float(1.5), &cfg), "1.5");
        assert_eq!(render_str(&d.float(2.0), &cfg), "2");
        assert_eq!(render_repr(&d.float(2.0), &cfg), "2.0");
        assert_eq!(render_repr(&d.float(1.5), &cfg), "1.5");

        // positional printing kicks in off base 10
        assert_eq!(render_str(&d.float(2.5), &base(2)), "0b10.1");
        assert_eq!(render_str(&d.float(-2.5), &base(2)), "-0b10.1");
        assert_eq!(render_str(&d.float(255.0), &base(16)), "0xff");

        // disabling the standard printer forces positional output at base 10
        let no_std = PrintConfig {
            allow_standard_printer: false,
            ..PrintConfig::default()
        };
        assert_eq!(render_str(&d.float(1.25), &no_std), "1.25");
    }

    #[test]
    fn float_specials() {
        let d = domain();
        let cfg = PrintConfig::default();
        assert_eq!(render_str(&d.float(f64::NAN), &cfg), "NaN");
        assert_eq!(render_str(&d.float(f64::INFINITY), &cfg), "+Inf");
        assert_eq!(render_str(&d.float(f64::NEG_INFINITY), &cfg), "-Inf");
        // specials ignore the base entirely
        assert_eq!(render_str(&d.float(f64::NAN), &base(16)), "NaN");
    }

    #[test]
    fn strings_and_symbols() {
        let d = domain();
        let cfg = PrintConfig::default();
        let s = d.string("a\"b\\c\nd");
        assert_eq!(render_str(&s, &cfg), "a\"b\\c\nd");
        assert_eq!(render_repr(&s, &cfg), "\"a\\\"b\\\\c\\nd\"");

        let sym = d.sym("answer");
        assert_eq!(render_str(&sym, &cfg), "answer");
        assert_eq!(render_repr(&sym, &cfg), "#answer");
    }

    #[test]
    fn pairs_and_lists() {
        let d = domain();
        let cfg = PrintConfig::default();
        let list = d.list([d.int(1), d.string("two"), d.boolean(true)]);
        assert_eq!(render_str(&list, &cfg), "[1, \"two\", true]");

        let improper = d.pair(d.int(1), d.pair(d.int(2), d.int(3)));
        assert_eq!(render_str(&improper, &cfg), "(1 : (2 : 3))");
    }

    #[test]
    fn complex_rendering() {
        let d = domain();
        let cfg = PrintConfig::default();
        assert_eq!(render_str(&d.complex(Complex64::new(1.0, 2.0)), &cfg), "1+2i");
        assert_eq!(render_str(&d.complex(Complex64::new(1.5, -0.5)), &cfg), "1.5-0.5i");
        assert_eq!(render_str(&d.complex(Complex64::new(0.0, 1.0)), &cfg), "0+1i");
    }
}
