//! Operator definitions, dispatch tables and the operator dictionary.
//!
//! A binary operator owns up to three dispatch tables. Application resolves
//! them in a fixed order:
//!
//! 1. the coerced table, when the domain has a coercion rule for the
//!    operand pair - the rule picks a side, both operands convert to that
//!    side's type, and the table entry for that type runs;
//! 2. the variant table, keyed on the exact (left, right) tag pair;
//! 3. the default handler, which may decline by returning `Ok(None)`.
//!
//! If nothing claims the operands the application is a type error. Marker
//! operators (`=`, `->`, `\`, the juxtaposition markers) carry no tables at
//! all; they only exist so the compiler front-ends can parse and rewrite
//! them, and applying one directly is always an error.

mod dispatch;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::domain::Coercion;
use crate::exec::{check_depth, validate_returns, Callable, Frame};
use crate::value::{TypeTag, TypedValue};
use crate::{Arity, Error};

pub(crate) use dispatch::{adapt_coerced, adapt_unary, adapt_variant, FromOperand, IntoOperandResult};

pub(crate) type BinaryFn = Box<dyn Fn(&TypedValue, &TypedValue) -> Result<TypedValue, Error>>;
pub(crate) type BinaryDefaultFn =
    Box<dyn Fn(&TypedValue, &TypedValue) -> Result<Option<TypedValue>, Error>>;
pub(crate) type UnaryFn = Box<dyn Fn(&TypedValue) -> Result<TypedValue, Error>>;
pub(crate) type UnaryDefaultFn = Box<dyn Fn(&TypedValue) -> Result<Option<TypedValue>, Error>>;

/// Grouping direction for infix parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAssoc {
    Left,
    Right,
}

pub struct BinaryOperator {
    glyph: String,
    precedence: u32,
    assoc: OpAssoc,
    coerced: HashMap<TypeTag, BinaryFn>,
    variants: HashMap<(TypeTag, TypeTag), BinaryFn>,
    default_op: Option<BinaryDefaultFn>,
    marker: bool,
}

impl fmt::Debug for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinaryOperator({})", self.glyph)
    }
}

impl BinaryOperator {
    /// A parse-only operator with no dispatch tables.
    pub fn marker(glyph: &str, precedence: u32, assoc: OpAssoc) -> Self {
        BinaryOperator {
            glyph: glyph.to_owned(),
            precedence,
            assoc,
            coerced: HashMap::new(),
            variants: HashMap::new(),
            default_op: None,
            marker: true,
        }
    }

    pub fn glyph(&self) -> &str {
        &self.glyph
    }

    pub fn precedence(&self) -> u32 {
        self.precedence
    }

    pub fn assoc(&self) -> OpAssoc {
        self.assoc
    }

    pub fn is_marker(&self) -> bool {
        self.marker
    }

    /// Apply the operator to two values from the same domain.
    pub fn apply(&self, left: &TypedValue, right: &TypedValue) -> Result<TypedValue, Error> {
        debug_assert!(
            Rc::ptr_eq(left.domain(), right.domain()),
            "operands from different domains"
        );
        if !self.marker {
            let domain = left.domain();
            if let Some(rule) = domain.get_coercion_rule(left.tag(), right.tag()) {
                let target = match rule {
                    Coercion::ToLeft => left.tag(),
                    Coercion::ToRight => right.tag(),
                };
                if let Some(op) = self.coerced.get(&target) {
                    let l = domain.convert(left, target)?;
                    let r = domain.convert(right, target)?;
                    return op(&l, &r);
                }
            }
            if let Some(op) = self.variants.get(&(left.tag(), right.tag())) {
                return op(left, right);
            }
            if let Some(op) = &self.default_op {
                if let Some(result) = op(left, right)? {
                    return Ok(result);
                }
            }
        }
        Err(Error::TypeError(format!(
            "Can't apply operation '{}' on values {},{}",
            self.glyph,
            left.repr(),
            right.repr()
        )))
    }
}

pub struct BinaryBuilder {
    inner: BinaryOperator,
}

impl BinaryBuilder {
    pub fn new(glyph: &str, precedence: u32) -> Self {
        BinaryBuilder {
            inner: BinaryOperator {
                glyph: glyph.to_owned(),
                precedence,
                assoc: OpAssoc::Left,
                coerced: HashMap::new(),
                variants: HashMap::new(),
                default_op: None,
                marker: false,
            },
        }
    }

    pub fn right_assoc(mut self) -> Self {
        self.inner.assoc = OpAssoc::Right;
        self
    }

    /// Register a coerced-table entry. The parameter type picks the tag:
    /// `.coerced::<BigInt, _, _>(...)` handles operand pairs coerced to int.
    pub fn coerced<T, R, F>(mut self, f: F) -> Self
    where
        T: FromOperand,
        R: IntoOperandResult,
        F: for<'a> Fn(T::Operand<'a>, T::Operand<'a>) -> R + 'static,
    {
        let (tag, op) = adapt_coerced::<T, R, F>(f);
        let prev = self.inner.coerced.insert(tag, op);
        assert!(
            prev.is_none(),
            "duplicate coerced op for '{}' on {tag}",
            self.inner.glyph
        );
        self
    }

    /// Register a variant-table entry keyed on the parameter types' tags.
    pub fn variant<L, Rt, R, F>(mut self, f: F) -> Self
    where
        L: FromOperand,
        Rt: FromOperand,
        R: IntoOperandResult,
        F: for<'a> Fn(L::Operand<'a>, Rt::Operand<'a>) -> R + 'static,
    {
        let (key, op) = adapt_variant::<L, Rt, R, F>(f);
        let prev = self.inner.variants.insert(key, op);
        assert!(
            prev.is_none(),
            "duplicate variant op for '{}' on {},{}",
            self.inner.glyph,
            key.0,
            key.1
        );
        self
    }

    /// Register a variant-table entry over raw values, for operand types
    /// the typed adapter layer does not cover.
    pub fn variant_raw<F>(mut self, left: TypeTag, right: TypeTag, f: F) -> Self
    where
        F: Fn(&TypedValue, &TypedValue) -> Result<TypedValue, Error> + 'static,
    {
        let prev = self.inner.variants.insert((left, right), Box::new(f));
        assert!(
            prev.is_none(),
            "duplicate variant op for '{}' on {left},{right}",
            self.inner.glyph
        );
        self
    }

    /// Register the fallback handler. Returning `Ok(None)` declines the
    /// operands and the application becomes a type error.
    pub fn default_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&TypedValue, &TypedValue) -> Result<Option<TypedValue>, Error> + 'static,
    {
        assert!(
            self.inner.default_op.is_none(),
            "duplicate default op for '{}'",
            self.inner.glyph
        );
        self.inner.default_op = Some(Box::new(f));
        self
    }

    pub fn build(self) -> BinaryOperator {
        self.inner
    }
}

pub struct UnaryOperator {
    glyph: String,
    ops: HashMap<TypeTag, UnaryFn>,
    default_op: Option<UnaryDefaultFn>,
    marker: bool,
}

impl fmt::Debug for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnaryOperator({})", self.glyph)
    }
}

impl UnaryOperator {
    /// A parse-only prefix marker with no dispatch table.
    pub fn marker(glyph: &str) -> Self {
        UnaryOperator {
            glyph: glyph.to_owned(),
            ops: HashMap::new(),
            default_op: None,
            marker: true,
        }
    }

    pub fn glyph(&self) -> &str {
        &self.glyph
    }

    pub fn is_marker(&self) -> bool {
        self.marker
    }

    pub fn apply(&self, operand: &TypedValue) -> Result<TypedValue, Error> {
        if !self.marker {
            if let Some(op) = self.ops.get(&operand.tag()) {
                return op(operand);
            }
            if let Some(op) = &self.default_op {
                if let Some(result) = op(operand)? {
                    return Ok(result);
                }
            }
        }
        Err(Error::TypeError(format!(
            "Can't apply operation '{}' on value {}",
            self.glyph,
            operand.repr()
        )))
    }
}

pub struct UnaryBuilder {
    inner: UnaryOperator,
}

impl UnaryBuilder {
    pub fn new(glyph: &str) -> Self {
        UnaryBuilder {
            inner: UnaryOperator {
                glyph: glyph.to_owned(),
                ops: HashMap::new(),
                default_op: None,
                marker: false,
            },
        }
    }

    /// Register the entry for a single operand tag.
    pub fn simple<T, R, F>(mut self, f: F) -> Self
    where
        T: FromOperand,
        R: IntoOperandResult,
        F: for<'a> Fn(T::Operand<'a>) -> R + 'static,
    {
        let (tag, op) = adapt_unary::<T, R, F>(f);
        let prev = self.inner.ops.insert(tag, op);
        assert!(
            prev.is_none(),
            "duplicate unary op for '{}' on {tag}",
            self.inner.glyph
        );
        self
    }

    pub fn default_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&TypedValue) -> Result<Option<TypedValue>, Error> + 'static,
    {
        assert!(
            self.inner.default_op.is_none(),
            "duplicate default op for '{}'",
            self.inner.glyph
        );
        self.inner.default_op = Some(Box::new(f));
        self
    }

    pub fn build(self) -> UnaryOperator {
        self.inner
    }
}

/// Registry of every operator glyph the compiler front-ends understand.
/// Exactly one binary operator may be designated as the juxtaposition
/// default; the infix parser inserts it between adjacent expressions.
#[derive(Default)]
pub struct OperatorDictionary {
    binary: HashMap<String, Rc<BinaryOperator>>,
    unary: HashMap<String, Rc<UnaryOperator>>,
    default_glyph: Option<String>,
}

impl OperatorDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_binary(&mut self, op: BinaryOperator) -> &mut Self {
        let glyph = op.glyph.clone();
        let prev = self.binary.insert(glyph.clone(), Rc::new(op));
        assert!(prev.is_none(), "duplicate binary operator '{glyph}'");
        self
    }

    /// Register a binary operator and designate it as the juxtaposition
    /// default.
    pub fn register_default_binary(&mut self, op: BinaryOperator) -> &mut Self {
        assert!(
            self.default_glyph.is_none(),
            "juxtaposition default registered twice"
        );
        self.default_glyph = Some(op.glyph.clone());
        self.register_binary(op)
    }

    pub fn register_unary(&mut self, op: UnaryOperator) -> &mut Self {
        let glyph = op.glyph.clone();
        let prev = self.unary.insert(glyph.clone(), Rc::new(op));
        assert!(prev.is_none(), "duplicate unary operator '{glyph}'");
        self
    }

    pub fn binary(&self, glyph: &str) -> Option<&Rc<BinaryOperator>> {
        self.binary.get(glyph)
    }

    pub fn unary(&self, glyph: &str) -> Option<&Rc<UnaryOperator>> {
        self.unary.get(glyph)
    }

    pub fn default_binary(&self) -> Option<&Rc<BinaryOperator>> {
        self.default_glyph.as_ref().and_then(|g| self.binary.get(g))
    }

    /// Wrap an operator as a first-class callable for `@glyph` references.
    /// Returns `None` when the glyph names neither a binary nor a unary
    /// operator.
    pub fn wrap(&self, glyph: &str) -> Option<WrappedOperator> {
        let binary = self.binary.get(glyph).cloned();
        let unary = self.unary.get(glyph).cloned();
        if binary.is_none() && unary.is_none() {
            return None;
        }
        Some(WrappedOperator {
            name: glyph.to_owned(),
            binary,
            unary,
        })
    }

    /// Punctuation glyphs for the tokenizer, longest first so maximal munch
    /// resolves multi-character operators before their prefixes. Alphabetic
    /// names like `neg` are excluded; those reach code as symbols.
    pub fn lexer_glyphs(&self) -> Vec<String> {
        let mut glyphs: Vec<String> = self
            .binary
            .keys()
            .chain(self.unary.keys())
            .filter(|g| !g.chars().any(|c| c.is_alphanumeric() || c == '_'))
            .cloned()
            .collect();
        glyphs.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        glyphs.dedup();
        glyphs
    }
}

/// An operator lifted to a callable value, produced by `@glyph` references.
/// Calls with two arguments hit the binary form, calls with one hit the
/// unary form; a bare call without a known argument count assumes binary
/// when one exists.
pub struct WrappedOperator {
    name: String,
    binary: Option<Rc<BinaryOperator>>,
    unary: Option<Rc<UnaryOperator>>,
}

impl Callable for WrappedOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        let argc = argc.unwrap_or(if self.binary.is_some() { 2 } else { 1 });
        let result = match argc {
            1 => match &self.unary {
                Some(op) => {
                    let operand = frame.pop()?;
                    op.apply(&operand)?
                }
                None => return Err(Error::arity_error_in(Arity::Exact(2), 1, self.name.as_str())),
            },
            2 => match &self.binary {
                Some(op) => {
                    let args = frame.pop_n(2)?;
                    op.apply(&args[0], &args[1])?
                }
                None => return Err(Error::arity_error_in(Arity::Exact(1), 2, self.name.as_str())),
            },
            n => {
                let expected = if self.binary.is_some() { 2 } else { 1 };
                return Err(Error::arity_error_in(Arity::Exact(expected), n, self.name.as_str()));
            }
        };
        frame.push(result);
        validate_returns(retc, 1, &self.name)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::domain::{DomainBuilder, TypeDomain};
    use crate::value::Payload;
    use num_bigint::BigInt;
    use num_traits::ToPrimitive;

    fn int_to_float(payload: &Payload) -> Payload {
        match payload {
            Payload::Int(n) => Payload::Float(n.to_f64().unwrap_or(f64::NAN)),
            other => other.clone(),
        }
    }

    fn bool_to_int(payload: &Payload) -> Payload {
        match payload {
            Payload::Bool(b) => Payload::Int(BigInt::from(i32::from(*b))),
            other => other.clone(),
        }
    }

    fn domain() -> Rc<TypeDomain> {
        let mut b = DomainBuilder::new();
        b.register_type(TypeTag::Bool)
            .register_type(TypeTag::Int)
            .register_type(TypeTag::Float)
            .register_type(TypeTag::Str)
            .register_converter(TypeTag::Int, TypeTag::Float, int_to_float)
            .register_converter(TypeTag::Bool, TypeTag::Int, bool_to_int)
            .register_symmetric_coercion(TypeTag::Int, TypeTag::Float, Coercion::ToRight)
            .register_symmetric_coercion(TypeTag::Bool, TypeTag::Int, Coercion::ToRight);
        Rc::new(b.build())
    }

    fn plus() -> BinaryOperator {
        BinaryBuilder::new("+", 150)
            .coerced::<BigInt, _, _>(|a, b| a + b)
            .coerced::<f64, _, _>(|a, b| a + b)
            .variant::<&str, &str, _, _>(|a, b| format!("{a}{b}"))
            .build()
    }

    #[test]
    fn coerced_dispatch_widens_the_minor_operand() {
        let d = domain();
        let op = plus();
        let result = op.apply(&d.int(1), &d.float(2.5)).unwrap();
        assert_eq!(result.as_float().unwrap(), 3.5);
        // identical tags stay put
        let result = op.apply(&d.int(2), &d.int(3)).unwrap();
        assert_eq!(*result.as_int().unwrap(), BigInt::from(5));
        // bool promotes through the converter graph to int
        let result = op.apply(&d.boolean(true), &d.int(3)).unwrap();
        assert_eq!(*result.as_int().unwrap(), BigInt::from(4));
    }

    #[test]
    fn variant_dispatch_without_a_coercion_rule() {
        let d = domain();
        let op = plus();
        let result = op.apply(&d.string("ab"), &d.string("cd")).unwrap();
        assert_eq!(result.as_str().unwrap(), "abcd");
    }

    #[test]
    fn missing_coerced_entry_falls_through_to_variants() {
        let d = domain();
        // no coerced entry for int, so an int pair must reach the variant
        let op = BinaryBuilder::new("/", 160)
            .variant::<BigInt, BigInt, _, _>(|a, b| {
                a.to_f64().unwrap_or(f64::NAN) / b.to_f64().unwrap_or(f64::NAN)
            })
            .build();
        let result = op.apply(&d.int(1), &d.int(2)).unwrap();
        assert_eq!(result.as_float().unwrap(), 0.5);
    }

    #[test]
    fn default_handler_can_decline() {
        let d = domain();
        let op = BinaryBuilder::new("??", 175)
            .default_handler(|left, right| {
                if left.is_null() {
                    Ok(Some(right.clone()))
                } else {
                    Ok(None)
                }
            })
            .build();
        let err = op.apply(&d.int(1), &d.int(2)).unwrap_err();
        assert!(
            err.to_string().contains("Can't apply operation '??'"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn marker_operators_never_apply() {
        let d = domain();
        let op = BinaryOperator::marker("=", 10, OpAssoc::Left);
        assert!(op.is_marker());
        assert!(op.apply(&d.int(1), &d.int(2)).is_err());
    }

    #[test]
    fn unary_table_and_default() {
        let d = domain();
        let op = UnaryBuilder::new("-")
            .simple::<BigInt, _, _>(|n| -n)
            .simple::<f64, _, _>(|x| -x)
            .build();
        assert_eq!(*op.apply(&d.int(5)).unwrap().as_int().unwrap(), BigInt::from(-5));
        assert_eq!(op.apply(&d.float(1.5)).unwrap().as_float().unwrap(), -1.5);
        assert!(op.apply(&d.string("x")).is_err());
    }

    #[test]
    fn dictionary_glyphs_are_longest_first_punctuation() {
        let mut dict = OperatorDictionary::new();
        dict.register_binary(BinaryBuilder::new("<", 100).build())
            .register_binary(BinaryBuilder::new("<=>", 90).build())
            .register_binary(BinaryBuilder::new("<=", 100).build())
            .register_unary(UnaryBuilder::new("neg").build());
        let glyphs = dict.lexer_glyphs();
        assert_eq!(glyphs, vec!["<=>".to_owned(), "<=".to_owned(), "<".to_owned()]);
    }

    #[test]
    fn wrapped_operator_dispatches_on_argument_count() {
        let d = domain();
        let mut dict = OperatorDictionary::new();
        dict.register_binary(plus());
        dict.register_unary(
            UnaryBuilder::new("+")
                .simple::<BigInt, _, _>(|n| n.clone())
                .build(),
        );
        let wrapped = dict.wrap("+").unwrap();

        let mut frame = Frame::new(d.clone(), crate::exec::SymbolMap::root());
        frame.push(d.int(1));
        frame.push(d.int(2));
        wrapped.call(&mut frame, Some(2), Some(1), 0).unwrap();
        assert_eq!(*frame.pop().unwrap().as_int().unwrap(), BigInt::from(3));

        frame.push(d.int(7));
        wrapped.call(&mut frame, Some(1), Some(1), 0).unwrap();
        assert_eq!(*frame.pop().unwrap().as_int().unwrap(), BigInt::from(7));
    }
}
