//! Typed adapters for operator implementations.
//!
//! Operator bodies are written against payload types (`&BigInt`, `f64`,
//! `&str`, ...) and adapted here into the type-erased closures stored in
//! the dispatch tables. The parameter type doubles as the registration key:
//! a body taking `&BigInt` lands in the table under [`TypeTag::Int`]. GATs
//! let borrowing parameters read the operand payloads without cloning.

use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;

use crate::domain::TypeDomain;
use crate::value::{Code, Pair, Payload, TypeTag, TypedValue};
use crate::Error;

use super::{BinaryFn, UnaryFn};

/// Extraction of a typed parameter from an operand. `TAG` is the runtime
/// tag an adapted operation is registered under.
pub(crate) trait FromOperand {
    const TAG: TypeTag;
    type Operand<'a>;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error>;
}

impl FromOperand for BigInt {
    const TAG: TypeTag = TypeTag::Int;
    type Operand<'a> = &'a BigInt;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_int()
    }
}

impl FromOperand for f64 {
    const TAG: TypeTag = TypeTag::Float;
    type Operand<'a> = f64;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_float()
    }
}

impl FromOperand for bool {
    const TAG: TypeTag = TypeTag::Bool;
    type Operand<'a> = bool;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_bool()
    }
}

impl FromOperand for Complex64 {
    const TAG: TypeTag = TypeTag::Complex;
    type Operand<'a> = Complex64;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_complex()
    }
}

impl FromOperand for &str {
    const TAG: TypeTag = TypeTag::Str;
    type Operand<'a> = &'a str;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_str()
    }
}

impl FromOperand for Rc<Pair> {
    const TAG: TypeTag = TypeTag::Pair;
    type Operand<'a> = &'a Rc<Pair>;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_pair()
    }
}

impl FromOperand for Rc<Code> {
    const TAG: TypeTag = TypeTag::Code;
    type Operand<'a> = &'a Rc<Code>;

    fn from_value(value: &TypedValue) -> Result<Self::Operand<'_>, Error> {
        value.as_code()
    }
}

/// Lift an operation result back into a domain value. Plain payload types
/// and fallible versions of them are both accepted.
pub(crate) trait IntoOperandResult {
    fn into_result(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error>;
}

impl<T> IntoOperandResult for T
where
    T: Into<Payload>,
{
    fn into_result(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        Ok(domain.create(self))
    }
}

impl<T> IntoOperandResult for Result<T, Error>
where
    T: Into<Payload>,
{
    fn into_result(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        self.map(|v| domain.create(v))
    }
}

/// Adapt a typed body into a coerced-table entry. Both operands have
/// already been converted to `T::TAG` when the closure runs.
pub(crate) fn adapt_coerced<T, R, F>(f: F) -> (TypeTag, BinaryFn)
where
    T: FromOperand,
    R: IntoOperandResult,
    F: for<'a> Fn(T::Operand<'a>, T::Operand<'a>) -> R + 'static,
{
    let erased: BinaryFn = Box::new(move |left, right| {
        let l = T::from_value(left)?;
        let r = T::from_value(right)?;
        f(l, r).into_result(left.domain())
    });
    (T::TAG, erased)
}

/// Adapt a typed body into a variant-table entry keyed on the exact
/// (left, right) tag pair.
pub(crate) fn adapt_variant<L, Rt, R, F>(f: F) -> ((TypeTag, TypeTag), BinaryFn)
where
    L: FromOperand,
    Rt: FromOperand,
    R: IntoOperandResult,
    F: for<'a> Fn(L::Operand<'a>, Rt::Operand<'a>) -> R + 'static,
{
    let erased: BinaryFn = Box::new(move |left, right| {
        let l = L::from_value(left)?;
        let r = Rt::from_value(right)?;
        f(l, r).into_result(left.domain())
    });
    ((L::TAG, Rt::TAG), erased)
}

/// Adapt a typed body into a per-tag unary table entry.
pub(crate) fn adapt_unary<T, R, F>(f: F) -> (TypeTag, UnaryFn)
where
    T: FromOperand,
    R: IntoOperandResult,
    F: for<'a> Fn(T::Operand<'a>) -> R + 'static,
{
    let erased: UnaryFn = Box::new(move |operand| {
        let v = T::from_value(operand)?;
        f(v).into_result(operand.domain())
    });
    (T::TAG, erased)
}
