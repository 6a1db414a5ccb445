//! The stock environment: numeric-tower domain, operator dictionary, and
//! the global library.
//!
//! Hosts that want a ready-made calculator call the three builders here
//! and hand the results to their frames. Hosts with their own types start
//! from these and extend the returned tables before freezing them.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_traits::{FromPrimitive, Pow, Signed, ToPrimitive, Zero};

use crate::composite::{Composite, Countable, Emptyable, Enumerable, Indexable, Structured, Truthy};
use crate::domain::{Coercion, DomainBuilder, TypeDomain};
use crate::exec::{Callable, Frame, SymbolMap, check_depth, invoke_value, validate_returns};
use crate::forms::eval_single;
use crate::lexer::{self, Token};
use crate::natives::{NativeBuilder, NativeFn, Promoted, RestArgs};
use crate::operators::{
    BinaryBuilder, BinaryOperator, OpAssoc, OperatorDictionary, UnaryBuilder, UnaryOperator,
};
use crate::printer::{self, PrintCfgHandle, PrintConfig};
use crate::value::{Pair, Payload, TypeTag, TypedValue};
use crate::{Arity, Error, ParseError, ParseErrorKind, parser, postfix};

/// Build the standard type domain: every stock type, widening conversions
/// along the numeric tower, and a truthiness policy per type.
pub fn build_domain() -> Rc<TypeDomain> {
    let mut b = DomainBuilder::new();
    b.register_type(TypeTag::Null)
        .register_type(TypeTag::Bool)
        .register_type(TypeTag::Int)
        .register_type(TypeTag::Float)
        .register_type(TypeTag::Complex)
        .register_type(TypeTag::Str)
        .register_type(TypeTag::Sym)
        .register_type(TypeTag::Pair)
        .register_type(TypeTag::Code)
        .register_type(TypeTag::Callable)
        .register_type(TypeTag::Object)
        .register_converter(TypeTag::Bool, TypeTag::Int, bool_to_int)
        .register_converter(TypeTag::Bool, TypeTag::Float, bool_to_float)
        .register_converter(TypeTag::Bool, TypeTag::Complex, bool_to_complex)
        .register_converter(TypeTag::Int, TypeTag::Float, int_to_float)
        .register_converter(TypeTag::Int, TypeTag::Complex, int_to_complex)
        .register_converter(TypeTag::Float, TypeTag::Complex, float_to_complex)
        .register_symmetric_coercion(TypeTag::Bool, TypeTag::Int, Coercion::ToRight)
        .register_symmetric_coercion(TypeTag::Bool, TypeTag::Float, Coercion::ToRight)
        .register_symmetric_coercion(TypeTag::Bool, TypeTag::Complex, Coercion::ToRight)
        .register_symmetric_coercion(TypeTag::Int, TypeTag::Float, Coercion::ToRight)
        .register_symmetric_coercion(TypeTag::Int, TypeTag::Complex, Coercion::ToRight)
        .register_symmetric_coercion(TypeTag::Float, TypeTag::Complex, Coercion::ToRight)
        .register_truth(TypeTag::Bool, bool_truth)
        .register_truth(TypeTag::Int, int_truth)
        .register_truth(TypeTag::Float, float_truth)
        .register_truth(TypeTag::Complex, complex_truth)
        .register_truth(TypeTag::Str, str_truth)
        .register_truth(TypeTag::Object, object_truth)
        .register_always_false(TypeTag::Null)
        .register_always_true(TypeTag::Sym)
        .register_always_true(TypeTag::Pair)
        .register_always_true(TypeTag::Code)
        .register_always_true(TypeTag::Callable);
    Rc::new(b.build())
}

fn bool_to_int(payload: &Payload) -> Payload {
    match payload {
        Payload::Bool(b) => Payload::Int(BigInt::from(i32::from(*b))),
        other => other.clone(),
    }
}

fn bool_to_float(payload: &Payload) -> Payload {
    match payload {
        Payload::Bool(b) => Payload::Float(if *b { 1.0 } else { 0.0 }),
        other => other.clone(),
    }
}

fn bool_to_complex(payload: &Payload) -> Payload {
    match payload {
        Payload::Bool(b) => Payload::Complex(Complex64::new(if *b { 1.0 } else { 0.0 }, 0.0)),
        other => other.clone(),
    }
}

fn int_to_float(payload: &Payload) -> Payload {
    match payload {
        Payload::Int(n) => Payload::Float(n.to_f64().unwrap_or(f64::NAN)),
        other => other.clone(),
    }
}

fn int_to_complex(payload: &Payload) -> Payload {
    match payload {
        Payload::Int(n) => Payload::Complex(Complex64::new(n.to_f64().unwrap_or(f64::NAN), 0.0)),
        other => other.clone(),
    }
}

fn float_to_complex(payload: &Payload) -> Payload {
    match payload {
        Payload::Float(x) => Payload::Complex(Complex64::new(*x, 0.0)),
        other => other.clone(),
    }
}

fn bool_truth(value: &TypedValue) -> Result<bool, Error> {
    value.as_bool()
}

fn int_truth(value: &TypedValue) -> Result<bool, Error> {
    Ok(!value.as_int()?.is_zero())
}

// NaN is truthy here: it is not equal to zero.
fn float_truth(value: &TypedValue) -> Result<bool, Error> {
    Ok(value.as_float()? != 0.0)
}

fn complex_truth(value: &TypedValue) -> Result<bool, Error> {
    Ok(value.as_complex()? != Complex64::new(0.0, 0.0))
}

fn str_truth(value: &TypedValue) -> Result<bool, Error> {
    Ok(!value.as_str()?.is_empty())
}

/// Objects answer for themselves: an explicit truth capability first,
/// then a non-zero count, then non-emptiness.
fn object_truth(value: &TypedValue) -> Result<bool, Error> {
    let object = value.as_object()?;
    if let Some(truthy) = object.as_truthy() {
        return Ok(truthy.is_truthy());
    }
    if let Some(countable) = object.as_countable() {
        return Ok(countable.count() > 0);
    }
    if let Some(emptyable) = object.as_emptyable() {
        return Ok(!emptyable.is_empty());
    }
    Err(Error::TypeError(format!(
        "can't determine truth value of {}",
        value.repr()
    )))
}

/// Build the standard operator dictionary. Precedence runs from member
/// access at 180 down to the `=` binding marker at 10.
pub fn build_operators(print_cfg: &PrintCfgHandle) -> OperatorDictionary {
    let mut dict = OperatorDictionary::new();

    dict.register_binary(
        BinaryBuilder::new(".", 180)
            .variant_raw(TypeTag::Object, TypeTag::Sym, member_lookup)
            .default_handler(member_default)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("?.", 180)
            .variant_raw(TypeTag::Object, TypeTag::Sym, member_lookup)
            .default_handler(optional_member_default)
            .build(),
    );
    // Adjacency compiles to this marker; it is also typeable directly.
    dict.register_default_binary(BinaryOperator::marker("<?>", 180, OpAssoc::Left));
    dict.register_binary(BinaryOperator::marker("?", 180, OpAssoc::Left));

    // The compilers rewrite `&&`, `||` and `??` into lazy calls; the
    // handlers below only fire when a postfix program applies them to
    // already-evaluated operands.
    dict.register_binary(
        BinaryBuilder::new("??", 175)
            .default_handler(coalesce_default)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("**", 170)
            .right_assoc()
            .coerced::<BigInt, _, _>(int_pow)
            .coerced::<f64, _, _>(|a, b| a.powf(b))
            .coerced::<Complex64, _, _>(|a: Complex64, b: Complex64| a.powc(b))
            .coerced::<bool, _, _>(bool_pow)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("*", 160)
            .coerced::<BigInt, _, _>(|a, b| a * b)
            .coerced::<f64, _, _>(|a, b| a * b)
            .coerced::<Complex64, _, _>(|a, b| a * b)
            .coerced::<bool, _, _>(bool_mul)
            .variant::<&str, BigInt, _, _>(repeat_str)
            .variant::<BigInt, &str, _, _>(repeat_str_rev)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("/", 160)
            .coerced::<BigInt, _, _>(int_divide)
            .coerced::<f64, _, _>(|a, b| a / b)
            .coerced::<Complex64, _, _>(|a, b| a / b)
            .coerced::<bool, _, _>(bool_divide)
            .build(),
    );
    let cfg = print_cfg.clone();
    dict.register_binary(
        BinaryBuilder::new("%", 160)
            .coerced::<BigInt, _, _>(int_floor_mod)
            .coerced::<f64, _, _>(|a, b| a % b)
            .coerced::<bool, _, _>(bool_floor_mod)
            .default_handler(move |left, right| {
                if left.tag() != TypeTag::Str {
                    return Ok(None);
                }
                let template = left.as_str()?;
                let args = match right.payload() {
                    Payload::Pair(items) => items.collect_proper("format arguments")?,
                    _ => vec![right.clone()],
                };
                let rendered = format_template(template, &args, &cfg.borrow())?;
                Ok(Some(left.domain().string(rendered)))
            })
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("//", 160)
            .coerced::<BigInt, _, _>(int_floor_div)
            .coerced::<f64, _, _>(float_floor_div)
            .coerced::<bool, _, _>(bool_floor_div)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("+", 150)
            .coerced::<BigInt, _, _>(|a, b| a + b)
            .coerced::<f64, _, _>(|a, b| a + b)
            .coerced::<Complex64, _, _>(|a, b| a + b)
            .coerced::<bool, _, _>(bool_add)
            .coerced::<&str, _, _>(|a, b| format!("{a}{b}"))
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("-", 150)
            .coerced::<BigInt, _, _>(|a, b| a - b)
            .coerced::<f64, _, _>(|a, b| a - b)
            .coerced::<Complex64, _, _>(|a, b| a - b)
            .coerced::<bool, _, _>(bool_sub)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("<<", 140)
            .coerced::<BigInt, _, _>(int_shift_left)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new(">>", 140)
            .coerced::<BigInt, _, _>(int_shift_right)
            .build(),
    );
    // Bool pairs stay bool for the bitwise trio.
    dict.register_binary(
        BinaryBuilder::new("&", 130)
            .coerced::<BigInt, _, _>(|a, b| a & b)
            .coerced::<bool, _, _>(|a, b| a & b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("^", 120)
            .coerced::<BigInt, _, _>(|a, b| a ^ b)
            .coerced::<bool, _, _>(|a, b| a ^ b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("|", 110)
            .coerced::<BigInt, _, _>(|a, b| a | b)
            .coerced::<bool, _, _>(|a, b| a | b)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("<", 100)
            .coerced::<BigInt, _, _>(|a, b| a < b)
            .coerced::<f64, _, _>(|a, b| a < b)
            .coerced::<bool, _, _>(|a, b| a < b)
            .coerced::<&str, _, _>(|a, b| a < b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new(">", 100)
            .coerced::<BigInt, _, _>(|a, b| a > b)
            .coerced::<f64, _, _>(|a, b| a > b)
            .coerced::<bool, _, _>(|a, b| a > b)
            .coerced::<&str, _, _>(|a, b| a > b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("<=", 100)
            .coerced::<BigInt, _, _>(|a, b| a <= b)
            .coerced::<f64, _, _>(|a, b| a <= b)
            .coerced::<bool, _, _>(|a, b| a <= b)
            .coerced::<&str, _, _>(|a, b| a <= b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new(">=", 100)
            .coerced::<BigInt, _, _>(|a, b| a >= b)
            .coerced::<f64, _, _>(|a, b| a >= b)
            .coerced::<bool, _, _>(|a, b| a >= b)
            .coerced::<&str, _, _>(|a, b| a >= b)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("<=>", 90)
            .coerced::<BigInt, _, _>(int_compare)
            .coerced::<f64, _, _>(float_compare)
            .coerced::<bool, _, _>(bool_compare)
            .coerced::<&str, _, _>(str_compare)
            .build(),
    );

    // Equality falls back to structural comparison and never errors.
    dict.register_binary(
        BinaryBuilder::new("==", 80)
            .coerced::<BigInt, _, _>(|a, b| a == b)
            .coerced::<f64, _, _>(|a, b| a == b)
            .coerced::<Complex64, _, _>(|a, b| a == b)
            .coerced::<bool, _, _>(|a, b| a == b)
            .coerced::<&str, _, _>(|a, b| a == b)
            .default_handler(equal_default)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("!=", 80)
            .coerced::<BigInt, _, _>(|a, b| a != b)
            .coerced::<f64, _, _>(|a, b| a != b)
            .coerced::<Complex64, _, _>(|a, b| a != b)
            .coerced::<bool, _, _>(|a, b| a != b)
            .coerced::<&str, _, _>(|a, b| a != b)
            .default_handler(unequal_default)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new("&&", 70)
            .default_handler(and_default)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("^^", 60)
            .default_handler(xor_default)
            .build(),
    );
    dict.register_binary(
        BinaryBuilder::new("||", 50)
            .default_handler(or_default)
            .build(),
    );

    dict.register_binary(
        BinaryBuilder::new(":", 40)
            .right_assoc()
            .default_handler(cons_default)
            .build(),
    );
    dict.register_binary(BinaryOperator::marker("->", 30, OpAssoc::Right));
    dict.register_binary(BinaryOperator::marker("\\", 20, OpAssoc::Right));
    dict.register_binary(BinaryOperator::marker("=", 10, OpAssoc::Left));

    dict.register_unary(
        UnaryBuilder::new("+")
            .simple::<BigInt, _, _>(|n| n.clone())
            .simple::<f64, _, _>(|x| x)
            .simple::<Complex64, _, _>(|z| z)
            .simple::<bool, _, _>(|b| BigInt::from(i32::from(b)))
            .build(),
    );
    dict.register_unary(
        UnaryBuilder::new("-")
            .simple::<BigInt, _, _>(|n| -n)
            .simple::<f64, _, _>(|x| -x)
            .simple::<Complex64, _, _>(|z| -z)
            .simple::<bool, _, _>(|b| BigInt::from(-i32::from(b)))
            .build(),
    );
    dict.register_unary(UnaryBuilder::new("!").default_handler(not_default).build());
    dict.register_unary(
        UnaryBuilder::new("~")
            .simple::<BigInt, _, _>(int_invert)
            .build(),
    );
    dict.register_unary(UnaryOperator::marker("\\"));

    dict
}

fn bool_add(a: bool, b: bool) -> BigInt {
    BigInt::from(i32::from(a) + i32::from(b))
}

fn bool_sub(a: bool, b: bool) -> BigInt {
    BigInt::from(i32::from(a) - i32::from(b))
}

fn bool_mul(a: bool, b: bool) -> BigInt {
    BigInt::from(i32::from(a) * i32::from(b))
}

fn bool_divide(a: bool, b: bool) -> f64 {
    f64::from(i32::from(a)) / f64::from(i32::from(b))
}

fn bool_floor_div(a: bool, b: bool) -> Result<BigInt, Error> {
    int_floor_div(&BigInt::from(i32::from(a)), &BigInt::from(i32::from(b)))
}

fn bool_floor_mod(a: bool, b: bool) -> Result<BigInt, Error> {
    int_floor_mod(&BigInt::from(i32::from(a)), &BigInt::from(i32::from(b)))
}

// 0**0 == 1, matching the int table.
fn bool_pow(a: bool, b: bool) -> BigInt {
    BigInt::from(i32::from(a || !b))
}

/// Int division is true division: the result is a float, and division by
/// zero follows IEEE (infinities and NaN) instead of raising.
fn int_divide(a: &BigInt, b: &BigInt) -> f64 {
    a.to_f64().unwrap_or(f64::NAN) / b.to_f64().unwrap_or(f64::NAN)
}

fn int_floor_div(a: &BigInt, b: &BigInt) -> Result<BigInt, Error> {
    if b.is_zero() {
        return Err(Error::ExecutionError("integer division by zero".into()));
    }
    let q = a / b;
    let r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        Ok(q - BigInt::from(1))
    } else {
        Ok(q)
    }
}

// Floored modulo: the result takes the divisor's sign.
fn int_floor_mod(a: &BigInt, b: &BigInt) -> Result<BigInt, Error> {
    if b.is_zero() {
        return Err(Error::ExecutionError("integer modulo by zero".into()));
    }
    let mut r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        r += b;
    }
    Ok(r)
}

fn float_floor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

/// A negative exponent drops to float exponentiation; a non-negative one
/// stays exact as long as it fits a machine word.
fn int_pow(base: &BigInt, exp: &BigInt) -> Result<Payload, Error> {
    if exp.is_negative() {
        let b = base.to_f64().unwrap_or(f64::NAN);
        let e = exp.to_f64().unwrap_or(f64::NAN);
        return Ok(Payload::Float(b.powf(e)));
    }
    let Some(e) = exp.to_u32() else {
        return Err(Error::ExecutionError(format!(
            "exponent {exp} is too large"
        )));
    };
    Ok(Payload::Int(Pow::pow(base, e)))
}

fn int_shift_left(a: &BigInt, b: &BigInt) -> Result<BigInt, Error> {
    let Some(n) = b.to_usize() else {
        return Err(Error::ExecutionError(format!(
            "shift amount {b} is out of range"
        )));
    };
    Ok(a << n)
}

fn int_shift_right(a: &BigInt, b: &BigInt) -> Result<BigInt, Error> {
    let Some(n) = b.to_usize() else {
        return Err(Error::ExecutionError(format!(
            "shift amount {b} is out of range"
        )));
    };
    Ok(a >> n)
}

fn ordering_value(ord: Ordering) -> BigInt {
    BigInt::from(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

fn int_compare(a: &BigInt, b: &BigInt) -> BigInt {
    ordering_value(a.cmp(b))
}

fn float_compare(a: f64, b: f64) -> Result<BigInt, Error> {
    match a.partial_cmp(&b) {
        Some(ord) => Ok(ordering_value(ord)),
        None => Err(Error::ExecutionError(format!("can't order {a} and {b}"))),
    }
}

fn bool_compare(a: bool, b: bool) -> BigInt {
    ordering_value(a.cmp(&b))
}

fn str_compare(a: &str, b: &str) -> BigInt {
    ordering_value(a.cmp(b))
}

fn int_invert(n: &BigInt) -> BigInt {
    -(n + BigInt::from(1))
}

fn repeat_str(s: &str, count: &BigInt) -> Result<String, Error> {
    let Some(n) = count.to_usize() else {
        return Err(Error::ExecutionError(format!(
            "repeat count {count} is out of range"
        )));
    };
    Ok(s.repeat(n))
}

fn repeat_str_rev(count: &BigInt, s: &str) -> Result<String, Error> {
    repeat_str(s, count)
}

fn member_lookup(left: &TypedValue, right: &TypedValue) -> Result<TypedValue, Error> {
    let object = left.as_object()?;
    let name = right.as_sym()?;
    let Some(structured) = object.as_structured() else {
        return Err(Error::TypeError(format!(
            "{} of type {} has no members",
            left.repr(),
            left.tag()
        )));
    };
    structured.get_member(name).ok_or_else(|| {
        Error::ExecutionError(format!("can't find member '{name}' in {}", left.repr()))
    })
}

fn member_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    if right.tag() != TypeTag::Sym {
        return Err(Error::TypeError(format!(
            "member names must be symbols, got {} of type {}",
            right.repr(),
            right.tag()
        )));
    }
    Err(Error::TypeError(format!(
        "{} of type {} has no members",
        left.repr(),
        left.tag()
    )))
}

fn optional_member_default(
    left: &TypedValue,
    right: &TypedValue,
) -> Result<Option<TypedValue>, Error> {
    if left.is_null() {
        return Ok(Some(left.clone()));
    }
    member_default(left, right)
}

fn equal_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(left.domain().boolean(left == right)))
}

fn unequal_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(left.domain().boolean(left != right)))
}

fn and_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(if left.is_truthy()? {
        right.clone()
    } else {
        left.clone()
    }))
}

fn or_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(if left.is_truthy()? {
        left.clone()
    } else {
        right.clone()
    }))
}

fn coalesce_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(if left.is_null() {
        right.clone()
    } else {
        left.clone()
    }))
}

fn xor_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    let truth = left.is_truthy()? ^ right.is_truthy()?;
    Ok(Some(left.domain().boolean(truth)))
}

fn cons_default(left: &TypedValue, right: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(left.domain().pair(left.clone(), right.clone())))
}

fn not_default(value: &TypedValue) -> Result<Option<TypedValue>, Error> {
    Ok(Some(value.domain().boolean(!value.is_truthy()?)))
}

/// Substitute each `%s` in `template` with the str form of the matching
/// argument. The argument count must match the placeholder count.
fn format_template(
    template: &str,
    args: &[TypedValue],
    cfg: &PrintConfig,
) -> Result<String, Error> {
    let mut out = String::new();
    let mut rest = template;
    let mut values = args.iter();
    while let Some(at) = rest.find("%s") {
        out.push_str(&rest[..at]);
        let value = values.next().ok_or_else(|| {
            Error::ExecutionError(format!(
                "format string needs more than the {} arguments provided",
                args.len()
            ))
        })?;
        out.push_str(&printer::render_str(value, cfg));
        rest = &rest[at + 2..];
    }
    if values.next().is_some() {
        return Err(Error::ExecutionError(format!(
            "format string takes fewer than the {} arguments provided",
            args.len()
        )));
    }
    out.push_str(rest);
    Ok(out)
}

/// Build the standard global scope over `domain`. Aggregates and `eval`
/// consult `ops` at call time, so later dictionary changes are visible.
pub fn build_globals(
    domain: &Rc<TypeDomain>,
    ops: &Rc<OperatorDictionary>,
    print_cfg: &PrintCfgHandle,
) -> Rc<SymbolMap> {
    let globals = SymbolMap::root();

    globals.define("null", domain.null());
    globals.define("true", domain.boolean(true));
    globals.define("false", domain.boolean(false));
    globals.define("NAN", domain.float(f64::NAN));
    globals.define("INF", domain.float(f64::INFINITY));
    globals.define("I", domain.complex(Complex64::new(0.0, 1.0)));
    globals.define("E", domain.float(std::f64::consts::E));
    globals.define("PI", domain.float(std::f64::consts::PI));

    for (name, tag) in [
        ("isnull", TypeTag::Null),
        ("isbool", TypeTag::Bool),
        ("isint", TypeTag::Int),
        ("isfloat", TypeTag::Float),
        ("iscomplex", TypeTag::Complex),
        ("isstr", TypeTag::Str),
        ("issymbol", TypeTag::Sym),
        ("ispair", TypeTag::Pair),
        ("iscode", TypeTag::Code),
        ("iscallable", TypeTag::Callable),
        ("isobject", TypeTag::Object),
    ] {
        let test = NativeBuilder::new(name)
            .variant::<(TypedValue,), _>(move |v: TypedValue| v.tag() == tag)
            .build();
        define_native(&globals, domain, test);
    }
    define_native(
        &globals,
        domain,
        NativeBuilder::new("isnumber")
            .variant::<(TypedValue,), _>(|v: TypedValue| {
                matches!(v.tag(), TypeTag::Int | TypeTag::Float | TypeTag::Complex)
            })
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("isnan")
            .variant::<(f64,), _>(|x: f64| x.is_nan())
            .variant::<(Complex64,), _>(|z: Complex64| z.is_nan())
            .variant::<(TypedValue,), _>(|_v: TypedValue| false)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("isinf")
            .variant::<(f64,), _>(|x: f64| x.is_infinite())
            .variant::<(Complex64,), _>(|z: Complex64| z.is_infinite())
            .variant::<(TypedValue,), _>(|_v: TypedValue| false)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("type")
            .variant::<(TypedValue,), _>(|v: TypedValue| v.tag().name())
            .build(),
    );

    define_native(
        &globals,
        domain,
        NativeBuilder::new("bool")
            .variant::<(TypedValue,), _>(|v: TypedValue| v.is_truthy())
            .build(),
    );
    let cfg = print_cfg.clone();
    define_native(
        &globals,
        domain,
        NativeBuilder::new("str")
            .variant::<(TypedValue,), _>(move |v: TypedValue| printer::render_str(&v, &cfg.borrow()))
            .build(),
    );
    let cfg = print_cfg.clone();
    define_native(
        &globals,
        domain,
        NativeBuilder::new("repr")
            .variant::<(TypedValue,), _>(move |v: TypedValue| {
                printer::render_repr(&v, &cfg.borrow())
            })
            .build(),
    );
    let glyphs = ops.lexer_glyphs();
    define_native(
        &globals,
        domain,
        NativeBuilder::new("parse")
            .variant::<(&str,), _>(move |s: &str| parse_literal(s, &glyphs))
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("int")
            .variant::<(BigInt,), _>(|n: &BigInt| n.clone())
            .variant::<(bool,), _>(|b: bool| BigInt::from(i32::from(b)))
            .variant::<(f64,), _>(int_from_float)
            .variant::<(&str, Option<BigInt>), _>(int_from_str)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("float")
            .variant::<(f64,), _>(|x: f64| x)
            .variant::<(BigInt,), _>(|n: &BigInt| n.to_f64().unwrap_or(f64::NAN))
            .variant::<(bool,), _>(|b: bool| if b { 1.0 } else { 0.0 })
            .variant::<(&str, Option<BigInt>), _>(float_from_str)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("number")
            .variant::<(&str, Option<BigInt>), _>(number_from_str)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("complex")
            .variant::<(Promoted<f64>, Promoted<f64>), _>(|re: f64, im: f64| {
                Complex64::new(re, im)
            })
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("polar")
            .variant::<(Promoted<f64>, Promoted<f64>), _>(|r: f64, theta: f64| {
                Complex64::from_polar(r, theta)
            })
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("symbol")
            .variant::<(&str,), _>(|s: &str| Payload::Sym(Rc::from(s)))
            .build(),
    );

    define_native(
        &globals,
        domain,
        NativeBuilder::new("abs")
            .variant::<(BigInt,), _>(|n: &BigInt| n.abs())
            .variant::<(f64,), _>(|x: f64| x.abs())
            .variant::<(Complex64,), _>(|z: Complex64| z.norm())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("sqrt")
            .variant::<(Promoted<f64>,), _>(|x: f64| x.sqrt())
            .variant::<(Complex64,), _>(|z: Complex64| z.sqrt())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("floor")
            .variant::<(BigInt,), _>(|n: &BigInt| n.clone())
            .variant::<(f64,), _>(|x: f64| x.floor())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("ceil")
            .variant::<(BigInt,), _>(|n: &BigInt| n.clone())
            .variant::<(f64,), _>(|x: f64| x.ceil())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("sgn")
            .variant::<(BigInt,), _>(int_signum)
            .variant::<(f64,), _>(float_signum)
            .build(),
    );
    for native in [
        math_fn("sin", |x| x.sin(), |z| z.sin()),
        math_fn("cos", |x| x.cos(), |z| z.cos()),
        math_fn("tan", |x| x.tan(), |z| z.tan()),
        math_fn("asin", |x| x.asin(), |z| z.asin()),
        math_fn("acos", |x| x.acos(), |z| z.acos()),
        math_fn("atan", |x| x.atan(), |z| z.atan()),
        math_fn("sinh", |x| x.sinh(), |z| z.sinh()),
        math_fn("cosh", |x| x.cosh(), |z| z.cosh()),
        math_fn("tanh", |x| x.tanh(), |z| z.tanh()),
        math_fn("asinh", |x| x.asinh(), |z| z.asinh()),
        math_fn("acosh", |x| x.acosh(), |z| z.acosh()),
        math_fn("atanh", |x| x.atanh(), |z| z.atanh()),
        math_fn("exp", |x| x.exp(), |z| z.exp()),
        math_fn("ln", |x| x.ln(), |z| z.ln()),
    ] {
        define_native(&globals, domain, native);
    }
    define_native(
        &globals,
        domain,
        NativeBuilder::new("log")
            .variant::<(Promoted<f64>, Option<Promoted<f64>>), _>(
                |x: f64, base: Option<f64>| match base {
                    Some(b) => x.log(b),
                    None => x.log10(),
                },
            )
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("atan2")
            .variant::<(Promoted<f64>, Promoted<f64>), _>(|y: f64, x: f64| y.atan2(x))
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("rad")
            .variant::<(Promoted<f64>,), _>(|x: f64| x.to_radians())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("deg")
            .variant::<(Promoted<f64>,), _>(|x: f64| x.to_degrees())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("modpow")
            .variant::<(BigInt, BigInt, BigInt), _>(int_modpow)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("gcd")
            .variant::<(BigInt, BigInt), _>(int_gcd)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("re")
            .variant::<(Promoted<Complex64>,), _>(|z: Complex64| z.re)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("im")
            .variant::<(Promoted<Complex64>,), _>(|z: Complex64| z.im)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("phase")
            .variant::<(Promoted<Complex64>,), _>(|z: Complex64| z.arg())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("conj")
            .variant::<(Promoted<Complex64>,), _>(|z: Complex64| z.conj())
            .build(),
    );

    for kind in [
        AggregateKind::Sum,
        AggregateKind::Avg,
        AggregateKind::Min,
        AggregateKind::Max,
    ] {
        define_callable(
            &globals,
            domain,
            Rc::new(Aggregate {
                kind,
                ops: ops.clone(),
            }),
        );
    }

    define_native(
        &globals,
        domain,
        NativeBuilder::new("and")
            .variadic::<(TypedValue, RestArgs<'static>), _>(eager_and)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("or")
            .variadic::<(TypedValue, RestArgs<'static>), _>(eager_or)
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("not")
            .variant::<(TypedValue,), _>(|v: TypedValue| Ok::<bool, Error>(!v.is_truthy()?))
            .build(),
    );
    for mode in [ShortMode::AndThen, ShortMode::OrElse, ShortMode::NonNull] {
        define_callable(&globals, domain, Rc::new(Shorting { mode }));
    }

    define_native(
        &globals,
        domain,
        NativeBuilder::new("cons")
            .variant::<(TypedValue, TypedValue), _>(|head: TypedValue, tail: TypedValue| {
                Payload::Pair(Rc::new(Pair::new(head, tail)))
            })
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("car")
            .variant::<(Rc<Pair>,), _>(|p: &Rc<Pair>| p.head.clone())
            .build(),
    );
    define_native(
        &globals,
        domain,
        NativeBuilder::new("cdr")
            .variant::<(Rc<Pair>,), _>(|p: &Rc<Pair>| p.tail.clone())
            .build(),
    );
    define_callable(&globals, domain, Rc::new(MakeList));
    define_native(
        &globals,
        domain,
        NativeBuilder::new("len")
            .variant::<(&str,), _>(|s: &str| s.chars().count())
            .variant::<(Rc<Pair>,), _>(list_len)
            .variant::<((),), _>(|_null: ()| 0usize)
            .variant::<(TypedValue,), _>(object_len)
            .build(),
    );

    define_native(
        &globals,
        domain,
        slice_variants(NativeBuilder::new("slice")).build(),
    );
    define_native(
        &globals,
        domain,
        slice_variants(NativeBuilder::new("slice?").variant::<((), TypedValue), _>(null_slice))
            .build(),
    );
    define_callable(&globals, domain, Rc::new(Apply { null_aware: false }));
    define_callable(&globals, domain, Rc::new(Apply { null_aware: true }));

    define_callable(&globals, domain, Rc::new(Execute));
    define_callable(
        &globals,
        domain,
        Rc::new(EvalSource {
            ops: ops.clone(),
            print_cfg: print_cfg.clone(),
            glyphs: ops.lexer_glyphs(),
        }),
    );
    define_callable(&globals, domain, Rc::new(With));
    define_native(
        &globals,
        domain,
        NativeBuilder::new("fail")
            .variadic::<(RestArgs<'static>,), _>(fail_with)
            .build(),
    );
    if let Some(negate) = ops.wrap("-") {
        globals.define("neg", domain.callable(Rc::new(negate)));
    }

    globals
}

fn define_native(scope: &Rc<SymbolMap>, domain: &Rc<TypeDomain>, native: NativeFn) {
    let name = native.name().to_owned();
    scope.define(name, domain.callable(Rc::new(native)));
}

fn define_callable(scope: &Rc<SymbolMap>, domain: &Rc<TypeDomain>, callable: Rc<dyn Callable>) {
    let name = callable.name().to_owned();
    scope.define(name, domain.callable(callable));
}

fn math_fn(name: &str, real: fn(f64) -> f64, complex: fn(Complex64) -> Complex64) -> NativeFn {
    NativeBuilder::new(name)
        .variant::<(Promoted<f64>,), _>(real)
        .variant::<(Complex64,), _>(complex)
        .build()
}

fn eager_and(first: TypedValue, rest: RestArgs) -> Result<TypedValue, Error> {
    let mut current = first;
    for value in rest {
        if !current.is_truthy()? {
            return Ok(current);
        }
        current = value.clone();
    }
    Ok(current)
}

fn eager_or(first: TypedValue, rest: RestArgs) -> Result<TypedValue, Error> {
    let mut current = first;
    for value in rest {
        if current.is_truthy()? {
            return Ok(current);
        }
        current = value.clone();
    }
    Ok(current)
}

fn fail_with(rest: RestArgs) -> Result<TypedValue, Error> {
    let causes: Vec<&TypedValue> = rest.collect();
    match causes.as_slice() {
        [] => Err(Error::ExecutionError("failure".into())),
        [cause] => Err(Error::ExecutionError(format!("failure: {}", cause.repr()))),
        more => Err(Error::arity_error_in(Arity::Range(0, 1), more.len(), "fail")),
    }
}

fn int_signum(n: &BigInt) -> BigInt {
    if n.is_negative() {
        BigInt::from(-1)
    } else if n.is_zero() {
        BigInt::from(0)
    } else {
        BigInt::from(1)
    }
}

fn float_signum(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { x } else { x.signum() }
}

fn int_from_float(x: f64) -> Result<BigInt, Error> {
    BigInt::from_f64(x.trunc())
        .ok_or_else(|| Error::ExecutionError(format!("can't convert {x} to an int")))
}

fn radix_value(radix: Option<&BigInt>, what: &str) -> Result<u32, Error> {
    let Some(radix) = radix else {
        return Ok(10);
    };
    radix
        .to_u32()
        .filter(|r| (2..=36).contains(r))
        .ok_or_else(|| Error::ExecutionError(format!("{what}: radix {radix} is not in 2..=36")))
}

fn int_from_str(s: &str, radix: Option<&BigInt>) -> Result<BigInt, Error> {
    let radix = radix_value(radix, "int")?;
    BigInt::parse_bytes(s.trim().as_bytes(), radix).ok_or_else(|| {
        Error::ParseError(ParseError::from_message(
            ParseErrorKind::InvalidLiteral,
            format!("can't parse {s:?} as a base-{radix} int"),
        ))
    })
}

fn float_from_str(s: &str, radix: Option<&BigInt>) -> Result<f64, Error> {
    if radix_value(radix, "float")? == 10 {
        return s.trim().parse::<f64>().map_err(|_| {
            Error::ParseError(ParseError::from_message(
                ParseErrorKind::InvalidLiteral,
                format!("can't parse {s:?} as a float"),
            ))
        });
    }
    Ok(int_from_str(s, radix)?.to_f64().unwrap_or(f64::NAN))
}

fn number_from_str(s: &str, radix: Option<&BigInt>) -> Result<Payload, Error> {
    if let Ok(n) = int_from_str(s, radix) {
        return Ok(Payload::Int(n));
    }
    if radix_value(radix, "number")? == 10 {
        if let Ok(x) = s.trim().parse::<f64>() {
            return Ok(Payload::Float(x));
        }
    }
    Err(Error::ParseError(ParseError::from_message(
        ParseErrorKind::InvalidLiteral,
        format!("can't parse {s:?} as a number"),
    )))
}

/// Scalar literals only: numbers with an optional sign, strings, quoted
/// symbols, and the named constants.
fn parse_literal(source: &str, glyphs: &[String]) -> Result<Payload, Error> {
    let tokens = lexer::tokenize(source, glyphs)?;
    let payload = match tokens.as_slice() {
        [Token::Int(n)] => Some(Payload::Int(n.clone())),
        [Token::Float(x)] => Some(Payload::Float(*x)),
        [Token::Str(s)] => Some(Payload::Str(s.clone())),
        [Token::Symbol(name)] => named_literal(name),
        [Token::Modifier('#'), token] => quoted_literal(token),
        [Token::Operator(sign), rest @ ..] if sign == "+" || sign == "-" => {
            let negative = sign == "-";
            match rest {
                [Token::Int(n)] => Some(Payload::Int(if negative { -n } else { n.clone() })),
                [Token::Float(x)] => Some(Payload::Float(if negative { -x } else { *x })),
                [Token::Symbol(name)] => match named_literal(name) {
                    Some(Payload::Float(x)) => {
                        Some(Payload::Float(if negative { -x } else { x }))
                    }
                    _ => None,
                },
                _ => None,
            }
        }
        _ => None,
    };
    payload.ok_or_else(|| {
        Error::ParseError(ParseError::from_message(
            ParseErrorKind::InvalidLiteral,
            format!("can't parse {source:?} as a single value"),
        ))
    })
}

// Covers both the constant names and the printer's float spellings.
fn named_literal(name: &str) -> Option<Payload> {
    match name {
        "null" => Some(Payload::Unit),
        "true" => Some(Payload::Bool(true)),
        "false" => Some(Payload::Bool(false)),
        "NAN" | "NaN" => Some(Payload::Float(f64::NAN)),
        "INF" | "Inf" => Some(Payload::Float(f64::INFINITY)),
        _ => None,
    }
}

fn quoted_literal(token: &Token) -> Option<Payload> {
    match token {
        Token::Int(n) => Some(Payload::Int(n.clone())),
        Token::Float(x) => Some(Payload::Float(*x)),
        Token::Str(s) => Some(Payload::Str(s.clone())),
        Token::Symbol(name) | Token::SymbolWithArgs(name) => {
            Some(Payload::Sym(Rc::from(name.as_str())))
        }
        Token::Operator(glyph) => Some(Payload::Sym(Rc::from(glyph.as_str()))),
        _ => None,
    }
}

fn int_modpow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> Result<BigInt, Error> {
    if modulus.is_zero() {
        return Err(Error::ExecutionError(
            "modpow: the modulus must be non-zero".into(),
        ));
    }
    if exp.is_negative() {
        return Err(Error::ExecutionError(
            "modpow: the exponent must be non-negative".into(),
        ));
    }
    Ok(base.modpow(exp, modulus))
}

fn int_gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.abs();
    let mut b = b.abs();
    while !b.is_zero() {
        let r = &a % &b;
        a = std::mem::replace(&mut b, r);
    }
    a
}

fn list_len(items: &Rc<Pair>) -> Result<Payload, Error> {
    Ok(Payload::from(items.collect_proper("len")?.len()))
}

fn object_len(value: TypedValue) -> Result<Payload, Error> {
    if let Payload::Object(object) = value.payload() {
        if let Some(countable) = object.as_countable() {
            return Ok(Payload::from(countable.count()));
        }
    }
    Err(Error::TypeError(format!(
        "len: can't count {} of type {}",
        value.repr(),
        value.tag()
    )))
}

fn slice_variants(b: NativeBuilder) -> NativeBuilder {
    b.variant::<(&str, BigInt), _>(str_index)
        .variant::<(&str, Rc<Pair>), _>(str_range)
        .variant::<(Rc<Pair>, BigInt), _>(list_index)
        .variant::<(TypedValue, TypedValue), _>(object_slice)
}

fn null_slice(_target: (), _key: TypedValue) -> Payload {
    Payload::Unit
}

/// Resolve an index that may count from the end. Out of range is an error
/// for single-element access.
fn wrap_index(index: &BigInt, len: usize, what: &str) -> Result<usize, Error> {
    let resolved = index.to_i64().and_then(|i| {
        let len = len as i64;
        let i = if i < 0 { i + len } else { i };
        (0..len).contains(&i).then_some(i as usize)
    });
    resolved.ok_or_else(|| {
        Error::ExecutionError(format!(
            "{what} {index} is out of range for length {len}"
        ))
    })
}

fn str_index(s: &str, index: &BigInt) -> Result<String, Error> {
    let chars: Vec<char> = s.chars().collect();
    let at = wrap_index(index, chars.len(), "string index")?;
    Ok(chars[at].to_string())
}

/// A `(from : to)` pair selects a substring. The end is exclusive,
/// negative positions count from the end, and the bounds clamp instead of
/// erroring.
fn str_range(s: &str, range: &Rc<Pair>) -> Result<String, Error> {
    let from = range.head.as_int()?;
    let to = range.tail.as_int()?;
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let clamp = |raw: &BigInt| -> i64 {
        let i = raw
            .to_i64()
            .unwrap_or(if raw.is_negative() { i64::MIN } else { i64::MAX });
        let i = if i < 0 { i.saturating_add(len) } else { i };
        i.clamp(0, len)
    };
    let lo = clamp(from);
    let hi = clamp(to);
    if lo >= hi {
        return Ok(String::new());
    }
    Ok(chars[lo as usize..hi as usize].iter().collect())
}

fn list_index(items: &Rc<Pair>, index: &BigInt) -> Result<TypedValue, Error> {
    let list = items.collect_proper("slice")?;
    let at = wrap_index(index, list.len(), "list index")?;
    Ok(list[at].clone())
}

/// Objects are tried capability by capability: ordinal access for int
/// keys, then general indexing, then member lookup for symbol keys.
fn object_slice(target: TypedValue, key: TypedValue) -> Result<TypedValue, Error> {
    let Payload::Object(object) = target.payload() else {
        return Err(Error::TypeError(format!(
            "can't index {} of type {}",
            target.repr(),
            target.tag()
        )));
    };
    if let Some(enumerable) = object.as_enumerable() {
        if let Payload::Int(i) = key.payload() {
            if let Some(at) = i.to_usize() {
                if let Some(value) = enumerable.get_ordinal(at) {
                    return Ok(value);
                }
            }
        }
    }
    if let Some(indexable) = object.as_indexable() {
        if let Some(value) = indexable.get_index(&key) {
            return Ok(value);
        }
    }
    if let Some(structured) = object.as_structured() {
        if let Payload::Sym(name) = key.payload() {
            if let Some(value) = structured.get_member(name) {
                return Ok(value);
            }
        }
    }
    Err(Error::ExecutionError(format!(
        "no entry {} in {}",
        key.repr(),
        target.repr()
    )))
}

#[derive(Clone, Copy)]
enum AggregateKind {
    Sum,
    Avg,
    Min,
    Max,
}

/// Operator-backed reductions over the argument pack. The dictionary is
/// consulted per call, so these follow whatever `+`, `/` and `<` dispatch
/// to, mixed argument types included.
struct Aggregate {
    kind: AggregateKind,
    ops: Rc<OperatorDictionary>,
}

impl Aggregate {
    fn operator(&self, glyph: &str) -> Result<Rc<BinaryOperator>, Error> {
        self.ops.binary(glyph).cloned().ok_or_else(|| {
            Error::ExecutionError(format!(
                "{}: operator '{glyph}' is not registered",
                self.name()
            ))
        })
    }
}

impl Callable for Aggregate {
    fn name(&self) -> &str {
        match self.kind {
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
        }
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        let Some(argc) = argc else {
            return Err(Error::ExecutionError(format!(
                "{}: argument count required",
                self.name()
            )));
        };
        if argc == 0 {
            return Err(Error::arity_error_in(Arity::AtLeast(1), 0, self.name()));
        }
        let args = frame.pop_n(argc)?;
        let mut values = args.iter();
        let Some(first) = values.next() else {
            return Err(Error::arity_error_in(Arity::AtLeast(1), 0, self.name()));
        };
        let mut acc = first.clone();
        match self.kind {
            AggregateKind::Sum => {
                let add = self.operator("+")?;
                for value in values {
                    acc = add.apply(&acc, value)?;
                }
            }
            AggregateKind::Avg => {
                let add = self.operator("+")?;
                for value in values {
                    acc = add.apply(&acc, value)?;
                }
                let divide = self.operator("/")?;
                let count = frame.domain().int(args.len());
                acc = divide.apply(&acc, &count)?;
            }
            AggregateKind::Min => {
                let less = self.operator("<")?;
                for value in values {
                    if less.apply(value, &acc)?.is_truthy()? {
                        acc = value.clone();
                    }
                }
            }
            AggregateKind::Max => {
                let less = self.operator("<")?;
                for value in values {
                    if less.apply(&acc, value)?.is_truthy()? {
                        acc = value.clone();
                    }
                }
            }
        }
        frame.push(acc);
        validate_returns(retc, 1, self.name())
    }
}

#[derive(Clone, Copy)]
enum ShortMode {
    AndThen,
    OrElse,
    NonNull,
}

/// The lazy halves of `&&`, `||` and `??`. The compilers package the
/// right-hand side as a code block; a plain value in that position counts
/// as already evaluated.
struct Shorting {
    mode: ShortMode,
}

impl Callable for Shorting {
    fn name(&self) -> &str {
        match self.mode {
            ShortMode::AndThen => "and-then",
            ShortMode::OrElse => "or-else",
            ShortMode::NonNull => "non-null",
        }
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 2 {
                return Err(Error::arity_error_in(Arity::Exact(2), n, self.name()));
            }
        }
        let args = frame.pop_n(2)?;
        let Ok([left, right]) = <[TypedValue; 2]>::try_from(args) else {
            return Err(Error::arity_error_in(Arity::Exact(2), 0, self.name()));
        };
        let take_right = match self.mode {
            ShortMode::AndThen => left.is_truthy()?,
            ShortMode::OrElse => !left.is_truthy()?,
            ShortMode::NonNull => left.is_null(),
        };
        let result = if !take_right {
            left
        } else {
            match right.payload() {
                Payload::Code(code) => {
                    eval_single(code, frame.scope(), frame.domain(), depth, self.name())?
                }
                _ => right.clone(),
            }
        };
        frame.push(result);
        validate_returns(retc, 1, self.name())
    }
}

/// Collects the argument pack into a proper list. Square-bracket literals
/// compile to a call of this name.
struct MakeList;

impl Callable for MakeList {
    fn name(&self) -> &str {
        "list"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        let Some(argc) = argc else {
            return Err(Error::ExecutionError("list: argument count required".into()));
        };
        let items = frame.pop_n(argc)?;
        let value = frame.domain().list(items);
        frame.push(value);
        validate_returns(retc, 1, "list")
    }
}

/// First-class application: `apply(f, a, b)` calls `f` with the remaining
/// arguments. The null-aware spelling short-circuits a null target.
struct Apply {
    null_aware: bool,
}

impl Callable for Apply {
    fn name(&self) -> &str {
        if self.null_aware { "apply?" } else { "apply" }
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        let Some(argc) = argc else {
            return Err(Error::ExecutionError(format!(
                "{}: argument count required",
                self.name()
            )));
        };
        if argc == 0 {
            return Err(Error::arity_error_in(Arity::AtLeast(1), 0, self.name()));
        }
        let mut args = frame.pop_n(argc)?;
        let rest = args.split_off(1);
        let Some(target) = args.pop() else {
            return Err(Error::arity_error_in(Arity::AtLeast(1), 0, self.name()));
        };
        if self.null_aware && target.is_null() {
            frame.push(target);
            return validate_returns(retc, 1, self.name());
        }
        let call_argc = rest.len();
        for value in rest {
            frame.push(value);
        }
        invoke_value(&target, frame, Some(call_argc), retc, depth)
    }
}

/// Runs a code value against the calling frame, so bindings and stack
/// effects land in the caller's scope.
struct Execute;

impl Callable for Execute {
    fn name(&self) -> &str {
        "execute"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 1 {
                return Err(Error::arity_error_in(Arity::Exact(1), n, "execute"));
            }
        }
        let value = frame.pop()?;
        let code = value.as_code()?.clone();
        let before = frame.stack_len();
        code.body().execute_at_depth(frame, depth + 1)?;
        let produced = frame.stack_len().saturating_sub(before);
        validate_returns(retc, produced, "execute")
    }
}

/// Compiles source text in any of the three syntaxes and runs it in the
/// calling frame, so the text sees the caller's bindings.
struct EvalSource {
    ops: Rc<OperatorDictionary>,
    print_cfg: PrintCfgHandle,
    glyphs: Vec<String>,
}

impl Callable for EvalSource {
    fn name(&self) -> &str {
        "eval"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 2 {
                return Err(Error::arity_error_in(Arity::Exact(2), n, "eval"));
            }
        }
        let args = frame.pop_n(2)?;
        let Ok([syntax, source]) = <[TypedValue; 2]>::try_from(args) else {
            return Err(Error::arity_error_in(Arity::Exact(2), 0, "eval"));
        };
        let syntax_name = match syntax.payload() {
            Payload::Str(s) => s.clone(),
            Payload::Sym(s) => s.to_string(),
            _ => {
                return Err(Error::TypeError(format!(
                    "eval: the syntax must be named by a string or symbol, got {}",
                    syntax.repr()
                )));
            }
        };
        let text = source.as_str()?;
        let tokens = lexer::tokenize(text, &self.glyphs)?;
        let domain = frame.domain().clone();
        let compiled = match syntax_name.as_str() {
            "prefix" => parser::parse_prefix(&tokens, &domain, &self.ops, &self.print_cfg)?,
            "infix" => parser::parse_infix(&tokens, &domain, &self.ops, &self.print_cfg)?,
            "postfix" => postfix::parse_postfix(&tokens, &domain, &self.ops, &self.print_cfg)?,
            other => {
                return Err(Error::ExecutionError(format!(
                    "eval: unknown syntax '{other}' (expected prefix, infix, or postfix)"
                )));
            }
        };
        let before = frame.stack_len();
        compiled.execute_at_depth(frame, depth + 1)?;
        let produced = frame.stack_len().saturating_sub(before);
        validate_returns(retc, produced, "eval")
    }
}

/// Runs a code value in a child scope pre-bound with the members of a
/// structured object.
struct With;

impl Callable for With {
    fn name(&self) -> &str {
        "with"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 2 {
                return Err(Error::arity_error_in(Arity::Exact(2), n, "with"));
            }
        }
        let args = frame.pop_n(2)?;
        let Ok([target, body]) = <[TypedValue; 2]>::try_from(args) else {
            return Err(Error::arity_error_in(Arity::Exact(2), 0, "with"));
        };
        let object = target.as_object()?;
        let Some(structured) = object.as_structured() else {
            return Err(Error::TypeError(format!(
                "{} of type {} has no members",
                target.repr(),
                target.tag()
            )));
        };
        let code = body.as_code()?.clone();
        let scope = SymbolMap::child(frame.scope());
        for name in structured.member_names() {
            if let Some(value) = structured.get_member(&name) {
                scope.define(name, value);
            }
        }
        let mut inner = Frame::new(frame.domain().clone(), scope);
        code.body().execute_at_depth(&mut inner, depth + 1)?;
        let results = inner.into_results();
        let produced = results.len();
        for value in results {
            frame.push(value);
        }
        validate_returns(retc, produced, "with")
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::exec::{ExecutableList, Instruction};
    use std::cell::RefCell;

    fn setup() -> (Rc<TypeDomain>, Rc<OperatorDictionary>, PrintCfgHandle) {
        let cfg: PrintCfgHandle = Rc::new(RefCell::new(PrintConfig::default()));
        let domain = build_domain();
        let ops = Rc::new(build_operators(&cfg));
        (domain, ops, cfg)
    }

    fn binop(ops: &OperatorDictionary, glyph: &str) -> Rc<BinaryOperator> {
        ops.binary(glyph).unwrap().clone()
    }

    fn call_global(
        globals: &Rc<SymbolMap>,
        domain: &Rc<TypeDomain>,
        name: &str,
        args: Vec<TypedValue>,
    ) -> Result<TypedValue, Error> {
        let mut frame = Frame::new(domain.clone(), SymbolMap::child(globals));
        let argc = args.len();
        for value in args {
            frame.push(value);
        }
        let target = globals.lookup(name).unwrap();
        let callable = target.as_callable()?;
        callable.call(&mut frame, Some(argc), Some(1), 0)?;
        frame.pop()
    }

    struct Point {
        x: TypedValue,
        y: TypedValue,
    }

    impl Structured for Point {
        fn get_member(&self, name: &str) -> Option<TypedValue> {
            match name {
                "x" => Some(self.x.clone()),
                "y" => Some(self.y.clone()),
                _ => None,
            }
        }

        fn member_names(&self) -> Vec<String> {
            vec!["x".to_owned(), "y".to_owned()]
        }
    }

    impl Composite for Point {
        fn composite_type(&self) -> &str {
            "point"
        }

        fn as_structured(&self) -> Option<&dyn Structured> {
            Some(self)
        }
    }

    #[test]
    fn binary_dispatch_table() {
        let (d, ops, _cfg) = setup();
        let cases: Vec<(&str, TypedValue, TypedValue, &str)> = vec![
            ("+", d.int(1), d.int(2), "3"),
            ("+", d.int(1), d.float(2.5), "3.5"),
            ("+", d.boolean(true), d.boolean(true), "2"),
            ("+", d.boolean(true), d.int(3), "4"),
            ("+", d.string("ab"), d.string("cd"), "\"abcd\""),
            ("-", d.int(1), d.int(3), "-2"),
            ("*", d.string("ab"), d.int(3), "\"ababab\""),
            ("*", d.int(2), d.string("xy"), "\"xyxy\""),
            ("*", d.boolean(true), d.boolean(false), "0"),
            ("/", d.int(1), d.int(2), "0.5"),
            ("/", d.int(1), d.int(0), "+Inf"),
            ("/", d.int(-1), d.int(0), "-Inf"),
            ("//", d.int(7), d.int(2), "3"),
            ("//", d.int(-7), d.int(2), "-4"),
            ("%", d.int(-7), d.int(3), "2"),
            ("%", d.int(7), d.int(-3), "-2"),
            ("%", d.float(7.5), d.float(2.0), "1.5"),
            // float remainder keeps the dividend's sign, unlike int %
            ("%", d.float(-7.5), d.float(2.0), "-1.5"),
            ("**", d.int(2), d.int(10), "1024"),
            ("**", d.boolean(false), d.boolean(false), "1"),
            ("<", d.int(1), d.float(2.0), "true"),
            ("<", d.string("a"), d.string("b"), "true"),
            ("<=", d.int(2), d.int(2), "true"),
            (">", d.boolean(true), d.boolean(false), "true"),
            ("<=>", d.int(3), d.int(1), "1"),
            ("<=>", d.string("a"), d.string("b"), "-1"),
            ("==", d.int(1), d.float(1.0), "true"),
            ("==", d.string("a"), d.int(1), "false"),
            ("!=", d.int(1), d.int(2), "true"),
            ("&", d.boolean(true), d.boolean(false), "false"),
            ("&", d.int(6), d.int(3), "2"),
            ("|", d.int(6), d.int(3), "7"),
            ("^", d.int(6), d.int(3), "5"),
            ("<<", d.int(1), d.int(8), "256"),
            (">>", d.int(1024), d.int(3), "128"),
            ("&&", d.int(0), d.int(5), "0"),
            ("||", d.int(0), d.int(5), "5"),
            ("??", d.null(), d.int(7), "7"),
            ("??", d.int(1), d.int(7), "1"),
            ("^^", d.int(1), d.int(0), "true"),
            (":", d.int(1), d.null(), "[1]"),
        ];
        for (glyph, left, right, expected) in cases {
            let result = binop(&ops, glyph).apply(&left, &right).unwrap();
            assert_eq!(
                result.repr(),
                expected,
                "{} {glyph} {}",
                left.repr(),
                right.repr()
            );
        }
    }

    #[test]
    fn structural_equality_compares_lists() {
        let (d, ops, _cfg) = setup();
        let eq = binop(&ops, "==");
        let a = d.list(vec![d.int(1), d.int(2)]);
        let b = d.list(vec![d.int(1), d.int(2)]);
        assert_eq!(eq.apply(&a, &b).unwrap().repr(), "true");
        let c = d.list(vec![d.int(1), d.int(3)]);
        assert_eq!(eq.apply(&a, &c).unwrap().repr(), "false");
    }

    #[test]
    fn int_power_with_negative_exponent_goes_float() {
        let (d, ops, _cfg) = setup();
        let result = binop(&ops, "**").apply(&d.int(2), &d.int(-1)).unwrap();
        assert_eq!(result.as_float().unwrap(), 0.5);
    }

    #[test]
    fn dispatch_errors() {
        let (d, ops, _cfg) = setup();
        let err = binop(&ops, "+")
            .apply(&d.string("ab"), &d.int(1))
            .unwrap_err();
        assert!(err.to_string().contains("Can't apply operation '+'"));
        let err = binop(&ops, "//").apply(&d.int(1), &d.int(0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        let err = binop(&ops, "%").apply(&d.int(1), &d.int(0)).unwrap_err();
        assert!(err.to_string().contains("modulo by zero"));
        let err = binop(&ops, "<<").apply(&d.int(1), &d.int(-2)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let err = binop(&ops, "**")
            .apply(&d.int(2), &d.int(BigInt::from(u64::MAX)))
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn member_access_and_null_propagation() {
        let (d, ops, _cfg) = setup();
        let point = d.object(Rc::new(Point {
            x: d.int(3),
            y: d.int(4),
        }));
        let dot = binop(&ops, ".");
        assert_eq!(dot.apply(&point, &d.sym("x")).unwrap().repr(), "3");
        let err = dot.apply(&point, &d.sym("z")).unwrap_err();
        assert!(err.to_string().contains("can't find member 'z'"));
        let err = dot.apply(&d.int(5), &d.sym("x")).unwrap_err();
        assert!(err.to_string().contains("has no members"));

        let opt = binop(&ops, "?.");
        assert!(opt.apply(&d.null(), &d.sym("x")).unwrap().is_null());
        assert_eq!(opt.apply(&point, &d.sym("y")).unwrap().repr(), "4");
    }

    #[test]
    fn percent_formats_strings() {
        let (d, ops, _cfg) = setup();
        let rem = binop(&ops, "%");
        let out = rem.apply(&d.string("x=%s"), &d.int(5)).unwrap();
        assert_eq!(out.as_str().unwrap(), "x=5");
        let args = d.list(vec![d.int(1), d.string("two")]);
        let out = rem.apply(&d.string("%s and %s"), &args).unwrap();
        assert_eq!(out.as_str().unwrap(), "1 and two");
        let err = rem.apply(&d.string("%s %s"), &d.int(1)).unwrap_err();
        assert!(err.to_string().contains("arguments"));
    }

    #[test]
    fn unary_operators() {
        let (d, ops, _cfg) = setup();
        let neg = ops.unary("-").unwrap();
        assert_eq!(neg.apply(&d.int(5)).unwrap().repr(), "-5");
        assert_eq!(neg.apply(&d.boolean(true)).unwrap().repr(), "-1");
        let not = ops.unary("!").unwrap();
        assert_eq!(not.apply(&d.int(0)).unwrap().repr(), "true");
        assert_eq!(not.apply(&d.string("x")).unwrap().repr(), "false");
        let inv = ops.unary("~").unwrap();
        assert_eq!(inv.apply(&d.int(5)).unwrap().repr(), "-6");
        let plus = ops.unary("+").unwrap();
        assert_eq!(plus.apply(&d.boolean(true)).unwrap().repr(), "1");
    }

    #[test]
    fn truthiness_table() {
        let (d, _ops, _cfg) = setup();
        let cases = vec![
            (d.null(), false),
            (d.boolean(false), false),
            (d.boolean(true), true),
            (d.int(0), false),
            (d.int(-2), true),
            (d.float(0.0), false),
            (d.float(0.5), true),
            (d.complex(Complex64::new(0.0, 0.0)), false),
            (d.complex(Complex64::new(0.0, 1.0)), true),
            (d.string(""), false),
            (d.string("x"), true),
            (d.sym("s"), true),
            (d.pair(d.int(1), d.null()), true),
        ];
        for (value, expected) in cases {
            assert_eq!(value.is_truthy().unwrap(), expected, "{}", value.repr());
        }
    }

    #[test]
    fn global_inventory() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        for name in [
            "null", "true", "false", "NAN", "INF", "I", "E", "PI", "isnull", "isbool", "isint",
            "isfloat", "iscomplex", "isstr", "issymbol", "ispair", "iscode", "iscallable",
            "isobject", "isnumber", "isnan", "isinf", "type", "bool", "str", "repr", "parse",
            "int", "float", "number", "complex", "polar", "symbol", "abs", "sqrt", "floor",
            "ceil", "sgn", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "sinh", "cosh",
            "tanh", "asinh", "acosh", "atanh", "exp", "ln", "log", "rad", "deg", "modpow", "gcd",
            "re", "im", "phase", "conj", "sum", "avg", "min", "max", "and", "or", "not",
            "and-then", "or-else", "non-null", "cons", "car", "cdr", "list", "len", "slice",
            "slice?", "apply", "apply?", "execute", "eval", "with", "fail", "neg",
        ] {
            assert!(globals.lookup(name).is_some(), "missing global '{name}'");
        }
    }

    #[test]
    fn conversion_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "int", vec![d.string("ff"), d.int(16)]).unwrap();
        assert_eq!(out.repr(), "255");
        let out = call_global(&globals, &d, "int", vec![d.float(2.9)]).unwrap();
        assert_eq!(out.repr(), "2");
        let out = call_global(&globals, &d, "float", vec![d.string(" 2.5 ")]).unwrap();
        assert_eq!(out.as_float().unwrap(), 2.5);
        let out = call_global(&globals, &d, "number", vec![d.string("10"), d.int(2)]).unwrap();
        assert_eq!(out.repr(), "2");
        let out = call_global(&globals, &d, "number", vec![d.string("2.5")]).unwrap();
        assert_eq!(out.as_float().unwrap(), 2.5);
        let out = call_global(&globals, &d, "parse", vec![d.string("0x1a")]).unwrap();
        assert_eq!(out.repr(), "26");
        let out = call_global(&globals, &d, "parse", vec![d.string("#plus")]).unwrap();
        assert_eq!(out.repr(), "#plus");
        let out = call_global(&globals, &d, "parse", vec![d.string("-4.5")]).unwrap();
        assert_eq!(out.as_float().unwrap(), -4.5);
        let err = call_global(&globals, &d, "parse", vec![d.string("1 + 2")]).unwrap_err();
        assert!(err.to_string().contains("single value"));
        let out = call_global(&globals, &d, "symbol", vec![d.string("abc")]).unwrap();
        assert_eq!(out.repr(), "#abc");
        let out = call_global(&globals, &d, "type", vec![d.float(1.0)]).unwrap();
        assert_eq!(out.as_str().unwrap(), "float");
        let out = call_global(&globals, &d, "bool", vec![d.int(0)]).unwrap();
        assert_eq!(out.repr(), "false");
        let out = call_global(&globals, &d, "str", vec![d.sym("x")]).unwrap();
        assert_eq!(out.as_str().unwrap(), "x");
        let out = call_global(&globals, &d, "repr", vec![d.sym("x")]).unwrap();
        assert_eq!(out.as_str().unwrap(), "#x");
        let out = call_global(&globals, &d, "complex", vec![d.int(1), d.int(2)]).unwrap();
        assert_eq!(out.as_complex().unwrap(), Complex64::new(1.0, 2.0));
    }

    #[test]
    fn parse_inverts_repr_for_scalars() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let values = vec![
            d.int(42),
            d.int(-7),
            d.float(2.5),
            d.float(f64::INFINITY),
            d.boolean(true),
            d.null(),
            d.string("hi"),
            d.sym("abc"),
        ];
        for value in values {
            let repr = call_global(&globals, &d, "repr", vec![value.clone()]).unwrap();
            let back = call_global(&globals, &d, "parse", vec![repr.clone()]).unwrap();
            assert_eq!(back, value, "through {}", repr.as_str().unwrap());
        }
    }

    #[test]
    fn math_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "abs", vec![d.int(-3)]).unwrap();
        assert_eq!(out.repr(), "3");
        let z = d.complex(Complex64::new(3.0, 4.0));
        let out = call_global(&globals, &d, "abs", vec![z]).unwrap();
        assert_eq!(out.as_float().unwrap(), 5.0);
        let out = call_global(&globals, &d, "sqrt", vec![d.float(2.25)]).unwrap();
        assert_eq!(out.as_float().unwrap(), 1.5);
        let out = call_global(&globals, &d, "sqrt", vec![d.int(9)]).unwrap();
        assert_eq!(out.as_float().unwrap(), 3.0);
        let out = call_global(&globals, &d, "gcd", vec![d.int(12), d.int(18)]).unwrap();
        assert_eq!(out.repr(), "6");
        let out = call_global(&globals, &d, "modpow", vec![d.int(4), d.int(13), d.int(497)])
            .unwrap();
        assert_eq!(out.repr(), "445");
        let out = call_global(&globals, &d, "log", vec![d.float(8.0), d.float(2.0)]).unwrap();
        assert!((out.as_float().unwrap() - 3.0).abs() < 1e-12);
        let out = call_global(&globals, &d, "sgn", vec![d.float(-2.5)]).unwrap();
        assert_eq!(out.as_float().unwrap(), -1.0);
        let out = call_global(&globals, &d, "sgn", vec![d.int(0)]).unwrap();
        assert_eq!(out.repr(), "0");
        let out = call_global(&globals, &d, "re", vec![d.int(3)]).unwrap();
        assert_eq!(out.as_float().unwrap(), 3.0);
        let out = call_global(
            &globals,
            &d,
            "phase",
            vec![d.complex(Complex64::new(0.0, 1.0))],
        )
        .unwrap();
        assert!((out.as_float().unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        let out = call_global(&globals, &d, "atan2", vec![d.float(1.0), d.float(1.0)]).unwrap();
        assert!((out.as_float().unwrap() - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
        let err = call_global(&globals, &d, "modpow", vec![d.int(2), d.int(3), d.int(0)])
            .unwrap_err();
        assert!(err.to_string().contains("modulus"));
    }

    #[test]
    fn aggregate_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "sum", vec![d.int(1), d.float(2.5)]).unwrap();
        assert_eq!(out.as_float().unwrap(), 3.5);
        let out = call_global(
            &globals,
            &d,
            "min",
            vec![d.int(3), d.int(1), d.int(2)],
        )
        .unwrap();
        assert_eq!(out.repr(), "1");
        let out = call_global(&globals, &d, "max", vec![d.string("a"), d.string("b")]).unwrap();
        assert_eq!(out.as_str().unwrap(), "b");
        let out = call_global(
            &globals,
            &d,
            "avg",
            vec![d.int(1), d.int(2), d.int(3), d.int(4)],
        )
        .unwrap();
        assert_eq!(out.as_float().unwrap(), 2.5);
        let out = call_global(&globals, &d, "sum", vec![d.int(9)]).unwrap();
        assert_eq!(out.repr(), "9");
        let err = call_global(&globals, &d, "sum", vec![]).unwrap_err();
        assert!(matches!(err, Error::ArityError { .. }));
    }

    #[test]
    fn logic_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "and", vec![d.int(1), d.int(2), d.int(3)]).unwrap();
        assert_eq!(out.repr(), "3");
        let out = call_global(&globals, &d, "and", vec![d.int(1), d.int(0), d.int(3)]).unwrap();
        assert_eq!(out.repr(), "0");
        let out = call_global(&globals, &d, "or", vec![d.int(0), d.string(""), d.int(7)])
            .unwrap();
        assert_eq!(out.repr(), "7");
        let out = call_global(&globals, &d, "not", vec![d.null()]).unwrap();
        assert_eq!(out.repr(), "true");
    }

    #[test]
    fn shorting_runs_thunks_only_when_needed() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let boom = d.code(ExecutableList::new(vec![Instruction::SymbolGet(
            "boom".into(),
        )]));
        let out =
            call_global(&globals, &d, "and-then", vec![d.boolean(false), boom.clone()]).unwrap();
        assert_eq!(out.repr(), "false");
        let err = call_global(&globals, &d, "and-then", vec![d.boolean(true), boom.clone()])
            .unwrap_err();
        assert!(matches!(err, Error::UnboundSymbol(_)));
        let out = call_global(&globals, &d, "or-else", vec![d.int(3), boom.clone()]).unwrap();
        assert_eq!(out.repr(), "3");
        let out = call_global(&globals, &d, "non-null", vec![d.int(2), boom]).unwrap();
        assert_eq!(out.repr(), "2");
        let five = d.code(ExecutableList::new(vec![Instruction::Push(d.int(5))]));
        let out = call_global(&globals, &d, "non-null", vec![d.null(), five]).unwrap();
        assert_eq!(out.repr(), "5");
    }

    #[test]
    fn pair_and_list_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "cons", vec![d.int(1), d.null()]).unwrap();
        assert_eq!(out.repr(), "[1]");
        let pair = d.pair(d.int(1), d.int(2));
        let out = call_global(&globals, &d, "car", vec![pair.clone()]).unwrap();
        assert_eq!(out.repr(), "1");
        let out = call_global(&globals, &d, "cdr", vec![pair]).unwrap();
        assert_eq!(out.repr(), "2");
        let out = call_global(&globals, &d, "list", vec![d.int(1), d.int(2), d.int(3)]).unwrap();
        assert_eq!(out.repr(), "[1, 2, 3]");
        let out = call_global(&globals, &d, "len", vec![d.string("héllo")]).unwrap();
        assert_eq!(out.repr(), "5");
        let out = call_global(&globals, &d, "len", vec![d.list(vec![d.int(1), d.int(2)])])
            .unwrap();
        assert_eq!(out.repr(), "2");
        let out = call_global(&globals, &d, "len", vec![d.null()]).unwrap();
        assert_eq!(out.repr(), "0");
        let err = call_global(&globals, &d, "len", vec![d.int(5)]).unwrap_err();
        assert!(err.to_string().contains("can't count"));
    }

    #[test]
    fn slice_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let out = call_global(&globals, &d, "slice", vec![d.string("hello"), d.int(1)]).unwrap();
        assert_eq!(out.as_str().unwrap(), "e");
        let out = call_global(&globals, &d, "slice", vec![d.string("hello"), d.int(-1)])
            .unwrap();
        assert_eq!(out.as_str().unwrap(), "o");
        let range = d.pair(d.int(1), d.int(3));
        let out = call_global(&globals, &d, "slice", vec![d.string("hello"), range]).unwrap();
        assert_eq!(out.as_str().unwrap(), "el");
        let wide = d.pair(d.int(1), d.int(100));
        let out = call_global(&globals, &d, "slice", vec![d.string("hello"), wide]).unwrap();
        assert_eq!(out.as_str().unwrap(), "ello");
        let items = d.list(vec![d.int(10), d.int(20), d.int(30)]);
        let out = call_global(&globals, &d, "slice", vec![items.clone(), d.int(2)]).unwrap();
        assert_eq!(out.repr(), "30");
        let err = call_global(&globals, &d, "slice", vec![items, d.int(9)]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let out = call_global(&globals, &d, "slice?", vec![d.null(), d.int(1)]).unwrap();
        assert!(out.is_null());
        let point = d.object(Rc::new(Point {
            x: d.int(3),
            y: d.int(4),
        }));
        let out = call_global(&globals, &d, "slice", vec![point, d.sym("x")]).unwrap();
        assert_eq!(out.repr(), "3");
    }

    #[test]
    fn apply_execute_eval_with() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);

        let sum = globals.lookup("sum").unwrap();
        let out = call_global(&globals, &d, "apply", vec![sum, d.int(1), d.int(2)]).unwrap();
        assert_eq!(out.repr(), "3");
        let out = call_global(&globals, &d, "apply?", vec![d.null(), d.int(1)]).unwrap();
        assert!(out.is_null());

        let code = d.code(ExecutableList::new(vec![Instruction::Push(d.int(42))]));
        let out = call_global(&globals, &d, "execute", vec![code]).unwrap();
        assert_eq!(out.repr(), "42");

        let out = call_global(
            &globals,
            &d,
            "eval",
            vec![d.string("infix"), d.string("1 + 2 * 3")],
        )
        .unwrap();
        assert_eq!(out.repr(), "7");
        let out = call_global(
            &globals,
            &d,
            "eval",
            vec![d.string("prefix"), d.string("(+ 1 2)")],
        )
        .unwrap();
        assert_eq!(out.repr(), "3");
        let out = call_global(
            &globals,
            &d,
            "eval",
            vec![d.string("postfix"), d.string("1 2 +")],
        )
        .unwrap();
        assert_eq!(out.repr(), "3");
        let err = call_global(
            &globals,
            &d,
            "eval",
            vec![d.string("sideways"), d.string("1")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown syntax"));

        let point = d.object(Rc::new(Point {
            x: d.int(3),
            y: d.int(4),
        }));
        let body = d.code(ExecutableList::new(vec![Instruction::SymbolGet(
            "y".into(),
        )]));
        let out = call_global(&globals, &d, "with", vec![point, body]).unwrap();
        assert_eq!(out.repr(), "4");

        let err = call_global(&globals, &d, "fail", vec![d.string("oops")]).unwrap_err();
        assert_eq!(err.to_string(), "ExecutionError: failure: \"oops\"");
        let err = call_global(&globals, &d, "fail", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "ExecutionError: failure");

        let out = call_global(&globals, &d, "neg", vec![d.int(4)]).unwrap();
        assert_eq!(out.repr(), "-4");
    }

    #[test]
    fn type_test_globals() {
        let (d, ops, cfg) = setup();
        let globals = build_globals(&d, &ops, &cfg);
        let cases = vec![
            ("isint", d.int(1), true),
            ("isint", d.float(1.0), false),
            ("isnull", d.null(), true),
            ("ispair", d.pair(d.int(1), d.int(2)), true),
            ("isnumber", d.complex(Complex64::new(1.0, 0.0)), true),
            ("isnumber", d.boolean(true), false),
            ("isnan", d.float(f64::NAN), true),
            ("isnan", d.int(1), false),
            ("isinf", d.float(f64::INFINITY), true),
            ("isinf", d.float(1.0), false),
            ("issymbol", d.sym("a"), true),
            ("iscallable", globals.lookup("sum").unwrap(), true),
        ];
        for (name, value, expected) in cases {
            let out = call_global(&globals, &d, name, vec![value.clone()]).unwrap();
            assert_eq!(out.as_bool().unwrap(), expected, "{name}({})", value.repr());
        }
    }
}
