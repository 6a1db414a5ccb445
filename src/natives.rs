//! Declarative binding of host functions into the symbol table.
//!
//! A native function is a named bundle of typed variants. Each variant is a
//! plain Rust closure; its parameter types define which runtime tags it
//! accepts:
//!
//! - payload types (`&BigInt`, `f64`, `bool`, `Complex64`, `&str`,
//!   `&Rc<Pair>`, `&Rc<Code>`, `()` for null) accept exactly their tag;
//! - [`Promoted<T>`] also accepts tags the domain can convert to `T`'s tag
//!   and hands the body the converted value, so `sin(1)` widens the int;
//! - `TypedValue` accepts anything and passes the raw value through;
//! - a trailing `Option<T>` makes the parameter optional;
//! - a trailing [`RestArgs`] iterator makes the variant variadic.
//!
//! At call time the binder scans the variants in registration order and
//! runs the first one whose arity and per-parameter constraints accept the
//! arguments. No match is a type error naming the function and the actual
//! argument types.

use std::marker::PhantomData;
use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;

use crate::domain::TypeDomain;
use crate::exec::{check_depth, validate_returns, Callable, Frame};
use crate::value::{Code, Pair, Payload, TypeTag, TypedValue};
use crate::{Arity, Error};

/// Extraction of one typed argument. `admits` drives variant selection,
/// `from_value` runs only after the whole variant has been accepted.
pub(crate) trait FromArg {
    type Arg<'a>;

    fn admits(value: &TypedValue) -> bool;
    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error>;
}

impl FromArg for TypedValue {
    type Arg<'a> = TypedValue;

    fn admits(_value: &TypedValue) -> bool {
        true
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        Ok(value.clone())
    }
}

impl FromArg for BigInt {
    type Arg<'a> = &'a BigInt;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Int
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_int()
    }
}

impl FromArg for f64 {
    type Arg<'a> = f64;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Float
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_float()
    }
}

impl FromArg for bool {
    type Arg<'a> = bool;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Bool
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_bool()
    }
}

impl FromArg for Complex64 {
    type Arg<'a> = Complex64;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Complex
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_complex()
    }
}

impl FromArg for &str {
    type Arg<'a> = &'a str;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Str
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_str()
    }
}

impl FromArg for Rc<Pair> {
    type Arg<'a> = &'a Rc<Pair>;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Pair
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_pair()
    }
}

impl FromArg for Rc<Code> {
    type Arg<'a> = &'a Rc<Code>;

    fn admits(value: &TypedValue) -> bool {
        value.tag() == TypeTag::Code
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.as_code()
    }
}

/// The null parameter: a variant with a `()` slot only accepts null there.
impl FromArg for () {
    type Arg<'a> = ();

    fn admits(value: &TypedValue) -> bool {
        value.is_null()
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        if value.is_null() {
            Ok(())
        } else {
            Err(Error::TypeError(format!(
                "expected <null>, got {}: {}",
                value.tag(),
                value.repr()
            )))
        }
    }
}

/// Marker for parameters that accept any tag the domain can widen to the
/// inner type's tag. The body receives the converted value.
pub struct Promoted<T> {
    _marker: PhantomData<T>,
}

impl FromArg for Promoted<f64> {
    type Arg<'a> = f64;

    fn admits(value: &TypedValue) -> bool {
        value.domain().can_convert(value.tag(), TypeTag::Float)
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.domain().convert(value, TypeTag::Float)?.as_float()
    }
}

impl FromArg for Promoted<BigInt> {
    type Arg<'a> = BigInt;

    fn admits(value: &TypedValue) -> bool {
        value.domain().can_convert(value.tag(), TypeTag::Int)
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        let widened = value.domain().convert(value, TypeTag::Int)?;
        Ok(widened.as_int()?.clone())
    }
}

impl FromArg for Promoted<Complex64> {
    type Arg<'a> = Complex64;

    fn admits(value: &TypedValue) -> bool {
        value.domain().can_convert(value.tag(), TypeTag::Complex)
    }

    fn from_value(value: &TypedValue) -> Result<Self::Arg<'_>, Error> {
        value.domain().convert(value, TypeTag::Complex)?.as_complex()
    }
}

/// One call-site slot: a required [`FromArg`] parameter or an `Option` of
/// one. Optional slots must trail the required ones; the arity bounds
/// assume it.
pub(crate) trait FromSlot {
    type Slot<'a>;
    const REQUIRED: bool;

    fn admits_slot(value: Option<&TypedValue>) -> bool;
    fn from_slot(value: Option<&TypedValue>) -> Result<Self::Slot<'_>, Error>;
}

impl<T: FromArg> FromSlot for T {
    type Slot<'a> = T::Arg<'a>;
    const REQUIRED: bool = true;

    fn admits_slot(value: Option<&TypedValue>) -> bool {
        value.is_some_and(|v| T::admits(v))
    }

    fn from_slot(value: Option<&TypedValue>) -> Result<Self::Slot<'_>, Error> {
        match value {
            Some(v) => T::from_value(v),
            None => Err(Error::ExecutionError(
                "native binder: missing required argument".into(),
            )),
        }
    }
}

impl<T: FromArg> FromSlot for Option<T> {
    type Slot<'a> = Option<T::Arg<'a>>;
    const REQUIRED: bool = false;

    fn admits_slot(value: Option<&TypedValue>) -> bool {
        match value {
            Some(v) => T::admits(v),
            None => true,
        }
    }

    fn from_slot(value: Option<&TypedValue>) -> Result<Self::Slot<'_>, Error> {
        value.map(|v| T::from_value(v)).transpose()
    }
}

/// Iterator over the remaining arguments of a variadic variant.
pub struct RestArgs<'a> {
    inner: std::slice::Iter<'a, TypedValue>,
}

impl<'a> RestArgs<'a> {
    fn new(args: &'a [TypedValue]) -> Self {
        RestArgs { inner: args.iter() }
    }
}

impl<'a> Iterator for RestArgs<'a> {
    type Item = &'a TypedValue;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RestArgs<'_> {}
impl std::iter::FusedIterator for RestArgs<'_> {}

/// Lift a variant body's return value into a domain value.
pub(crate) trait IntoNativeResult {
    fn into_native(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error>;
}

impl<T> IntoNativeResult for T
where
    T: Into<Payload>,
{
    fn into_native(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        Ok(domain.create(self))
    }
}

impl<T> IntoNativeResult for Result<T, Error>
where
    T: Into<Payload>,
{
    fn into_native(self, domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        self.map(|v| domain.create(v))
    }
}

impl IntoNativeResult for TypedValue {
    fn into_native(self, _domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        Ok(self)
    }
}

impl IntoNativeResult for Result<TypedValue, Error> {
    fn into_native(self, _domain: &Rc<TypeDomain>) -> Result<TypedValue, Error> {
        self
    }
}

pub(crate) struct Variant {
    arity: Arity,
    matches: Box<dyn Fn(&[TypedValue]) -> bool>,
    invoke: Box<dyn Fn(&Rc<TypeDomain>, &[TypedValue]) -> Result<TypedValue, Error>>,
}

/// Conversion of a typed closure into a fixed-arity [`Variant`]. The
/// `Args` tuple names the slot types; call sites pin it with a turbofish.
pub(crate) trait IntoVariant<Args> {
    fn into_variant(self) -> Variant;
}

macro_rules! impl_into_variant {
    ($(($A:ident, $idx:tt)),+) => {
        impl<F, R, $($A),+> IntoVariant<($($A,)+)> for F
        where
            F: for<'a> Fn($(<$A as FromSlot>::Slot<'a>),+) -> R + 'static,
            R: IntoNativeResult,
            $($A: FromSlot + 'static,)+
        {
            fn into_variant(self) -> Variant {
                let required = 0 $(+ usize::from(<$A as FromSlot>::REQUIRED))+;
                let total = 0 $(+ { let _ = $idx; 1 })+;
                let arity = if required == total {
                    Arity::Exact(total)
                } else {
                    Arity::Range(required, total)
                };
                Variant {
                    arity,
                    matches: Box::new(|args: &[TypedValue]| {
                        $(<$A as FromSlot>::admits_slot(args.get($idx)) &&)+ true
                    }),
                    invoke: Box::new(move |domain, args| {
                        (self)($(<$A as FromSlot>::from_slot(args.get($idx))?),+)
                            .into_native(domain)
                    }),
                }
            }
        }
    };
}

impl_into_variant!((A0, 0));
impl_into_variant!((A0, 0), (A1, 1));
impl_into_variant!((A0, 0), (A1, 1), (A2, 2));
impl_into_variant!((A0, 0), (A1, 1), (A2, 2), (A3, 3));

/// Conversion of a typed closure with a trailing [`RestArgs`] parameter
/// into a variadic [`Variant`].
pub(crate) trait IntoVariadicVariant<Args> {
    fn into_variant(self) -> Variant;
}

impl<F, R> IntoVariadicVariant<(RestArgs<'static>,)> for F
where
    F: for<'a> Fn(RestArgs<'a>) -> R + 'static,
    R: IntoNativeResult,
{
    fn into_variant(self) -> Variant {
        Variant {
            arity: Arity::AtLeast(0),
            matches: Box::new(|_args| true),
            invoke: Box::new(move |domain, args| {
                (self)(RestArgs::new(args)).into_native(domain)
            }),
        }
    }
}

impl<F, R, A0> IntoVariadicVariant<(A0, RestArgs<'static>)> for F
where
    F: for<'a> Fn(A0::Arg<'a>, RestArgs<'a>) -> R + 'static,
    R: IntoNativeResult,
    A0: FromArg + 'static,
{
    fn into_variant(self) -> Variant {
        Variant {
            arity: Arity::AtLeast(1),
            matches: Box::new(|args| args.first().is_some_and(|v| A0::admits(v))),
            invoke: Box::new(move |domain, args| {
                let first = A0::from_value(&args[0])?;
                (self)(first, RestArgs::new(&args[1..])).into_native(domain)
            }),
        }
    }
}

/// A named native function assembled from typed variants.
pub struct NativeFn {
    name: String,
    variants: Vec<Variant>,
}

pub struct NativeBuilder {
    name: String,
    variants: Vec<Variant>,
}

impl NativeBuilder {
    pub fn new(name: &str) -> Self {
        NativeBuilder {
            name: name.to_owned(),
            variants: Vec::new(),
        }
    }

    /// Add a fixed-arity variant. Scanned in registration order.
    pub fn variant<Args, F>(mut self, f: F) -> Self
    where
        F: IntoVariant<Args>,
    {
        self.variants.push(f.into_variant());
        self
    }

    /// Add a variadic variant (trailing [`RestArgs`] parameter).
    pub fn variadic<Args, F>(mut self, f: F) -> Self
    where
        F: IntoVariadicVariant<Args>,
    {
        self.variants.push(IntoVariadicVariant::into_variant(f));
        self
    }

    pub fn build(self) -> NativeFn {
        assert!(!self.variants.is_empty(), "native '{}' has no variants", self.name);
        NativeFn {
            name: self.name,
            variants: self.variants,
        }
    }
}

impl NativeFn {
    /// The argument count assumed when a call site does not supply one.
    /// Only meaningful when every variant agrees on a single exact arity.
    fn natural_arity(&self) -> Option<usize> {
        let mut result = None;
        for v in &self.variants {
            match v.arity {
                Arity::Exact(n) => match result {
                    None => result = Some(n),
                    Some(m) if m == n => {}
                    Some(_) => return None,
                },
                _ => return None,
            }
        }
        result
    }
}

impl Callable for NativeFn {
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
        let argc = match argc.or_else(|| self.natural_arity()) {
            Some(n) => n,
            None => {
                return Err(Error::ExecutionError(format!(
                    "{}: argument count required",
                    self.name
                )));
            }
        };
        let args = frame.pop_n(argc)?;
        for variant in &self.variants {
            if variant.arity.accepts(args.len()) && (variant.matches)(&args) {
                let result = (variant.invoke)(frame.domain(), &args)?;
                frame.push(result);
                return validate_returns(retc, 1, &self.name);
            }
        }
        let types: Vec<&str> = args.iter().map(|a| a.tag().name()).collect();
        Err(Error::TypeError(format!(
            "{}: no variant matches argument types ({})",
            self.name,
            types.join(", ")
        )))
    }
}
