//! Runtime values.
//!
//! A [`TypedValue`] pairs a handle to its owning [`TypeDomain`] with a
//! [`Payload`], a closed sum over every runtime type the engine knows. The
//! payload discriminant doubles as the value's type tag; there is no open
//! type hierarchy to extend at runtime - host types plug in through the
//! capability traits in [`crate::composite`] behind the `Object` payload.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;

use crate::Error;
use crate::composite::Composite;
use crate::domain::TypeDomain;
use crate::exec::{Callable, ExecutableList};
use crate::printer::{self, PrintConfig};

/// Identifies a runtime type within a domain.
///
/// Tags are what the coercion tables, operator dispatch tables, and native
/// parameter specs are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Null,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Sym,
    Pair,
    Code,
    Callable,
    Object,
}

impl TypeTag {
    /// User-visible type name, as returned by the `type` builtin.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Null => "<null>",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Complex => "complex",
            TypeTag::Str => "str",
            TypeTag::Sym => "symbol",
            TypeTag::Pair => "pair",
            TypeTag::Code => "code",
            TypeTag::Callable => "callable",
            TypeTag::Object => "object",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A two-field immutable cell. Proper lists are `Pair` chains whose final
/// tail is the domain's null value.
#[derive(Clone, PartialEq)]
pub struct Pair {
    pub head: TypedValue,
    pub tail: TypedValue,
}

impl Pair {
    pub fn new(head: TypedValue, tail: TypedValue) -> Self {
        Pair { head, tail }
    }

    /// Walk the chain starting at this pair, yielding one [`ListElem`] per
    /// cell head and, for improper lists, a final `Tail` element carrying
    /// the non-null terminator.
    pub fn walk(self: &Rc<Self>) -> ListWalk {
        ListWalk {
            next: Some(self.clone()),
            pending_tail: None,
        }
    }

    /// Collect a proper list into a vector; improper lists are a type error
    /// naming the context.
    pub fn collect_proper(self: &Rc<Self>, what: &str) -> Result<Vec<TypedValue>, Error> {
        let mut items = Vec::new();
        for elem in self.walk() {
            match elem {
                ListElem::Item(v) => items.push(v),
                ListElem::Tail(v) => {
                    return Err(Error::TypeError(format!(
                        "{what}: expected a proper list, found terminator {}",
                        v.repr()
                    )));
                }
            }
        }
        Ok(items)
    }
}

/// One step of a pair-chain traversal.
pub enum ListElem {
    /// The head of one cell.
    Item(TypedValue),
    /// A non-null final tail (the chain is an improper list).
    Tail(TypedValue),
}

/// Iterator over a pair chain. Yields every cell head in order; if the
/// chain does not end in null, the last element is [`ListElem::Tail`].
pub struct ListWalk {
    next: Option<Rc<Pair>>,
    pending_tail: Option<TypedValue>,
}

impl Iterator for ListWalk {
    type Item = ListElem;

    fn next(&mut self) -> Option<ListElem> {
        if let Some(tail) = self.pending_tail.take() {
            return Some(ListElem::Tail(tail));
        }
        let cell = self.next.take()?;
        match &cell.tail.payload {
            Payload::Pair(p) => self.next = Some(p.clone()),
            Payload::Unit => {}
            _ => self.pending_tail = Some(cell.tail.clone()),
        }
        Some(ListElem::Item(cell.head.clone()))
    }
}

/// Compiled instructions packaged as a value. Executing a code value runs
/// its instruction list against a caller-supplied frame; unlike a closure
/// it captures no scope of its own.
pub struct Code {
    body: ExecutableList,
}

impl Code {
    pub fn new(body: ExecutableList) -> Self {
        Code { body }
    }

    pub fn body(&self) -> &ExecutableList {
        &self.body
    }
}

/// The closed set of runtime payloads.
#[derive(Clone)]
pub enum Payload {
    Unit,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex(Complex64),
    Str(String),
    Sym(Rc<str>),
    Pair(Rc<Pair>),
    Code(Rc<Code>),
    Callable(Rc<dyn Callable>),
    Object(Rc<dyn Composite>),
}

impl Payload {
    pub fn tag(&self) -> TypeTag {
        match self {
            Payload::Unit => TypeTag::Null,
            Payload::Bool(_) => TypeTag::Bool,
            Payload::Int(_) => TypeTag::Int,
            Payload::Float(_) => TypeTag::Float,
            Payload::Complex(_) => TypeTag::Complex,
            Payload::Str(_) => TypeTag::Str,
            Payload::Sym(_) => TypeTag::Sym,
            Payload::Pair(_) => TypeTag::Pair,
            Payload::Code(_) => TypeTag::Code,
            Payload::Callable(_) => TypeTag::Callable,
            Payload::Object(_) => TypeTag::Object,
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Unit, Payload::Unit) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Complex(a), Payload::Complex(b)) => a == b,
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::Sym(a), Payload::Sym(b)) => a == b,
            (Payload::Pair(a), Payload::Pair(b)) => a == b,
            (Payload::Code(a), Payload::Code(b)) => Rc::ptr_eq(a, b),
            (Payload::Callable(a), Payload::Callable(b)) => Rc::ptr_eq(a, b),
            (Payload::Object(a), Payload::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! impl_payload_from_integer {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Payload {
                fn from(n: $t) -> Self {
                    Payload::Int(BigInt::from(n))
                }
            }
        )+
    };
}

impl_payload_from_integer!(i32, i64, u32, u64, usize);

impl From<BigInt> for Payload {
    fn from(n: BigInt) -> Self {
        Payload::Int(n)
    }
}

impl From<f64> for Payload {
    fn from(x: f64) -> Self {
        Payload::Float(x)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<Complex64> for Payload {
    fn from(z: Complex64) -> Self {
        Payload::Complex(z)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Str(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Str(s)
    }
}

/// A runtime value: a payload plus a handle to the domain that created it.
///
/// Values from different domains must never meet in one operator
/// application; that is a host programming error, checked in debug builds.
#[derive(Clone)]
pub struct TypedValue {
    domain: Rc<TypeDomain>,
    payload: Payload,
}

impl TypedValue {
    pub(crate) fn new(domain: Rc<TypeDomain>, payload: Payload) -> Self {
        TypedValue { domain, payload }
    }

    pub fn domain(&self) -> &Rc<TypeDomain> {
        &self.domain
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn tag(&self) -> TypeTag {
        self.payload.tag()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Unit)
    }

    /// Truthiness under the owning domain's policy.
    pub fn is_truthy(&self) -> Result<bool, Error> {
        self.domain.is_truthy(self)
    }

    fn unwrap_err(&self, wanted: TypeTag) -> Error {
        Error::TypeError(format!(
            "expected {wanted}, got {}: {}",
            self.tag(),
            self.repr()
        ))
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match &self.payload {
            Payload::Bool(b) => Ok(*b),
            _ => Err(self.unwrap_err(TypeTag::Bool)),
        }
    }

    pub fn as_int(&self) -> Result<&BigInt, Error> {
        match &self.payload {
            Payload::Int(n) => Ok(n),
            _ => Err(self.unwrap_err(TypeTag::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f64, Error> {
        match &self.payload {
            Payload::Float(x) => Ok(*x),
            _ => Err(self.unwrap_err(TypeTag::Float)),
        }
    }

    pub fn as_complex(&self) -> Result<Complex64, Error> {
        match &self.payload {
            Payload::Complex(z) => Ok(*z),
            _ => Err(self.unwrap_err(TypeTag::Complex)),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match &self.payload {
            Payload::Str(s) => Ok(s),
            _ => Err(self.unwrap_err(TypeTag::Str)),
        }
    }

    pub fn as_sym(&self) -> Result<&str, Error> {
        match &self.payload {
            Payload::Sym(s) => Ok(s),
            _ => Err(self.unwrap_err(TypeTag::Sym)),
        }
    }

    pub fn as_pair(&self) -> Result<&Rc<Pair>, Error> {
        match &self.payload {
            Payload::Pair(p) => Ok(p),
            _ => Err(self.unwrap_err(TypeTag::Pair)),
        }
    }

    pub fn as_code(&self) -> Result<&Rc<Code>, Error> {
        match &self.payload {
            Payload::Code(c) => Ok(c),
            _ => Err(self.unwrap_err(TypeTag::Code)),
        }
    }

    pub fn as_object(&self) -> Result<&Rc<dyn Composite>, Error> {
        match &self.payload {
            Payload::Object(o) => Ok(o),
            _ => Err(self.unwrap_err(TypeTag::Object)),
        }
    }

    /// The callable behind this value: either a callable payload or an
    /// object exposing the `Callable` capability.
    pub fn as_callable(&self) -> Result<Rc<dyn Callable>, Error> {
        match &self.payload {
            Payload::Callable(c) => Ok(c.clone()),
            Payload::Object(o) => o
                .as_callable()
                .ok_or_else(|| Error::TypeError(format!("{} is not callable", self.repr()))),
            _ => Err(Error::TypeError(format!(
                "{} of type {} is not callable",
                self.repr(),
                self.tag()
            ))),
        }
    }

    /// Display form under the default print configuration.
    pub fn str_form(&self) -> String {
        printer::render_str(self, &PrintConfig::default())
    }

    /// Parseable form under the default print configuration.
    pub fn repr(&self) -> String {
        printer::render_repr(self, &PrintConfig::default())
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.domain, &other.domain) && self.payload == other.payload
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.str_form())
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.repr())
    }
}
