//! The type domain: runtime type registry, conversion graph, symmetric
//! coercion rules, and truthiness policy.
//!
//! A domain is assembled once by [`DomainBuilder`] during engine
//! construction and is immutable afterwards. Every [`TypedValue`] holds an
//! `Rc` handle to the domain that created it, and binary-operator dispatch
//! consults the domain to decide which operand must widen before a
//! single-type operation applies.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;

use crate::Error;
use crate::composite::Composite;
use crate::exec::{Callable, ExecutableList};
use crate::value::{Code, Pair, Payload, TypeTag, TypedValue};

/// Which operand of a binary operation must be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// The right operand converts to the left operand's type.
    ToLeft,
    /// The left operand converts to the right operand's type.
    ToRight,
}

impl Coercion {
    fn flip(self) -> Self {
        match self {
            Coercion::ToLeft => Coercion::ToRight,
            Coercion::ToRight => Coercion::ToLeft,
        }
    }
}

/// Converts a payload of the source type into the target type.
/// Registered for one direction only; the tower never narrows.
pub type ConvertFn = fn(&Payload) -> Payload;

/// Decides truthiness for payloads of one type.
pub type TruthFn = fn(&TypedValue) -> Result<bool, Error>;

/// Immutable registry of types, conversions, coercion rules, and truth
/// policy. Constructed via [`DomainBuilder`].
pub struct TypeDomain {
    types: BTreeSet<TypeTag>,
    converters: HashMap<(TypeTag, TypeTag), ConvertFn>,
    coercions: HashMap<(TypeTag, TypeTag), Coercion>,
    truth: HashMap<TypeTag, TruthFn>,
    always_true: BTreeSet<TypeTag>,
    always_false: BTreeSet<TypeTag>,
}

impl TypeDomain {
    /// All type tags registered with this domain, in display order.
    pub fn registered_types(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.types.iter().copied()
    }

    /// The coercion rule for a pair of operand types. Identical types
    /// trivially coerce to the left side; otherwise only explicitly
    /// registered pairs coerce at all.
    pub fn get_coercion_rule(&self, left: TypeTag, right: TypeTag) -> Option<Coercion> {
        if left == right {
            return Some(Coercion::ToLeft);
        }
        self.coercions.get(&(left, right)).copied()
    }

    /// Whether a converter exists from `from` to `to` (or the types match).
    pub fn can_convert(&self, from: TypeTag, to: TypeTag) -> bool {
        from == to || self.converters.contains_key(&(from, to))
    }

    /// Convert a value to the target type through the converter graph.
    pub fn convert(self: &Rc<Self>, value: &TypedValue, target: TypeTag) -> Result<TypedValue, Error> {
        if value.tag() == target {
            return Ok(value.clone());
        }
        match self.converters.get(&(value.tag(), target)) {
            Some(conv) => Ok(self.create(conv(value.payload()))),
            None => Err(Error::TypeError(format!(
                "no conversion from {} to {} for {}",
                value.tag(),
                target,
                value.repr()
            ))),
        }
    }

    /// Truthiness under this domain's policy: override sets first, then the
    /// per-type evaluator. Types with no policy cannot be used where a
    /// truth value is required.
    pub fn is_truthy(&self, value: &TypedValue) -> Result<bool, Error> {
        let tag = value.tag();
        if self.always_true.contains(&tag) {
            return Ok(true);
        }
        if self.always_false.contains(&tag) {
            return Ok(false);
        }
        match self.truth.get(&tag) {
            Some(eval) => eval(value),
            None => Err(Error::TypeError(format!(
                "can't determine truth value of {}",
                value.repr()
            ))),
        }
    }

    /// Wrap a payload into a value owned by this domain.
    pub fn create(self: &Rc<Self>, payload: impl Into<Payload>) -> TypedValue {
        TypedValue::new(self.clone(), payload.into())
    }

    pub fn null(self: &Rc<Self>) -> TypedValue {
        self.create(Payload::Unit)
    }

    pub fn boolean(self: &Rc<Self>, b: bool) -> TypedValue {
        self.create(Payload::Bool(b))
    }

    pub fn int(self: &Rc<Self>, n: impl Into<BigInt>) -> TypedValue {
        self.create(Payload::Int(n.into()))
    }

    pub fn float(self: &Rc<Self>, x: f64) -> TypedValue {
        self.create(Payload::Float(x))
    }

    pub fn complex(self: &Rc<Self>, z: Complex64) -> TypedValue {
        self.create(Payload::Complex(z))
    }

    pub fn string(self: &Rc<Self>, s: impl Into<String>) -> TypedValue {
        self.create(Payload::Str(s.into()))
    }

    pub fn sym(self: &Rc<Self>, name: &str) -> TypedValue {
        self.create(Payload::Sym(Rc::from(name)))
    }

    pub fn pair(self: &Rc<Self>, head: TypedValue, tail: TypedValue) -> TypedValue {
        self.create(Payload::Pair(Rc::new(Pair::new(head, tail))))
    }

    /// Build a proper list (a pair chain terminated by null).
    pub fn list(self: &Rc<Self>, items: impl IntoIterator<Item = TypedValue>) -> TypedValue {
        let items: Vec<TypedValue> = items.into_iter().collect();
        let mut out = self.null();
        for item in items.into_iter().rev() {
            out = self.pair(item, out);
        }
        out
    }

    pub fn code(self: &Rc<Self>, body: ExecutableList) -> TypedValue {
        self.create(Payload::Code(Rc::new(Code::new(body))))
    }

    pub fn callable(self: &Rc<Self>, c: Rc<dyn Callable>) -> TypedValue {
        self.create(Payload::Callable(c))
    }

    pub fn object(self: &Rc<Self>, o: Rc<dyn Composite>) -> TypedValue {
        self.create(Payload::Object(o))
    }
}

/// One-shot builder for [`TypeDomain`]. Registration mistakes (duplicate
/// rules, unregistered types, conflicting truth policy) are host
/// programming errors and fail fast with a panic at construction time.
#[derive(Default)]
pub struct DomainBuilder {
    types: BTreeSet<TypeTag>,
    converters: HashMap<(TypeTag, TypeTag), ConvertFn>,
    coercions: HashMap<(TypeTag, TypeTag), Coercion>,
    truth: HashMap<TypeTag, TruthFn>,
    always_true: BTreeSet<TypeTag>,
    always_false: BTreeSet<TypeTag>,
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, tag: TypeTag) -> &mut Self {
        let fresh = self.types.insert(tag);
        assert!(fresh, "type {tag} registered twice");
        self
    }

    pub fn register_converter(&mut self, from: TypeTag, to: TypeTag, conv: ConvertFn) -> &mut Self {
        assert!(from != to, "self-conversion for {from}");
        let prev = self.converters.insert((from, to), conv);
        assert!(prev.is_none(), "duplicate converter {from} -> {to}");
        self
    }

    /// Register a coercion rule for the unordered pair `{a, b}`. The rule
    /// is stored for both operand orders with the side flipped, so lookup
    /// never depends on which operand came first.
    pub fn register_symmetric_coercion(
        &mut self,
        a: TypeTag,
        b: TypeTag,
        rule: Coercion,
    ) -> &mut Self {
        assert!(a != b, "coercion rule for identical types {a}");
        let prev = self.coercions.insert((a, b), rule);
        assert!(prev.is_none(), "duplicate coercion rule {a},{b}");
        self.coercions.insert((b, a), rule.flip());
        self
    }

    pub fn register_truth(&mut self, tag: TypeTag, eval: TruthFn) -> &mut Self {
        let prev = self.truth.insert(tag, eval);
        assert!(prev.is_none(), "duplicate truth evaluator for {tag}");
        self
    }

    pub fn register_always_true(&mut self, tag: TypeTag) -> &mut Self {
        self.always_true.insert(tag);
        self
    }

    pub fn register_always_false(&mut self, tag: TypeTag) -> &mut Self {
        self.always_false.insert(tag);
        self
    }

    /// Validate the registrations against each other and produce the
    /// immutable domain.
    pub fn build(self) -> TypeDomain {
        for (from, to) in self.converters.keys() {
            assert!(
                self.types.contains(from) && self.types.contains(to),
                "converter references unregistered type {from} -> {to}"
            );
        }
        for (a, b) in self.coercions.keys() {
            assert!(
                self.types.contains(a) && self.types.contains(b),
                "coercion rule references unregistered type {a},{b}"
            );
        }
        for tag in self.truth.keys() {
            assert!(
                !self.always_true.contains(tag) && !self.always_false.contains(tag),
                "conflicting truth policy for {tag}"
            );
        }
        TypeDomain {
            types: self.types,
            converters: self.converters,
            coercions: self.coercions,
            truth: self.truth,
            always_true: self.always_true,
            always_false: self.always_false,
        }
    }
}
