//! Capability traits for host-defined objects.
//!
//! A host object enters the language as `Payload::Object(Rc<dyn Composite>)`
//! and declares which capabilities it supports by overriding the `as_*`
//! accessors. Dispatch always asks "does this object have capability X"
//! rather than downcasting to a concrete type, so hosts can mix and match
//! capabilities freely on one object.

use std::rc::Rc;

use crate::exec::Callable;
use crate::value::TypedValue;

/// Named-member lookup, backing the `.` and `?.` operators and `with`.
pub trait Structured {
    /// Look up a member by name; `None` means the member does not exist.
    fn get_member(&self, name: &str) -> Option<TypedValue>;

    /// Member names, used by `with` to decide which symbols the object
    /// scope may resolve. Objects with dynamic members can return the
    /// currently known set.
    fn member_names(&self) -> Vec<String>;
}

/// Key-based lookup, backing `obj[key]` for non-ordinal keys.
pub trait Indexable {
    fn get_index(&self, key: &TypedValue) -> Option<TypedValue>;
}

/// Ordinal lookup, backing `obj[i]` for integer positions.
pub trait Enumerable {
    fn get_ordinal(&self, index: usize) -> Option<TypedValue>;
}

/// Element count, backing `len` and the countable truthiness fallback.
pub trait Countable {
    fn count(&self) -> usize;
}

/// Emptiness test, the last truthiness fallback before giving up.
pub trait Emptyable {
    fn is_empty(&self) -> bool;
}

/// Explicit truthiness override.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

/// A host object. Every accessor defaults to "capability absent"; an
/// implementation overrides the ones it supports.
pub trait Composite {
    /// Host-side type name used in error messages and default rendering.
    fn composite_type(&self) -> &str;

    /// Display form. The printer delegates object rendering here.
    fn render(&self) -> String {
        format!("<object:{}>", self.composite_type())
    }

    fn as_structured(&self) -> Option<&dyn Structured> {
        None
    }

    fn as_indexable(&self) -> Option<&dyn Indexable> {
        None
    }

    fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        None
    }

    fn as_countable(&self) -> Option<&dyn Countable> {
        None
    }

    fn as_emptyable(&self) -> Option<&dyn Emptyable> {
        None
    }

    fn as_truthy(&self) -> Option<&dyn Truthy> {
        None
    }

    /// Invocation capability. Implementations typically hold an inner
    /// `Rc<dyn Callable>` and hand out a clone of it.
    fn as_callable(&self) -> Option<Rc<dyn Callable>> {
        None
    }
}
