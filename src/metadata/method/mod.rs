//! Method definitions, call references and callee resolution.
//!
//! A [`MethodDef`] is the unit of work of the deobfuscation engine. Its body sits behind a
//! [`std::sync::RwLock`] so that methods of a module can be processed in parallel while other
//! workers inspect them as callees. Callers reference other methods through [`MethodRef`]
//! operands, which carry just enough of the signature to derive stack effects; the
//! [`MethodResolver`] trait maps such a reference back to a definition when its body is
//! available.

mod body;
mod exceptions;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};

use std::sync::{Arc, RwLock};

use crate::metadata::token::Token;

/// Full name of the boolean type, as compared against [`MethodDef::return_type`].
pub const BOOLEAN_TYPE: &str = "System.Boolean";
/// Full name of the void type.
pub const VOID_TYPE: &str = "System.Void";

/// A reference to a method from a call-like instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Token of the referenced method
    pub token: Token,
    /// Number of declared parameters, excluding `this`
    pub params: u16,
    /// Whether the method takes an implicit `this` argument
    pub has_this: bool,
    /// Whether the method returns a value
    pub returns_value: bool,
}

/// A reference-counted pointer to a `MethodDef`
pub type MethodDefRc = Arc<MethodDef>;

/// A method definition with its (optional) body.
#[derive(Debug)]
pub struct MethodDef {
    /// The metadata token of this method
    pub token: Token,
    /// Simple name of the method
    pub name: String,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Full name of the return type
    pub return_type: String,
    /// Number of declared parameters, excluding `this`
    pub params: u16,
    /// Whether the method is an instance method
    pub has_this: bool,
    /// The method body, `None` for abstract, extern and runtime-implemented methods
    pub body: RwLock<Option<MethodBody>>,
}

impl MethodDef {
    /// Create a static method returning `void` without parameters or body.
    #[must_use]
    pub fn new(token: Token, declaring_type: &str, name: &str) -> Self {
        MethodDef {
            token,
            name: name.to_string(),
            declaring_type: declaring_type.to_string(),
            return_type: VOID_TYPE.to_string(),
            params: 0,
            has_this: false,
            body: RwLock::new(None),
        }
    }

    /// Set the signature parts the engine relies on.
    #[must_use]
    pub fn with_signature(mut self, return_type: &str, params: u16, has_this: bool) -> Self {
        self.return_type = return_type.to_string();
        self.params = params;
        self.has_this = has_this;
        self
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = RwLock::new(Some(body));
        self
    }

    /// Fully qualified name, e.g. `System.Boolean Ns.Type::IsEnabled`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}::{}", self.return_type, self.declaring_type, self.name)
    }

    /// True if `ret` pops a value in this method.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.return_type != VOID_TYPE
    }

    /// True if the declared return type is `System.Boolean`.
    #[must_use]
    pub fn returns_boolean(&self) -> bool {
        self.return_type == BOOLEAN_TYPE
    }

    /// A [`MethodRef`] describing a call to this method.
    #[must_use]
    pub fn method_ref(&self) -> MethodRef {
        MethodRef {
            token: self.token,
            params: self.params,
            has_this: self.has_this,
            returns_value: self.returns_value(),
        }
    }
}

/// Resolution of call operands to method definitions.
///
/// Implementations return `None` for methods whose definition is not available, such as
/// members of other assemblies; the engine treats those callees as opaque.
pub trait MethodResolver: Sync {
    /// Resolve a method token to its definition.
    fn resolve_method(&self, token: Token) -> Option<MethodDefRc>;
}
