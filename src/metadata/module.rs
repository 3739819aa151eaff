//! In-memory collection of the methods of one module.

use crossbeam_skiplist::SkipMap;

use crate::metadata::{
    method::{MethodDef, MethodDefRc, MethodResolver},
    token::Token,
};

/// A map that holds the mapping of [`Token`] to parsed [`MethodDef`]
pub type MethodMap = SkipMap<Token, MethodDefRc>;

/// The methods of a module, keyed by token.
///
/// `Module` is the resolver the batch driver uses: every call operand whose token names a
/// method of the module resolves to its definition.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::metadata::{method::{MethodDef, MethodResolver}, module::Module, token::Token};
///
/// let module = Module::new("Sample.dll");
/// module.insert(MethodDef::new(Token::method_def(1), "Ns.Type", "Main"));
/// assert!(module.resolve_method(Token::method_def(1)).is_some());
/// assert!(module.resolve_method(Token::method_def(2)).is_none());
/// ```
#[derive(Debug)]
pub struct Module {
    /// Module name, used in log output
    pub name: String,
    methods: MethodMap,
}

impl Module {
    /// Create an empty module.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            methods: SkipMap::new(),
        }
    }

    /// Add a method, replacing any method with the same token. Returns the shared handle.
    pub fn insert(&self, method: MethodDef) -> MethodDefRc {
        let method = MethodDefRc::new(method);
        self.methods.insert(method.token, method.clone());
        method
    }

    /// All methods in token order
    #[must_use]
    pub fn methods(&self) -> &MethodMap {
        &self.methods
    }

    /// Get a method by token
    #[must_use]
    pub fn get(&self, token: Token) -> Option<MethodDefRc> {
        self.methods.get(&token).map(|entry| entry.value().clone())
    }

    /// Number of methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if the module has no methods
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl MethodResolver for Module {
    fn resolve_method(&self, token: Token) -> Option<MethodDefRc> {
        if !token.is_method_def() {
            return None;
        }
        self.get(token)
    }
}
