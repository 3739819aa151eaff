//! Metadata tokens identifying methods across a batch.
//!
//! A token packs the metadata table in its high byte and the row index in the low 24 bits.
//! The engine only ever looks at method-like tables: `MethodDef` rows have bodies that can be
//! inspected, while `MemberRef` and `MethodSpec` rows point outside the module or at generic
//! instantiations and are treated as opaque.

use std::fmt;

/// Table id of the `MethodDef` metadata table.
pub const TABLE_METHOD_DEF: u8 = 0x06;
/// Table id of the `MemberRef` metadata table.
pub const TABLE_MEMBER_REF: u8 = 0x0A;
/// Table id of the `MethodSpec` metadata table.
pub const TABLE_METHOD_SPEC: u8 = 0x2B;

/// A metadata token; used as the identity of a method for the whole batch job.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::metadata::token::Token;
///
/// let token = Token::method_def(5);
/// assert_eq!(token.value(), 0x0600_0005);
/// assert!(token.is_method_def());
/// assert_eq!(token.row(), 5);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a `MethodDef` token for the given row.
    #[must_use]
    pub const fn method_def(row: u32) -> Self {
        Token(((TABLE_METHOD_DEF as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Creates a `MemberRef` token for the given row.
    #[must_use]
    pub const fn member_ref(row: u32) -> Self {
        Token(((TABLE_MEMBER_REF as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token points into the `MethodDef` table.
    #[must_use]
    pub const fn is_method_def(&self) -> bool {
        self.table() == TABLE_METHOD_DEF && self.row() != 0
    }

    /// Returns true if the token names any kind of callable member.
    #[must_use]
    pub const fn is_method_like(&self) -> bool {
        matches!(
            self.table(),
            TABLE_METHOD_DEF | TABLE_MEMBER_REF | TABLE_METHOD_SPEC
        )
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
