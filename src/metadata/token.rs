use std::fmt;

use strum::{Display, FromRepr};

/// Metadata tables a [`Token`] can address inside a module.
///
/// The discriminants are the table bytes stored in the high byte of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum TableId {
    /// External type reference (resolved by name and scope)
    TypeRef = 0x01,
    /// Type defined in the module
    TypeDef = 0x02,
    /// Field defined in the module
    Field = 0x04,
    /// Method defined in the module
    MethodDef = 0x06,
    /// Method or field reference with an explicit declaring type signature
    MemberRef = 0x0A,
    /// Type specification (arrays, by-refs, generic instantiations, ...)
    TypeSpec = 0x1B,
    /// Generic method instantiation
    MethodSpec = 0x2B,
    /// User string literal
    UserString = 0x70,
}

/// A metadata token representing a reference to a row of one of the tables of a module.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table, see [`TableId`]
/// - The low 24 bits (bits 0-23) indicate the one based row index within that table
///
/// A token is only meaningful together with the module it was issued by; the token caches key
/// on the pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Composes a token from its table and a one based row
    #[must_use]
    pub const fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table byte from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table this token addresses, if it is one the runtime knows
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero based row index, `None` for row 0
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.row() as usize).checked_sub(1)
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if this token addresses the given table
    #[must_use]
    pub fn is(&self, table: TableId) -> bool {
        self.table() == table as u8
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
        match self.table_id() {
            Some(table) => write!(f, "Token(0x{:08x}, {}: {})", self.0, table, self.row()),
            None => write!(
                f,
                "Token(0x{:08x}, table: 0x{:02x}, row: {})",
                self.0,
                self.table(),
                self.row()
            ),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
