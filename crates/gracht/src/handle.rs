use std::fmt;

/// Integer handle identifying one connected client across the client table,
/// the link layer and the reactor's `mio::Token` space.
///
/// The link references the client table only through this handle, never a
/// pointer, which is what lets `ClientTable` and `Link` live on opposite
/// sides of the module boundary without a cyclic `Rc`/`Arc` reference
/// between them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl Handle {
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_token(self) -> mio::Token {
        mio::Token(self.0 as usize)
    }

    pub const fn from_token(token: mio::Token) -> Self {
        Self(token.0 as u32)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Wire-level message id. `0` is reserved for server-originated events
/// (broadcasts, unsolicited pushes); a response to a client request echoes
/// the nonzero id the client sent.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MessageId(pub u32);

impl MessageId {
    pub const EVENT: Self = Self(0);
}
