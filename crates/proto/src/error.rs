//! Error taxonomy and manual-serialization traits shared by the wire codec.
//!
//! Mirrors the split between transient (`Wait`) and terminal (`Fatal`)
//! failures: a `Wait` means "try again once more data or capacity is
//! available", everything else means the session or payload is dead.

use std::io;

pub type ProtoResult<T> = Result<T, ProtoError>;

#[derive(Debug, Eq, PartialEq)]
pub enum ProtoError {
    /// Not enough data/capacity yet; not a failure, just not ready.
    Wait,
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    PayloadTooLarge,
    EmptyPayload,
    MalformedFrame,
    MissingTag,
    Crypto,
    Io(io::ErrorKind),
}

impl From<io::Error> for ProtoError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => ProtoError::Wait,
            kind => ProtoError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

impl From<crate::crypto::CryptoError> for ProtoError {
    #[inline]
    fn from(_: crate::crypto::CryptoError) -> Self {
        ProtoError::Fatal(ErrorKind::Crypto)
    }
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::Wait => f.write_str("wait"),
            ProtoError::Fatal(kind) => write!(f, "fatal: {:?}", kind),
        }
    }
}

impl std::error::Error for ProtoError {}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for ProtoResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(ProtoError::Wait) => false,
            _ => true,
        }
    }
}

/// Augmented `io::Write` that is aware of the amount of remaining free
/// capacity in the destination, so a `Serialize` impl can bail out with
/// `ProtoError::Wait` before writing a partial record.
pub trait SizedWrite: io::Write {
    fn free_capacity(&self) -> usize;
}

/// Augmented `io::Read` that is aware of the amount of remaining data in the
/// source, so a `Deserialize` impl knows when to stop.
pub trait SizedRead: io::Read {
    fn remaining_data(&self) -> usize;
}

impl SizedWrite for io::Cursor<&mut [u8]> {
    #[inline]
    fn free_capacity(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

impl SizedWrite for io::Cursor<&mut Vec<u8>> {
    #[inline]
    fn free_capacity(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

impl SizedRead for io::Cursor<&[u8]> {
    #[inline]
    fn remaining_data(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

/// Trait for manually serialized wire objects. Implementors must check
/// `free_capacity` upfront and write nothing at all if the whole value
/// wouldn't fit, returning `ProtoError::Wait` in that case.
pub trait Serialize {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> ProtoResult<()>;
}

/// Trait for manually deserialized wire objects.
pub trait Deserialize: Sized {
    fn deserialize<R: SizedRead>(stream: &mut R) -> ProtoResult<Self>;
}
