// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::{collections::TryReserveError, io};

use thiserror::Error;

/// Result type for diff and patch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error indicating that creating or applying a patch failed.
///
/// Every failure is terminal for the operation that produced it. No partial output is ever
/// returned alongside an error.
///
/// # Examples
///
/// ```
/// use imgdelta::ErrorKind;
///
/// // Garbage data
/// let patch = [0; 40];
/// let err = imgdelta::patch(b"old", &patch).unwrap_err();
///
/// assert_eq!(err.kind(), ErrorKind::Format);
/// ```
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An output buffer could not be allocated
    #[error("failed to allocate {requested} bytes")]
    Allocation {
        /// The number of bytes requested
        requested: u64,
        /// The underlying allocation failure, if the allocator was consulted
        #[source]
        source: Option<TryReserveError>,
    },
    /// The patch header or directory is malformed
    #[error("malformed patch: {0}")]
    Format(String),
    /// The compression codec rejected its input
    #[error("{codec} codec error: {source}")]
    Codec {
        /// The name of the codec
        codec: &'static str,
        /// The error reported by the codec
        #[source]
        source: io::Error,
    },
    /// Replaying the patch does not land exactly on the declared lengths
    #[error("corrupt patch: {0}")]
    CorruptPatch(String),
    /// The source given does not match the source the patch was created against
    #[error("source does not match patch: {0}")]
    SourceMismatch(String),
    /// An I/O error occurred while writing output
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The coarse category of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// See [`Error::Allocation`]
    Allocation,
    /// See [`Error::Format`]
    Format,
    /// See [`Error::Codec`]
    Codec,
    /// See [`Error::CorruptPatch`]
    CorruptPatch,
    /// See [`Error::SourceMismatch`]
    SourceMismatch,
    /// See [`Error::Io`]
    Io,
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Allocation { .. } => ErrorKind::Allocation,
            Error::Format(_) => ErrorKind::Format,
            Error::Codec { .. } => ErrorKind::Codec,
            Error::CorruptPatch(_) => ErrorKind::CorruptPatch,
            Error::SourceMismatch(_) => ErrorKind::SourceMismatch,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptPatch(message.into())
    }
}

/// Allocates an empty buffer able to hold `len` bytes without reallocating.
///
/// `len` usually comes from an untrusted patch header, so running out of memory is reported
/// instead of aborting.
pub(crate) fn try_with_capacity(len: u64) -> Result<Vec<u8>> {
    let capacity = usize::try_from(len).map_err(|_| Error::Allocation {
        requested: len,
        source: None,
    })?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity)
        .map_err(|e| Error::Allocation {
            requested: len,
            source: Some(e),
        })?;

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn format_message() {
        let err = Error::format("bad magic");

        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.to_string(), "malformed patch: bad magic");
    }

    #[test]
    fn huge_allocation_is_reported() {
        let err = try_with_capacity(u64::MAX).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Allocation);
    }

    #[test]
    fn small_allocation_succeeds() {
        let buf = try_with_capacity(64).unwrap();

        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
    }
}
