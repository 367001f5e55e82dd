//! Mapping engine errors to POSIX error codes for the kernel.

use secfs_core::SessionError;

/// Conversion to a libc error code for a FUSE reply.
pub trait ToErrno {
    fn to_errno(&self) -> i32;
}

impl ToErrno for SessionError {
    fn to_errno(&self) -> i32 {
        match self {
            SessionError::NotFound { .. } => libc::ENOENT,
            SessionError::AlreadyExists { .. } => libc::EEXIST,
            SessionError::IsADirectory { .. } => libc::EISDIR,
            SessionError::NotADirectory { .. } => libc::ENOTDIR,
            SessionError::InvalidPath { .. } => libc::EINVAL,
            SessionError::PathTooLong { .. } => libc::ENAMETOOLONG,
            // a wrong key at request time means undecryptable data
            SessionError::WrongKey | SessionError::Crypto(_) => libc::EIO,
            SessionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            SessionError::Archive(_) => libc::EIO,
        }
    }
}
