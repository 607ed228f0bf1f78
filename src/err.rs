use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Poll error: {0}")]
    Poll(#[from] nix::Error),

    #[error("Malformed packet: {0} bytes is shorter than the 12 byte header")]
    Malformed(usize),

    #[error("Handshake with {0} did not complete")]
    Handshake(SocketAddr),

    #[error("File needs more than {} data packets", u16::MAX)]
    FileTooLarge,

    #[error("{0:?} has no file name component")]
    FileName(PathBuf),

    #[error("Transfer aborted before the final acknowledgment")]
    Aborted,
}
