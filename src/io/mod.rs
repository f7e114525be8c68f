//! Descriptor plumbing
//!
//! Packet and resolver descriptors are opened by a collaborator (or a test
//! harness) and handed to this process; this module parses the descriptor
//! strings from the command line and hosts the interruptible syscall
//! wrappers every blocking call goes through.

pub mod interrupt;

use crate::{Error, Result};
use std::os::unix::io::RawFd;

/// Parses an inherited-descriptor string of the form `"R,W;R,W;..."`,
/// one read/write pair per worker.
pub fn parse_fd_pairs(spec: &str) -> Result<Vec<(RawFd, RawFd)>> {
    spec.split(';')
        .map(|pair| {
            let (read, write) = pair
                .split_once(',')
                .ok_or_else(|| Error::Config(format!("'{}' is not a READ,WRITE fd pair", pair)))?;
            Ok((parse_fd(read)?, parse_fd(write)?))
        })
        .collect()
}

/// Parses a `"FD;FD;..."` list, one descriptor per worker (multi-queue
/// tunnel mode), or a single descriptor (shared single-queue mode).
pub fn parse_fd_list(spec: &str) -> Result<Vec<RawFd>> {
    spec.split(';').map(parse_fd).collect()
}

fn parse_fd(text: &str) -> Result<RawFd> {
    let fd: RawFd = text
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("'{}' is not a file descriptor number", text)))?;
    if fd < 0 {
        return Err(Error::Config(format!("file descriptor {} is negative", fd)));
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fd_pairs() {
        assert_eq!(parse_fd_pairs("3,4").unwrap(), vec![(3, 4)]);
        assert_eq!(parse_fd_pairs("3,4;5,6;7,8").unwrap(), vec![(3, 4), (5, 6), (7, 8)]);
        assert!(parse_fd_pairs("3").is_err());
        assert!(parse_fd_pairs("3,x").is_err());
        assert!(parse_fd_pairs("-1,4").is_err());
    }

    #[test]
    fn test_parse_fd_list() {
        assert_eq!(parse_fd_list("9").unwrap(), vec![9]);
        assert_eq!(parse_fd_list("9;10").unwrap(), vec![9, 10]);
        assert!(parse_fd_list("").is_err());
    }
}
