//! The `pair()` constructor: two connected endpoints over a
//! kernel-provided socket pair, with no filesystem presence.

use nix::sys::socket::{SockFlag, SockType, socketpair};

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::{FpcError, Result};

/// Creates two connected, `idle` endpoints over a `SOCK_SEQPACKET` socket
/// pair. Used for in-process testing and for privilege-separation
/// patterns that hand one endpoint to a child process.
pub fn pair() -> Result<(Endpoint, Endpoint)> {
    pair_with_config(EndpointConfig::new(), EndpointConfig::new())
}

/// Like [`pair`], but each side is constructed with its own
/// [`EndpointConfig`].
pub fn pair_with_config(config_a: EndpointConfig, config_b: EndpointConfig) -> Result<(Endpoint, Endpoint)> {
    let (fd_a, fd_b) =
        socketpair(nix::sys::socket::AddressFamily::Unix, SockType::SeqPacket, None, SockFlag::SOCK_CLOEXEC)
            .map_err(|err| FpcError::Io(std::io::Error::from(err)))?;

    let endpoint_a = Endpoint::new(fd_a, config_a).map_err(FpcError::Io)?;
    let endpoint_b = Endpoint::new(fd_b, config_b).map_err(FpcError::Io)?;
    Ok((endpoint_a, endpoint_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_constructs_two_idle_endpoints() {
        let (a, b) = pair().expect("pair should succeed");
        assert_eq!(a.state(), crate::endpoint::EndpointState::Idle);
        assert_eq!(b.state(), crate::endpoint::EndpointState::Idle);
    }
}
