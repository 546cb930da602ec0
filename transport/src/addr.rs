use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs as _},
    str::FromStr,
};

/// The transport protocol used to reach an upstream resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Udp,
    Tcp,
}

impl Network {
    pub fn scheme(&self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Tcp => "tcp",
        }
    }
}

/// An upstream resolver address.
///
/// Parses from `udp://host:port`, `dns://host:port` (an alias for udp),
/// `tcp://host:port` or a bare `host:port` which defaults to udp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamAddr {
    pub network: Network,
    pub addr: SocketAddr,
}

impl FromStr for UpstreamAddr {
    type Err = InvalidUpstream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (network, rest) = match s.split_once("://") {
            Some(("udp" | "dns", rest)) => (Network::Udp, rest),
            Some(("tcp", rest)) => (Network::Tcp, rest),
            Some((scheme, _)) => return Err(InvalidUpstream::UnknownScheme(scheme.to_owned())),
            None => (Network::Udp, s),
        };

        Ok(Self {
            network,
            addr: resolve(rest)?,
        })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network.scheme(), self.addr)
    }
}

/// Parses a semicolon-separated list of upstream addresses.
pub fn parse_upstreams(spec: &str) -> Result<Vec<UpstreamAddr>, InvalidUpstream> {
    let upstreams = spec
        .split(';')
        .filter(|segment| !segment.is_empty())
        .map(UpstreamAddr::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if upstreams.is_empty() {
        return Err(InvalidUpstream::Empty);
    }

    Ok(upstreams)
}

fn resolve(host_port: &str) -> Result<SocketAddr, InvalidUpstream> {
    // Literal addresses first so the common case skips the blocking lookup.
    if let Ok(addr) = host_port.parse() {
        return Ok(addr);
    }

    host_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| InvalidUpstream::Unresolvable(host_port.to_owned()))
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidUpstream {
    #[error("unknown upstream scheme `{0}`")]
    UnknownScheme(String),
    #[error("cannot resolve upstream address `{0}`")]
    Unresolvable(String),
    #[error("upstream list is empty")]
    Empty,
}
