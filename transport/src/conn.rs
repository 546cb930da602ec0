use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use dns_types::{Query, Response};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpStream, UdpSocket},
    time::Instant,
};

use crate::addr::{Network, UpstreamAddr};

/// An open connection to one upstream resolver.
///
/// Exactly one holder owns the connection at any time, either the pool or the
/// exchange borrowing it. Dropping the connection closes it.
pub struct PersistentConn {
    stream: Stream,
    last_used: Instant,
}

enum Stream {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl PersistentConn {
    pub(crate) async fn connect(upstream: &UpstreamAddr, timeout: Duration) -> io::Result<Self> {
        let stream = match upstream.network {
            Network::Udp => {
                let bind_addr = match upstream.addr {
                    SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
                    SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
                };

                let socket = UdpSocket::bind(bind_addr).await?;
                socket.connect(upstream.addr).await?;

                Stream::Udp(socket)
            }
            Network::Tcp => {
                let stream = tokio::time::timeout(timeout, TcpStream::connect(upstream.addr))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
                stream.set_nodelay(true)?;

                Stream::Tcp(stream)
            }
        };

        Ok(Self {
            stream,
            last_used: Instant::now(),
        })
    }

    /// Sends one query and reads the matching response, bounded by `timeout`.
    pub async fn exchange(&mut self, query: &Query, timeout: Duration) -> io::Result<Response> {
        tokio::time::timeout(timeout, self.exchange_inner(query))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "exchange timed out"))?
    }

    async fn exchange_inner(&mut self, query: &Query) -> io::Result<Response> {
        match &mut self.stream {
            Stream::Udp(socket) => {
                socket.send(query.as_bytes()).await?;

                loop {
                    // On the public Internet, any MTU > 1500 is very unlikely so 2000 is a safe bet.
                    let mut buffer = vec![0u8; 2000];

                    let len = socket.recv(&mut buffer).await?;
                    buffer.truncate(len);

                    let response = Response::parse(&buffer)
                        .map_err(|e| io::Error::other(format!("bad DNS response: {e}")))?;

                    if response.id() == query.id() {
                        return Ok(response);
                    }

                    // A late answer to an earlier query on this socket; keep reading.
                }
            }
            Stream::Tcp(stream) => {
                let message_length = (query.as_bytes().len() as u16).to_be_bytes();

                stream.write_all(&message_length).await?;
                stream.write_all(query.as_bytes()).await?;

                let mut response_length = [0u8; 2];
                stream.read_exact(&mut response_length).await?;
                let response_length = u16::from_be_bytes(response_length) as usize;

                // A u16 is at most 65k, meaning we are okay to allocate here based on what the remote is sending.
                let mut response = vec![0u8; response_length];
                stream.read_exact(&mut response).await?;

                Response::parse(&response)
                    .map_err(|e| io::Error::other(format!("bad DNS response: {e}")))
            }
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }
}
