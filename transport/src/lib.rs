//! A per-upstream cache of persistent DNS connections.
//!
//! Each [`Transport`] runs a single supervisor task that exclusively owns the
//! pooled connections. Callers interact with it only through messages: a dial
//! request is answered with the most recently used connection if that one is
//! still fresh, a yield appends a connection back to the pool, and a periodic
//! GC tick drops everything that has not been used within `expire`.
//!
//! Connections are reused LIFO so keep-alive state stays warm. Because yields
//! stamp the current time, the pool is always sorted by `last_used` and a
//! stale tail implies the whole pool is stale.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod addr;

mod conn;
mod metrics;

use std::{io, time::Duration};

use opentelemetry::KeyValue;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

pub use addr::{InvalidUpstream, Network, UpstreamAddr, parse_upstreams};
pub use conn::PersistentConn;

#[derive(Debug, Clone)]
pub struct Options {
    pub upstream: UpstreamAddr,
    /// Pooled connections unused for longer than this are closed.
    pub expire: Duration,
    /// How often the supervisor sweeps the pool for stale connections.
    pub gc_period: Duration,
    /// How long a yield may wait for the supervisor before the connection is dropped.
    pub yield_timeout: Duration,
}

pub struct Transport {
    upstream: UpstreamAddr,
    yield_timeout: Duration,

    dial_tx: mpsc::Sender<DialReply>,
    yield_tx: mpsc::Sender<PersistentConn>,
    stop: CancellationToken,

    dial_histogram: opentelemetry::metrics::Histogram<f64>,
}

type DialReply = oneshot::Sender<Option<PersistentConn>>;

impl Transport {
    pub fn new(options: Options) -> Self {
        let (dial_tx, dial_rx) = mpsc::channel(1);
        let (yield_tx, yield_rx) = mpsc::channel(1);
        let stop = CancellationToken::new();

        tokio::spawn(supervise(
            options.clone(),
            dial_rx,
            yield_rx,
            stop.clone(),
        ));

        Self {
            upstream: options.upstream,
            yield_timeout: options.yield_timeout,
            dial_tx,
            yield_tx,
            stop,
            dial_histogram: metrics::dial_histogram(),
        }
    }

    pub fn upstream(&self) -> UpstreamAddr {
        self.upstream
    }

    /// Returns an exclusively owned connection to the upstream.
    ///
    /// The boolean is `true` when the connection was reused from the pool.
    /// An empty (or entirely stale) pool is not an error; we dial fresh with
    /// the given timeout instead.
    pub async fn dial(&self, timeout: Duration) -> Result<(PersistentConn, bool), Error> {
        if self.stop.is_cancelled() {
            return Err(Error::TransportStopped);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.dial_tx
            .send(reply_tx)
            .await
            .map_err(|_| Error::TransportStopped)?;

        match reply_rx.await {
            Ok(Some(conn)) => Ok((conn, true)),
            Ok(None) => self.dial_fresh(timeout).await,
            Err(_) => Err(Error::TransportStopped),
        }
    }

    async fn dial_fresh(&self, timeout: Duration) -> Result<(PersistentConn, bool), Error> {
        let start = Instant::now();

        let conn = PersistentConn::connect(&self.upstream, timeout)
            .await
            .map_err(|source| Error::Dial {
                upstream: self.upstream,
                source,
            })?;

        self.dial_histogram.record(
            start.elapsed().as_secs_f64(),
            &[KeyValue::new("address", self.upstream.to_string())],
        );

        Ok((conn, false))
    }

    /// Offers a connection back to the pool.
    ///
    /// Waits at most `yield_timeout` for the supervisor; a refused yield drops
    /// the connection, which closes it. A bounded query path is worth more
    /// than any single connection.
    pub async fn yield_conn(&self, mut conn: PersistentConn) {
        conn.touch();

        if tokio::time::timeout(self.yield_timeout, self.yield_tx.send(conn))
            .await
            .is_err()
        {
            tracing::debug!(upstream = %self.upstream, "Pool did not accept connection in time, dropping it");
        }
    }

    /// Stops the supervisor and closes all pooled connections. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

async fn supervise(
    options: Options,
    mut dial_rx: mpsc::Receiver<DialReply>,
    mut yield_rx: mpsc::Receiver<PersistentConn>,
    stop: CancellationToken,
) {
    let mut conns = Vec::new();

    let period = options.gc_period;
    let mut gc = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                tracing::debug!(upstream = %options.upstream, connections = conns.len(), "Stopping transport");
                conns.clear();

                return;
            }
            Some(reply) = dial_rx.recv() => {
                let conn = take_fresh(&mut conns, options.expire);

                if let Err(Some(conn)) = reply.send(conn) {
                    // The caller went away before reading the reply; the
                    // connection is still fresh and was popped from the tail,
                    // so pushing it back keeps the pool sorted.
                    conns.push(conn);
                }
            }
            Some(conn) = yield_rx.recv() => {
                conns.push(conn);
            }
            _ = gc.tick() => {
                let dropped = sweep(&mut conns, options.expire);

                if dropped > 0 {
                    tracing::debug!(upstream = %options.upstream, %dropped, remaining = conns.len(), "Swept stale connections");
                }
            }
        }
    }
}

fn take_fresh(conns: &mut Vec<PersistentConn>, expire: Duration) -> Option<PersistentConn> {
    let now = Instant::now();
    let tail = conns.last()?;

    if now.duration_since(tail.last_used()) < expire {
        return conns.pop();
    }

    // Entries are appended in yield order, so a stale tail means every older
    // entry is stale too.
    conns.clear();

    None
}

fn sweep(conns: &mut Vec<PersistentConn>, expire: Duration) -> usize {
    let now = Instant::now();

    // `last_used` is non-decreasing, so the stale connections form a prefix.
    let boundary = conns.partition_point(|c| now.duration_since(c.last_used()) >= expire);

    conns.drain(..boundary).count()
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport is stopped")]
    TransportStopped,
    #[error("failed to dial {upstream}")]
    Dial {
        upstream: UpstreamAddr,
        #[source]
        source: io::Error,
    },
}
