use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::{ExponentialBackoff, backoff::Backoff as _};
use dns_types::{Query, Response, ResponseCode};
use opentelemetry::{KeyValue, metrics::Counter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use transport::{Transport, UpstreamAddr};

use crate::{
    config::Attributes,
    handler::{Error, ExchangeError, ResponseWriter},
    metrics,
};

const DEFAULT_EXPIRE: Duration = Duration::from_secs(10);
const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(10);
const DEFAULT_YIELD_TIMEOUT: Duration = Duration::from_millis(500);

/// Takes a classified query and produces its response.
#[async_trait]
pub trait Forwarder: Send + Sync + fmt::Display {
    async fn forward(
        &self,
        ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error>;
}

/// How a race over multiple upstreams picks its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RacePolicy {
    /// Accept the first terminal outcome, even a failure. Bounds latency by
    /// the fastest upstream to give up.
    #[default]
    FirstOutcome,
    /// Keep waiting until some upstream succeeds or all of them have failed.
    FirstSuccess,
}

/// Races a query across a fixed set of upstreams.
///
/// Every upstream gets its own racer task with an exponential-backoff retry
/// loop; the first terminal outcome (see [`RacePolicy`]) wins and the losers
/// are cancelled. Connections come from a per-upstream [`Transport`] pool.
#[derive(Clone)]
pub struct UpstreamsForwarder {
    inner: Arc<Inner>,
}

struct Inner {
    upstreams: Vec<UpstreamAddr>,
    transports: Vec<Transport>,
    retry: u32,
    timeout: Duration,
    race: RacePolicy,

    upstream_counter: Counter<u64>,
    hit_counter: Counter<u64>,
    miss_counter: Counter<u64>,
}

struct RaceResult {
    index: usize,
    outcome: Result<Response, ExchangeError>,
}

impl UpstreamsForwarder {
    pub fn new(upstreams: Vec<UpstreamAddr>, attr: &Attributes) -> Self {
        let transports = upstreams
            .iter()
            .map(|&upstream| {
                Transport::new(transport::Options {
                    upstream,
                    expire: DEFAULT_EXPIRE,
                    gc_period: DEFAULT_GC_PERIOD,
                    yield_timeout: DEFAULT_YIELD_TIMEOUT,
                })
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                upstreams,
                transports,
                retry: attr.retry,
                timeout: attr.timeout,
                race: attr.race,
                upstream_counter: metrics::upstream_counter(),
                hit_counter: metrics::connection_cache_hit_counter(),
                miss_counter: metrics::connection_cache_miss_counter(),
            }),
        }
    }

    pub fn upstreams(&self) -> &[UpstreamAddr] {
        &self.inner.upstreams
    }

    /// Stops every per-upstream transport. Idempotent.
    pub fn stop(&self) {
        for transport in &self.inner.transports {
            transport.stop();
        }
    }
}

#[async_trait]
impl Forwarder for UpstreamsForwarder {
    async fn forward(
        &self,
        ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error> {
        let inner = &self.inner;
        let n = inner.upstreams.len();
        let domain = question_name(query);

        // One slot per racer, so a racer's single send can never block.
        let (result_tx, mut result_rx) = mpsc::channel(n);
        let cancels = (0..n).map(|_| ctx.child_token()).collect::<Vec<_>>();

        for (index, cancel) in cancels.iter().enumerate() {
            tokio::spawn(race(
                inner.clone(),
                index,
                cancel.clone(),
                query.clone(),
                result_tx.clone(),
            ));
        }
        drop(result_tx);

        let mut failures = 0;
        let mut first_error = None;

        loop {
            let result = tokio::select! {
                () = ctx.cancelled() => return Err(Error::Canceled),
                maybe = result_rx.recv() => {
                    let Some(result) = maybe else { return Err(Error::Canceled) };
                    result
                }
            };

            match result.outcome {
                Ok(response) => {
                    cancel_siblings(&cancels, result.index);
                    tokio::spawn(ignore_responses(result_rx, inner.clone(), domain));

                    let upstream = inner.upstreams[result.index];
                    tracing::info!(domain = %question_name(query), %upstream, "Accepting response");
                    inner
                        .upstream_counter
                        .add(1, &[KeyValue::new("upstream", upstream.to_string())]);

                    let rcode = response.rcode();
                    writer.write_response(response);

                    return Ok(rcode);
                }
                Err(error) => {
                    failures += 1;

                    // The first-surfaced error is the one we report.
                    let first = first_error.take().unwrap_or(error);

                    if inner.race == RacePolicy::FirstOutcome || failures == n {
                        cancel_siblings(&cancels, result.index);
                        tokio::spawn(ignore_responses(result_rx, inner.clone(), domain));

                        return Err(Error::Exhausted(first));
                    }

                    first_error = Some(first);
                }
            }
        }
    }
}

impl fmt::Display for UpstreamsForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let upstreams = self
            .inner
            .upstreams
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        write!(f, "[{upstreams}]")
    }
}

/// A racer: one upstream's retry loop plus its single result report.
async fn race(
    inner: Arc<Inner>,
    index: usize,
    cancel: CancellationToken,
    query: Query,
    results: mpsc::Sender<RaceResult>,
) {
    let outcome = inner.resolve_with_retries(index, &cancel, &query).await;

    let _ = results.send(RaceResult { index, outcome }).await;
}

impl Inner {
    async fn resolve_with_retries(
        &self,
        index: usize,
        cancel: &CancellationToken,
        query: &Query,
    ) -> Result<Response, ExchangeError> {
        let mut backoff = ExponentialBackoff::default();
        let mut attempt = 0u32;

        loop {
            let error = match self.exchange_once(index, query).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            attempt += 1;

            if attempt > self.retry {
                return Err(error);
            }

            let Some(delay) = backoff.next_backoff() else {
                return Err(error);
            };

            tracing::debug!(upstream = %self.upstreams[index], %attempt, ?delay, %error, "Attempt failed, backing off");

            tokio::select! {
                () = cancel.cancelled() => return Err(ExchangeError::Canceled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn exchange_once(&self, index: usize, query: &Query) -> Result<Response, ExchangeError> {
        let transport = &self.transports[index];
        let upstream = self.upstreams[index];

        let (mut conn, cached) = transport.dial(self.timeout).await?;

        let response = match conn.exchange(query, self.timeout).await {
            Ok(response) => response,
            Err(source) => {
                // A failed exchange may have left the stream desynchronized;
                // dropping the connection closes it instead of yielding it.
                return Err(ExchangeError::Io { upstream, source });
            }
        };

        if cached {
            self.hit_counter
                .add(1, &[KeyValue::new("upstream", upstream.to_string())]);
            tracing::debug!(domain = %question_name(query), %upstream, "Using cached connection");
        } else {
            self.miss_counter
                .add(1, &[KeyValue::new("upstream", upstream.to_string())]);
            tracing::debug!(domain = %question_name(query), %upstream, "Using new connection");
        }

        transport.yield_conn(conn).await;

        Ok(response)
    }
}

/// Consumes the losing racers' results so none of them stays unread.
async fn ignore_responses(
    mut results: mpsc::Receiver<RaceResult>,
    inner: Arc<Inner>,
    domain: String,
) {
    while let Some(result) = results.recv().await {
        let upstream = inner.upstreams[result.index];

        match result.outcome {
            Ok(_) => tracing::debug!(%domain, %upstream, "Ignoring a slower response"),
            Err(error) => {
                tracing::debug!(%domain, %upstream, %error, "Ignoring failure from a losing upstream")
            }
        }
    }
}

fn cancel_siblings(cancels: &[CancellationToken], winner: usize) {
    for (index, cancel) in cancels.iter().enumerate() {
        if index != winner {
            cancel.cancel();
        }
    }
}

pub(crate) fn question_name(query: &Query) -> String {
    query
        .domain()
        .map(|domain| domain.to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}
