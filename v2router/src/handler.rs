use std::io;

use async_trait::async_trait;
use dns_types::{Query, Response, ResponseCode};
use tokio_util::sync::CancellationToken;
use transport::UpstreamAddr;

/// Where a handler writes its single DNS response.
pub trait ResponseWriter: Send {
    fn write_response(&mut self, response: Response);
}

/// The contract the host DNS pipeline calls into.
///
/// `ctx` is the caller's cancellation scope; once it fires, the handler gives
/// up and reports [`Error::Canceled`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_dns(
        &self,
        ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error>;

    fn name(&self) -> &'static str;

    fn ready(&self) -> bool;
}

/// Buffers the single response of a query for the caller to send.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    response: Option<Response>,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_response(self) -> Option<Response> {
        self.response
    }
}

impl ResponseWriter for BufferedWriter {
    fn write_response(&mut self, response: Response) {
        self.response = Some(response);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("query has no question")]
    EmptyQuestion,
    #[error("query was canceled")]
    Canceled,
    #[error("all upstreams exhausted their retries")]
    Exhausted(#[source] ExchangeError),
}

impl Error {
    /// The response code a host should answer with when a handler fails.
    pub fn rcode(&self) -> ResponseCode {
        match self {
            Error::EmptyQuestion => ResponseCode::FORMERR,
            Error::Canceled | Error::Exhausted(_) => ResponseCode::SERVFAIL,
        }
    }
}

/// A single upstream attempt's terminal failure.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Dial(#[from] transport::Error),
    #[error("i/o failure talking to {upstream}")]
    Io {
        upstream: UpstreamAddr,
        #[source]
        source: io::Error,
    },
    #[error("canceled while backing off")]
    Canceled,
}
