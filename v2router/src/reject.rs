use std::{fmt, net::Ipv4Addr};

use async_trait::async_trait;
use dns_types::{Query, ResponseBuilder, ResponseCode, records};
use opentelemetry::{KeyValue, metrics::Counter};
use tokio_util::sync::CancellationToken;

use crate::{
    forwarder::Forwarder,
    handler::{Error, ResponseWriter},
    metrics,
};

/// A forwarder that never contacts an upstream: it answers every query with
/// a single `A 0.0.0.0` record.
pub struct Reject {
    counter: Counter<u64>,
}

impl Reject {
    pub fn new() -> Self {
        Self {
            counter: metrics::reject_counter(),
        }
    }
}

impl Default for Reject {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Forwarder for Reject {
    async fn forward(
        &self,
        _ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error> {
        let Some(domain) = query.domain() else {
            return Err(Error::EmptyQuestion);
        };

        tracing::info!(%domain, "Rejecting query");
        self.counter
            .add(1, &[KeyValue::new("name", domain.to_string())]);

        let response = ResponseBuilder::for_query(query, ResponseCode::NOERROR)
            .with_records([(domain, 0, records::a(Ipv4Addr::UNSPECIFIED))])
            .build();

        writer.write_response(response);

        Ok(ResponseCode::NOERROR)
    }
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("reject")
    }
}
