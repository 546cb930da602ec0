//! A rule-based DNS forwarding router.
//!
//! Incoming queries are classified by their queried name against an ordered
//! rule list; the matched rule forwards to its set of upstream resolvers,
//! rejects with a synthetic answer, or falls through to a default forwarder.
//! Forwarding races the query across all of a rule's upstreams with
//! per-upstream retry and persistent-connection pooling.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;

mod forwarder;
mod handler;
mod matcher;
mod metrics;
mod reject;
mod request;
mod router;
mod setup;

pub use forwarder::{Forwarder, RacePolicy, UpstreamsForwarder};
pub use handler::{BufferedWriter, Error, ExchangeError, Handler, ResponseWriter};
pub use matcher::{Evidence, Matcher, MatcherBuilder, PlainMatcher, PlainMatcherBuilder};
pub use reject::Reject;
pub use request::RequestId;
pub use router::{Router, Rule};
pub use setup::Shutdown;
