use std::time::{Duration, Instant};

use async_trait::async_trait;
use dns_types::{DomainName, Query, ResponseCode};
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::{
    forwarder::Forwarder,
    handler::{Error, Handler, ResponseWriter},
    matcher::Matcher,
    request::RequestId,
};

/// How many name-to-rule decisions we remember.
const MATCH_CACHE_CAPACITY: u64 = 4096;

/// A matcher paired with the action for names it claims.
pub struct Rule {
    matcher: Box<dyn Matcher>,
    action: Box<dyn Forwarder>,
}

impl Rule {
    pub fn new(matcher: Box<dyn Matcher>, action: Box<dyn Forwarder>) -> Self {
        Self { matcher, action }
    }
}

/// Classifies every query against an ordered rule list and dispatches it to
/// the matched rule's forwarder, falling back to the default forwarder.
///
/// Decisions are remembered in a bounded cache keyed by query name, so a hot
/// name skips the rule walk entirely. Concurrent misses for the same name may
/// both walk the rules; the walk is deterministic, so the double insert is
/// harmless.
pub struct Router {
    rules: Vec<Rule>,
    default_action: Box<dyn Forwarder>,
    cache: moka::sync::Cache<DomainName, CachedDecision>,

    /// Populated by the host at registration; this router never invokes it,
    /// but the host may chain through it.
    pub next: Option<Box<dyn Handler>>,
}

/// `Some(index)` selects `rules[index]`; `None` selects the default.
type CachedDecision = Option<usize>;

impl Router {
    pub fn new(rules: Vec<Rule>, default_action: Box<dyn Forwarder>) -> Self {
        Self {
            rules,
            default_action,
            cache: moka::sync::Cache::new(MATCH_CACHE_CAPACITY),
            next: None,
        }
    }

    async fn dispatch(
        &self,
        name: &DomainName,
        ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error> {
        if let Some(decision) = self.cache.get(name) {
            let action = match decision {
                Some(index) => self.rules[index].action.as_ref(),
                None => self.default_action.as_ref(),
            };

            tracing::info!(%name, forwarder = %action, "Hits match cache");
            return action.forward(ctx, writer, query).await;
        }

        for (index, rule) in self.rules.iter().enumerate() {
            let Some(evidence) = rule.matcher.matches(name) else {
                continue;
            };

            self.cache.insert(name.clone(), Some(index));

            tracing::info!(%name, %evidence, forwarder = %rule.action, "Matches rule");
            return rule.action.forward(ctx, writer, query).await;
        }

        self.cache.insert(name.clone(), None);

        tracing::info!(%name, forwarder = %self.default_action, "Matches default rule");
        self.default_action.forward(ctx, writer, query).await
    }
}

#[async_trait]
impl Handler for Router {
    async fn serve_dns(
        &self,
        ctx: &CancellationToken,
        writer: &mut dyn ResponseWriter,
        query: &Query,
    ) -> Result<ResponseCode, Error> {
        let id = RequestId::next();
        let span = tracing::info_span!("request", %id);

        async {
            let begin = Instant::now();

            let Some(name) = query.domain() else {
                return Err(Error::EmptyQuestion);
            };

            let result = self.dispatch(&name, ctx, writer, query).await;

            log_rtt(&name, begin.elapsed());

            result
        }
        .instrument(span)
        .await
    }

    fn name(&self) -> &'static str {
        "v2router"
    }

    fn ready(&self) -> bool {
        true
    }
}

fn log_rtt(name: &DomainName, elapsed: Duration) {
    if elapsed >= Duration::from_secs(1) {
        tracing::warn!(%name, ?elapsed, "Resolved slowly");
    } else {
        tracing::info!(%name, ?elapsed, "Resolved");
    }
}
