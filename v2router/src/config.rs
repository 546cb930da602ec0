//! Builds a [`Router`] from an already-tokenised `v2router` stanza.
//!
//! The directive reader itself is the host's concern; we only interpret the
//! token vectors it hands us:
//!
//! ```text
//! v2router <geosite-data-path> {
//!   forward <cond>... to <upstream-spec> [attr...]
//!   reject  <cond>...
//!   default <upstream-spec> [attr...]
//! }
//! ```

use std::time::Duration;

use crate::{
    forwarder::{RacePolicy, UpstreamsForwarder},
    matcher::MatcherBuilder,
    reject::Reject,
    router::{Router, Rule},
    setup::Shutdown,
};

pub const DEFAULT_RETRY: u32 = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-rule forwarding parameters, parsed from `key:value` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    /// How many times a racer retries after its initial attempt.
    pub retry: u32,
    /// Bounds both dialing and the exchange on a connection.
    pub timeout: Duration,
    pub race: RacePolicy,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            retry: DEFAULT_RETRY,
            timeout: DEFAULT_TIMEOUT,
            race: RacePolicy::default(),
        }
    }
}

pub fn parse_attributes(args: &[String]) -> Result<Attributes, Error> {
    let mut attr = Attributes::default();

    for arg in args {
        let Some((key, value)) = arg.split_once(':') else {
            return Err(Error::InvalidAttribute(arg.clone()));
        };

        match key {
            "retry" => {
                attr.retry = value
                    .parse()
                    .ok()
                    .filter(|&retry| retry > 0)
                    .ok_or_else(|| Error::InvalidAttribute(arg.clone()))?;
            }
            "timeout" => {
                attr.timeout = humantime::parse_duration(value)
                    .map_err(|_| Error::InvalidAttribute(arg.clone()))?;
            }
            "race" => {
                attr.race = match value {
                    "first_outcome" => RacePolicy::FirstOutcome,
                    "first_success" => RacePolicy::FirstSuccess,
                    _ => return Err(Error::InvalidAttribute(arg.clone())),
                };
            }
            _ => return Err(Error::UnknownAttribute(key.to_owned())),
        }
    }

    Ok(attr)
}

/// One `v2router` configuration stanza, already split into tokens.
#[derive(Debug, Clone, Default)]
pub struct Stanza {
    /// Path to the GeoSite dataset backing `geosite:` conditions.
    pub data_path: String,
    /// The block's directives, one token vector each, in declaration order.
    pub directives: Vec<Vec<String>>,
}

/// Builds the router and the shutdown handle draining its transports.
///
/// Rules keep the stanza's declaration order; the first matching rule wins.
pub fn build(stanza: &Stanza, matchers: &dyn MatcherBuilder) -> Result<(Router, Shutdown), Error> {
    let mut rules = Vec::new();
    let mut shutdown = Shutdown::new();
    let mut default_action = None;

    for directive in &stanza.directives {
        let (keyword, args) = directive.split_first().ok_or(Error::EmptyDirective)?;

        match keyword.as_str() {
            "forward" => {
                let to = args
                    .iter()
                    .position(|arg| arg.as_str() == "to")
                    .ok_or(Error::MalformedForward)?;

                if to == 0 || to + 1 >= args.len() {
                    return Err(Error::MalformedForward);
                }

                let upstreams = transport::parse_upstreams(&args[to + 1])?;
                let attr = parse_attributes(&args[to + 2..])?;

                let forwarder = UpstreamsForwarder::new(upstreams, &attr);
                shutdown.register(forwarder.clone());

                let matcher = matchers
                    .build(&stanza.data_path, &args[..to])
                    .map_err(Error::Matcher)?;

                rules.push(Rule::new(matcher, Box::new(forwarder)));
            }
            "reject" => {
                if args.is_empty() {
                    return Err(Error::MissingConditions);
                }

                let matcher = matchers
                    .build(&stanza.data_path, args)
                    .map_err(Error::Matcher)?;

                rules.push(Rule::new(matcher, Box::new(Reject::new())));
            }
            "default" => {
                if default_action.is_some() {
                    return Err(Error::MultipleDefaults);
                }

                let (spec, attrs) = args.split_first().ok_or(Error::MissingDefaultUpstreams)?;

                let forwarder =
                    UpstreamsForwarder::new(transport::parse_upstreams(spec)?, &parse_attributes(attrs)?);
                shutdown.register(forwarder.clone());

                default_action = Some(forwarder);
            }
            other => return Err(Error::UnknownDirective(other.to_owned())),
        }
    }

    let default_action = default_action.ok_or(Error::MissingDefault)?;

    Ok((Router::new(rules, Box::new(default_action)), shutdown))
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty directive")]
    EmptyDirective,
    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
    #[error("expected syntax: forward CONDITION... to UPSTREAMS [ATTRIBUTE...]")]
    MalformedForward,
    #[error("reject needs at least one condition")]
    MissingConditions,
    #[error("default needs an upstream list")]
    MissingDefaultUpstreams,
    #[error("multiple default routes")]
    MultipleDefaults,
    #[error("expected a default route")]
    MissingDefault,
    #[error("invalid attribute `{0}`")]
    InvalidAttribute(String),
    #[error("unknown attribute key `{0}`")]
    UnknownAttribute(String),
    #[error(transparent)]
    Upstream(#[from] transport::InvalidUpstream),
    #[error("invalid matcher conditions: {0:#}")]
    Matcher(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use crate::matcher::PlainMatcherBuilder;

    use super::*;

    fn tokens(directive: &[&str]) -> Vec<String> {
        directive.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn attributes_default_without_tokens() {
        let attr = parse_attributes(&[]).unwrap();

        assert_eq!(attr.retry, DEFAULT_RETRY);
        assert_eq!(attr.timeout, DEFAULT_TIMEOUT);
        assert_eq!(attr.race, RacePolicy::FirstOutcome);
    }

    #[test]
    fn attributes_parse_known_keys() {
        let attr = parse_attributes(&tokens(&["retry:3", "timeout:2s", "race:first_success"])).unwrap();

        assert_eq!(attr.retry, 3);
        assert_eq!(attr.timeout, Duration::from_secs(2));
        assert_eq!(attr.race, RacePolicy::FirstSuccess);
    }

    #[test]
    fn attributes_reject_unknown_keys() {
        assert!(matches!(
            parse_attributes(&tokens(&["ttl:60"])),
            Err(Error::UnknownAttribute(_))
        ));
    }

    #[test]
    fn attributes_reject_zero_retries_and_bad_values() {
        assert!(matches!(
            parse_attributes(&tokens(&["retry:0"])),
            Err(Error::InvalidAttribute(_))
        ));
        assert!(matches!(
            parse_attributes(&tokens(&["timeout:soon"])),
            Err(Error::InvalidAttribute(_))
        ));
        assert!(matches!(
            parse_attributes(&tokens(&["retry"])),
            Err(Error::InvalidAttribute(_))
        ));
    }

    fn stanza(directives: &[&[&str]]) -> Stanza {
        Stanza {
            data_path: "geosite.dat".to_owned(),
            directives: directives.iter().map(|d| tokens(d)).collect(),
        }
    }

    #[tokio::test]
    async fn builds_a_full_stanza() {
        let stanza = stanza(&[
            &["forward", "domain:example.com", "to", "udp://127.0.0.1:5301", "retry:2"],
            &["reject", "full:blocked.test"],
            &["default", "udp://127.0.0.1:5302;tcp://127.0.0.1:5303"],
        ]);

        let (_router, shutdown) = build(&stanza, &PlainMatcherBuilder).unwrap();

        shutdown.trigger();
    }

    #[tokio::test]
    async fn requires_a_default_route() {
        let stanza = stanza(&[&["reject", "full:blocked.test"]]);

        assert!(matches!(
            build(&stanza, &PlainMatcherBuilder),
            Err(Error::MissingDefault)
        ));
    }

    #[tokio::test]
    async fn rejects_a_second_default_route() {
        let stanza = stanza(&[
            &["default", "udp://127.0.0.1:5302"],
            &["default", "udp://127.0.0.1:5303"],
        ]);

        assert!(matches!(
            build(&stanza, &PlainMatcherBuilder),
            Err(Error::MultipleDefaults)
        ));
    }

    #[tokio::test]
    async fn rejects_forward_without_to() {
        let stanza = stanza(&[
            &["forward", "domain:example.com", "udp://127.0.0.1:5301"],
            &["default", "udp://127.0.0.1:5302"],
        ]);

        assert!(matches!(
            build(&stanza, &PlainMatcherBuilder),
            Err(Error::MalformedForward)
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_directives() {
        let stanza = stanza(&[
            &["proxy", "udp://127.0.0.1:5301"],
            &["default", "udp://127.0.0.1:5302"],
        ]);

        assert!(matches!(
            build(&stanza, &PlainMatcherBuilder),
            Err(Error::UnknownDirective(_))
        ));
    }
}
