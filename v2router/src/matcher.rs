use std::fmt;

use anyhow::{Context as _, bail};
use dns_types::DomainName;

/// Which condition matched a name; carried for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence(String);

impl Evidence {
    pub fn new(condition: impl Into<String>) -> Self {
        Self(condition.into())
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decides whether a query name belongs to a rule's domain set.
pub trait Matcher: Send + Sync {
    fn matches(&self, name: &DomainName) -> Option<Evidence>;
}

/// Builds one [`Matcher`] per rule from that rule's condition tokens.
///
/// Condition tokens are opaque to the router; a dataset-backed builder may
/// interpret them however its dataset requires.
pub trait MatcherBuilder {
    fn build(&self, data_path: &str, conditions: &[String]) -> anyhow::Result<Box<dyn Matcher>>;
}

/// A matcher over literal text conditions.
///
/// Understands `full:<name>` (exact), `domain:<suffix>` (the name or any
/// subdomain of it, also the meaning of a bare token) and
/// `keyword:<substring>`. `geosite:<category>` conditions need a
/// dataset-backed builder and are rejected here.
pub struct PlainMatcher {
    conditions: Vec<Condition>,
}

enum Condition {
    Full { name: DomainName, token: String },
    Suffix { name: DomainName, token: String },
    Keyword { needle: String, token: String },
}

impl Matcher for PlainMatcher {
    fn matches(&self, name: &DomainName) -> Option<Evidence> {
        self.conditions.iter().find_map(|condition| {
            let (matched, token) = match condition {
                Condition::Full { name: full, token } => (name == full, token),
                Condition::Suffix { name: suffix, token } => (name.ends_with(suffix), token),
                Condition::Keyword { needle, token } => {
                    (name.to_string().to_ascii_lowercase().contains(needle), token)
                }
            };

            matched.then(|| Evidence::new(token.clone()))
        })
    }
}

#[derive(Debug, Default)]
pub struct PlainMatcherBuilder;

impl MatcherBuilder for PlainMatcherBuilder {
    fn build(&self, _data_path: &str, conditions: &[String]) -> anyhow::Result<Box<dyn Matcher>> {
        let conditions = conditions
            .iter()
            .map(|token| parse_condition(token))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Box::new(PlainMatcher { conditions }))
    }
}

fn parse_condition(token: &str) -> anyhow::Result<Condition> {
    let (kind, value) = token.split_once(':').unwrap_or(("domain", token));

    let condition = match kind {
        "full" => Condition::Full {
            name: parse_name(value)?,
            token: token.to_owned(),
        },
        "domain" => Condition::Suffix {
            name: parse_name(value)?,
            token: token.to_owned(),
        },
        "keyword" => Condition::Keyword {
            needle: value.to_ascii_lowercase(),
            token: token.to_owned(),
        },
        "geosite" => bail!("`{token}` requires a dataset-backed matcher"),
        other => bail!("unknown condition kind `{other}`"),
    };

    Ok(condition)
}

fn parse_name(value: &str) -> anyhow::Result<DomainName> {
    dns_types::domain(value).with_context(|| format!("invalid domain name `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(conditions: &[&str]) -> Box<dyn Matcher> {
        let conditions = conditions.iter().map(|c| c.to_string()).collect::<Vec<_>>();

        PlainMatcherBuilder.build("", &conditions).unwrap()
    }

    fn name(s: &str) -> DomainName {
        dns_types::domain(s).unwrap()
    }

    #[test]
    fn full_matches_exactly() {
        let matcher = matcher(&["full:example.com"]);

        assert!(matcher.matches(&name("example.com")).is_some());
        assert!(matcher.matches(&name("www.example.com")).is_none());
    }

    #[test]
    fn domain_matches_subdomains() {
        let matcher = matcher(&["domain:example.com"]);

        assert!(matcher.matches(&name("example.com")).is_some());
        assert!(matcher.matches(&name("www.example.com")).is_some());
        assert!(matcher.matches(&name("example.org")).is_none());
        assert!(matcher.matches(&name("notexample.com")).is_none());
    }

    #[test]
    fn bare_token_means_domain() {
        let matcher = matcher(&["example.com"]);

        assert!(matcher.matches(&name("www.example.com")).is_some());
    }

    #[test]
    fn keyword_matches_substring() {
        let matcher = matcher(&["keyword:tracker"]);

        assert!(matcher.matches(&name("ads.tracker-cdn.net")).is_some());
        assert!(matcher.matches(&name("example.com")).is_none());
    }

    #[test]
    fn first_condition_wins_as_evidence() {
        let matcher = matcher(&["full:a.test", "domain:a.test"]);

        let evidence = matcher.matches(&name("a.test")).unwrap();

        assert_eq!(evidence, Evidence::new("full:a.test"));
    }

    #[test]
    fn geosite_requires_dataset() {
        let conditions = vec!["geosite:cn".to_string()];

        assert!(PlainMatcherBuilder.build("", &conditions).is_err());
    }
}
