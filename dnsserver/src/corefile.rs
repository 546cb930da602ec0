//! Reads the single `v2router` stanza from a directive-style config file.
//!
//! Lines are tokenised on whitespace and `#` starts a comment. The stanza
//! opens with `v2router <data-path> {` and closes with a lone `}`; everything
//! in between is handed to the router's directive parser untouched.

use std::{fs, path::Path};

use anyhow::{Context as _, Result, ensure};
use v2router::config::Stanza;

pub fn load(path: &Path) -> Result<Stanza> {
    let contents = fs::read_to_string(path).context("Failed to read config file")?;

    parse(&contents)
}

fn parse(contents: &str) -> Result<Stanza> {
    let mut lines = contents.lines().filter_map(|line| {
        let line = line.split('#').next().unwrap_or_default().trim();

        (!line.is_empty())
            .then(|| line.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
    });

    let header = lines.next().context("Missing `v2router` stanza")?;
    ensure!(
        header.len() == 3 && header[0] == "v2router" && header[2] == "{",
        "expected `v2router <data-path> {{` as the first directive"
    );

    let mut stanza = Stanza {
        data_path: header[1].clone(),
        directives: Vec::new(),
    };

    let mut closed = false;

    for tokens in lines {
        if tokens == ["}"] {
            closed = true;
            continue;
        }

        ensure!(!closed, "unexpected directive after `}}`");

        stanza.directives.push(tokens);
    }

    ensure!(closed, "missing closing `}}`");

    Ok(stanza)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_stanza_with_comments() {
        let stanza = parse(
            "# routes\n\
             v2router geosite.dat {\n\
             \x20 forward domain:example.com to udp://8.8.8.8:53 retry:2 # primary\n\
             \x20 reject full:blocked.test\n\
             \x20 default udp://1.1.1.1:53\n\
             }\n",
        )
        .unwrap();

        assert_eq!(stanza.data_path, "geosite.dat");
        assert_eq!(stanza.directives.len(), 3);
        assert_eq!(
            stanza.directives[0],
            ["forward", "domain:example.com", "to", "udp://8.8.8.8:53", "retry:2"]
        );
    }

    #[test]
    fn requires_the_stanza_header() {
        assert!(parse("forward a to udp://8.8.8.8:53\n").is_err());
    }

    #[test]
    fn requires_a_closing_brace() {
        assert!(parse("v2router geosite.dat {\n default udp://1.1.1.1:53\n").is_err());
    }
}
