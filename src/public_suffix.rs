//! Public suffix list lookup (SPEC_FULL.md SS6, seed scenario 3).
//!
//! The list ships gzip-compressed (`public_suffix_list.dat.gz`, in the
//! standard Mozilla PSL text format: one rule per line, `*.` wildcard
//! prefix, `!` exception prefix, `//` comments) and is decompressed once,
//! behind a single lazy loader — resolving DESIGN NOTES SS9's "two
//! `PublicSuffixList` embedders" open question in favor of one.

use std::collections::HashSet;
use std::io::Read;
use std::sync::OnceLock;

const EMBEDDED_LIST: &[u8] = include_bytes!("public_suffix_list.dat.gz");

/// A parsed public suffix list, queryable for the registrable domain of a
/// host.
pub struct PublicSuffixList {
    /// Exact rules, stored as reversed-label dot-joined strings for
    /// cheap suffix comparison (`"com"`, `"jp"`, ...).
    rules: HashSet<String>,
    /// Wildcard rules' suffix part, e.g. `"jayo.com"` for `*.jayo.com`.
    wildcard_rules: HashSet<String>,
    /// Exception rules, e.g. `"my.jayo.jp"` for `!my.jayo.jp`.
    exceptions: HashSet<String>,
}

static INSTANCE: OnceLock<PublicSuffixList> = OnceLock::new();

impl PublicSuffixList {
    /// The process-wide list, lazily decompressed and parsed on first use.
    pub fn get() -> &'static PublicSuffixList {
        INSTANCE.get_or_init(|| PublicSuffixList::decode(EMBEDDED_LIST))
    }

    fn decode(gz: &[u8]) -> PublicSuffixList {
        let mut text = String::new();
        flate2::read::GzDecoder::new(gz)
            .read_to_string(&mut text)
            .expect("embedded public suffix list is valid gzip+utf8");
        Self::parse(&text)
    }

    fn parse(text: &str) -> PublicSuffixList {
        let mut rules = HashSet::new();
        let mut wildcard_rules = HashSet::new();
        let mut exceptions = HashSet::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            if let Some(rest) = line.strip_prefix('!') {
                exceptions.insert(rest.to_owned());
            } else if let Some(rest) = line.strip_prefix("*.") {
                wildcard_rules.insert(rest.to_owned());
            } else {
                rules.insert(line.to_owned());
            }
        }

        PublicSuffixList {
            rules,
            wildcard_rules,
            exceptions,
        }
    }

    /// `getEffectiveTldPlusOne` — the registrable domain, i.e. the public
    /// suffix plus one more label. Returns `None` if `host` is itself a
    /// public suffix or has no matching rule.
    pub fn effective_tld_plus_one(&self, host: &str) -> Option<String> {
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return None;
        }

        // Exception rules override: "!my.jayo.jp" means "my.jayo.jp" is
        // NOT part of the suffix; the registrable domain is itself.
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.exceptions.contains(&candidate) {
                return Some(candidate);
            }
        }

        // Longest match wins; walk from the full domain down to the TLD
        // and keep the longest suffix rule (exact or wildcard) that fires.
        let mut best_suffix_len = 0usize;
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.rules.contains(&candidate) {
                best_suffix_len = best_suffix_len.max(labels.len() - i);
            }
            if i + 1 < labels.len() {
                let wildcard_base = labels[i + 1..].join(".");
                if self.wildcard_rules.contains(&wildcard_base) {
                    best_suffix_len = best_suffix_len.max(labels.len() - i);
                }
            }
        }

        if best_suffix_len == 0 || best_suffix_len >= labels.len() {
            return None;
        }

        let plus_one_start = labels.len() - best_suffix_len - 1;
        Some(labels[plus_one_start..].join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::PublicSuffixList;

    fn test_list() -> PublicSuffixList {
        PublicSuffixList::parse(
            "com\n*.jayo.com\njp\n*.jp\n!my.jayo.jp\n",
        )
    }

    #[test]
    fn exact_rule() {
        let psl = test_list();
        assert_eq!(
            psl.effective_tld_plus_one("foo.example.com"),
            Some("example.com".to_owned())
        );
    }

    #[test]
    fn wildcard_rule_extends_suffix() {
        let psl = test_list();
        assert_eq!(
            psl.effective_tld_plus_one("foo.my.jayo.com"),
            Some("foo.my.jayo.com".to_owned())
        );
    }

    #[test]
    fn exception_overrides_wildcard() {
        let psl = test_list();
        assert_eq!(
            psl.effective_tld_plus_one("my.jayo.jp"),
            Some("my.jayo.jp".to_owned())
        );
    }
}
