//! SLO threshold extraction.
//!
//! SLO declarations are free text. The orchestrator evaluates the
//! tail-latency bound during soak, so expressions of the form
//! `p999 < 100ms` (or `p99.9 < 100 ms`) are parsed into a numeric
//! limit. Anything that doesn't match is informational only.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::Slo;

static P999_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)p99\.?9\s*<=?\s*([0-9]+(?:\.[0-9]+)?)\s*ms").unwrap()
});

/// Parse a single SLO expression for a p99.9 latency bound in ms.
pub fn parse_p999_ms(value: &str) -> Option<f64> {
    let caps = P999_RE.captures(value)?;
    caps[1].parse().ok()
}

/// The effective p99.9 bound for a set of SLOs: the tightest parseable
/// limit, or `None` if no declaration mentions p99.9.
pub fn p999_limit_ms(slos: &[Slo]) -> Option<f64> {
    slos.iter()
        .filter_map(|s| parse_p999_ms(&s.value))
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slo(value: &str) -> Slo {
        Slo {
            value: value.to_string(),
        }
    }

    #[test]
    fn parses_default_plan_expression() {
        assert_eq!(parse_p999_ms("latency p999 < 100ms"), Some(100.0));
    }

    #[test]
    fn parses_spelling_variants() {
        assert_eq!(parse_p999_ms("p99.9 <= 250 ms"), Some(250.0));
        assert_eq!(parse_p999_ms("P999<75ms"), Some(75.0));
        assert_eq!(parse_p999_ms("p999 < 12.5ms"), Some(12.5));
    }

    #[test]
    fn ignores_other_percentiles_and_prose() {
        assert_eq!(parse_p999_ms("p99 < 100ms"), None);
        assert_eq!(parse_p999_ms("error rate < 1%"), None);
        assert_eq!(parse_p999_ms(""), None);
    }

    #[test]
    fn takes_tightest_limit() {
        let slos = vec![
            slo("availability > 99.9%"),
            slo("latency p999 < 200ms"),
            slo("p999 < 150ms under load"),
        ];
        assert_eq!(p999_limit_ms(&slos), Some(150.0));
    }

    #[test]
    fn no_limit_when_nothing_parses() {
        let slos = vec![slo("five nines"), slo("p50 < 10ms")];
        assert_eq!(p999_limit_ms(&slos), None);
    }
}
