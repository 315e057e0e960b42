//! Line-oriented formats shared by the comparator, the worker and the HTTP
//! boundary.

use crate::{Comparison, Error, Result, validate_guid};

const QC_FAIL_PREFIX: &str = "||QC_FAIL:";
const QC_FAIL_SUFFIX: &str = "||";

/// Parses comparator output into comparisons.
///
/// Each non-blank line is either `a b dist` (whitespace separated, integer
/// distance) or a `||QC_FAIL: guid||` marker, which becomes the QC-failure
/// record for that guid.
///
/// # Errors
///
/// Returns [`Error::MalformedRecord`] with the 1-based line number of the
/// first line that is neither.
///
/// # Example
///
/// ```
/// use relatedness::{parse_comparisons, Comparison};
///
/// let parsed = parse_comparisons("s1 s2 4\n\n||QC_FAIL: s3||\n").unwrap();
/// assert_eq!(parsed, vec![Comparison::new("s1", "s2", 4), Comparison::qc_fail("s3")]);
/// ```
pub fn parse_comparisons(text: &str) -> Result<Vec<Comparison>> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        out.push(parse_line(idx + 1, line)?);
    }
    Ok(out)
}

fn parse_line(line_no: usize, line: &str) -> Result<Comparison> {
    let malformed = |reason: String| Error::MalformedRecord {
        line: line_no,
        reason,
    };

    if let Some(rest) = line.strip_prefix(QC_FAIL_PREFIX) {
        let guid = rest
            .strip_suffix(QC_FAIL_SUFFIX)
            .ok_or_else(|| malformed("unterminated QC_FAIL marker".into()))?
            .trim();
        validate_guid(guid).map_err(|e| malformed(e.to_string()))?;
        return Ok(Comparison::qc_fail(guid));
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let [a, b, dist] = fields.as_slice() else {
        return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
    };
    let dist = dist
        .parse::<i64>()
        .map_err(|e| malformed(format!("distance {dist:?}: {e}")))?;
    let comparison = Comparison::new(*a, *b, dist);
    comparison.validate().map_err(|e| malformed(e.to_string()))?;
    Ok(comparison)
}

/// Parses a one-guid-per-line list. Lines are trimmed and blank lines are
/// dropped.
pub fn parse_guid_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_triples_and_skips_blank_lines() {
        let parsed = parse_comparisons("a b 3\n\n  c\td   12  \n").unwrap();
        assert_eq!(
            parsed,
            vec![Comparison::new("a", "b", 3), Comparison::new("c", "d", 12)]
        );
    }

    #[test]
    fn orphan_lines_are_ordinary_triples() {
        let parsed = parse_comparisons("x x -1").unwrap();
        assert!(parsed[0].is_orphan());
    }

    #[test]
    fn qc_fail_marker_becomes_sentinel() {
        let parsed = parse_comparisons("||QC_FAIL: sample-9||").unwrap();
        assert_eq!(parsed, vec![Comparison::qc_fail("sample-9")]);
        assert!(parsed[0].is_qc_fail());
    }

    #[test]
    fn reports_the_offending_line() {
        let err = parse_comparisons("a b 1\na b\n").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 2, .. }));

        let err = parse_comparisons("a b one").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 1, .. }));

        let err = parse_comparisons("\n||QC_FAIL: x").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn self_pair_must_carry_the_orphan_distance() {
        let err = parse_comparisons("a b 1\nx x 0\n").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn guid_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_guid_list(" s1 \n\n s2\r\n"),
            vec!["s1".to_string(), "s2".to_string()]
        );
    }
}
