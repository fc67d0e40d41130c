//! Small parsing/formatting helpers shared by the loader and the CLI
//! boundary: unit suffixes, natural ("nice") sort order, and comma-joined
//! lists.

use crate::error::Error;

/// Parse a unit-suffixed quantity into mebibytes.
///
/// - `"N"` / `"Nm"` → `N`
/// - `"Ng"` → `N * 1024`
/// - `"Nt"` → `N * 1048576`
/// - `"NM"` → `floor(N * 1_000_000 / 1_048_576)` (decimal megabytes converted to MiB)
///
/// Any other suffix is an error.
pub fn parse_unit(input: &str) -> Result<u64, Error> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidValue {
            field: "unit".to_string(),
            message: "empty value".to_string(),
        });
    }

    let (digits, suffix) = split_numeric_suffix(input);
    let value: f64 = digits.parse().map_err(|_| Error::InvalidValue {
        field: "unit".to_string(),
        message: format!("not a number: {digits:?}"),
    })?;
    if value < 0.0 {
        return Err(Error::InvalidValue {
            field: "unit".to_string(),
            message: "negative quantity".to_string(),
        });
    }

    let mib = match suffix {
        "" | "m" => value,
        "g" => value * 1024.0,
        "t" => value * 1024.0 * 1024.0,
        "M" => (value * 1_000_000.0 / 1_048_576.0).floor(),
        other => {
            return Err(Error::InvalidValue {
                field: "unit".to_string(),
                message: format!("unknown suffix {other:?}"),
            })
        }
    };

    Ok(mib as u64)
}

fn split_numeric_suffix(input: &str) -> (&str, &str) {
    let split_at = input
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    input.split_at(split_at)
}

/// Natural ("nice") ordering: strings are compared by splitting into
/// alternating runs of digits and non-digits, so `"node2"` sorts before
/// `"node10"`.
pub fn nice_sort(mut xs: Vec<String>) -> Vec<String> {
    xs.sort_by(|a, b| nice_key(a).cmp(&nice_key(b)));
    xs
}

fn nice_key(s: &str) -> Vec<NiceChunk> {
    let mut chunks = Vec::new();
    let mut iter = s.chars().peekable();
    while let Some(&c) = iter.peek() {
        if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&d) = iter.peek() {
                if d.is_ascii_digit() {
                    num.push(d);
                    iter.next();
                } else {
                    break;
                }
            }
            let n: u64 = num.parse().unwrap_or(0);
            chunks.push(NiceChunk::Num(n));
        } else {
            let mut word = String::new();
            while let Some(&d) = iter.peek() {
                if !d.is_ascii_digit() {
                    word.push(d);
                    iter.next();
                } else {
                    break;
                }
            }
            chunks.push(NiceChunk::Text(word));
        }
    }
    chunks
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NiceChunk {
    Num(u64),
    Text(String),
}

/// Join strings with commas. The inverse of [`comma_split`] when no element
/// contains a comma.
pub fn comma_join(xs: &[String]) -> String {
    xs.join(",")
}

/// Split a comma-joined string back into its elements.
pub fn comma_split(s: &str) -> Vec<String> {
    if s.is_empty() {
        return vec![String::new()];
    }
    s.split(',').map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_unit_bare_and_m() {
        assert_eq!(parse_unit("128").unwrap(), 128);
        assert_eq!(parse_unit("128m").unwrap(), 128);
    }

    #[test]
    fn parse_unit_gigabyte() {
        assert_eq!(parse_unit("4g").unwrap(), 4 * 1024);
    }

    #[test]
    fn parse_unit_terabyte() {
        assert_eq!(parse_unit("2t").unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn parse_unit_decimal_megabyte() {
        // 100 * 10^6 / 2^20 = 95.367..., floored to 95
        assert_eq!(parse_unit("100M").unwrap(), 95);
    }

    #[test]
    fn parse_unit_invalid_suffix_fails() {
        assert!(parse_unit("10x").is_err());
        assert!(parse_unit("").is_err());
    }

    #[test]
    fn nice_sort_orders_numerically_within_text() {
        let xs = vec!["node10".to_string(), "node2".to_string(), "node1".to_string()];
        assert_eq!(nice_sort(xs), vec!["node1", "node2", "node10"]);
    }

    #[test]
    fn comma_roundtrip_simple() {
        let xs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(comma_split(&comma_join(&xs)), xs);
    }

    proptest! {
        #[test]
        fn nice_sort_is_idempotent(mut xs in proptest::collection::vec("[a-zA-Z0-9]{0,8}", 0..12)) {
            let once = nice_sort(xs.clone());
            let twice = nice_sort(once.clone());
            prop_assert_eq!(once, twice);
            xs.clear();
        }

        #[test]
        fn comma_join_then_split_roundtrips(xs in proptest::collection::vec("[a-zA-Z0-9]{1,6}", 1..8)) {
            prop_assert_eq!(comma_split(&comma_join(&xs)), xs);
        }
    }
}
