use std::time::Duration;

/// Parse a duration string composed of `[0-9.]+[smhd]` segments (e.g.
/// `"1h30m"`, `"45s"`). Pure numbers without a unit, unknown units, and
/// zero/negative totals are rejected.
#[must_use]
pub fn parse_duration(input: &str) -> Option<Duration> {
    if input.is_empty() {
        return None;
    }

    let mut total_seconds = 0.0_f64;
    let mut number = String::new();
    let mut saw_segment = false;

    for ch in input.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }

        let unit_seconds = match ch {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            'd' => 86_400.0,
            _ => return None,
        };
        if number.is_empty() {
            return None;
        }
        let value: f64 = number.parse().ok()?;
        total_seconds += value * unit_seconds;
        number.clear();
        saw_segment = true;
    }

    if !number.is_empty() {
        // trailing number with no unit
        return None;
    }
    if !saw_segment || total_seconds <= 0.0 {
        return None;
    }

    Some(Duration::from_secs_f64(total_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_segment() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn parses_composite_segments() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn rejects_pure_number() {
        assert_eq!(parse_duration("45"), None);
    }

    #[test]
    fn rejects_trailing_number_without_unit() {
        assert_eq!(parse_duration("1h30"), None);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse_duration("5x"), None);
    }

    #[test]
    fn rejects_zero_result() {
        assert_eq!(parse_duration("0s"), None);
    }

    #[test]
    fn rejects_empty_string() {
        assert_eq!(parse_duration(""), None);
    }
}
