use regex::Regex;
use std::sync::LazyLock;

static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

static HOSTNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid regex"));

#[must_use]
pub fn is_valid_mac(value: &str) -> bool {
    MAC_RE.is_match(value)
}

#[must_use]
pub fn is_valid_hostname(value: &str) -> bool {
    HOSTNAME_RE.is_match(value)
}
