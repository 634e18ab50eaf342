use crate::errors::CheckerError;
use regex::Regex;
use std::sync::LazyLock;

// s1.abc01.measurement-lab.org, s1-abc01.measurement-lab.org
static SWITCH_HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^s1[.-]([a-zA-Z]{3}[0-9a-zA-Z]{2})").expect("switch hostname regex is valid")
});

/// Extracts the five-character site code from a switch hostname.
pub fn site_from_hostname(hostname: &str) -> Result<&str, CheckerError> {
    SWITCH_HOSTNAME
        .captures(hostname)
        .and_then(|captures| captures.get(1))
        .map(|site| site.as_str())
        .ok_or_else(|| CheckerError::InvalidTarget(hostname.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_from_hostname() {
        assert_eq!(
            site_from_hostname("s1.abc01.measurement-lab.org").unwrap(),
            "abc01"
        );
        assert_eq!(
            site_from_hostname("s1-abc0t.measurement-lab.org").unwrap(),
            "abc0t"
        );
        assert_eq!(site_from_hostname("s1.lga03").unwrap(), "lga03");
    }

    #[test]
    fn test_invalid_hostname() {
        for hostname in ["invalid", "", "s2.abc01.measurement-lab.org", "x.s1.abc01", "s1.ab01"] {
            let err = site_from_hostname(hostname).unwrap_err();
            assert!(matches!(err, CheckerError::InvalidTarget(ref h) if h == hostname));
        }

        assert_eq!(
            site_from_hostname("invalid").unwrap_err().to_string(),
            "cannot extract site from hostname: invalid"
        );
    }
}
