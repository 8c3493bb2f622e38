//! Input validation for the interactive prompts.

const LOCAL_FORBIDDEN: &[char] = &['<', '>', '(', ')', '[', ']', '\\', '.', ',', ';', ':', '@', '"'];

/// Accepts `local@domain.tld`, quoted local parts and `[a.b.c.d]` literal domains.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    is_valid_local_part(local) && is_valid_domain(domain)
}

fn is_valid_local_part(local: &str) -> bool {
    if local.len() > 2 && local.starts_with('"') && local.ends_with('"') {
        return true;
    }
    !local.is_empty()
        && local.split('.').all(|atom| {
            !atom.is_empty()
                && atom
                    .chars()
                    .all(|c| !c.is_whitespace() && !LOCAL_FORBIDDEN.contains(&c))
        })
}

fn is_valid_domain(domain: &str) -> bool {
    if let Some(literal) = domain.strip_prefix('[').and_then(|d| d.strip_suffix(']')) {
        let octets: Vec<&str> = literal.split('.').collect();
        return octets.len() == 4
            && octets
                .iter()
                .all(|o| (1..=3).contains(&o.len()) && o.chars().all(|c| c.is_ascii_digit()));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    !rest.is_empty()
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && rest.iter().all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Parses a scan period in whole seconds.
pub fn parse_scan_period(input: &str) -> Option<u32> {
    input.trim().parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_addresses() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last@mail.example.co"));
        assert!(is_valid_email("ops-team@sub-domain.example.org"));
        assert!(is_valid_email("\"odd user\"@example.com"));
        assert!(is_valid_email("root@[192.168.0.1]"));
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@b.c"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@.com"));
        assert!(!is_valid_email("us er@example.com"));
        assert!(!is_valid_email("user..name@example.com"));
        assert!(!is_valid_email("user@example.c0m"));
        assert!(!is_valid_email("root@[1.2.3]"));
    }

    #[test]
    fn test_scan_period() {
        assert_eq!(parse_scan_period("5"), Some(5));
        assert_eq!(parse_scan_period(" 0 "), Some(0));
        assert_eq!(parse_scan_period("-1"), None);
        assert_eq!(parse_scan_period("soon"), None);
        assert_eq!(parse_scan_period(""), None);
    }
}
