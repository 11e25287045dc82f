//! Find contact emails embedded in free text.
//!
//! Letters match in either case, so `Contact@Example.COM` is found too. Matches are returned as
//! written and never case-folded.
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `local@domain.tld`, also tolerating the obfuscated `local at domain dot tld` form.
/// The regex crate guarantees linear time matching, so arbitrary descriptions are safe to scan.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*",
        r"(?:@|\sat\s)",
        r"(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.|\sdot\s))+",
        r"[a-z0-9](?:[a-z0-9-]*[a-z0-9])?",
    ))
    .expect("email pattern is a valid regex")
});

/// Return every distinct email found in `text`, exactly as written.
pub fn extract_emails(text: &str) -> HashSet<String> {
    EMAIL_REGEX
        .find_iter(text)
        .map(|found| found.as_str().to_owned())
        .collect()
}

/// Whether `candidate` is, in its entirety, something `extract_emails` would return.
pub fn is_email(candidate: &str) -> bool {
    EMAIL_REGEX
        .find(candidate)
        .is_some_and(|found| found.start() == 0 && found.end() == candidate.len())
}
