//! Suspicious-number heuristics.
//!
//! A fixed, ordered set of anchored matchers applied to the caller number as
//! received (not normalized). The set is deliberately small: it only flags
//! numbers that open with a long run of one repeated digit.

use regex::Regex;

/// Heuristic classifier consulted when a number is on neither list.
pub trait NumberClassifier: Send + Sync {
    fn matches_suspicious(&self, number: &str) -> bool;
    fn name(&self) -> &str;
}

/// One detector in the classifier's ordered set.
#[derive(Debug)]
pub enum SuspiciousPattern {
    /// Full-string regex match.
    Anchored { name: &'static str, regex: Regex },
    /// Optional `+`, then one digit repeated at least `min_run` times, then
    /// only digits.
    RepeatedLeadingDigit { name: &'static str, min_run: usize },
}

impl SuspiciousPattern {
    pub fn name(&self) -> &'static str {
        match self {
            SuspiciousPattern::Anchored { name, .. }
            | SuspiciousPattern::RepeatedLeadingDigit { name, .. } => *name,
        }
    }

    pub fn is_match(&self, number: &str) -> bool {
        match self {
            SuspiciousPattern::Anchored { regex, .. } => regex.is_match(number),
            SuspiciousPattern::RepeatedLeadingDigit { min_run, .. } => {
                repeated_leading_digit(number, *min_run)
            }
        }
    }
}

fn repeated_leading_digit(number: &str, min_run: usize) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    let bytes = digits.as_bytes();
    let first = match bytes.first() {
        Some(b) if b.is_ascii_digit() => *b,
        _ => return false,
    };
    let run = bytes.iter().take_while(|&&b| b == first).count();
    run >= min_run && bytes[run..].iter().all(u8::is_ascii_digit)
}

pub struct PatternClassifier {
    patterns: Vec<SuspiciousPattern>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternClassifier {
    pub fn new() -> Self {
        // Built-in literals; `[0-9]` rather than `\d` to stay ASCII-only.
        let leading_zeros =
            Regex::new(r"^\+?0{5,}[0-9]*$").expect("Failed to compile leading zeros pattern");
        let leading_ones =
            Regex::new(r"^\+?1{5,}[0-9]*$").expect("Failed to compile leading ones pattern");

        PatternClassifier {
            patterns: vec![
                SuspiciousPattern::Anchored {
                    name: "leading_zeros",
                    regex: leading_zeros,
                },
                SuspiciousPattern::Anchored {
                    name: "leading_ones",
                    regex: leading_ones,
                },
                SuspiciousPattern::RepeatedLeadingDigit {
                    name: "repeated_digit",
                    min_run: 5,
                },
            ],
        }
    }

    /// First detector, in fixed order, that matches the whole number.
    pub fn first_match(&self, number: &str) -> Option<&SuspiciousPattern> {
        if number.is_empty() {
            return None;
        }
        self.patterns.iter().find(|p| p.is_match(number))
    }

    pub fn patterns(&self) -> &[SuspiciousPattern] {
        &self.patterns
    }
}

impl NumberClassifier for PatternClassifier {
    fn matches_suspicious(&self, number: &str) -> bool {
        match self.first_match(number) {
            Some(pattern) => {
                log::debug!("{} matches suspicious pattern {}", number, pattern.name());
                true
            }
            None => false,
        }
    }

    fn name(&self) -> &str {
        "pattern_classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(number: &str) -> Option<&'static str> {
        PatternClassifier::new().first_match(number).map(|p| p.name())
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(matched("+00000012"), Some("leading_zeros"));
        assert_eq!(matched("00000"), Some("leading_zeros"));
        assert_eq!(matched("0000"), None);
    }

    #[test]
    fn test_leading_ones() {
        assert_eq!(matched("+11111199"), Some("leading_ones"));
        assert_eq!(matched("11111"), Some("leading_ones"));
    }

    #[test]
    fn test_repeated_digit() {
        assert_eq!(matched("5555555"), Some("repeated_digit"));
        assert_eq!(matched("+999997"), Some("repeated_digit"));
        assert_eq!(matched("55554"), None);
    }

    #[test]
    fn test_order_is_fixed() {
        let classifier = PatternClassifier::new();
        let names: Vec<&str> = classifier.patterns().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["leading_zeros", "leading_ones", "repeated_digit"]);
    }

    #[test]
    fn test_anchored_not_substring() {
        // A run in the middle does not count
        assert_eq!(matched("+14155555555"), None);
        // Trailing non-digits break the full match
        assert_eq!(matched("00000abc"), None);
        assert_eq!(matched("55555 "), None);
        // Formatting characters are not stripped before matching
        assert_eq!(matched("+1 1111 1111"), None);
    }

    #[test]
    fn test_legitimate_numbers_pass() {
        let classifier = PatternClassifier::new();
        assert!(!classifier.matches_suspicious("+14155551234"));
        assert!(!classifier.matches_suspicious("+5511987654321"));
        assert!(!classifier.matches_suspicious(""));
        assert!(!classifier.matches_suspicious("+"));
        assert!(!classifier.matches_suspicious("+++++"));
    }
}
