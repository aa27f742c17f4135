//! TXT record string folding.

/// Maximum length of a single character-string in generated TXT records.
pub const TXT_SEGMENT_MAX: usize = 100;

/// Format a TXT record value as one or more quoted strings of at most 100
/// characters each. Multiple strings are wrapped in parentheses so the record
/// spans lines in zone file syntax.
pub fn txt_strings(s: &str) -> String {
    if s.len() <= TXT_SEGMENT_MAX {
        return format!("\"{}\"", s);
    }

    let mut r = String::from("(\n");
    let mut rest = s;
    while !rest.is_empty() {
        let mut n = rest.len().min(TXT_SEGMENT_MAX);
        while !rest.is_char_boundary(n) {
            n -= 1;
        }
        r.push_str(" \t\t\"");
        r.push_str(&rest[..n]);
        r.push_str("\"\n");
        rest = &rest[n..];
    }
    r.push_str("\t)");
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unfold(folded: &str) -> String {
        folded
            .split('"')
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, part)| part)
            .collect()
    }

    #[test]
    fn test_short_single_segment() {
        assert_eq!(txt_strings("v=spf1 mx ~all"), "\"v=spf1 mx ~all\"");
        let exact = "x".repeat(100);
        assert_eq!(txt_strings(&exact), format!("\"{}\"", exact));
    }

    #[test]
    fn test_long_is_folded() {
        let s: String = (0..250).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let folded = txt_strings(&s);
        assert!(folded.starts_with("(\n"));
        assert!(folded.ends_with("\t)"));
        assert_eq!(folded.matches('"').count(), 6);
        assert_eq!(unfold(&folded), s);

        for line in folded.lines().filter(|l| l.contains('"')) {
            let content = line.trim().trim_matches('"');
            assert!(content.len() <= TXT_SEGMENT_MAX);
        }
    }

    #[test]
    fn test_unfold_reproduces_input() {
        for len in [0, 1, 99, 100, 101, 199, 200, 201, 417] {
            let s = "k".repeat(len);
            assert_eq!(unfold(&txt_strings(&s)), s, "length {}", len);
        }
    }
}
