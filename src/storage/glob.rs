//! Glob matching for `scan` field filters.
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes over raw
//! bytes, optionally ignoring ASCII case.

/// A compiled `MATCH` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
    nocase: bool,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: pattern.as_ref().to_vec(),
            nocase: false,
        }
    }

    pub fn nocase(mut self) -> Self {
        self.nocase = true;
        self
    }

    /// Returns true if the pattern matches everything.
    pub fn is_match_all(&self) -> bool {
        !self.pattern.is_empty() && self.pattern.iter().all(|b| *b == b'*')
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        self.match_from(&self.pattern, text)
    }

    fn match_from(&self, mut pattern: &[u8], mut text: &[u8]) -> bool {
        while let Some(&p) = pattern.first() {
            match p {
                b'*' => {
                    while pattern.first() == Some(&b'*') {
                        pattern = &pattern[1..];
                    }
                    if pattern.is_empty() {
                        return true;
                    }
                    return (0..=text.len()).any(|skip| self.match_from(pattern, &text[skip..]));
                }
                b'?' => {
                    if text.is_empty() {
                        return false;
                    }
                    pattern = &pattern[1..];
                    text = &text[1..];
                }
                b'[' => {
                    let Some(&c) = text.first() else {
                        return false;
                    };
                    let Some((matched, rest)) = self.match_class(&pattern[1..], c) else {
                        return false;
                    };
                    if !matched {
                        return false;
                    }
                    pattern = rest;
                    text = &text[1..];
                }
                b'\\' if pattern.len() > 1 => {
                    if !self.same(pattern[1], text.first()) {
                        return false;
                    }
                    pattern = &pattern[2..];
                    text = &text[1..];
                }
                literal => {
                    if !self.same(literal, text.first()) {
                        return false;
                    }
                    pattern = &pattern[1..];
                    text = &text[1..];
                }
            }
        }
        text.is_empty()
    }

    /// Matches `c` against a class body (after `[`). Returns the match result
    /// and the pattern after the closing `]`, or `None` if unterminated.
    fn match_class<'p>(&self, body: &'p [u8], c: u8) -> Option<(bool, &'p [u8])> {
        let (negate, mut i) = match body.first() {
            Some(b'^') => (true, 1),
            _ => (false, 0),
        };
        let c = self.fold(c);
        let mut matched = false;

        while i < body.len() && body[i] != b']' {
            if body[i] == b'\\' && i + 1 < body.len() {
                i += 1;
                matched |= self.fold(body[i]) == c;
            } else if i + 2 < body.len() && body[i + 1] == b'-' && body[i + 2] != b']' {
                let (mut lo, mut hi) = (self.fold(body[i]), self.fold(body[i + 2]));
                if lo > hi {
                    std::mem::swap(&mut lo, &mut hi);
                }
                matched |= (lo..=hi).contains(&c);
                i += 2;
            } else {
                matched |= self.fold(body[i]) == c;
            }
            i += 1;
        }

        if i >= body.len() {
            return None;
        }
        Some((matched != negate, &body[i + 1..]))
    }

    #[inline]
    fn fold(&self, b: u8) -> u8 {
        if self.nocase {
            b.to_ascii_lowercase()
        } else {
            b
        }
    }

    #[inline]
    fn same(&self, p: u8, t: Option<&u8>) -> bool {
        t.is_some_and(|t| self.fold(p) == self.fold(*t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        let pattern = GlobPattern::new("tok*n");
        assert!(pattern.matches(b"token"));
        assert!(pattern.matches(b"tokn"));
        assert!(pattern.matches(b"tok::session::n"));
        assert!(!pattern.matches(b"tokens"));
        assert!(GlobPattern::new("**").is_match_all());
        assert!(GlobPattern::new("*").matches(b""));
    }

    #[test]
    fn test_question_mark() {
        let pattern = GlobPattern::new("f?eld");
        assert!(pattern.matches(b"field"));
        assert!(!pattern.matches(b"feld"));
    }

    #[test]
    fn test_classes() {
        assert!(GlobPattern::new("f[io]eld").matches(b"field"));
        assert!(!GlobPattern::new("f[^io]eld").matches(b"field"));
        assert!(GlobPattern::new("v[0-9]").matches(b"v7"));
        assert!(!GlobPattern::new("v[0-9]").matches(b"vx"));
        assert!(!GlobPattern::new("v[0-9").matches(b"v7"));
    }

    #[test]
    fn test_escape() {
        assert!(GlobPattern::new("a\\*b").matches(b"a*b"));
        assert!(!GlobPattern::new("a\\*b").matches(b"axb"));
    }

    #[test]
    fn test_nocase() {
        assert!(!GlobPattern::new("FIELD*").matches(b"field:1"));
        assert!(GlobPattern::new("FIELD*").nocase().matches(b"field:1"));
        assert!(GlobPattern::new("[A-C]x").nocase().matches(b"bX"));
    }
}
