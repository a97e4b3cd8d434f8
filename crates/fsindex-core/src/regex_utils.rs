//! Literal extraction from regular expressions, used to narrow regex searches through
//! the trigram index before the real pattern is evaluated.
//!
//! The extraction is conservative: every returned run is guaranteed to appear in any
//! string the pattern matches. When that cannot be established cheaply (top-level
//! alternation) nothing is returned and the caller falls back to a full filter.

/// Literal runs of at least `min_len` characters that every match of `pattern` contains.
pub fn extract_static_chars(pattern: &str, min_len: usize) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    // number of runs collected when each open group started
    let mut group_starts: Vec<usize> = Vec::new();
    // group depth whose content is discarded because it contains an alternation
    let mut skip_from: Option<usize> = None;

    if has_top_level_alternation(&chars) {
        return Vec::new();
    }

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let skipping = skip_from.is_some_and(|d| depth >= d);

        match c {
            '\\' => {
                if let Some(&escaped) = chars.get(i + 1)
                    && !skipping
                {
                    if is_literal_char(escaped) && !is_escape_class(escaped) {
                        current.push(escaped);
                    } else {
                        flush(&mut current, &mut runs, min_len);
                    }
                }
                i = escape_end(&chars, i);
                continue;
            }
            '[' => {
                flush(&mut current, &mut runs, min_len);
                i = skip_bracket(&chars, i);
                continue;
            }
            '(' => {
                flush(&mut current, &mut runs, min_len);
                depth += 1;
                group_starts.push(runs.len());
                if skip_from.is_none() && group_has_alternation(&chars, i) {
                    skip_from = Some(depth);
                }
            }
            ')' => {
                flush(&mut current, &mut runs, min_len);
                if skip_from == Some(depth) {
                    skip_from = None;
                }
                depth = depth.saturating_sub(1);
                let start = group_starts.pop().unwrap_or(runs.len());
                // a quantified group may be absent entirely
                if matches!(chars.get(i + 1), Some('?' | '*' | '{')) {
                    runs.truncate(start);
                }
            }
            '?' | '*' => {
                // the preceding character is optional
                current.pop();
                flush(&mut current, &mut runs, min_len);
            }
            '{' => {
                current.pop();
                flush(&mut current, &mut runs, min_len);
                if let Some(close) = chars[i..].iter().position(|&ch| ch == '}') {
                    i += close;
                }
            }
            '+' | '.' | '^' | '$' | '|' => flush(&mut current, &mut runs, min_len),
            _ if skipping => {}
            _ if is_literal_char(c) => current.push(c),
            _ => flush(&mut current, &mut runs, min_len),
        }

        i += 1;
    }

    flush(&mut current, &mut runs, min_len);
    runs
}

/// Builds an FTS5 `MATCH` expression requiring every run, or `None` when there is
/// nothing to narrow with.
pub fn trigram_match_expression(pattern: &str, min_len: usize) -> Option<String> {
    let runs = extract_static_chars(pattern, min_len);
    if runs.is_empty() {
        return None;
    }

    Some(
        runs.iter()
            .map(|run| format!("\"{}\"", run.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn flush(current: &mut String, runs: &mut Vec<String>, min_len: usize) {
    if current.chars().count() >= min_len.max(1) {
        runs.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

fn is_literal_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_escape_class(c: char) -> bool {
    matches!(
        c,
        'd' | 'D' | 's' | 'S' | 'w' | 'W' | 'b' | 'B' | 'A' | 'z' | 'Z' | 'p' | 'P' | 'n' | 't'
            | 'r' | 'f' | 'v' | 'a' | 'x' | 'u' | 'U'
    )
}

/// Index just past the escape sequence starting at the backslash at `start`, including
/// the operands of `\x41`, `\x{...}`, `\u0041`, `\U0001F600`, `\pL` and `\p{...}`.
fn escape_end(chars: &[char], start: usize) -> usize {
    let operand = start + 2;
    let fixed_width = match chars.get(start + 1) {
        Some('x') => 2,
        Some('u') => 4,
        Some('U') => 8,
        Some('p' | 'P') => 1,
        _ => return operand,
    };

    if chars.get(operand) == Some(&'{') {
        return chars[operand..]
            .iter()
            .position(|&ch| ch == '}')
            .map_or(chars.len(), |close| operand + close + 1);
    }

    (operand + fixed_width).min(chars.len())
}

/// Index just past the `]` closing the class opened at `start`.
fn skip_bracket(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    // a leading ']' is a literal member
    if chars.get(i) == Some(&']') {
        i += 1;
    }

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }

    chars.len()
}

fn has_top_level_alternation(chars: &[char]) -> bool {
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                i = skip_bracket(chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

fn group_has_alternation(chars: &[char], open: usize) -> bool {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                i = skip_bracket(chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return false;
                }
            }
            '|' => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(pattern: &str) -> Vec<String> {
        extract_static_chars(pattern, 3)
    }

    #[test]
    fn plain_literal_is_kept() {
        assert_eq!(extract("report"), vec!["report"]);
    }

    #[test]
    fn metacharacters_split_runs() {
        assert_eq!(extract("invoice.*2024"), vec!["invoice", "2024"]);
        assert_eq!(extract("^main\\.rs$"), vec!["main"]);
        assert_eq!(extract("foo[0-9]+bar"), vec!["foo", "bar"]);
    }

    #[test]
    fn short_runs_are_dropped() {
        assert_eq!(extract("ab.cd"), Vec::<String>::new());
        assert_eq!(extract_static_chars("ab.cd", 2), vec!["ab", "cd"]);
    }

    #[test]
    fn optional_characters_are_not_required() {
        assert_eq!(extract("colou?r"), vec!["colo"]);
        assert_eq!(extract("colours?"), vec!["colour"]);
        assert_eq!(extract("files*x"), vec!["file"]);
        assert_eq!(extract("report(_final)?"), vec!["report"]);
        assert_eq!(extract("(abc.def)*ghi"), vec!["ghi"]);
    }

    #[test]
    fn escape_classes_break_runs() {
        assert_eq!(extract("img\\d+\\.png"), vec!["img", "png"]);
    }

    #[test]
    fn escape_operands_are_not_literal() {
        assert_eq!(extract(r"\x41BCD"), vec!["BCD"]);
        assert_eq!(extract(r"\x{41}BCD"), vec!["BCD"]);
        assert_eq!(extract(r"\pLabc"), vec!["abc"]);
        assert_eq!(extract(r"\p{Greek}abc"), vec!["abc"]);
        assert_eq!(extract(r"\PNxyz"), vec!["xyz"]);
        assert_eq!(extract(r"\u0041pple"), vec!["pple"]);
        assert_eq!(extract(r"bell\abell"), vec!["bell", "bell"]);
    }

    #[test]
    fn alternation_disables_narrowing() {
        assert!(extract("foo|bar").is_empty());
        assert_eq!(extract("log_(debug|trace)_file"), vec!["log_", "_file"]);
    }

    #[test]
    fn bracket_contents_are_ignored() {
        assert_eq!(extract("data[abc]set"), vec!["data", "set"]);
        assert_eq!(extract("x[]|]yz"), Vec::<String>::new());
    }

    #[test]
    fn builds_quoted_match_expression() {
        assert_eq!(
            trigram_match_expression("invoice.*2024", 3).as_deref(),
            Some("\"invoice\" \"2024\"")
        );
        assert_eq!(trigram_match_expression(".*", 3), None);
    }
}
