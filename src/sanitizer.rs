//! Normalizes author-supplied ritual text into the Rhai dialect the executor runs.
//!
//! Sanitization never fails: anything it cannot confidently repair is passed
//! through unchanged and left for the executor to report.

const FENCE: &str = "```";
const FENCE_TAGS: [&str; 5] = ["javascript", "js", "rhai", "typescript", "ts"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanState {
    Code,
    SingleQuoted,
    DoubleQuoted,
    Template,
    LineComment,
    BlockComment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Region {
    Code,
    Literal,
    Comment,
}

/// Character-at-a-time lexer state that tracks string literals and comments.
pub(crate) struct Scanner {
    state: ScanState,
    escaped: bool,
    comment_prev: Option<char>,
    comment_opening: bool,
}

impl Scanner {
    pub(crate) fn new() -> Self {
        Self {
            state: ScanState::Code,
            escaped: false,
            comment_prev: None,
            comment_opening: false,
        }
    }

    pub(crate) fn state(&self) -> ScanState {
        self.state
    }

    pub(crate) fn is_escaped(&self) -> bool {
        self.escaped
    }

    fn closing_quote(&self) -> Option<char> {
        match self.state {
            ScanState::SingleQuoted => Some('\''),
            ScanState::DoubleQuoted => Some('"'),
            ScanState::Template => Some('`'),
            _ => None,
        }
    }

    /// Feed one character; returns the region the character belongs to.
    pub(crate) fn advance(&mut self, ch: char, next: Option<char>) -> Region {
        match self.state {
            ScanState::Code => match ch {
                '"' => {
                    self.state = ScanState::DoubleQuoted;
                    Region::Literal
                }
                '\'' => {
                    self.state = ScanState::SingleQuoted;
                    Region::Literal
                }
                '`' => {
                    self.state = ScanState::Template;
                    Region::Literal
                }
                '/' if next == Some('/') => {
                    self.state = ScanState::LineComment;
                    Region::Comment
                }
                '/' if next == Some('*') => {
                    self.state = ScanState::BlockComment;
                    self.comment_opening = true;
                    self.comment_prev = None;
                    Region::Comment
                }
                _ => Region::Code,
            },
            ScanState::SingleQuoted | ScanState::DoubleQuoted | ScanState::Template => {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if Some(ch) == self.closing_quote() {
                    self.state = ScanState::Code;
                }
                Region::Literal
            }
            ScanState::LineComment => {
                if ch == '\n' {
                    self.state = ScanState::Code;
                    Region::Code
                } else {
                    Region::Comment
                }
            }
            ScanState::BlockComment => {
                if self.comment_opening {
                    self.comment_opening = false;
                } else if ch == '/' && self.comment_prev == Some('*') {
                    self.state = ScanState::Code;
                } else {
                    self.comment_prev = Some(ch);
                }
                Region::Comment
            }
        }
    }
}

/// Byte offset, character and region for every character of `text`.
pub(crate) fn classify(text: &str) -> Vec<(usize, char, Region)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut scanner = Scanner::new();
    chars
        .iter()
        .enumerate()
        .map(|(i, &(pos, ch))| {
            let next = chars.get(i + 1).map(|&(_, c)| c);
            (pos, ch, scanner.advance(ch, next))
        })
        .collect()
}

/// Sanitize a top-level ritual: fences, string repairs, wrapper stripping, dialect rewrites.
pub fn sanitize(code: &str) -> String {
    let stripped = strip_fences(code);
    let repaired = repair_string_literals(&stripped);
    let unwrapped = strip_ritual_wrapper(&repaired);
    rewrite_outside_strings(&unwrapped).trim().to_string()
}

/// Sanitize code that is evaluated as a bare function body (3D setup, canvas frames).
pub fn sanitize_body(code: &str) -> String {
    let stripped = strip_fences(code);
    let repaired = repair_string_literals(&stripped);
    let body = extract_body(&repaired);
    rewrite_outside_strings(&body).trim().to_string()
}

fn strip_fences(code: &str) -> String {
    let mut s = code.trim();
    if let Some(rest) = s.strip_prefix(FENCE) {
        let tag_len = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let tag = &rest[..tag_len];
        let rest = if FENCE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            &rest[tag_len..]
        } else {
            rest
        };
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_suffix(FENCE) {
        s = rest.trim_end();
    }
    s.to_string()
}

/// Escape raw line breaks inside quoted strings and re-delimit single-quoted
/// strings with double quotes (Rhai reads `'x'` as a character literal).
fn repair_string_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut scanner = Scanner::new();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        let escaped = scanner.is_escaped();
        match scanner.state() {
            ScanState::Code if ch == '\'' => {
                out.push('"');
                scanner.advance(ch, next);
                i += 1;
                continue;
            }
            ScanState::SingleQuoted if !escaped => match ch {
                '\\' if next == Some('\'') => {
                    out.push('\'');
                    i += 2;
                    continue;
                }
                '"' => {
                    out.push_str("\\\"");
                    i += 1;
                    continue;
                }
                '\'' => {
                    out.push('"');
                    scanner.advance(ch, next);
                    i += 1;
                    continue;
                }
                '\n' => {
                    out.push_str("\\n");
                    i += 1;
                    continue;
                }
                '\r' => {
                    i += 1;
                    continue;
                }
                _ => {}
            },
            ScanState::DoubleQuoted if !escaped => match ch {
                '\n' => {
                    out.push_str("\\n");
                    i += 1;
                    continue;
                }
                '\r' => {
                    i += 1;
                    continue;
                }
                _ => {}
            },
            _ => {}
        }
        out.push(ch);
        scanner.advance(ch, next);
        i += 1;
    }
    out
}

/// Small forward-only parser over a `&str` used by the header matchers.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if is_word_start(c) => {}
            _ => return None,
        }
        let end = rest
            .char_indices()
            .find(|&(_, c)| !is_word_char(c))
            .map_or(rest.len(), |(idx, _)| idx);
        self.pos += end;
        Some(&rest[..end])
    }

    /// `( ... )` without nested parentheses; returns the inner text.
    fn eat_flat_parens(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        if !rest.starts_with('(') {
            return None;
        }
        let close = rest.find(')')?;
        self.pos += close + 1;
        Some(&rest[1..close])
    }
}

/// `function (...) {` or `() => {` at the very start; returns the byte length of the header.
fn ritual_wrapper_header(text: &str) -> Option<usize> {
    let mut cur = Cursor::new(text);
    if cur.eat("function") {
        cur.skip_ws();
        cur.eat_flat_parens()?;
        cur.skip_ws();
        return cur.eat("{").then_some(cur.pos);
    }
    let mut cur = Cursor::new(text);
    if cur.eat("(") {
        cur.skip_ws();
        if !cur.eat(")") {
            return None;
        }
        cur.skip_ws();
        if !cur.eat("=>") {
            return None;
        }
        cur.skip_ws();
        return cur.eat("{").then_some(cur.pos);
    }
    None
}

/// Function header for body extraction: named or anonymous, any parameters, brace optional.
fn function_header(text: &str) -> Option<usize> {
    let mut cur = Cursor::new(text);
    if !cur.eat("function") {
        return None;
    }
    match cur.peek() {
        Some(c) if c.is_whitespace() || c == '(' => {}
        _ => return None,
    }
    cur.skip_ws();
    let _ = cur.eat_word();
    cur.skip_ws();
    cur.eat_flat_parens()?;
    cur.skip_ws();
    cur.eat("{");
    cur.skip_ws();
    Some(cur.pos)
}

/// Arrow header for body extraction: `(params) =>` or `param =>`, brace optional.
fn arrow_header(text: &str) -> Option<usize> {
    let mut cur = Cursor::new(text);
    if cur.peek() == Some('(') {
        cur.eat_flat_parens()?;
    } else {
        cur.eat_word()?;
    }
    cur.skip_ws();
    if !cur.eat("=>") {
        return None;
    }
    cur.skip_ws();
    cur.eat("{");
    cur.skip_ws();
    Some(cur.pos)
}

/// Byte index of the `}` that closes an already-open block, ignoring literals and comments.
fn matching_close_brace(text: &str) -> Option<usize> {
    let mut depth = 1i64;
    for (pos, ch, region) in classify(text) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

/// Only closing parens, a single invocation `(...)` and semicolons may follow a wrapper.
fn is_wrapper_tail(tail: &str) -> bool {
    let mut rest = tail;
    let mut closes = 0;
    let mut invoked = false;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return true;
        }
        if let Some(r) = rest.strip_prefix(')') {
            closes += 1;
            if closes > 1 {
                return false;
            }
            rest = r;
            continue;
        }
        if let Some(r) = rest.strip_prefix(';') {
            rest = r;
            continue;
        }
        if !invoked && rest.starts_with('(') {
            match rest.find(')') {
                Some(end) => {
                    invoked = true;
                    rest = &rest[end + 1..];
                    continue;
                }
                None => return false,
            }
        }
        return false;
    }
}

fn strip_ritual_wrapper(text: &str) -> String {
    let trimmed = text.trim();
    let inner = match trimmed.strip_prefix('(') {
        Some(rest) if ritual_wrapper_header(rest.trim_start()).is_some() => rest.trim_start(),
        _ => trimmed,
    };
    let Some(header_len) = ritual_wrapper_header(inner) else {
        return trimmed.to_string();
    };
    let body_and_tail = &inner[header_len..];
    match matching_close_brace(body_and_tail) {
        Some(close) => {
            if is_wrapper_tail(&body_and_tail[close + 1..]) {
                body_and_tail[..close].trim().to_string()
            } else {
                trimmed.to_string()
            }
        }
        // Closing brace never arrived: drop the header and run the rest.
        None => body_and_tail.trim().to_string(),
    }
}

/// Remove `)(args)` or `(args))` left behind by a parenthesized self-invocation.
fn strip_invocation_suffix(text: &str) -> &str {
    let t = text.trim_end().trim_end_matches(';').trim_end();
    let Some(without_close) = t.strip_suffix(')') else {
        return text;
    };
    // `(function(){...})(args)`
    if let Some(open) = without_close.rfind('(') {
        if !without_close[open + 1..].contains(')') {
            if let Some(head) = without_close[..open].trim_end().strip_suffix(')') {
                return head;
            }
        }
    }
    // `(function(){...}(args))`
    if let Some(inner) = without_close.trim_end().strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            if !inner[open + 1..].contains(')') {
                let head = inner[..open].trim_end();
                if head.ends_with('}') {
                    return head;
                }
            }
        }
    }
    text
}

/// After a header is stripped, drop the final `}` if it has no opener left in the body.
fn strip_trailing_wrapper_brace(text: &str) -> String {
    let trimmed = text.trim_end_matches(|c: char| c.is_whitespace() || c == ';');
    if !trimmed.ends_with('}') {
        return text.to_string();
    }
    let mut depth = 0i64;
    for (_, ch, region) in classify(trimmed) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    if depth < 0 {
        trimmed[..trimmed.len() - 1].trim_end().to_string()
    } else {
        text.to_string()
    }
}

fn extract_body(text: &str) -> String {
    let mut s = text.trim().to_string();
    if let Some(rest) = s.strip_prefix('(') {
        let rest = rest.trim_start();
        if function_header(rest).is_some() || arrow_header(rest).is_some() {
            s = strip_invocation_suffix(rest).to_string();
        }
    }
    if let Some(len) = function_header(&s) {
        s = strip_trailing_wrapper_brace(&s[len..]);
    } else if let Some(len) = arrow_header(&s) {
        s = strip_trailing_wrapper_brace(&s[len..]);
    }
    s.trim().to_string()
}

/// Apply the dialect rewrites to code regions only; literals and comments pass through.
fn rewrite_outside_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut segment = String::new();
    for (_, ch, region) in classify(text) {
        if region == Region::Code {
            segment.push(ch);
            continue;
        }
        if !segment.is_empty() {
            out.push_str(&rewrite_code_segment(&segment));
            segment.clear();
        }
        out.push(ch);
    }
    if !segment.is_empty() {
        out.push_str(&rewrite_code_segment(&segment));
    }
    out
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn word_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_word_char(chars[end]) {
        end += 1;
    }
    end
}

fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

fn starts_with_at(chars: &[char], at: usize, token: &str) -> bool {
    let mut idx = at;
    for t in token.chars() {
        if chars.get(idx) != Some(&t) {
            return false;
        }
        idx += 1;
    }
    true
}

fn rewrite_code_segment(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len() + 8);
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        // Judge boundaries on emitted text, not the source.
        let prev = out.chars().next_back();
        let at_boundary = prev.map_or(true, |p| !is_word_char(p) && p != '.' && p != '$');
        let next = chars.get(i + 1).copied();

        if is_word_start(ch) && at_boundary {
            let end = word_end(&chars, i);
            let word = collect(&chars[i..end]);
            match rewrite_word(&chars, &word, end) {
                Some((replacement, resume)) => {
                    out.push_str(&replacement);
                    i = resume;
                }
                None => {
                    out.push_str(&word);
                    i = end;
                }
            }
            continue;
        }

        if ch == '(' {
            if let Some((replacement, resume)) = rewrite_paren_arrow(&chars, i) {
                out.push_str(&replacement);
                i = resume;
                continue;
            }
        }

        if ch == '$' && at_boundary {
            if next == Some('$') && chars.get(i + 2) == Some(&'(') {
                out.push_str("queryAll(");
                i += 3;
                continue;
            }
            if next == Some('(') {
                out.push_str("query(");
                i += 2;
                continue;
            }
        }

        let strict_end = chars.get(i + 3) != Some(&'=');
        if ch == '!' && strict_end && starts_with_at(&chars, i, "!==") {
            out.push_str("!=");
            i += 3;
            continue;
        }
        let operator_before = prev.is_some_and(|p| matches!(p, '=' | '!' | '<' | '>'));
        if ch == '=' && strict_end && !operator_before && starts_with_at(&chars, i, "===") {
            out.push_str("==");
            i += 3;
            continue;
        }

        if (ch == '+' || ch == '-') && next == Some(ch) {
            let op = if ch == '+' { "+=" } else { "-=" };
            let postfix = prev.map_or(false, |p| is_word_char(p) || p == ')' || p == ']');
            if postfix {
                out.push_str(&format!(" {op} 1"));
                i += 2;
                continue;
            }
            if chars.get(i + 2).map_or(false, |&c| is_word_start(c)) {
                let end = word_end(&chars, i + 2);
                out.push_str(&collect(&chars[i + 2..end]));
                out.push_str(&format!(" {op} 1"));
                i = end;
                continue;
            }
        }

        out.push(ch);
        i += 1;
    }
    out
}

fn rewrite_word(chars: &[char], word: &str, end: usize) -> Option<(String, usize)> {
    let followed_by_space = chars.get(end).map_or(false, |c| c.is_whitespace());
    match word {
        "var" | "const" if followed_by_space => Some(("let".to_string(), end)),
        "new" if followed_by_space => Some((String::new(), skip_ws(chars, end))),
        "null" | "undefined" => Some(("()".to_string(), end)),
        "function" => rewrite_function_header(chars, end),
        "for" => rewrite_counted_for(chars, end),
        "console" => rewrite_console(chars, end),
        // `_ => {` is a Rhai switch arm, not a closure.
        "_" => None,
        _ => {
            let arrow = skip_ws(chars, end);
            if !starts_with_at(chars, arrow, "=>") {
                return None;
            }
            let brace = skip_ws(chars, arrow + 2);
            (chars.get(brace) == Some(&'{')).then(|| (format!("|{word}| {{"), brace + 1))
        }
    }
}

fn rewrite_paren_arrow(chars: &[char], open: usize) -> Option<(String, usize)> {
    let close = matching_paren(chars, open)?;
    let arrow = skip_ws(chars, close + 1);
    if !starts_with_at(chars, arrow, "=>") {
        return None;
    }
    let brace = skip_ws(chars, arrow + 2);
    if chars.get(brace) != Some(&'{') {
        return None;
    }
    let params = collect(&chars[open + 1..close]);
    Some((format!("|{}| {{", params.trim()), brace + 1))
}

fn rewrite_function_header(chars: &[char], end: usize) -> Option<(String, usize)> {
    let mut j = skip_ws(chars, end);
    let name = match chars.get(j) {
        Some('(') => None,
        Some(&c) if is_word_start(c) => {
            let name_end = word_end(chars, j);
            let name = collect(&chars[j..name_end]);
            j = skip_ws(chars, name_end);
            if chars.get(j) != Some(&'(') {
                return None;
            }
            Some(name)
        }
        _ => return None,
    };
    let close = matching_paren(chars, j)?;
    let params = collect(&chars[j + 1..close]);
    let brace = skip_ws(chars, close + 1);
    if chars.get(brace) != Some(&'{') {
        return None;
    }
    let header = match name {
        Some(name) => format!("fn {name}({}) {{", params.trim()),
        None => format!("|{}| {{", params.trim()),
    };
    Some((header, brace + 1))
}

fn rewrite_console(chars: &[char], end: usize) -> Option<(String, usize)> {
    for method in [".log", ".warn", ".error", ".info", ".debug"] {
        if starts_with_at(chars, end, method) {
            let open = skip_ws(chars, end + method.len());
            if chars.get(open) == Some(&'(') {
                return Some(("V.log(".to_string(), open + 1));
            }
        }
    }
    None
}

/// `for (let i = a; i < b; i++) {` becomes `for i in a..b {`.
fn rewrite_counted_for(chars: &[char], end: usize) -> Option<(String, usize)> {
    let open = skip_ws(chars, end);
    if chars.get(open) != Some(&'(') {
        return None;
    }
    let close = matching_paren(chars, open)?;
    let brace = skip_ws(chars, close + 1);
    if chars.get(brace) != Some(&'{') {
        return None;
    }
    let header = collect(&chars[open + 1..close]);
    let parts: Vec<&str> = header.split(';').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let init = ["let ", "var ", "const "]
        .iter()
        .find_map(|kw| parts[0].strip_prefix(kw))
        .unwrap_or(parts[0]);
    let (var, start) = init.split_once('=')?;
    let (var, start) = (var.trim(), start.trim());
    if start.is_empty() || var.is_empty() || !var.chars().all(is_word_char) {
        return None;
    }
    let cond = parts[1].strip_prefix(var)?.trim_start();
    let (inclusive, bound) = if let Some(bound) = cond.strip_prefix("<=") {
        (true, bound.trim())
    } else if let Some(bound) = cond.strip_prefix('<') {
        (false, bound.trim())
    } else {
        return None;
    };
    if bound.is_empty() {
        return None;
    }
    let step: String = parts[2].chars().filter(|c| !c.is_whitespace()).collect();
    let accepted = [
        format!("{var}++"),
        format!("++{var}"),
        format!("{var}+=1"),
        format!("{var}={var}+1"),
    ];
    if !accepted.contains(&step) {
        return None;
    }
    let range = if inclusive { "..=" } else { ".." };
    Some((
        format!(
            "for {var} in {}{range}{} {{",
            range_operand(start),
            range_operand(bound)
        ),
        brace + 1,
    ))
}

fn range_operand(expr: &str) -> String {
    let rewritten = rewrite_code_segment(expr);
    if rewritten.chars().all(|c| is_word_char(c) || c == '.') {
        rewritten
    } else {
        format!("({rewritten})")
    }
}
