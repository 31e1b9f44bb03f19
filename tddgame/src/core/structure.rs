//! Structural comparison of Python production sources.
//!
//! Sources are reduced to a normalized token stream that stands in for the
//! syntax tree: comments, blank lines, line continuations, and docstrings
//! disappear; indentation becomes explicit `Indent`/`Dedent` tokens; string
//! and number literals are compared by value rather than spelling; grouping
//! parentheses that cannot change precedence and trailing commas that do not
//! build a tuple are dropped. Two sources are structurally equal when their
//! streams match.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
    #[error("line {line}: unexpected character '{ch}'")]
    UnexpectedChar { line: usize, ch: char },
    #[error("line {line}: dedent does not match any outer indentation level")]
    InconsistentDedent { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Name(String),
    Number(String),
    /// Decoded literal value; `prefix` keeps only the `b` and `f` markers.
    Str { prefix: String, value: String },
    Op(String),
    Newline,
    Indent,
    Dedent,
}

/// True when the two sources differ after dropping non-semantic elements.
pub fn structures_differ(old_source: &str, new_source: &str) -> Result<bool, StructureError> {
    Ok(normalize(old_source)? != normalize(new_source)?)
}

/// Tokenize, fold literals and brackets, and strip docstrings.
pub fn normalize(source: &str) -> Result<Vec<Token>, StructureError> {
    let tokens = tokenize(source)?;
    let tokens = merge_adjacent_strings(tokens);
    let tokens = fold_brackets(tokens);
    Ok(strip_docstrings(tokens))
}

static STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)\A([rRbBuUfF]{0,2})('''(?:[^'\\]|\\.|'[^']|''[^'])*?'''|"""(?:[^"\\]|\\.|"[^"]|""[^"])*?"""|'(?:[^'\\\n]|\\.)*'|"(?:[^"\\\n]|\\.)*")"#,
    )
    .expect("string regex should compile")
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\A(?:0[xX][0-9a-fA-F_]+|0[oO][0-7_]+|0[bB][01_]+|(?:\d[\d_]*\.?[\d_]*|\.\d[\d_]*)(?:[eE][+-]?\d[\d_]*)?[jJ]?)",
    )
    .expect("number regex should compile")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[^\W\d]\w*").expect("name regex should compile"));

static OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\A(?:\*\*=|//=|>>=|<<=|\.\.\.|->|:=|==|!=|<=|>=|\*\*|//|<<|>>|[-+*/%@&|^]=|[-+*/%@&|^~<>()\[\]{}.,:;=!])",
    )
    .expect("operator regex should compile")
});

fn tokenize(source: &str) -> Result<Vec<Token>, StructureError> {
    let mut tokens = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut depth = 0usize;
    let mut line = 1usize;
    let mut pos = 0usize;
    let mut at_line_start = true;
    let mut line_has_tokens = false;

    while pos < source.len() {
        let rest = &source[pos..];

        if at_line_start && depth == 0 {
            let (width, consumed) = indentation(rest);
            let after = &rest[consumed..];
            let blank = after.is_empty()
                || after.starts_with('\n')
                || after.starts_with("\r\n")
                || after.starts_with('#');
            at_line_start = false;
            if !blank {
                let current = indents.last().copied().unwrap_or(0);
                if width > current {
                    indents.push(width);
                    tokens.push(Token::Indent);
                } else {
                    while indents.last().copied().unwrap_or(0) > width {
                        indents.pop();
                        tokens.push(Token::Dedent);
                    }
                    if indents.last().copied().unwrap_or(0) != width {
                        return Err(StructureError::InconsistentDedent { line });
                    }
                }
            }
            pos += consumed;
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };

        if ch == ' ' || ch == '\t' || ch == '\x0c' {
            pos += ch.len_utf8();
            continue;
        }
        if ch == '#' {
            pos += rest.find('\n').unwrap_or(rest.len());
            continue;
        }
        if ch == '\\' && (rest[1..].starts_with('\n') || rest[1..].starts_with("\r\n")) {
            pos += if rest[1..].starts_with('\n') { 2 } else { 3 };
            line += 1;
            continue;
        }
        if ch == '\r' {
            pos += 1;
            continue;
        }
        if ch == '\n' {
            pos += 1;
            line += 1;
            if depth == 0 {
                if line_has_tokens {
                    tokens.push(Token::Newline);
                }
                line_has_tokens = false;
                at_line_start = true;
            }
            continue;
        }

        line_has_tokens = true;

        if let Some(caps) = STRING_RE.captures(rest) {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            let quoted = caps.get(2).map_or("", |m| m.as_str());
            tokens.push(string_token(prefix, quoted));
            line += whole.matches('\n').count();
            pos += whole.len();
            continue;
        }
        if starts_unterminated_string(rest) {
            return Err(StructureError::UnterminatedString { line });
        }
        if let Some(m) = NUMBER_RE.find(rest)
            && !m.as_str().is_empty()
            && m.as_str() != "."
        {
            tokens.push(Token::Number(normalize_number(m.as_str())));
            pos += m.len();
            continue;
        }
        if let Some(m) = NAME_RE.find(rest) {
            tokens.push(Token::Name(m.as_str().to_string()));
            pos += m.len();
            continue;
        }
        if let Some(m) = OP_RE.find(rest) {
            let op = m.as_str();
            match op {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
            tokens.push(Token::Op(op.to_string()));
            pos += m.len();
            continue;
        }
        return Err(StructureError::UnexpectedChar { line, ch });
    }

    if line_has_tokens {
        tokens.push(Token::Newline);
    }
    for _ in 1..indents.len() {
        tokens.push(Token::Dedent);
    }
    Ok(tokens)
}

/// Indentation width (tabs advance to the next multiple of 8) and bytes consumed.
fn indentation(rest: &str) -> (usize, usize) {
    let mut width = 0usize;
    let mut consumed = 0usize;
    for ch in rest.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            '\x0c' => width = 0,
            _ => break,
        }
        consumed += 1;
    }
    (width, consumed)
}

fn starts_unterminated_string(rest: &str) -> bool {
    let body = rest.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    let prefix_len = rest.len() - body.len();
    prefix_len <= 2 && (body.starts_with('\'') || body.starts_with('"'))
}

fn string_token(prefix: &str, quoted: &str) -> Token {
    let quote_len = if quoted.starts_with("'''") || quoted.starts_with("\"\"\"") {
        3
    } else {
        1
    };
    let body = &quoted[quote_len..quoted.len() - quote_len];
    let prefix = prefix.to_ascii_lowercase();
    let bytes = prefix.contains('b');
    let value = if prefix.contains('r') {
        body.to_string()
    } else {
        decode_escapes(body, bytes)
    };
    let mut kept: Vec<char> = prefix.chars().filter(|c| matches!(c, 'b' | 'f')).collect();
    kept.sort_unstable();
    Token::Str {
        prefix: kept.into_iter().collect(),
        value,
    }
}

/// Resolve backslash escapes the way the Python lexer does for non-raw literals.
fn decode_escapes(body: &str, bytes: bool) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(escaped) = chars.next() else {
            out.push('\\');
            break;
        };
        match escaped {
            '\n' => {}
            '\r' => {
                chars.next_if_eq(&'\n');
            }
            '\\' | '\'' | '"' => out.push(escaped),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.next_if(|c| c.is_digit(8)) {
                        Some(digit) => code = code * 8 + digit.to_digit(8).unwrap_or(0),
                        None => break,
                    }
                }
                push_code_point(&mut out, code, escaped, "");
            }
            'x' => push_hex_escape(&mut out, &mut chars, 'x', 2),
            'u' if !bytes => push_hex_escape(&mut out, &mut chars, 'u', 4),
            'U' if !bytes => push_hex_escape(&mut out, &mut chars, 'U', 8),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

fn push_hex_escape(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    marker: char,
    digits: usize,
) {
    let mut hex = String::with_capacity(digits);
    while hex.len() < digits {
        match chars.next_if(char::is_ascii_hexdigit) {
            Some(digit) => hex.push(digit),
            None => break,
        }
    }
    match u32::from_str_radix(&hex, 16) {
        Ok(code) if hex.len() == digits => push_code_point(out, code, marker, &hex),
        _ => {
            out.push('\\');
            out.push(marker);
            out.push_str(&hex);
        }
    }
}

fn push_code_point(out: &mut String, code: u32, marker: char, spelled: &str) {
    match char::from_u32(code) {
        Some(ch) => out.push(ch),
        None => {
            out.push('\\');
            out.push(marker);
            out.push_str(spelled);
        }
    }
}

/// Canonical spelling of a numeric literal: integers in decimal, floats and
/// imaginary parts by their `f64` value.
fn normalize_number(raw: &str) -> String {
    let cleaned = raw.replace('_', "").to_ascii_lowercase();
    let radix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(marker, radix)| cleaned.strip_prefix(marker).map(|digits| (digits, radix)));
    if let Some((digits, radix)) = radix {
        return u128::from_str_radix(digits, radix).map_or(cleaned.clone(), |v| v.to_string());
    }
    if let Some(imaginary) = cleaned.strip_suffix('j') {
        return imaginary
            .parse::<f64>()
            .map_or(cleaned.clone(), |value| format!("{value:?}j"));
    }
    if cleaned.contains(['.', 'e']) {
        return cleaned.parse::<f64>().map_or(cleaned.clone(), |value| format!("{value:?}"));
    }
    cleaned.parse::<u128>().map_or(cleaned, |value| value.to_string())
}

/// Adjacent string literals form a single constant, as in the Python grammar.
fn merge_adjacent_strings(tokens: Vec<Token>) -> Vec<Token> {
    let mut merged: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Token::Str { prefix, value } = &token
            && let Some(Token::Str {
                prefix: last_prefix,
                value: last_value,
            }) = merged.last_mut()
            && last_prefix.contains('b') == prefix.contains('b')
        {
            last_value.push_str(value);
            if prefix.contains('f') && !last_prefix.contains('f') {
                last_prefix.push('f');
            }
            continue;
        }
        merged.push(token);
    }
    merged
}

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

struct OpenBracket {
    start: usize,
    kind: String,
    trailer: bool,
    commas: usize,
    has_for: bool,
}

/// Drop trailing commas that do not build a one-element tuple, and grouping
/// parentheses around a whole expression.
fn fold_brackets(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut open: Vec<OpenBracket> = Vec::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match &token {
            Token::Op(op) if matches!(op.as_str(), "(" | "[" | "{") => {
                open.push(OpenBracket {
                    start: out.len(),
                    kind: op.clone(),
                    trailer: opens_trailer(out.last()),
                    commas: 0,
                    has_for: false,
                });
            }
            Token::Op(op) if op == "," => {
                if let Some(top) = open.last_mut() {
                    top.commas += 1;
                }
            }
            Token::Name(name) if name == "for" => {
                if let Some(top) = open.last_mut() {
                    top.has_for = true;
                }
            }
            Token::Op(op) if matches!(op.as_str(), ")" | "]" | "}") => {
                let Some(mut bracket) = open.pop() else {
                    out.push(token.clone());
                    continue;
                };
                let trailing = matches!(out.last(), Some(Token::Op(last)) if last == ",");
                let builds_tuple = bracket.commas == 1
                    && match bracket.kind.as_str() {
                        "(" => !bracket.trailer,
                        "[" => bracket.trailer,
                        _ => false,
                    };
                if trailing && !builds_tuple {
                    out.pop();
                    bracket.commas = bracket.commas.saturating_sub(1);
                }
                let before = bracket.start.checked_sub(1).and_then(|i| out.get(i));
                let redundant_group = bracket.kind == "("
                    && !bracket.trailer
                    && bracket.commas == 0
                    && !bracket.has_for
                    && out.len() > bracket.start + 1
                    && expression_starts_after(before)
                    && expression_ends_before(iter.peek())
                    && !(starts_line(before) && is_op(iter.peek(), ":"));
                if redundant_group {
                    out.remove(bracket.start);
                    continue;
                }
            }
            _ => {}
        }
        out.push(token);
    }
    out
}

fn is_op(token: Option<&Token>, expected: &str) -> bool {
    matches!(token, Some(Token::Op(op)) if op == expected)
}

fn starts_line(token: Option<&Token>) -> bool {
    matches!(token, None | Some(Token::Newline | Token::Indent | Token::Dedent))
}

fn is_assignment(op: &str) -> bool {
    op.ends_with('=') && !matches!(op, "==" | "!=" | "<=" | ">=")
}

/// A bracket right after an operand is a call, subscript, or parameter list.
fn opens_trailer(previous: Option<&Token>) -> bool {
    match previous {
        Some(Token::Name(name)) => !KEYWORDS.contains(&name.as_str()),
        Some(Token::Str { .. } | Token::Number(_)) => true,
        Some(Token::Op(op)) => matches!(op.as_str(), ")" | "]" | "}"),
        _ => false,
    }
}

fn expression_starts_after(previous: Option<&Token>) -> bool {
    match previous {
        Some(Token::Op(op)) => {
            is_assignment(op) || matches!(op.as_str(), "(" | "[" | "{" | "," | ":" | "->")
        }
        Some(Token::Name(name)) => matches!(
            name.as_str(),
            "return" | "if" | "elif" | "while" | "assert" | "del" | "yield" | "else"
        ),
        other => starts_line(other),
    }
}

fn expression_ends_before(next: Option<&Token>) -> bool {
    match next {
        None | Some(Token::Newline) => true,
        Some(Token::Name(name)) => matches!(name.as_str(), "for" | "async"),
        Some(Token::Op(op)) => {
            is_assignment(op) || matches!(op.as_str(), ")" | "]" | "}" | "," | ":")
        }
        _ => false,
    }
}

/// Drop string-only statements that open a module, class, or function body.
fn strip_docstrings(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0usize;
    let mut logical_start = 0usize;

    if is_docstring_at(&tokens, 0) {
        i = 2;
    }

    while i < tokens.len() {
        let token = &tokens[i];
        out.push(token.clone());
        i += 1;
        match token {
            Token::Newline => {
                let opens_definition = is_definition_header(&out[logical_start..]);
                logical_start = out.len();
                if opens_definition && matches!(tokens.get(i), Some(Token::Indent)) {
                    out.push(Token::Indent);
                    i += 1;
                    logical_start = out.len();
                    if is_docstring_at(&tokens, i) {
                        i += 2;
                    }
                }
            }
            Token::Indent | Token::Dedent => logical_start = out.len(),
            _ => {}
        }
    }
    out
}

fn is_docstring_at(tokens: &[Token], index: usize) -> bool {
    matches!(
        (tokens.get(index), tokens.get(index + 1)),
        (Some(Token::Str { prefix, .. }), Some(Token::Newline)) if !prefix.contains('f') && !prefix.contains('b')
    )
}

fn is_definition_header(line: &[Token]) -> bool {
    let mut names = line.iter().filter_map(|token| match token {
        Token::Name(name) => Some(name.as_str()),
        _ => None,
    });
    match (line.first(), names.next()) {
        (Some(Token::Name(_)), Some("def" | "class")) => true,
        (Some(Token::Name(_)), Some("async")) => names.next() == Some("def"),
        _ => false,
    }
}
