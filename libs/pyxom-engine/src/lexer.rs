/// Python Source Lexer
///
/// **Responsibility:**
/// Turn submitted source into a flat token stream that the security
/// validator and the static checks can inspect without executing anything.
///
/// **Guarantees:**
/// - Comments never produce tokens
/// - String literals (any prefix, single or triple quoted) are one opaque token,
///   so text inside a string can never look like code
/// - `Newline` is only emitted between logical lines (bracket depth 0),
///   and never twice in a row
/// - Identifiers are whole tokens: `osprey` is never `os`
///
/// It is not a full Python tokenizer: numbers are scanned loosely and
/// code inside f-string replacement fields stays part of the string token.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    Str,
    Op,
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// 1-based source line where the token starts
    pub line: usize,
    /// Byte offset from the start of that line
    pub col: usize,
}

impl<'a> Token<'a> {
    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_newline(&self) -> bool {
        self.kind == TokenKind::Newline
    }
}

const TWO_CHAR_OPS: &[&str] = &[
    "==", "!=", "<=", ">=", "->", ":=", "**", "//", "<<", ">>", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=", "@=",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

fn is_ident_start(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphabetic() || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Find the end (exclusive) of the string literal whose opening quote is at `pos`
fn scan_string(bytes: &[u8], pos: usize) -> usize {
    let len = bytes.len();
    let quote = bytes[pos];
    let triple = pos + 2 < len && bytes[pos + 1] == quote && bytes[pos + 2] == quote;
    let mut j = if triple { pos + 3 } else { pos + 1 };

    while j < len {
        let b = bytes[j];
        if b == b'\\' {
            j += 2;
            continue;
        }
        if triple {
            if b == quote && j + 2 < len && bytes[j + 1] == quote && bytes[j + 2] == quote {
                return j + 3;
            }
        } else if b == quote {
            return j + 1;
        } else if b == b'\n' {
            // Unterminated single-quoted literal ends at the line break
            return j;
        }
        j += 1;
    }

    len.min(j)
}

/// Tokenize Python source
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;
    let mut depth = 0usize;

    while i < len {
        let c = bytes[i];
        match c {
            b'\n' => {
                let after_content = tokens.last().map_or(false, |t| !t.is_newline());
                if depth == 0 && after_content {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        text: &source[i..i + 1],
                        line,
                        col: i - line_start,
                    });
                }
                i += 1;
                line += 1;
                line_start = i;
            }
            b' ' | b'\t' | b'\r' | b'\x0c' => i += 1,
            b'#' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'\\' => {
                // Explicit line continuation
                let mut j = i + 1;
                if j < len && bytes[j] == b'\r' {
                    j += 1;
                }
                if j < len && bytes[j] == b'\n' {
                    line += 1;
                    line_start = j + 1;
                    i = j + 1;
                } else {
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let end = scan_string(bytes, i);
                push_string(source, &mut tokens, i, end, &mut line, &mut line_start);
                i = end;
            }
            _ if c.is_ascii_digit() || (c == b'.' && i + 1 < len && bytes[i + 1].is_ascii_digit()) => {
                let start = i;
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: &source[start..i],
                    line,
                    col: start - line_start,
                });
            }
            _ if is_ident_start(c) => {
                let start = i;
                while i < len && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                let word = &source[start..i];
                let quoted = i < len && (bytes[i] == b'"' || bytes[i] == b'\'');
                if quoted && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str()) {
                    let end = scan_string(bytes, i);
                    push_string(source, &mut tokens, start, end, &mut line, &mut line_start);
                    i = end;
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Name,
                        text: word,
                        line,
                        col: start - line_start,
                    });
                }
            }
            _ => {
                let start = i;
                // `get` keeps a multibyte character after the operator from splitting the slice
                let pair = source.get(i..i + 2);
                let width = if pair.map_or(false, |op| TWO_CHAR_OPS.contains(&op)) { 2 } else { 1 };
                i += width;
                match c {
                    b'(' | b'[' | b'{' => depth += 1,
                    b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token {
                    kind: TokenKind::Op,
                    text: &source[start..i],
                    line,
                    col: start - line_start,
                });
            }
        }
    }

    tokens
}

fn push_string<'a>(
    source: &'a str,
    tokens: &mut Vec<Token<'a>>,
    start: usize,
    end: usize,
    line: &mut usize,
    line_start: &mut usize,
) {
    let text = &source[start..end];
    tokens.push(Token {
        kind: TokenKind::Str,
        text,
        line: *line,
        col: start - *line_start,
    });
    if let Some(last_newline) = text.rfind('\n') {
        *line += text.matches('\n').count();
        *line_start = start + last_newline + 1;
    }
}

/// True when `idx` is the first token of a logical line
pub fn starts_line(tokens: &[Token<'_>], idx: usize) -> bool {
    idx == 0 || tokens[idx - 1].is_newline()
}

/// True when `idx` is the first token of a simple statement: start of a
/// logical line, after `;`, or after the `:` of a one-line compound header
pub fn starts_statement(tokens: &[Token<'_>], idx: usize) -> bool {
    if starts_line(tokens, idx) {
        return true;
    }
    let prev = &tokens[idx - 1];
    prev.is_op(";") || prev.is_op(":")
}

/// Token range of the suite that belongs to the compound statement whose
/// keyword is at `header_idx` (`while`, `for`, `def`, `if`, ...).
///
/// Handles both `while cond: body` on one line and indented suites.
/// Returns an empty range when the header is malformed.
pub fn block_extent(tokens: &[Token<'_>], header_idx: usize) -> Range<usize> {
    let empty = header_idx + 1..header_idx + 1;
    let mut depth = 0usize;
    let mut colon = None;

    for (idx, token) in tokens.iter().enumerate().skip(header_idx + 1) {
        match token.kind {
            TokenKind::Newline => break,
            TokenKind::Op if matches!(token.text, "(" | "[" | "{") => depth += 1,
            TokenKind::Op if matches!(token.text, ")" | "]" | "}") => depth = depth.saturating_sub(1),
            TokenKind::Op if token.text == ":" && depth == 0 => {
                colon = Some(idx);
                break;
            }
            _ => {}
        }
    }

    let Some(colon) = colon else {
        return empty;
    };

    // One-line suite
    if colon + 1 < tokens.len() && !tokens[colon + 1].is_newline() {
        let end = tokens[colon + 1..]
            .iter()
            .position(|t| t.is_newline())
            .map_or(tokens.len(), |offset| colon + 1 + offset);
        return colon + 1..end;
    }

    let header_col = tokens[header_idx].col;
    let start = (colon + 2).min(tokens.len());
    let mut end = start;
    while end < tokens.len() {
        if starts_line(tokens, end) && tokens[end].col <= header_col {
            break;
        }
        end += 1;
    }

    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
        tokens.iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_simple_statement() {
        let tokens = tokenize("x = int(input())\n");
        assert_eq!(texts(&tokens), vec!["x", "=", "int", "(", "input", "(", ")", ")", "\n"]);
        assert_eq!(tokens[0].kind, TokenKind::Name);
        assert_eq!(tokens[8].kind, TokenKind::Newline);
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = tokenize("# import os\nprint(1)  # eval(x)\n");
        assert_eq!(texts(&tokens), vec!["print", "(", "1", ")", "\n"]);
    }

    #[test]
    fn test_strings_are_opaque() {
        let tokens = tokenize("print(\"eval(\" + 'open(x)')\n");
        let names: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Name).map(|t| t.text).collect();
        assert_eq!(names, vec!["print"]);
        assert_eq!(tokens[2].text, "\"eval(\"");
        assert_eq!(tokens[4].text, "'open(x)'");
    }

    #[test]
    fn test_prefixed_and_triple_quoted_strings() {
        let source = "s = f\"{a}\"\nt = rb'\\d'\nu = \"\"\"line one\nimport os\n\"\"\"\nv = 1\n";
        let tokens = tokenize(source);

        let strings: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Str).collect();
        assert_eq!(strings.len(), 3);
        assert_eq!(strings[0].text, "f\"{a}\"");
        assert_eq!(strings[1].text, "rb'\\d'");
        assert!(strings[2].text.contains("import os"));

        let v = tokens.iter().find(|t| t.is_name("v")).unwrap();
        assert_eq!(v.line, 6);
        assert_eq!(v.col, 0);
        assert!(!tokens.iter().any(|t| t.is_name("import")));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let tokens = tokenize("s = 'it\\'s'\nx = 1\n");
        assert_eq!(tokens[2].text, "'it\\'s'");
        assert!(tokens.iter().any(|t| t.is_name("x")));
    }

    #[test]
    fn test_no_newline_inside_brackets() {
        let tokens = tokenize("total = sum([\n    1,\n    2,\n])\nprint(total)\n");
        let newlines = tokens.iter().filter(|t| t.is_newline()).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_blank_lines_collapse() {
        let tokens = tokenize("a = 1\n\n\n# note\n\nb = 2\n");
        assert_eq!(texts(&tokens), vec!["a", "=", "1", "\n", "b", "=", "2", "\n"]);
        assert_eq!(tokens[4].line, 6);
    }

    #[test]
    fn test_line_continuation() {
        let tokens = tokenize("x = 1 + \\\n    2\n");
        assert_eq!(texts(&tokens), vec!["x", "=", "1", "+", "2", "\n"]);
        assert_eq!(tokens[4].line, 2);
    }

    #[test]
    fn test_two_char_ops() {
        let tokens = tokenize("if a == b and (n := 3) >= 2: pass\n");
        assert!(tokens.iter().any(|t| t.is_op("==")));
        assert!(tokens.iter().any(|t| t.is_op(":=")));
        assert!(tokens.iter().any(|t| t.is_op(">=")));
    }

    #[test]
    fn test_non_ascii_identifiers() {
        let tokens = tokenize("año = 2024\nprint(año)\n");
        assert_eq!(tokens[0].text, "año");
        assert_eq!(tokens[0].kind, TokenKind::Name);
    }

    #[test]
    fn test_operator_before_non_ascii_identifier() {
        let tokens = tokenize("ñandú = 3\nprint(ñandú)\n");
        let names: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Name).map(|t| t.text).collect();
        assert_eq!(names, vec!["ñandú", "print", "ñandú"]);

        for source in ["x=ñ\n", "(ñ)\n", "y = -ñ\n", "z=é*ü\n", "a<ß\n"] {
            let tokens = tokenize(source);
            assert!(tokens.iter().any(|t| t.kind == TokenKind::Name && !t.text.is_ascii()), "{}", source);
        }
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("range(10_000_000)\nx = 1.5e3\n");
        assert_eq!(tokens[2].kind, TokenKind::Number);
        assert_eq!(tokens[2].text, "10_000_000");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Number && t.text == "1.5e3"));
    }

    #[test]
    fn test_block_extent_indented_suite() {
        let source = "while True:\n    n = n + 1\n    if n > 3:\n        break\nprint(n)\n";
        let tokens = tokenize(source);
        let range = block_extent(&tokens, 0);
        let body = &tokens[range];

        assert!(body.iter().any(|t| t.is_name("break")));
        assert!(!body.iter().any(|t| t.is_name("print")));
    }

    #[test]
    fn test_block_extent_same_line_suite() {
        let tokens = tokenize("while x: x -= 1\nprint(x)\n");
        let range = block_extent(&tokens, 0);
        assert_eq!(texts(&tokens[range]), vec!["x", "-=", "1"]);
    }

    #[test]
    fn test_block_extent_nested_header() {
        let source = "def f(n):\n    while True:\n        n += 1\n    return n\n";
        let tokens = tokenize(source);
        let while_idx = tokens.iter().position(|t| t.is_name("while")).unwrap();
        let body = &tokens[block_extent(&tokens, while_idx)];

        assert!(!body.iter().any(|t| t.is_name("return")));
        assert!(body.iter().any(|t| t.is_name("n")));
    }

    #[test]
    fn test_block_extent_ignores_colons_in_brackets() {
        let tokens = tokenize("for k in d[1:3]:\n    print(k)\n");
        let body = &tokens[block_extent(&tokens, 0)];
        assert_eq!(body[0].text, "print");
    }

    #[test]
    fn test_starts_statement() {
        let tokens = tokenize("x = 1; import os\nif x: import sys\n");
        let imports: Vec<_> = tokens
            .iter()
            .enumerate()
            .filter(|(i, t)| t.is_name("import") && starts_statement(&tokens, *i))
            .collect();
        assert_eq!(imports.len(), 2);
    }
}
