//! Structured view of the `zone` statements in a `named.conf`.
//!
//! Only enough of the grammar is understood to find each zone statement, its
//! name, `type` and `file`, and the exact byte range it occupies. Everything
//! else in the file is carried through untouched when a zone is added or
//! removed. Comments (`//`, `#`, `/* */`) and quoted strings are honoured, and
//! zones nested inside `view` blocks are found as well.

use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDeclaration {
    pub domain: String,
    pub class: Option<String>,
    pub zone_type: Option<String>,
    pub file: Option<String>,
    /// Whole statement including its indentation and line break.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl ZoneDeclaration {
    pub fn matches(&self, domain: &str) -> bool {
        normalize_domain(&self.domain) == normalize_domain(domain)
    }
}

/// Case-insensitive, trailing dot ignored.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Semi,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn text(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(s) | TokenKind::Quoted(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn is_word(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|off| from + off)
        .unwrap_or(bytes.len())
}

fn tokenize(input: &str) -> Vec<Token> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let single = move |kind| Token { kind, start: i, end: i + 1 };
        match bytes[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b'#' => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match input[i + 2..].find("*/") {
                    Some(off) => i + 2 + off + 2,
                    None => bytes.len(),
                };
            }
            b'{' => {
                tokens.push(single(TokenKind::Open));
                i += 1;
            }
            b'}' => {
                tokens.push(single(TokenKind::Close));
                i += 1;
            }
            b';' => {
                tokens.push(single(TokenKind::Semi));
                i += 1;
            }
            b'"' => {
                let start = i;
                let mut j = i + 1;
                let mut value = String::new();
                let mut run = j;
                while j < bytes.len() && bytes[j] != b'"' {
                    if bytes[j] == b'\\' && j + 1 < bytes.len() {
                        value.push_str(&input[run..j]);
                        run = j + 1;
                        j += 2;
                    } else {
                        j += 1;
                    }
                }
                value.push_str(&input[run..j.min(bytes.len())]);
                let end = (j + 1).min(bytes.len());
                tokens.push(Token {
                    kind: TokenKind::Quoted(value),
                    start,
                    end,
                });
                i = end;
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i];
                    let comment = b == b'/' && matches!(bytes.get(i + 1), Some(b'/') | Some(b'*'));
                    if b.is_ascii_whitespace() || b"{};\"#".contains(&b) || comment {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word(input[start..i].to_string()),
                    start,
                    end: i,
                });
            }
        }
    }

    tokens
}

/// Parses one `zone` statement starting at `tokens[at]`. Returns the
/// declaration (span not yet widened to whole lines) and the index after it.
fn parse_zone(tokens: &[Token], at: usize) -> Option<(ZoneDeclaration, usize)> {
    let mut i = at + 1;
    let domain = tokens.get(i)?.text()?.to_string();
    i += 1;

    let class = match &tokens.get(i)?.kind {
        TokenKind::Word(class) => {
            i += 1;
            Some(class.clone())
        }
        _ => None,
    };

    if tokens.get(i)?.kind != TokenKind::Open {
        return None;
    }
    i += 1;

    let mut zone_type = None;
    let mut file = None;
    let mut depth = 1;
    let mut statement: Vec<&Token> = Vec::new();

    while depth > 0 {
        let token = tokens.get(i)?;
        i += 1;
        match token.kind {
            TokenKind::Open => depth += 1,
            TokenKind::Close => depth -= 1,
            TokenKind::Semi if depth == 1 => {
                if let [keyword, value, ..] = statement.as_slice() {
                    if keyword.is_word("type") {
                        zone_type = value.text().map(str::to_string);
                    } else if keyword.is_word("file") {
                        file = value.text().map(str::to_string);
                    }
                }
                statement.clear();
            }
            _ if depth == 1 => statement.push(token),
            _ => {}
        }
    }

    let mut end = tokens[i - 1].end;
    if let Some(semi) = tokens.get(i).filter(|t| t.kind == TokenKind::Semi) {
        end = semi.end;
        i += 1;
    }

    Some((
        ZoneDeclaration {
            domain,
            class,
            zone_type,
            file,
            span: tokens[at].start..end,
        },
        i,
    ))
}

/// Widens `span` to whole lines when the statement has them to itself.
fn widen_to_lines(conf: &str, span: Range<usize>) -> Range<usize> {
    let mut start = span.start;
    let line_start = conf[..start].rfind('\n').map(|p| p + 1).unwrap_or(0);
    if conf[line_start..start].trim().is_empty() {
        start = line_start;
    }

    let mut end = span.end;
    let rest = &conf[end..];
    match rest.find('\n') {
        Some(nl) if rest[..nl].trim().is_empty() => end += nl + 1,
        None if rest.trim().is_empty() => end = conf.len(),
        _ => {}
    }

    start..end
}

/// All zone statements in file order.
pub fn parse_zones(conf: &str) -> Vec<ZoneDeclaration> {
    let tokens = tokenize(conf);
    let mut zones = Vec::new();
    let mut i = 0;
    let mut statement_start = true;

    while i < tokens.len() {
        if statement_start && tokens[i].is_word("zone") {
            if let Some((mut zone, next)) = parse_zone(&tokens, i) {
                zone.span = widen_to_lines(conf, zone.span);
                zones.push(zone);
                i = next;
                continue;
            }
        }

        statement_start = matches!(
            tokens[i].kind,
            TokenKind::Semi | TokenKind::Open | TokenKind::Close
        );
        i += 1;
    }

    zones
}

pub fn find_zone(conf: &str, domain: &str) -> Option<ZoneDeclaration> {
    parse_zones(conf).into_iter().find(|zone| zone.matches(domain))
}

/// `conf` without the statement for `domain`, or `None` if there is none.
pub fn remove_zone(conf: &str, domain: &str) -> Option<String> {
    let zone = find_zone(conf, domain)?;
    let mut updated = String::with_capacity(conf.len());
    updated.push_str(&conf[..zone.span.start]);
    updated.push_str(&conf[zone.span.end..]);
    Some(updated)
}

/// Appends `statement` on its own line.
pub fn append_zone(conf: &str, statement: &str) -> String {
    let mut updated = String::with_capacity(conf.len() + statement.len() + 2);
    updated.push_str(conf);
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(statement.trim_end());
    updated.push('\n');
    updated
}
