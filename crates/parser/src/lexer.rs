use smol_str::SmolStr;

use crate::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier: keywords, mnemonics, `v7`, `block3`, type names.
    Ident(SmolStr),
    /// `%name` — function or argument symbol.
    Percent(SmolStr),
    /// `$name` — global symbol.
    Dollar(SmolStr),
    Int(i64),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Eq,
    Arrow,
    Dot,
    At,
    Plus,
    Newline,
    /// Quoted literal, e.g. the hex payload of `x"6d6f64"`.
    Str(SmolStr),
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    let mut line = 1u32;

    let push = |token: Token, line: u32, tokens: &mut Vec<Spanned>| {
        // Collapse runs of newlines.
        if token == Token::Newline
            && matches!(tokens.last(), None | Some(Spanned { token: Token::Newline, .. }))
        {
            return;
        }
        tokens.push(Spanned { token, line });
    };

    while let Some(&ch) = chars.peek() {
        match ch {
            '\n' => {
                chars.next();
                push(Token::Newline, line, &mut tokens);
                line += 1;
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                // Comment to end of line.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' => {
                chars.next();
                push(Token::LParen, line, &mut tokens);
            }
            ')' => {
                chars.next();
                push(Token::RParen, line, &mut tokens);
            }
            '{' => {
                chars.next();
                push(Token::LBrace, line, &mut tokens);
            }
            '}' => {
                chars.next();
                push(Token::RBrace, line, &mut tokens);
            }
            '[' => {
                chars.next();
                push(Token::LBracket, line, &mut tokens);
            }
            ']' => {
                chars.next();
                push(Token::RBracket, line, &mut tokens);
            }
            ',' => {
                chars.next();
                push(Token::Comma, line, &mut tokens);
            }
            ':' => {
                chars.next();
                push(Token::Colon, line, &mut tokens);
            }
            '=' => {
                chars.next();
                push(Token::Eq, line, &mut tokens);
            }
            '.' => {
                chars.next();
                push(Token::Dot, line, &mut tokens);
            }
            '@' => {
                chars.next();
                push(Token::At, line, &mut tokens);
            }
            '+' => {
                chars.next();
                push(Token::Plus, line, &mut tokens);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') => return Err(ParseError::UnexpectedChar { line, ch: '\n' }),
                        Some(c) => s.push(c),
                        None => return Err(ParseError::UnexpectedEof),
                    }
                }
                push(Token::Str(SmolStr::new(s)), line, &mut tokens);
            }
            '%' | '$' => {
                chars.next();
                let name = lex_symbol(&mut chars);
                if name.is_empty() {
                    return Err(ParseError::UnexpectedChar { line, ch });
                }
                let token = if ch == '%' {
                    Token::Percent(name)
                } else {
                    Token::Dollar(name)
                };
                push(token, line, &mut tokens);
            }
            '-' => {
                chars.next();
                match chars.peek() {
                    Some('>') => {
                        chars.next();
                        push(Token::Arrow, line, &mut tokens);
                    }
                    Some(c) if c.is_ascii_digit() => {
                        let value = lex_int(&mut chars, line)?;
                        push(Token::Int(value.wrapping_neg()), line, &mut tokens);
                    }
                    _ => return Err(ParseError::UnexpectedChar { line, ch: '-' }),
                }
            }
            c if c.is_ascii_digit() => {
                let value = lex_int(&mut chars, line)?;
                push(Token::Int(value), line, &mut tokens);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name = lex_ident(&mut chars);
                push(Token::Ident(name), line, &mut tokens);
            }
            _ => return Err(ParseError::UnexpectedChar { line, ch }),
        }
    }

    Ok(tokens)
}

/// Bare identifier: mnemonics, keywords, `v7`, `block3`. Stops at dots so
/// `gep.i64` lexes as ident, dot, ident.
fn lex_ident(chars: &mut std::iter::Peekable<std::str::Chars>) -> SmolStr {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }
    SmolStr::new(s)
}

/// `%`/`$`-prefixed symbol. Mangled names carry interior dots
/// (`saxpy.jit.region`), so dots join as long as an identifier character
/// follows.
fn lex_symbol(chars: &mut std::iter::Peekable<std::str::Chars>) -> SmolStr {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            s.push(c);
            chars.next();
        } else if c == '.' {
            let mut look = chars.clone();
            look.next();
            match look.peek() {
                Some(&n) if n.is_ascii_alphanumeric() || n == '_' => {
                    s.push('.');
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }
    SmolStr::new(s)
}

fn lex_int(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    line: u32,
) -> Result<i64, ParseError> {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let value = if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map(|v| v as i64)
    } else {
        s.parse::<i64>()
    };
    value.map_err(|_| ParseError::BadInteger { line })
}
