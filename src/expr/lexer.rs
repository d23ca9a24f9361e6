use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// A lone `=`; never valid, kept so the parser can name the mistake.
    Assign,
    /// `;`, which would separate statements.
    Semicolon,
}

/// A token together with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        // Two-character operators
        if i + 1 < bytes.len() {
            let tok = match &bytes[i..i + 2] {
                b"**" => Some(Token::StarStar),
                b"//" => Some(Token::SlashSlash),
                b"==" => Some(Token::Eq),
                b"!=" => Some(Token::Ne),
                b"<=" => Some(Token::Le),
                b">=" => Some(Token::Ge),
                _ => None,
            };
            if let Some(token) = tok {
                tokens.push(Spanned {
                    token,
                    offset: start,
                });
                i += 2;
                continue;
            }
        }

        let single = match c {
            b'+' => Some(Token::Plus),
            b'-' => Some(Token::Minus),
            b'*' => Some(Token::Star),
            b'/' => Some(Token::Slash),
            b'%' => Some(Token::Percent),
            b'&' => Some(Token::Amp),
            b'|' => Some(Token::Pipe),
            b'^' => Some(Token::Caret),
            b'~' => Some(Token::Tilde),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b',' => Some(Token::Comma),
            b':' => Some(Token::Colon),
            b'<' => Some(Token::Lt),
            b'>' => Some(Token::Gt),
            b'=' => Some(Token::Assign),
            b';' => Some(Token::Semicolon),
            b'.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => Some(Token::Dot),
            _ => None,
        };

        if let Some(token) = single {
            tokens.push(Spanned {
                token,
                offset: start,
            });
            i += 1;
            continue;
        }

        let token = match c {
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                let s = &input[start..i];
                let n: f64 = s
                    .parse()
                    .map_err(|_| ParseError::new(start, format!("invalid number '{s}'")))?;
                Token::Num(n)
            }
            b'\'' | b'"' => {
                let quote = c;
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i == bytes.len() {
                    return Err(ParseError::new(start, "unterminated string literal"));
                }
                i += 1;
                Token::Str(input[start + 1..i - 1].to_string())
            }
            _ if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                Token::Ident(input[start..i].to_string())
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ParseError::new(start, format!("unexpected character '{ch}'")));
            }
        };

        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    let start = i;
    while i < bytes.len() {
        let c = bytes[i];
        let exponent_sign =
            (c == b'+' || c == b'-') && i > start && matches!(bytes[i - 1], b'e' | b'E');
        if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || exponent_sign {
            i += 1;
        } else {
            break;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a**2 // b != c"),
            vec![
                Token::Ident("a".into()),
                Token::StarStar,
                Token::Num(2.0),
                Token::SlashSlash,
                Token::Ident("b".into()),
                Token::Ne,
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5e-3"), vec![Token::Num(1.5e-3)]);
        assert_eq!(kinds(".5"), vec![Token::Num(0.5)]);
        assert_eq!(
            kinds("a.b"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into())
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds("'abc'"), vec![Token::Str("abc".into())]);
        assert_eq!(kinds("\"x y\""), vec![Token::Str("x y".into())]);
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_offsets() {
        let tokens = tokenize("a  + $").unwrap_err();
        assert_eq!(tokens.offset, 5);
    }
}
