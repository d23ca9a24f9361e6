use crate::error::ParseError;
use crate::expr::lexer::{Spanned, Token, tokenize};
use crate::expr::{BinOp, Literal, Subscript, SyntaxNode, UnaryOp};

/// Parse an expression into its syntax tree.
///
/// Anything outside the pure-expression grammar (assignments, multiple
/// statements, dangling tokens) is reported as a [`ParseError`].
pub fn parse(input: &str) -> Result<SyntaxNode, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::new(0, "empty expression"));
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: input.len(),
    };
    let node = parser.parse_comparison()?;

    match parser.peek() {
        None => Ok(node),
        Some(Token::Assign) => Err(parser.error("assignment is not allowed in an expression")),
        Some(Token::Semicolon) => Err(parser.error("only a single expression is allowed")),
        Some(token) => Err(parser.error(format!("unexpected token {token:?}"))),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos).map(|s| &s.token);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.offset)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.offset(), message)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(t) if t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(other) => Err(self.error(format!("expected {expected:?}, got {other:?}"))),
            None => Err(self.error(format!("expected {expected:?}, got end of input"))),
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_comparison(&mut self) -> Result<SyntaxNode, ParseError> {
        let lhs = self.parse_or()?;
        let Some(op) = self.peek().and_then(comparison_op) else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.parse_or()?;
        if self.peek().and_then(comparison_op).is_some() {
            return Err(self.error("chained comparisons are not supported"));
        }
        Ok(SyntaxNode::binary(op, lhs, rhs))
    }

    fn parse_or(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut lhs = self.parse_xor()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.advance();
            let rhs = self.parse_xor()?;
            lhs = SyntaxNode::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = SyntaxNode::binary(BinOp::Xor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut lhs = self.parse_additive()?;
        while matches!(self.peek(), Some(Token::Amp)) {
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = SyntaxNode::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = SyntaxNode::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = SyntaxNode::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<SyntaxNode, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            Some(Token::Tilde) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(SyntaxNode::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<SyntaxNode, ParseError> {
        let base = self.parse_postfix()?;
        if matches!(self.peek(), Some(Token::StarStar)) {
            self.advance();
            // Right-associative, and the exponent may carry its own sign.
            let exponent = self.parse_unary()?;
            return Ok(SyntaxNode::binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<SyntaxNode, ParseError> {
        let mut node = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::LBracket)) {
            self.advance();
            let subscript = self.parse_subscript()?;
            self.expect(&Token::RBracket)?;
            node = attach_subscript(node, subscript);
        }
        Ok(node)
    }

    fn parse_subscript(&mut self) -> Result<Subscript, ParseError> {
        let lower = self.parse_slice_part()?;
        if !matches!(self.peek(), Some(Token::Colon)) {
            return match lower {
                Some(index) => Ok(Subscript::Index(index)),
                None => Err(self.error("empty subscript")),
            };
        }
        self.advance();
        let upper = self.parse_slice_part()?;
        let step = if matches!(self.peek(), Some(Token::Colon)) {
            self.advance();
            self.parse_slice_part()?
        } else {
            None
        };
        Ok(Subscript::Slice { lower, upper, step })
    }

    fn parse_slice_part(&mut self) -> Result<Option<Box<SyntaxNode>>, ParseError> {
        match self.peek() {
            Some(Token::Colon) | Some(Token::RBracket) => Ok(None),
            _ => Ok(Some(Box::new(self.parse_comparison()?))),
        }
    }

    fn parse_primary(&mut self) -> Result<SyntaxNode, ParseError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Num(n)) => Ok(SyntaxNode::Constant(Literal::Number(*n))),
            Some(Token::Str(s)) => Ok(SyntaxNode::Constant(Literal::Text(s.clone()))),
            Some(Token::Ident(name)) => self.parse_name(name),
            Some(Token::LParen) => {
                let node = self.parse_comparison()?;
                self.expect(&Token::RParen)?;
                Ok(node)
            }
            Some(token) => Err(ParseError::new(
                offset,
                format!("unexpected token {token:?}"),
            )),
            None => Err(ParseError::new(offset, "unexpected end of input")),
        }
    }

    fn parse_name(&mut self, first: &str) -> Result<SyntaxNode, ParseError> {
        match first {
            "True" => return Ok(SyntaxNode::Constant(Literal::Bool(true))),
            "False" => return Ok(SyntaxNode::Constant(Literal::Bool(false))),
            "and" | "or" | "not" | "if" | "else" | "lambda" | "for" | "in" | "is" => {
                return Err(ParseError::new(
                    self.tokens[self.pos - 1].offset,
                    format!("keyword '{first}' is not supported, use & | ~ instead"),
                ));
            }
            _ => {}
        }

        // Dotted chains name one column.
        let mut name = first.to_string();
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(part)) => {
                    name.push('.');
                    name.push_str(part);
                }
                _ => return Err(self.error("expected a name after '.'")),
            }
        }

        if !matches!(self.peek(), Some(Token::LParen)) {
            return Ok(SyntaxNode::Symbol {
                name,
                subscript: None,
            });
        }

        self.advance();
        let mut arguments = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                arguments.push(self.parse_comparison()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RParen)?;

        Ok(SyntaxNode::Function {
            name,
            arguments,
            subscript: None,
        })
    }
}

fn comparison_op(token: &Token) -> Option<BinOp> {
    match token {
        Token::Eq => Some(BinOp::Eq),
        Token::Ne => Some(BinOp::Ne),
        Token::Lt => Some(BinOp::Lt),
        Token::Le => Some(BinOp::Le),
        Token::Gt => Some(BinOp::Gt),
        Token::Ge => Some(BinOp::Ge),
        _ => None,
    }
}

/// Names and calls keep their subscript; anything else is sliced through the
/// `slice` function.
fn attach_subscript(node: SyntaxNode, subscript: Subscript) -> SyntaxNode {
    match node {
        SyntaxNode::Symbol {
            name,
            subscript: None,
        } => SyntaxNode::Symbol {
            name,
            subscript: Some(subscript),
        },
        SyntaxNode::Function {
            name,
            arguments,
            subscript: None,
        } => SyntaxNode::Function {
            name,
            arguments,
            subscript: Some(subscript),
        },
        other => SyntaxNode::Function {
            name: "slice".into(),
            arguments: vec![other],
            subscript: Some(subscript),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        assert_eq!(parse("1").unwrap(), SyntaxNode::number(1.0));
        assert_eq!(
            parse("'txt'").unwrap(),
            SyntaxNode::Constant(Literal::Text("txt".into()))
        );
    }

    #[test]
    fn test_binary_op_of_symbols() {
        assert_eq!(
            parse("a + b").unwrap(),
            SyntaxNode::binary(BinOp::Add, SyntaxNode::symbol("a"), SyntaxNode::symbol("b"))
        );
    }

    #[test]
    fn test_precedence() {
        let tree = parse("a*2 + 1").unwrap();
        assert_eq!(
            tree,
            SyntaxNode::binary(
                BinOp::Add,
                SyntaxNode::binary(BinOp::Mul, SyntaxNode::symbol("a"), SyntaxNode::number(2.0)),
                SyntaxNode::number(1.0),
            )
        );

        // `-a**2` is `-(a**2)`
        let SyntaxNode::UnaryOp { op, operand } = parse("-a**2").unwrap() else {
            panic!("expected a unary node");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(*operand, SyntaxNode::BinaryOp { op: BinOp::Pow, .. }));

        // comparisons bind looser than `&`
        let tree = parse("a > 1 & b").unwrap();
        let SyntaxNode::BinaryOp { op, right, .. } = tree else {
            panic!("expected a binary node");
        };
        assert_eq!(op, BinOp::Gt);
        assert!(matches!(*right, SyntaxNode::BinaryOp { op: BinOp::And, .. }));
    }

    #[test]
    fn test_function_with_arguments() {
        let tree = parse("count(a + b)").unwrap();
        let SyntaxNode::Function {
            name,
            arguments,
            subscript,
        } = tree
        else {
            panic!("expected a function node");
        };
        assert_eq!(name, "count");
        assert_eq!(arguments.len(), 1);
        assert!(matches!(arguments[0], SyntaxNode::BinaryOp { op: BinOp::Add, .. }));
        assert!(subscript.is_none());

        let tree = parse("f()").unwrap();
        assert!(matches!(tree, SyntaxNode::Function { ref arguments, .. } if arguments.is_empty()));
    }

    #[test]
    fn test_dotted_names_fold() {
        assert_eq!(parse("Muon.Px").unwrap(), SyntaxNode::symbol("Muon.Px"));
        assert_eq!(parse("a . b . c").unwrap(), SyntaxNode::symbol("a.b.c"));
        let tree = parse("ev.f(x)").unwrap();
        assert!(matches!(tree, SyntaxNode::Function { ref name, .. } if name == "ev.f"));
    }

    #[test]
    fn test_symbol_slice() {
        let tree = parse("c[1:]").unwrap();
        assert_eq!(
            tree,
            SyntaxNode::Symbol {
                name: "c".into(),
                subscript: Some(Subscript::Slice {
                    lower: Some(Box::new(SyntaxNode::number(1.0))),
                    upper: None,
                    step: None,
                }),
            }
        );

        let tree = parse("c[::2]").unwrap();
        assert!(matches!(
            tree,
            SyntaxNode::Symbol {
                subscript: Some(Subscript::Slice { lower: None, upper: None, step: Some(_) }),
                ..
            }
        ));
    }

    #[test]
    fn test_index_and_call_subscript() {
        let tree = parse("x[i]").unwrap();
        assert!(matches!(
            tree,
            SyntaxNode::Symbol { subscript: Some(Subscript::Index(_)), .. }
        ));

        let tree = parse("f(x)[0]").unwrap();
        assert!(matches!(
            tree,
            SyntaxNode::Function { ref name, subscript: Some(Subscript::Index(_)), .. } if name == "f"
        ));
    }

    #[test]
    fn test_subscript_on_expression_becomes_slice() {
        let tree = parse("(a + b)[1:]").unwrap();
        let SyntaxNode::Function {
            name, arguments, ..
        } = tree
        else {
            panic!("expected a function node");
        };
        assert_eq!(name, "slice");
        assert!(matches!(arguments[0], SyntaxNode::BinaryOp { .. }));

        let tree = parse("x[1:][0]").unwrap();
        let SyntaxNode::Function {
            name, arguments, ..
        } = tree
        else {
            panic!("expected a function node");
        };
        assert_eq!(name, "slice");
        assert!(matches!(
            arguments[0],
            SyntaxNode::Symbol { subscript: Some(Subscript::Slice { .. }), .. }
        ));
    }

    #[test]
    fn test_rejects_statements() {
        assert!(parse("x = 1").unwrap_err().message.contains("assignment"));
        assert!(parse("a; b").unwrap_err().message.contains("single expression"));
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a + b").is_err());
        assert!(parse("a < b < c").is_err());
        assert!(parse("a and b").is_err());
        assert!(parse("x[]").is_err());
    }

    #[test]
    fn test_error_offset() {
        let err = parse("a + * b").unwrap_err();
        assert_eq!(err.offset, 4);
    }
}
