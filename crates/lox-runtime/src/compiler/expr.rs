//! Expression compilation: the Pratt core
//!
//! Each token kind maps to an optional prefix rule, an optional infix rule,
//! and a precedence. `parse_precedence` drives the pair: consume one token,
//! run its prefix rule, then fold infix rules while the next operator binds
//! at least as tightly as the floor. Assignment is special-cased through
//! `can_assign` so only variable, property, and `super` rules accept `=`.

use super::Parser;
use crate::bytecode::Opcode;
use crate::token::TokenKind;
use crate::value::Value;

/// Precedence ladder, lowest binds loosest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// One step tighter; used for left-associative binary operators
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

impl<'src, 'h> Parser<'src, 'h> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            let infix = Self::rule(self.previous.kind)
                .infix
                .expect("infix rule missing for operator token");
            infix(self, can_assign);
        }

        // A leftover `=` here means the target was not assignable.
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// The parse-rule table
    fn rule(kind: TokenKind) -> ParseRule<'src, 'h> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            TokenKind::LeftParen => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.grouping(ca)),
                Some(|p: &mut Parser<'src, 'h>, ca| p.call(ca)),
                Precedence::Call,
            ),
            TokenKind::Dot => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.dot(ca)),
                Precedence::Call,
            ),
            TokenKind::Minus => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.unary(ca)),
                Some(|p: &mut Parser<'src, 'h>, ca| p.binary(ca)),
                Precedence::Term,
            ),
            TokenKind::Plus => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.binary(ca)),
                Precedence::Term,
            ),
            TokenKind::Slash | TokenKind::Star => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.binary(ca)),
                Precedence::Factor,
            ),
            TokenKind::Bang => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.unary(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::BangEqual | TokenKind::EqualEqual => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.binary(ca)),
                Precedence::Equality,
            ),
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.binary(ca)),
                Precedence::Comparison,
            ),
            TokenKind::Identifier => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.variable(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::String => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.string(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::Number => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.number(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::And => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.and(ca)),
                Precedence::And,
            ),
            TokenKind::Or => (
                None,
                Some(|p: &mut Parser<'src, 'h>, ca| p.or(ca)),
                Precedence::Or,
            ),
            TokenKind::False | TokenKind::True | TokenKind::Nil => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.literal(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::Super => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.super_(ca)),
                None,
                Precedence::None,
            ),
            TokenKind::This => (
                Some(|p: &mut Parser<'src, 'h>, ca| p.this(ca)),
                None,
                Precedence::None,
            ),
            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    // === Prefix rules ===

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self
            .previous
            .lexeme
            .parse()
            .expect("lexer produced an invalid number literal");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Trim the surrounding quotes; contents are raw, no escapes.
        let interned = self.heap.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(Opcode::False),
            TokenKind::True => self.emit_op(Opcode::True),
            TokenKind::Nil => self.emit_op(Opcode::Nil),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(Opcode::Negate),
            TokenKind::Bang => self.emit_op(Opcode::Not),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().expect("no class state").has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_kind(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_byte(Opcode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op_byte(Opcode::GetSuper, name);
        }
    }

    // === Infix rules ===

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Self::rule(operator).precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_ops(Opcode::Equal, Opcode::Not),
            TokenKind::EqualEqual => self.emit_op(Opcode::Equal),
            TokenKind::Greater => self.emit_op(Opcode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(Opcode::Less, Opcode::Not),
            TokenKind::Less => self.emit_op(Opcode::Less),
            TokenKind::LessEqual => self.emit_ops(Opcode::Greater, Opcode::Not),
            TokenKind::Plus => self.emit_op(Opcode::Add),
            TokenKind::Minus => self.emit_op(Opcode::Subtract),
            TokenKind::Star => self.emit_op(Opcode::Multiply),
            TokenKind::Slash => self.emit_op(Opcode::Divide),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(Opcode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(Opcode::SetProperty, name);
        } else if self.match_kind(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op_byte(Opcode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_op_byte(Opcode::GetProperty, name);
        }
    }

    /// `and` short-circuits by jumping over the right operand when the left
    /// is falsey; the jump peeks, so the left value is the result
    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Opcode::JumpIfFalse);
        let end_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }
}
