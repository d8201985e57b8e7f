//! Safe arithmetic/boolean expression compiler for alert predicates.
//!
//! Grammar (EBNF):
//!
//! ```text
//! Expr   = Or ;
//! Or     = And { "||" And } ;
//! And    = Cmp { "&&" Cmp } ;
//! Cmp    = Add [ ( ">" | ">=" | "<" | "<=" | "==" | "!=" ) Add ] ;
//! Add    = Mul { ("+"|"-") Mul } ;
//! Mul    = Unary { ("*"|"/") Unary } ;
//! Unary  = [ "!" | "-" ] Primary ;
//! Primary= Number | Ident | "(" Expr ")" ;
//! ```
//!
//! Identifiers resolve against the metric map, defaulting to 0 when absent;
//! division by zero yields 0; booleans are 1.0/0.0 with non-zero truthiness.
//! The AST is capped at 256 nodes.

use std::collections::HashMap;

use thiserror::Error;

/// Maximum number of AST nodes one expression may compile to.
pub const MAX_NODES: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("syntax error at byte {pos}: {reason}")]
    Syntax { pos: usize, reason: String },
    #[error("expression exceeds {MAX_NODES} nodes")]
    NodeLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
enum Node {
    Num(f64),
    Ident(String),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
}

/// A compiled predicate; cache it for repeated evaluations.
#[derive(Debug, Clone)]
pub struct Expr {
    root: Node,
}

impl Expr {
    pub fn compile(src: &str) -> Result<Expr, ExprError> {
        if src.trim().is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser {
            src,
            pos: 0,
            nodes: 0,
        };
        let root = parser.parse_expr()?;
        parser.skip_ws();
        if parser.pos < src.len() {
            return Err(ExprError::Syntax {
                pos: parser.pos,
                reason: format!("unexpected `{}`", &src[parser.pos..]),
            });
        }
        Ok(Expr { root })
    }

    pub fn eval(&self, metrics: &HashMap<String, f64>) -> f64 {
        eval(&self.root, metrics)
    }

    /// Boolean view of the evaluation: non-zero is true.
    pub fn matches(&self, metrics: &HashMap<String, f64>) -> bool {
        self.eval(metrics) != 0.0
    }
}

fn eval(node: &Node, m: &HashMap<String, f64>) -> f64 {
    match node {
        Node::Num(v) => *v,
        Node::Ident(name) => m.get(name).copied().unwrap_or(0.0),
        Node::Neg(child) => -eval(child, m),
        Node::Not(child) => {
            if eval(child, m) == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Node::Bin { op, lhs, rhs } => {
            let l = eval(lhs, m);
            match op {
                BinOp::Add => l + eval(rhs, m),
                BinOp::Sub => l - eval(rhs, m),
                BinOp::Mul => l * eval(rhs, m),
                BinOp::Div => {
                    let r = eval(rhs, m);
                    if r == 0.0 {
                        0.0
                    } else {
                        l / r
                    }
                }
                BinOp::And => bool_val(l != 0.0 && eval(rhs, m) != 0.0),
                BinOp::Or => bool_val(l != 0.0 || eval(rhs, m) != 0.0),
                BinOp::Eq => bool_val(l == eval(rhs, m)),
                BinOp::Ne => bool_val(l != eval(rhs, m)),
                BinOp::Gt => bool_val(l > eval(rhs, m)),
                BinOp::Ge => bool_val(l >= eval(rhs, m)),
                BinOp::Lt => bool_val(l < eval(rhs, m)),
                BinOp::Le => bool_val(l <= eval(rhs, m)),
            }
        }
    }
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    nodes: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while let Some(b) = self.src.as_bytes().get(self.pos) {
            if *b == b' ' || *b == b'\t' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn matches_tok(&mut self, tok: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    fn node(&mut self, node: Node) -> Result<Node, ExprError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ExprError::NodeLimit);
        }
        Ok(node)
    }

    fn parse_expr(&mut self) -> Result<Node, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_and()?;
        while self.matches_tok("||") {
            let right = self.parse_and()?;
            left = self.node(Node::Bin {
                op: BinOp::Or,
                lhs: Box::new(left),
                rhs: Box::new(right),
            })?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_cmp()?;
        while self.matches_tok("&&") {
            let right = self.parse_cmp()?;
            left = self.node(Node::Bin {
                op: BinOp::And,
                lhs: Box::new(left),
                rhs: Box::new(right),
            })?;
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Node, ExprError> {
        let left = self.parse_add()?;
        const OPS: [(&str, BinOp); 6] = [
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("!=", BinOp::Ne),
            ("==", BinOp::Eq),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ];
        for (tok, op) in OPS {
            if self.matches_tok(tok) {
                let right = self.parse_add()?;
                return self.node(Node::Bin {
                    op,
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                });
            }
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = if self.matches_tok("+") {
                BinOp::Add
            } else if self.matches_tok("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_mul()?;
            left = self.node(Node::Bin {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            })?;
        }
    }

    fn parse_mul(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.matches_tok("*") {
                BinOp::Mul
            } else if self.matches_tok("/") {
                BinOp::Div
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = self.node(Node::Bin {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            })?;
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        if self.matches_tok("!") {
            let child = self.parse_unary()?;
            return self.node(Node::Not(Box::new(child)));
        }
        if self.matches_tok("-") {
            let child = self.parse_unary()?;
            return self.node(Node::Neg(Box::new(child)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        self.skip_ws();
        if self.matches_tok("(") {
            // Parenthesis depth counts against the node cap.
            self.nodes += 1;
            if self.nodes > MAX_NODES {
                return Err(ExprError::NodeLimit);
            }
            let inner = self.parse_expr()?;
            if !self.matches_tok(")") {
                return Err(ExprError::Syntax {
                    pos: self.pos,
                    reason: "expected `)`".to_string(),
                });
            }
            return Ok(inner);
        }

        let bytes = self.src.as_bytes();
        let start = self.pos;

        if let Some(b) = bytes.get(self.pos) {
            if b.is_ascii_digit() || *b == b'.' {
                while let Some(b) = bytes.get(self.pos) {
                    if b.is_ascii_digit() || *b == b'.' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let text = &self.src[start..self.pos];
                let value: f64 = text.parse().map_err(|_| ExprError::Syntax {
                    pos: start,
                    reason: format!("invalid number `{text}`"),
                })?;
                return self.node(Node::Num(value));
            }
            if b.is_ascii_alphabetic() || *b == b'_' {
                while let Some(b) = bytes.get(self.pos) {
                    if b.is_ascii_alphanumeric() || *b == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                return self.node(Node::Ident(self.src[start..self.pos].to_string()));
            }
        }

        Err(ExprError::Syntax {
            pos: self.pos,
            reason: "expected number, identifier or `(`".to_string(),
        })
    }
}
