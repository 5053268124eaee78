//! Pseudo-C Renderer
//!
//! Walks the structured tree and emits pseudo-C, one line per statement, four
//! spaces of indentation per nesting level.
//!
//! # Render Modes
//! - **Plain**: bare text
//! - **Color**: tokens wrapped in ANSI truecolor escapes from the active [`Theme`]
//! - **HTML**: escaped text inside `<pre class="rdec">`, tokens wrapped in
//!   `<span style="color: #rrggbb">`; wins over colour when both are requested
//!
//! # Optional Columns
//! - `assembly`: the originating instruction is printed in a fixed-width column
//!   in front of the first line it produced
//! - `xrefs`: a trailing comment lists the cross-references leaving that
//!   instruction
//! - `paddr`: both of the above show physical addresses where the analyzer
//!   reported them
//!
//! Lines are collected first and laid out at the end, so the output for one
//! tree and one set of options is always byte-identical.

pub mod theme;

use crate::decompiler::config::RenderOptions;
use crate::decompiler::error::DecompilerError;
use crate::decompiler::ir::instruction::{BinaryOp, Expr, Statement, StatementKind};
use crate::decompiler::routine::Routine;
use crate::decompiler::structurer::{Condition, StructuredNode};
use std::collections::BTreeSet;
use theme::{Theme, Token};

/// Width of the instruction text in the assembly column.
const ASM_WIDTH: usize = 28;

/// Binding strength of prefix operators (unary, deref, cast).
const PREFIX: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plain,
    Ansi,
    Html,
}

/// One output line before layout.
#[derive(Debug, Clone)]
struct Line {
    indent: usize,
    text: String,
    /// Instruction the line came from.
    origin: Option<u64>,
}

/// Pseudo-C code generator for one routine.
pub struct CodeGenerator<'a> {
    routine: &'a Routine,
    options: &'a RenderOptions,
    theme: Theme,
    mode: Mode,
    indent_level: usize,
    lines: Vec<Line>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(routine: &'a Routine, options: &'a RenderOptions) -> Self {
        let mode = if options.html {
            Mode::Html
        } else if options.color {
            Mode::Ansi
        } else {
            Mode::Plain
        };
        Self {
            routine,
            options,
            theme: Theme::by_name(&options.theme),
            mode,
            indent_level: 0,
            lines: Vec::new(),
        }
    }

    /// Render a whole routine.
    ///
    /// # Arguments
    /// * `root` - Structured tree after the semantic passes
    /// * `arch` - Architecture name shown in the header
    /// * `target` - Restrict the body to the block containing this address
    ///
    /// # Returns
    /// `String` - Complete output, newline-terminated
    ///
    /// # Errors
    /// `MalformedGraph` when `target` lies outside the routine.
    pub fn generate_function(
        mut self,
        root: &StructuredNode,
        arch: &str,
        target: Option<u64>,
    ) -> Result<String, DecompilerError> {
        let focus: Vec<&StructuredNode> = match target {
            Some(address) => self.focus(root, address)?,
            None => vec![root],
        };

        let header = [
            self.paint(Token::Comment, "/* rdec pseudo code output */"),
            self.paint(
                Token::Comment,
                &format!("/* {arch} @ 0x{:08x} */", self.routine.entry),
            ),
        ];
        let signature = format!(
            "{} {} ({}) {{",
            self.paint(Token::Type, "void"),
            self.paint(Token::Symbol, &self.routine.display_name()),
            self.paint(Token::Type, "void")
        );
        self.push(signature, None);
        self.indent_level += 1;
        for node in focus {
            self.node(node);
        }
        self.indent_level -= 1;
        self.push("}".to_string(), None);

        Ok(self.layout(&header))
    }

    fn push(&mut self, text: String, origin: Option<u64>) {
        self.lines.push(Line {
            indent: self.indent_level,
            text,
            origin,
        });
    }

    /// Render a nested scope one level deeper.
    fn scope(&mut self, node: &StructuredNode) {
        self.indent_level += 1;
        self.node(node);
        self.indent_level -= 1;
    }

    fn node(&mut self, node: &StructuredNode) {
        match node {
            StructuredNode::Sequence(nodes) => nodes.iter().for_each(|n| self.node(n)),
            StructuredNode::If { cond, then, otherwise } => {
                let line = format!("{} ({}) {{", self.keyword("if"), self.condition(cond));
                self.push(line, Some(cond.origin));
                self.scope(then);
                let mut rest: Option<&StructuredNode> = otherwise.as_deref();
                while let Some(other) = rest {
                    match else_if(other) {
                        Some((cond, then, next)) => {
                            let line = format!(
                                "}} {} {} ({}) {{",
                                self.keyword("else"),
                                self.keyword("if"),
                                self.condition(cond)
                            );
                            self.push(line, Some(cond.origin));
                            self.scope(then);
                            rest = next;
                        }
                        None => {
                            let line = format!("}} {} {{", self.keyword("else"));
                            self.push(line, None);
                            self.scope(other);
                            rest = None;
                        }
                    }
                }
                self.push("}".to_string(), None);
            }
            StructuredNode::While { cond, body } => {
                let line = format!("{} ({}) {{", self.keyword("while"), self.condition(cond));
                self.push(line, Some(cond.origin));
                self.scope(body);
                self.push("}".to_string(), None);
            }
            StructuredNode::DoWhile { body, cond } => {
                let line = format!("{} {{", self.keyword("do"));
                self.push(line, None);
                self.scope(body);
                let line = format!("}} {} ({});", self.keyword("while"), self.condition(cond));
                self.push(line, Some(cond.origin));
            }
            StructuredNode::Loop { body } => {
                let line = format!("{} ({}) {{", self.keyword("while"), self.keyword("true"));
                self.push(line, None);
                self.scope(body);
                self.push("}".to_string(), None);
            }
            StructuredNode::Switch {
                selector,
                origin,
                cases,
                default,
            } => {
                let line = format!("{} ({}) {{", self.keyword("switch"), self.expr(selector, 0));
                self.push(line, Some(*origin));
                self.indent_level += 1;
                for case in cases {
                    for value in &case.values {
                        let line = format!("{} {}:", self.keyword("case"), self.paint(Token::Number, &value.to_string()));
                        self.push(line, None);
                    }
                    self.scope(&case.body);
                }
                if let Some(default) = default {
                    let line = format!("{}:", self.keyword("default"));
                    self.push(line, None);
                    self.scope(default);
                }
                self.indent_level -= 1;
                self.push("}".to_string(), None);
            }
            StructuredNode::Break => {
                let line = format!("{};", self.keyword("break"));
                self.push(line, None);
            }
            StructuredNode::Continue => {
                let line = format!("{};", self.keyword("continue"));
                self.push(line, None);
            }
            StructuredNode::Goto(address) => {
                let line = self.goto(*address);
                self.push(format!("{line};"), None);
            }
            StructuredNode::Label(address) => {
                let line = format!("{}:", self.label(*address));
                self.push(line, None);
            }
            StructuredNode::Statement(statement) => {
                if self.options.blocks {
                    return;
                }
                if let Some(text) = self.statement(statement) {
                    self.push(format!("{text};"), Some(statement.origin));
                }
            }
        }
    }

    /// Text of one leaf statement, without the trailing `;`. Compares render
    /// nothing: their flags are either merged into a condition or unused.
    fn statement(&self, statement: &Statement) -> Option<String> {
        let text = match &statement.kind {
            StatementKind::Assign { dst, src, cast, .. } => {
                let lhs = self.expr(dst, 0);
                match cast.filter(|_| self.options.casts) {
                    Some(cast) => format!(
                        "{lhs} = {} {}",
                        self.paint(Token::Type, &format!("({})", cast.width.c_type(cast.signed))),
                        self.expr(src, PREFIX)
                    ),
                    None => match compound(dst, src) {
                        Some(Compound::Increment) => format!("{lhs}++"),
                        Some(Compound::Decrement) => format!("{lhs}--"),
                        Some(Compound::Update(op, rhs)) => {
                            format!("{lhs} {}= {}", self.text(op.symbol()), self.expr(rhs, 0))
                        }
                        None => format!("{lhs} = {}", self.expr(src, 0)),
                    },
                }
            }
            StatementKind::Compare { .. } => return None,
            StatementKind::Branch { cond, target } => {
                format!("{} ({}) {}", self.keyword("if"), self.expr(cond, 0), self.goto(*target))
            }
            StatementKind::Jump { target } => match target {
                Expr::Const { value, .. } if *value >= 0 && self.routine.block(*value as u64).is_some() => {
                    self.goto(*value as u64)
                }
                // Indirect jump or jump out of the routine: tail call.
                other => format!("{} {} ()", self.keyword("return"), self.call_target(other)),
            },
            StatementKind::Call { target } => format!("{} ()", self.call_target(target)),
            StatementKind::Return { value: None } => self.keyword("return"),
            StatementKind::Return { value: Some(value) } => {
                format!("{} {}", self.keyword("return"), self.expr(value, 0))
            }
            StatementKind::Unsupported { text } => format!(
                "{} ({})",
                self.keyword("__asm"),
                self.paint(Token::Str, &format!("\"{}\"", escape_c(text)))
            ),
        };
        Some(text)
    }

    fn call_target(&self, target: &Expr) -> String {
        match target {
            Expr::Const { value, .. } if *value >= 0 => self.paint(Token::Symbol, &format!("fcn_{value:08x}")),
            other => self.expr(other, PREFIX),
        }
    }

    fn condition(&self, cond: &Condition) -> String {
        self.expr(&cond.expr, 0)
    }

    fn goto(&self, address: u64) -> String {
        format!("{} {}", self.keyword("goto"), self.label(address))
    }

    fn label(&self, address: u64) -> String {
        self.paint(Token::Label, &format!("label_{address:08x}"))
    }

    fn keyword(&self, word: &str) -> String {
        self.paint(Token::Keyword, word)
    }

    /// Expression text, parenthesised when it binds looser than `parent`.
    fn expr(&self, expr: &Expr, parent: u8) -> String {
        match expr {
            Expr::Register { name, .. } => self.text(name),
            Expr::Const { value, .. } => self.paint(Token::Number, &number(*value)),
            Expr::Symbol(name) => self.paint(Token::Symbol, name),
            Expr::Str(content) => self.paint(Token::Str, &format!("\"{}\"", escape_c(content))),
            Expr::Memory { addr, width, signed } => {
                if self.options.casts {
                    let pointer = format!("({}*)", width.c_type(*signed));
                    format!("*({} {})", self.paint(Token::Type, &pointer), self.expr(addr, PREFIX))
                } else {
                    format!("*({})", self.expr(addr, 0))
                }
            }
            Expr::Unary { op, operand } => format!("{}{}", self.text(op.symbol()), self.expr(operand, PREFIX)),
            Expr::Binary { op, lhs, rhs } => {
                let prec: u8 = op.precedence();
                let text = format!(
                    "{} {} {}",
                    self.expr(lhs, prec),
                    self.text(op.symbol()),
                    self.expr(rhs, prec + 1)
                );
                if prec < parent {
                    format!("({text})")
                } else {
                    text
                }
            }
            Expr::Flags(cond) => self.text(cond.flag_name()),
            Expr::Opaque(text) => self.text(text),
        }
    }

    /// Untokenised text (escaped in HTML mode).
    fn text(&self, text: &str) -> String {
        match self.mode {
            Mode::Html => escape_html(text),
            _ => text.to_string(),
        }
    }

    fn paint(&self, token: Token, text: &str) -> String {
        let color = self.theme.color(token);
        match self.mode {
            Mode::Plain => text.to_string(),
            Mode::Ansi => format!("{}{text}\x1b[0m", color.ansi()),
            Mode::Html => format!("<span style=\"color: {}\">{}</span>", color.hex(), escape_html(text)),
        }
    }

    /// Nodes to render when the output is restricted to one block: the smallest
    /// subtree holding everything that block produced.
    fn focus<'n>(&self, root: &'n StructuredNode, address: u64) -> Result<Vec<&'n StructuredNode>, DecompilerError> {
        let block = self
            .routine
            .block_of(address)
            .ok_or_else(|| DecompilerError::malformed_at("address is not part of the routine", address))?;
        let origins: BTreeSet<u64> = self.routine.blocks[block]
            .instructions
            .iter()
            .map(|inst| inst.address)
            .collect();

        let total = coverage(root, &origins);
        if total == 0 {
            return Ok(Vec::new());
        }
        let mut node: &'n StructuredNode = root;
        while let Some(child) = children(node).into_iter().find(|c| coverage(c, &origins) == total) {
            node = child;
        }
        Ok(match node {
            StructuredNode::Sequence(nodes) => nodes.iter().filter(|n| coverage(n, &origins) > 0).collect(),
            other => vec![other],
        })
    }

    /// Final layout: header, assembly column, indentation, xref comments.
    fn layout(&self, header: &[String]) -> String {
        let mut out = String::new();
        if self.mode == Mode::Html {
            out.push_str("<pre class=\"rdec\">\n");
        }
        for line in header {
            out.push_str(line);
            out.push('\n');
        }

        let mut seen: BTreeSet<u64> = BTreeSet::new();
        for line in &self.lines {
            let first = line.origin.is_some_and(|origin| seen.insert(origin));
            if self.options.assembly {
                match line.origin.filter(|_| first) {
                    Some(origin) => {
                        let text = self
                            .routine
                            .instruction(origin)
                            .map(|inst| inst.text.as_str())
                            .unwrap_or("");
                        let shown = self.display_address(origin);
                        let column = format!("0x{shown:08x}  {text:<width$}", width = ASM_WIDTH);
                        out.push_str(&self.paint(Token::Asm, &column));
                        out.push_str("  ");
                    }
                    None => out.push_str(&" ".repeat(ASM_WIDTH + 14)),
                }
            }
            out.push_str(&"    ".repeat(line.indent));
            out.push_str(&line.text);
            if self.options.xrefs && first {
                if let Some(comment) = line.origin.and_then(|origin| self.xref_comment(origin)) {
                    out.push(' ');
                    out.push_str(&self.paint(Token::Comment, &comment));
                }
            }
            out.push('\n');
        }

        if self.mode == Mode::Html {
            out.push_str("</pre>\n");
        }
        out
    }

    fn xref_comment(&self, origin: u64) -> Option<String> {
        let xrefs = self.routine.outgoing_xrefs.get(&origin)?;
        let targets: Vec<String> = xrefs
            .iter()
            .map(|xref| match &xref.name {
                Some(name) => format!("{name} ({})", xref.kind.as_str()),
                None => format!("0x{:08x} ({})", self.display_address(xref.to), xref.kind.as_str()),
            })
            .collect();
        Some(format!("// xrefs: {}", targets.join(", ")))
    }

    /// Address shown for an instruction: its physical address in `paddr` mode
    /// when the analyzer reported one, the virtual address otherwise.
    fn display_address(&self, address: u64) -> u64 {
        if !self.options.paddr {
            return address;
        }
        self.routine
            .instruction(address)
            .and_then(|inst| inst.paddr)
            .unwrap_or(address)
    }
}

/// Shorthand forms of `x = x op y`.
enum Compound<'e> {
    Increment,
    Decrement,
    Update(BinaryOp, &'e Expr),
}

fn compound<'e>(dst: &Expr, src: &'e Expr) -> Option<Compound<'e>> {
    let Expr::Binary { op, lhs, rhs } = src else {
        return None;
    };
    if lhs.as_ref() != dst || op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
        return None;
    }
    Some(match (op, rhs.as_ref()) {
        (BinaryOp::Add, Expr::Const { value: 1, .. }) => Compound::Increment,
        (BinaryOp::Sub, Expr::Const { value: 1, .. }) => Compound::Decrement,
        (op, rhs) => Compound::Update(*op, rhs),
    })
}

/// `else` arm that is itself a single `if`, for `else if` chains.
fn else_if(node: &StructuredNode) -> Option<(&Condition, &StructuredNode, Option<&StructuredNode>)> {
    match node {
        StructuredNode::If { cond, then, otherwise } => Some((cond, then.as_ref(), otherwise.as_deref())),
        StructuredNode::Sequence(nodes) if nodes.len() == 1 => else_if(&nodes[0]),
        _ => None,
    }
}

fn children(node: &StructuredNode) -> Vec<&StructuredNode> {
    match node {
        StructuredNode::Sequence(nodes) => nodes.iter().collect(),
        StructuredNode::If { then, otherwise, .. } => {
            let mut out: Vec<&StructuredNode> = vec![then.as_ref()];
            out.extend(otherwise.as_deref());
            out
        }
        StructuredNode::While { body, .. } | StructuredNode::DoWhile { body, .. } | StructuredNode::Loop { body } => {
            vec![body.as_ref()]
        }
        StructuredNode::Switch { cases, default, .. } => {
            let mut out: Vec<&StructuredNode> = cases.iter().map(|c| &c.body).collect();
            out.extend(default.as_deref());
            out
        }
        _ => Vec::new(),
    }
}

/// Statements and conditions inside `node` that came from `origins`.
fn coverage(node: &StructuredNode, origins: &BTreeSet<u64>) -> usize {
    let mut count: usize = 0;
    node.visit(&mut |n| {
        let origin = match n {
            StructuredNode::Statement(statement) => Some(statement.origin),
            StructuredNode::If { cond, .. } | StructuredNode::While { cond, .. } | StructuredNode::DoWhile { cond, .. } => {
                Some(cond.origin)
            }
            StructuredNode::Switch { origin, .. } => Some(*origin),
            _ => None,
        };
        if origin.is_some_and(|o| origins.contains(&o)) {
            count += 1;
        }
    });
    count
}

fn number(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else if value < 10 {
        value.to_string()
    } else {
        format!("0x{value:x}")
    }
}

fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
