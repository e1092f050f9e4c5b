//! Parsed script statements.
//!
//! Block statements carry the index of the statement that closes them, so
//! the interpreter never searches at run time.

use std::sync::Arc;

use ostinato_types::{KernelEventType, SymbolId, SymbolLevel};

use crate::action::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Plain,
    Sustain,
    EndSustain,
    Click,
    EndClick,
    Reentry,
}

impl LabelKind {
    pub fn from_name(name: &str) -> LabelKind {
        match name.to_ascii_lowercase().as_str() {
            "sustain" => LabelKind::Sustain,
            "endsustain" => LabelKind::EndSustain,
            "click" => LabelKind::Click,
            "endclick" => LabelKind::EndClick,
            "reentry" => LabelKind::Reentry,
            _ => LabelKind::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn parse(token: &str) -> Option<CompareOp> {
        match token {
            "==" | "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            ">" => Some(CompareOp::Gt),
            "<=" => Some(CompareOp::Le),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub left: String,
    pub compare: Option<(CompareOp, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitKind {
    /// The engine event scheduled by the last invocation.
    Last,
    /// The kernel event sent by the last kernel request.
    Thread,
    /// The next block boundary.
    Block,
    Msec(String),
    Function(SymbolId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Statement index of a `Proc` in the same script.
    Proc(usize),
    /// Another script, looked up in the library when the call runs.
    Script(String),
}

/// A symbol invocation resolved when the script was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub symbol: SymbolId,
    pub name: Arc<str>,
    pub target: Target,
    pub level: SymbolLevel,
    /// Argument text, shared with the actions built from it.
    pub args: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Label { name: String, kind: LabelKind },
    Jump { label: usize },
    Call { target: CallTarget, args: String },
    Warp { proc: usize },
    Proc { name: String, end: usize },
    Endproc,
    Variable { global: bool, name: String, value: String },
    Set { name: String, value: String },
    Use { name: String, value: String },
    /// `otherwise` is the matching `Else` or `Endif`.
    If { condition: Condition, otherwise: usize },
    Else { end: usize },
    Endif,
    Repeat { count: String, next: usize },
    For { tracks: String, next: usize },
    Next { start: usize },
    Wait(WaitKind),
    Kernel { kind: KernelEventType, args: Vec<String> },
    End,
    Invoke(Invocation),
}

impl Statement {
    pub fn keyword(&self) -> &'static str {
        match self {
            Statement::Label { .. } => "Label",
            Statement::Jump { .. } => "Jump",
            Statement::Call { .. } => "Call",
            Statement::Warp { .. } => "Warp",
            Statement::Proc { .. } => "Proc",
            Statement::Endproc => "Endproc",
            Statement::Variable { .. } => "Variable",
            Statement::Set { .. } => "Set",
            Statement::Use { .. } => "Use",
            Statement::If { .. } => "If",
            Statement::Else { .. } => "Else",
            Statement::Endif => "Endif",
            Statement::Repeat { .. } => "Repeat",
            Statement::For { .. } => "For",
            Statement::Next { .. } => "Next",
            Statement::Wait(_) => "Wait",
            Statement::Kernel { kind, .. } => kind.as_str(),
            Statement::End => "End",
            Statement::Invoke(_) => "Invoke",
        }
    }
}
