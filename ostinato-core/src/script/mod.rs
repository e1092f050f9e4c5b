//! Scripts: parsing, the per-invocation interpreter and the runtime that
//! schedules interpreters on the real-time thread.
//!
//! A script is line-oriented text:
//!
//! ```text
//! !name Double Record
//! !sustain 400
//! Record
//! Wait last
//! Variable count 0
//! Label Sustain
//! Set count $(sustainCount)
//! Echo held $count
//! End
//! ```

pub mod expand;
pub mod interpreter;
pub mod library;
pub mod parser;
pub mod runtime;
pub mod stack;
pub mod statement;

pub use interpreter::ScriptInterpreter;
pub use library::ScriptLibrary;
pub use parser::parse_script;
pub use runtime::ScriptRuntime;
pub use statement::{LabelKind, Statement};

use ostinato_types::ScriptId;

use crate::symbol::ScriptProperties;

/// A parse error, with the 1-based line it was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl ScriptError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

/// Statement indexes of the labels the runtime notifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecialLabels {
    pub sustain: Option<usize>,
    pub end_sustain: Option<usize>,
    pub click: Option<usize>,
    pub end_click: Option<usize>,
    pub reentry: Option<usize>,
}

/// A compiled script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub statements: Vec<Statement>,
    /// Source line of each statement.
    pub lines: Vec<usize>,
    pub properties: ScriptProperties,
    /// Long-press threshold overriding the configured one.
    pub sustain_msec: Option<u32>,
    pub multiclick: bool,
    /// Click window overriding the configured one.
    pub click_msec: Option<u32>,
    pub labels: SpecialLabels,
}

impl Script {
    pub fn line_of(&self, index: usize) -> usize {
        self.lines.get(index).copied().unwrap_or(0)
    }

    /// Index of the `Proc` with this name.
    pub fn find_proc(&self, name: &str) -> Option<usize> {
        self.statements.iter().position(|s| {
            matches!(s, Statement::Proc { name: n, .. } if n.eq_ignore_ascii_case(name))
        })
    }
}
