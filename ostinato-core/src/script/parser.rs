//! Script source parser.
//!
//! Runs on the control thread. Symbol names are resolved against the symbol
//! table here so the interpreter never touches it; names that are not yet
//! defined are interned and compile to unresolved invocations.

use std::collections::HashMap;
use std::sync::Arc;

use ostinato_types::{KernelEventType, ScriptId};

use super::statement::{
    CallTarget, CompareOp, Condition, Invocation, LabelKind, Statement, WaitKind,
};
use super::{Script, ScriptError, SpecialLabels};
use crate::action::{truncate, MAX_ACTION_ARGS};
use crate::symbol::{ScriptProperties, SymbolTable};

const UNPATCHED: usize = usize::MAX;

struct Line<'a> {
    number: usize,
    keyword: String,
    word: &'a str,
    rest: &'a str,
}

enum Open {
    If { index: usize, seen_else: bool },
    Repeat(usize),
    For(usize),
    Proc(usize),
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn parse_msec(line: usize, arg: &str, directive: &str) -> Result<Option<u32>, ScriptError> {
    if arg.is_empty() {
        return Ok(None);
    }
    arg.parse::<u32>()
        .map(Some)
        .map_err(|_| ScriptError::new(line, format!("{} expects milliseconds, got '{}'", directive, arg)))
}

fn require<'a>(line: &Line<'a>, what: &str) -> Result<&'a str, ScriptError> {
    if line.rest.is_empty() {
        Err(ScriptError::new(
            line.number,
            format!("{} requires {}", line.word, what),
        ))
    } else {
        Ok(line.rest)
    }
}

fn parse_condition(rest: &str) -> Condition {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.iter().position(|t| CompareOp::parse(t).is_some()) {
        Some(pos) => {
            let op = CompareOp::parse(tokens[pos]).unwrap_or(CompareOp::Eq);
            Condition {
                left: tokens[..pos].join(" "),
                compare: Some((op, tokens[pos + 1..].join(" "))),
            }
        }
        None => Condition {
            left: rest.to_string(),
            compare: None,
        },
    }
}

/// Parse script source.
///
/// `default_name` is used when the script has no `!name` directive.
pub fn parse_script(
    default_name: &str,
    source: &str,
    symbols: &mut SymbolTable,
) -> Result<Script, ScriptError> {
    let mut name = default_name.to_string();
    let mut properties = ScriptProperties::default();
    let mut sustain_msec = None;
    let mut multiclick = false;
    let mut click_msec = None;

    // First pass: directives, and statement lines with labels and procs indexed.
    let mut lines = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut procs: HashMap<String, usize> = HashMap::new();
    for (i, raw) in source.lines().enumerate() {
        let number = i + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        if let Some(directive) = text.strip_prefix('!') {
            let (word, rest) = split_word(directive);
            match word.to_ascii_lowercase().as_str() {
                "name" => {
                    if rest.is_empty() {
                        return Err(ScriptError::new(number, "!name requires a name"));
                    }
                    name = rest.to_string();
                }
                "sustain" => {
                    properties.sustainable = true;
                    sustain_msec = parse_msec(number, rest, "!sustain")?;
                }
                "multiclick" => {
                    multiclick = true;
                    click_msec = parse_msec(number, rest, "!multiclick")?;
                }
                "continuous" => properties.continuous = true,
                "focuslock" => properties.focus_lockable = true,
                other => {
                    return Err(ScriptError::new(
                        number,
                        format!("unknown directive !{}", other),
                    ))
                }
            }
            continue;
        }

        let (word, rest) = split_word(text);
        let keyword = word.to_ascii_lowercase();
        let index = lines.len();
        match keyword.as_str() {
            "label" => {
                if rest.is_empty() {
                    return Err(ScriptError::new(number, "Label requires a name"));
                }
                if labels.insert(rest.to_ascii_lowercase(), index).is_some() {
                    return Err(ScriptError::new(number, format!("duplicate label {}", rest)));
                }
            }
            "proc" => {
                if rest.is_empty() {
                    return Err(ScriptError::new(number, "Proc requires a name"));
                }
                if procs.insert(rest.to_ascii_lowercase(), index).is_some() {
                    return Err(ScriptError::new(number, format!("duplicate proc {}", rest)));
                }
            }
            _ => {}
        }
        lines.push(Line {
            number,
            keyword,
            word,
            rest,
        });
    }

    // Second pass: statements, with block ends patched as they close.
    let mut statements: Vec<Statement> = Vec::with_capacity(lines.len());
    let mut special = SpecialLabels::default();
    let mut open: Vec<(Open, usize)> = Vec::new();

    for line in &lines {
        let index = statements.len();
        let statement = match line.keyword.as_str() {
            "label" => {
                let kind = LabelKind::from_name(line.rest);
                let slot = match kind {
                    LabelKind::Sustain => Some(&mut special.sustain),
                    LabelKind::EndSustain => Some(&mut special.end_sustain),
                    LabelKind::Click => Some(&mut special.click),
                    LabelKind::EndClick => Some(&mut special.end_click),
                    LabelKind::Reentry => Some(&mut special.reentry),
                    LabelKind::Plain => None,
                };
                if let Some(slot) = slot {
                    *slot = Some(index);
                }
                Statement::Label {
                    name: line.rest.to_string(),
                    kind,
                }
            }
            "jump" => {
                let label = require(line, "a label")?;
                match labels.get(&label.to_ascii_lowercase()) {
                    Some(&target) => Statement::Jump { label: target },
                    None => {
                        return Err(ScriptError::new(
                            line.number,
                            format!("unknown label {}", label),
                        ))
                    }
                }
            }
            "call" => {
                let (callee, args) = split_word(require(line, "a proc or script name")?);
                let target = match procs.get(&callee.to_ascii_lowercase()) {
                    Some(&proc) => CallTarget::Proc(proc),
                    None => CallTarget::Script(callee.to_string()),
                };
                Statement::Call {
                    target,
                    args: args.to_string(),
                }
            }
            "warp" => {
                let callee = require(line, "a proc name")?;
                match procs.get(&callee.to_ascii_lowercase()) {
                    Some(&proc) => Statement::Warp { proc },
                    None => {
                        return Err(ScriptError::new(
                            line.number,
                            format!("unknown proc {}", callee),
                        ))
                    }
                }
            }
            "proc" => {
                open.push((Open::Proc(index), line.number));
                Statement::Proc {
                    name: line.rest.to_string(),
                    end: UNPATCHED,
                }
            }
            "endproc" => {
                match open.pop() {
                    Some((Open::Proc(start), _)) => {
                        if let Statement::Proc { end, .. } = &mut statements[start] {
                            *end = index;
                        }
                    }
                    _ => return Err(ScriptError::new(line.number, "Endproc without Proc")),
                }
                Statement::Endproc
            }
            "variable" | "var" => {
                let (first, rest) = split_word(require(line, "a name")?);
                let (global, name, value) = if first.eq_ignore_ascii_case("global") {
                    let (name, value) = split_word(rest);
                    (true, name, value)
                } else {
                    (false, first, rest)
                };
                if name.is_empty() {
                    return Err(ScriptError::new(line.number, "Variable requires a name"));
                }
                Statement::Variable {
                    global,
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            "set" => {
                let (name, value) = split_word(require(line, "a name")?);
                Statement::Set {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            "use" => {
                let (name, value) = split_word(require(line, "a parameter")?);
                Statement::Use {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            "if" => {
                open.push((
                    Open::If {
                        index,
                        seen_else: false,
                    },
                    line.number,
                ));
                Statement::If {
                    condition: parse_condition(require(line, "a condition")?),
                    otherwise: UNPATCHED,
                }
            }
            "else" => {
                match open.last_mut() {
                    Some((Open::If { index: start, seen_else }, _)) if !*seen_else => {
                        *seen_else = true;
                        if let Statement::If { otherwise, .. } = &mut statements[*start] {
                            *otherwise = index;
                        }
                    }
                    _ => return Err(ScriptError::new(line.number, "Else without If")),
                }
                Statement::Else { end: UNPATCHED }
            }
            "endif" => {
                match open.pop() {
                    Some((Open::If { index: start, .. }, _)) => {
                        if let Statement::If { otherwise, .. } = &mut statements[start] {
                            if *otherwise == UNPATCHED {
                                *otherwise = index;
                            } else {
                                let else_index = *otherwise;
                                if let Statement::Else { end } = &mut statements[else_index] {
                                    *end = index;
                                }
                            }
                        }
                    }
                    _ => return Err(ScriptError::new(line.number, "Endif without If")),
                }
                Statement::Endif
            }
            "repeat" => {
                open.push((Open::Repeat(index), line.number));
                Statement::Repeat {
                    count: require(line, "a count")?.to_string(),
                    next: UNPATCHED,
                }
            }
            "for" => {
                open.push((Open::For(index), line.number));
                Statement::For {
                    tracks: require(line, "a track list")?.to_string(),
                    next: UNPATCHED,
                }
            }
            "next" => {
                let start = match open.pop() {
                    Some((Open::Repeat(start), _)) | Some((Open::For(start), _)) => start,
                    _ => return Err(ScriptError::new(line.number, "Next without Repeat or For")),
                };
                match &mut statements[start] {
                    Statement::Repeat { next, .. } | Statement::For { next, .. } => *next = index,
                    _ => {}
                }
                Statement::Next { start }
            }
            "wait" => Statement::Wait(parse_wait(line, symbols)?),
            "echo" => kernel(KernelEventType::Echo, line.rest),
            "message" => kernel(KernelEventType::Message, line.rest),
            "alert" => kernel(KernelEventType::Alert, line.rest),
            "prompt" => kernel(KernelEventType::Prompt, line.rest),
            "save" => kernel(KernelEventType::SaveLoop, line.rest),
            "savecapture" => kernel(KernelEventType::SaveCapture, line.rest),
            "load" => kernel(KernelEventType::LoadLoop, require(line, "a file")?),
            "diff" => {
                let (a, b) = split_word(require(line, "two files")?);
                if b.is_empty() {
                    return Err(ScriptError::new(line.number, "Diff requires two files"));
                }
                Statement::Kernel {
                    kind: KernelEventType::Diff,
                    args: vec![a.to_string(), b.to_string()],
                }
            }
            "bindings" => kernel(KernelEventType::ActivateBindings, require(line, "a set name")?),
            "end" => Statement::End,
            _ => Statement::Invoke(invocation(line, symbols)),
        };
        statements.push(statement);
    }

    if let Some((block, number)) = open.pop() {
        let what = match block {
            Open::If { .. } => "If without Endif",
            Open::Repeat(_) | Open::For(_) => "loop without Next",
            Open::Proc(_) => "Proc without Endproc",
        };
        return Err(ScriptError::new(number, what));
    }

    Ok(Script {
        id: ScriptId::new(0),
        name,
        lines: lines.iter().map(|l| l.number).collect(),
        statements,
        properties,
        sustain_msec,
        multiclick,
        click_msec,
        labels: special,
    })
}

fn kernel(kind: KernelEventType, rest: &str) -> Statement {
    Statement::Kernel {
        kind,
        args: if rest.is_empty() {
            Vec::new()
        } else {
            vec![rest.to_string()]
        },
    }
}

fn parse_wait(line: &Line<'_>, symbols: &mut SymbolTable) -> Result<WaitKind, ScriptError> {
    let (kind, arg) = split_word(require(line, "a wait type")?);
    let wait = match kind.to_ascii_lowercase().as_str() {
        "last" => WaitKind::Last,
        "thread" => WaitKind::Thread,
        "block" => WaitKind::Block,
        "msec" => {
            if arg.is_empty() {
                return Err(ScriptError::new(line.number, "Wait msec requires a time"));
            }
            WaitKind::Msec(arg.to_string())
        }
        "function" => {
            if arg.is_empty() {
                return Err(ScriptError::new(line.number, "Wait function requires a name"));
            }
            WaitKind::Function(symbols.intern(arg))
        }
        _ if kind.starts_with('$') || kind.parse::<u32>().is_ok() => WaitKind::Msec(kind.to_string()),
        other => {
            return Err(ScriptError::new(
                line.number,
                format!("unknown wait type {}", other),
            ))
        }
    };
    Ok(wait)
}

fn invocation(line: &Line<'_>, symbols: &mut SymbolTable) -> Invocation {
    let id = symbols.intern(line.word);
    let (name, target, level) = match symbols.get(id) {
        Some(symbol) => {
            if !symbol.looks_resolved() {
                log::warn!(
                    target: "scripts",
                    "line {}: unresolved symbol {}",
                    line.number,
                    line.word
                );
            }
            (Arc::from(symbol.name.as_str()), symbol.target(), symbol.level())
        }
        None => (Arc::from(line.word), Default::default(), Default::default()),
    };
    Invocation {
        symbol: id,
        name,
        target,
        level,
        args: Arc::from(truncate(line.rest, MAX_ACTION_ARGS)),
    }
}
