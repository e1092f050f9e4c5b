use std::sync::Arc;

use ostinato_types::ScriptId;

use super::statement::{Invocation, Statement};
use super::Script;
use crate::symbol::SymbolTable;

/// Loaded scripts, indexed by [`ScriptId`].
///
/// The control thread owns the master copy and publishes clones to the
/// real-time thread; cloning only bumps reference counts.
#[derive(Debug, Clone, Default)]
pub struct ScriptLibrary {
    scripts: Vec<Arc<Script>>,
}

impl ScriptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script, replacing any script with the same name. A replaced
    /// script keeps its id so compiled bindings stay valid.
    pub fn insert(&mut self, mut script: Script) -> ScriptId {
        if let Some(pos) = self
            .scripts
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(&script.name))
        {
            let id = ScriptId::new(pos as u32);
            script.id = id;
            self.scripts[pos] = Arc::new(script);
            return id;
        }
        let id = ScriptId::new(self.scripts.len() as u32);
        script.id = id;
        self.scripts.push(Arc::new(script));
        id
    }

    pub fn get(&self, id: ScriptId) -> Option<&Arc<Script>> {
        self.scripts.get(id.get() as usize)
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Script>> {
        self.scripts
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Script>> {
        self.scripts.iter()
    }

    /// Refresh the symbol snapshots invocations carry. A script that invokes
    /// a symbol defined after it was parsed starts reaching it here. Returns
    /// the number of scripts that changed.
    pub fn resolve(&mut self, symbols: &SymbolTable) -> usize {
        let mut changed = 0;
        for script in &mut self.scripts {
            let stale = script.statements.iter().any(|statement| match statement {
                Statement::Invoke(invocation) => is_stale(invocation, symbols),
                _ => false,
            });
            if !stale {
                continue;
            }
            for statement in &mut Arc::make_mut(script).statements {
                if let Statement::Invoke(invocation) = statement {
                    if let Some(symbol) = symbols.get(invocation.symbol) {
                        invocation.target = symbol.target();
                        invocation.level = symbol.level();
                    }
                }
            }
            log::debug!(target: "scripts", "re-resolved symbols in {}", script.name);
            changed += 1;
        }
        changed
    }
}

fn is_stale(invocation: &Invocation, symbols: &SymbolTable) -> bool {
    symbols
        .get(invocation.symbol)
        .is_some_and(|s| s.target() != invocation.target || s.level() != invocation.level)
}
