//! Symbol registry.
//!
//! Every name a binding or script can refer to is interned here. The table
//! lives on the control thread; bindings and scripts copy what they need out
//! of it into a [`Target`] when they are compiled.

use std::collections::HashMap;

use ostinato_types::{ActivationKind, Behavior, ResetScope, ScriptId, SymbolId, SymbolLevel};

use crate::action::{FunctionTarget, ParameterTarget, ScriptTarget, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionDefinition {
    /// Holds its effect open until the trigger is released.
    pub sustainable: bool,
    pub focus_lockable: bool,
    pub reset: Option<ResetScope>,
    pub level: SymbolLevel,
}

impl FunctionDefinition {
    pub fn sustainable() -> Self {
        Self {
            sustainable: true,
            focus_lockable: true,
            ..Self::default()
        }
    }

    pub fn reset(scope: ResetScope) -> Self {
        Self {
            reset: Some(scope),
            focus_lockable: scope == ResetScope::Track,
            ..Self::default()
        }
    }

    pub fn ui() -> Self {
        Self {
            level: SymbolLevel::Ui,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterDefinition {
    /// Not track-specific; invoked once without a track.
    pub global: bool,
    pub focus_lockable: bool,
    pub level: SymbolLevel,
}

/// Properties declared by a script's directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptProperties {
    pub sustainable: bool,
    pub continuous: bool,
    pub focus_lockable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SymbolPayload {
    #[default]
    None,
    Function(FunctionDefinition),
    Parameter(ParameterDefinition),
    Script(ScriptId, ScriptProperties),
    Sample(u32),
    Activation(ActivationKind),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub payload: SymbolPayload,
}

impl Symbol {
    pub fn behavior(&self) -> Option<Behavior> {
        match self.payload {
            SymbolPayload::None => None,
            SymbolPayload::Function(_) => Some(Behavior::Function),
            SymbolPayload::Parameter(_) => Some(Behavior::Parameter),
            SymbolPayload::Script(..) => Some(Behavior::Script),
            SymbolPayload::Sample(_) => Some(Behavior::Sample),
            SymbolPayload::Activation(_) => Some(Behavior::Activation),
        }
    }

    pub fn level(&self) -> SymbolLevel {
        match self.payload {
            SymbolPayload::Function(f) => f.level,
            SymbolPayload::Parameter(p) => p.level,
            _ => SymbolLevel::Core,
        }
    }

    /// Whether the symbol has anything attached to it.
    pub fn looks_resolved(&self) -> bool {
        !matches!(self.payload, SymbolPayload::None)
    }

    /// Snapshot the definition for a compiled action.
    pub fn target(&self) -> Target {
        match self.payload {
            SymbolPayload::None => Target::Unresolved,
            SymbolPayload::Function(f) => Target::Function(FunctionTarget {
                sustainable: f.sustainable,
                focus_lockable: f.focus_lockable,
                reset: f.reset,
            }),
            SymbolPayload::Parameter(p) => Target::Parameter(ParameterTarget {
                global: p.global,
                focus_lockable: p.focus_lockable,
            }),
            SymbolPayload::Script(id, props) => Target::Script(ScriptTarget {
                id,
                continuous: props.continuous,
                sustainable: props.sustainable,
                focus_lockable: props.focus_lockable,
            }),
            SymbolPayload::Sample(_) => Target::Sample,
            SymbolPayload::Activation(kind) => Target::Activation(kind),
        }
    }
}

/// Name to symbol registry. Lookups ignore ASCII case.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Find or create the symbol for a name.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        let key = Self::key(name);
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = SymbolId::new(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            payload: SymbolPayload::None,
        });
        self.by_name.insert(key, id);
        id
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        let id = self.by_name.get(&Self::key(name))?;
        self.get(*id)
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.get() as usize)
    }

    fn attach(&mut self, name: &str, payload: SymbolPayload) -> SymbolId {
        let id = self.intern(name);
        if let Some(symbol) = self.symbols.get_mut(id.get() as usize) {
            if symbol.looks_resolved() && symbol.payload != payload {
                log::debug!(target: "bindings", "redefining symbol {}", symbol.name);
            }
            symbol.payload = payload;
        }
        id
    }

    pub fn register_function(&mut self, name: &str, def: FunctionDefinition) -> SymbolId {
        self.attach(name, SymbolPayload::Function(def))
    }

    pub fn register_parameter(&mut self, name: &str, def: ParameterDefinition) -> SymbolId {
        self.attach(name, SymbolPayload::Parameter(def))
    }

    pub fn register_script(
        &mut self,
        name: &str,
        script: ScriptId,
        props: ScriptProperties,
    ) -> SymbolId {
        self.attach(name, SymbolPayload::Script(script, props))
    }

    pub fn register_sample(&mut self, name: &str, index: u32) -> SymbolId {
        self.attach(name, SymbolPayload::Sample(index))
    }

    pub fn register_activation(&mut self, name: &str, kind: ActivationKind) -> SymbolId {
        self.attach(name, SymbolPayload::Activation(kind))
    }

    /// Whether a name has an attached definition.
    pub fn looks_resolved(&self, name: &str) -> bool {
        self.find(name).is_some_and(Symbol::looks_resolved)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent_and_case_insensitive() {
        let mut table = SymbolTable::new();
        let a = table.intern("Record");
        let b = table.intern("record");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(a).unwrap().name, "Record");
    }

    #[test]
    fn test_interned_symbol_is_unresolved() {
        let mut table = SymbolTable::new();
        table.intern("Mystery");
        assert!(!table.looks_resolved("Mystery"));
        assert!(!table.looks_resolved("Unknown"));
        assert_eq!(table.find("Mystery").unwrap().target(), Target::Unresolved);
    }

    #[test]
    fn test_late_registration_resolves() {
        let mut table = SymbolTable::new();
        let id = table.intern("Record");
        let registered = table.register_function("Record", FunctionDefinition::sustainable());
        assert_eq!(id, registered);
        assert!(table.looks_resolved("RECORD"));
        assert!(table.find("record").unwrap().target().is_sustainable());
    }

    #[test]
    fn test_behavior_and_level() {
        let mut table = SymbolTable::new();
        table.register_function("ShowHelp", FunctionDefinition::ui());
        table.register_parameter("output", ParameterDefinition::default());
        table.register_activation("Live", ActivationKind::Bindings);
        let help = table.find("ShowHelp").unwrap();
        assert_eq!(help.behavior(), Some(Behavior::Function));
        assert_eq!(help.level(), SymbolLevel::Ui);
        assert_eq!(
            table.find("output").unwrap().behavior(),
            Some(Behavior::Parameter)
        );
        assert_eq!(
            table.find("Live").unwrap().target(),
            Target::Activation(ActivationKind::Bindings)
        );
    }
}
