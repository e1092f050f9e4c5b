//! Binding compiler.
//!
//! Turns persisted [`Binding`]s into [`Action`] templates placed in the binding
//! tables. Bad bindings are logged and skipped; the rest of the set still
//! compiles.

use ostinato_types::trigger::{SUSTAIN_BASE_CONTROL, SUSTAIN_BASE_KEY, SUSTAIN_BASE_NOTE};
use ostinato_types::{Binding, BindingSet, TriggerKind, TriggerMode};

use super::qualifier::{key_index, midi_qualifier, parse_key, KEY_CODE_MASK, MODIFIER_MASK};
use super::table::BindingTable;
use crate::action::{Action, Scope};
use crate::symbol::SymbolTable;

/// Trigger ids for program changes, which never sustain but can still click.
const TRIGGER_BASE_PROGRAM: u32 = 0x0400_0000;
const MAX_KEY_QUALIFIER: u32 = KEY_CODE_MASK | (MODIFIER_MASK << 17);

/// The three MIDI tables, rebuilt together.
#[derive(Debug, Clone, Default)]
pub struct MidiTables {
    pub note: BindingTable,
    pub program: BindingTable,
    pub control: BindingTable,
}

impl MidiTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self) {
        self.note.prepare();
        self.program.prepare();
        self.control.prepare();
    }

    pub fn len(&self) -> usize {
        self.note.len() + self.program.len() + self.control.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A binding ready to be added to a table.
#[derive(Debug, Clone)]
pub struct CompiledBinding {
    pub trigger: TriggerKind,
    pub index: usize,
    pub qualifier: u32,
    pub action: Action,
}

/// Correlation id for a trigger, unique across trigger kinds.
pub fn trigger_id(kind: TriggerKind, value: u32, channel: u8) -> u32 {
    let midi = |base: u32| base + (channel as u32) * 128 + (value & 0x7F);
    match kind {
        TriggerKind::Key => SUSTAIN_BASE_KEY + value,
        TriggerKind::Note => midi(SUSTAIN_BASE_NOTE),
        TriggerKind::Control => midi(SUSTAIN_BASE_CONTROL),
        TriggerKind::Program => midi(TRIGGER_BASE_PROGRAM),
        _ => 0,
    }
}

/// The key code or MIDI number a trigger id was built from.
pub fn trigger_number(kind: TriggerKind, trigger_id: u32) -> i32 {
    if trigger_id == 0 {
        return 0;
    }
    match kind {
        TriggerKind::Key => (trigger_id.wrapping_sub(SUSTAIN_BASE_KEY) & KEY_CODE_MASK) as i32,
        TriggerKind::Note | TriggerKind::Control | TriggerKind::Program => (trigger_id & 0x7F) as i32,
        _ => 0,
    }
}

/// Resolve the key qualifier for a binding, from key notation if present.
fn key_value(binding: &Binding) -> Option<u32> {
    if let Some(notation) = binding.key.as_deref() {
        let parsed = parse_key(notation);
        if parsed.is_none() {
            log::warn!(target: "bindings", "unrecognized key '{}' for {}", notation, binding.symbol);
        }
        return parsed;
    }
    if binding.value < 0 || binding.value as u32 > MAX_KEY_QUALIFIER {
        log::warn!(
            target: "bindings",
            "invalid key value {} for {}",
            binding.value,
            binding.symbol
        );
        return None;
    }
    Some(binding.value as u32)
}

fn midi_value(binding: &Binding) -> Option<u32> {
    if !(0..=127).contains(&binding.value) {
        log::warn!(
            target: "bindings",
            "invalid {} number {} for {}",
            binding.trigger.as_str(),
            binding.value,
            binding.symbol
        );
        return None;
    }
    if binding.channel > 16 {
        log::warn!(
            target: "bindings",
            "invalid MIDI channel {} for {}",
            binding.channel,
            binding.symbol
        );
        return None;
    }
    Some(binding.value as u32)
}

/// Build the action template for a binding.
///
/// The symbol is interned when missing; an unresolved symbol still yields an
/// action so the binding starts working once the symbol is registered and the
/// tables are rebuilt.
pub fn build_action(binding: &Binding, symbols: &mut SymbolTable) -> Option<Action> {
    let name = binding.symbol.trim();
    if name.is_empty() {
        log::warn!(target: "bindings", "binding without a symbol name ignored");
        return None;
    }

    let id = symbols.intern(name);
    let symbol = symbols.get(id)?;
    if !symbol.looks_resolved() {
        log::warn!(target: "bindings", "binding to unresolved symbol {}", name);
    }

    let mut action = Action::new(id, symbol.name.as_str(), symbol.target())
        .with_scope(Scope::parse(&binding.scope))
        .with_trigger(binding.trigger);
    action.level = symbol.level();

    let args = binding.args.trim();
    if let Ok(value) = args.parse::<i32>() {
        action = action.with_value(value);
    }
    action.set_args(args);
    if args.starts_with("noquant") || args == "quantize=off" {
        action.no_quantize = true;
    }
    Some(action)
}

/// Compile one binding into a table slot.
pub fn compile_binding(binding: &Binding, symbols: &mut SymbolTable) -> Option<CompiledBinding> {
    let (index, qualifier, value, channel) = match binding.trigger {
        TriggerKind::Key => {
            let q = key_value(binding)?;
            (key_index(q), q, q, 0)
        }
        TriggerKind::Note | TriggerKind::Program | TriggerKind::Control => {
            let v = midi_value(binding)?;
            (v as usize, midi_qualifier(binding.channel), v, binding.channel)
        }
        TriggerKind::Pitch => {
            log::debug!(target: "bindings", "pitch wheel bindings are not supported: {}", binding.symbol);
            return None;
        }
        other => {
            log::debug!(
                target: "bindings",
                "{} binding for {} is not table driven",
                other.as_str(),
                binding.symbol
            );
            return None;
        }
    };

    let mut action = build_action(binding, symbols)?;
    action.trigger_id = trigger_id(binding.trigger, value, channel);

    let momentary = matches!(binding.mode, None | Some(TriggerMode::Momentary));
    let trigger_can_sustain = binding.trigger.sustain_base().is_some() && momentary;
    if trigger_can_sustain && action.target.is_sustainable() {
        action.sustain = true;
        action.sustain_id = action.trigger_id;
    }

    Some(CompiledBinding {
        trigger: binding.trigger,
        index,
        qualifier,
        action,
    })
}

/// Rebuild the keyboard table from the selected sets, in order.
pub fn compile_keyboard(sets: &[&BindingSet], symbols: &mut SymbolTable, table: &mut BindingTable) {
    table.prepare();
    for binding in sets.iter().flat_map(|s| s.bindings.iter()) {
        if binding.trigger != TriggerKind::Key {
            continue;
        }
        if let Some(c) = compile_binding(binding, symbols) {
            table.add_entry(c.index, c.qualifier, c.action);
        }
    }
    log::debug!(target: "bindings", "keyboard table rebuilt with {} entries", table.len());
}

/// Rebuild the MIDI tables from the selected sets, in order.
pub fn compile_midi(sets: &[&BindingSet], symbols: &mut SymbolTable, tables: &mut MidiTables) {
    tables.prepare();
    for binding in sets.iter().flat_map(|s| s.bindings.iter()) {
        if !binding.trigger.is_midi() {
            continue;
        }
        let Some(c) = compile_binding(binding, symbols) else {
            continue;
        };
        let table = match c.trigger {
            TriggerKind::Note => &mut tables.note,
            TriggerKind::Program => &mut tables.program,
            TriggerKind::Control => &mut tables.control,
            _ => continue,
        };
        table.add_entry(c.index, c.qualifier, c.action);
    }
    log::debug!(target: "bindings", "MIDI tables rebuilt with {} entries", tables.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Target;
    use crate::binding::qualifier::{key_qualifier, MOD_CTRL};
    use crate::symbol::FunctionDefinition;
    use ostinato_types::TrackId;

    fn symbols() -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.register_function("Record", FunctionDefinition::sustainable());
        symbols.register_function("Undo", FunctionDefinition::default());
        symbols
    }

    #[test]
    fn test_sustain_requires_sustainable_target() {
        let mut symbols = symbols();
        for mode in [None, Some(TriggerMode::Momentary), Some(TriggerMode::Toggle)] {
            let mut binding = Binding::new(TriggerKind::Key, 'u' as i32, "Undo");
            binding.mode = mode;
            let c = compile_binding(&binding, &mut symbols).unwrap();
            assert!(!c.action.sustain);
            assert_eq!(c.action.sustain_id, 0);
        }
    }

    #[test]
    fn test_sustain_on_sustainable_key() {
        let mut symbols = symbols();
        let c = compile_binding(&Binding::new(TriggerKind::Key, 'r' as i32, "Record"), &mut symbols)
            .unwrap();
        assert!(c.action.sustain);
        assert!(c.action.sustain_id >= SUSTAIN_BASE_KEY);
        assert!(c.action.sustain_id < SUSTAIN_BASE_NOTE);
    }

    #[test]
    fn test_toggle_mode_never_sustains() {
        let mut symbols = symbols();
        let binding =
            Binding::new(TriggerKind::Key, 'r' as i32, "Record").with_mode(TriggerMode::Toggle);
        let c = compile_binding(&binding, &mut symbols).unwrap();
        assert!(!c.action.sustain);
        assert_ne!(c.action.trigger_id, 0);
    }

    #[test]
    fn test_program_never_sustains() {
        let mut symbols = symbols();
        let c = compile_binding(&Binding::new(TriggerKind::Program, 4, "Record"), &mut symbols)
            .unwrap();
        assert!(!c.action.sustain);
    }

    #[test]
    fn test_note_sustain_id_range() {
        let mut symbols = symbols();
        let binding = Binding::new(TriggerKind::Note, 36, "Record").with_channel(3);
        let c = compile_binding(&binding, &mut symbols).unwrap();
        assert_eq!(c.index, 36);
        assert_eq!(c.qualifier, 3);
        assert_eq!(c.action.sustain_id, SUSTAIN_BASE_NOTE + 3 * 128 + 36);
    }

    #[test]
    fn test_trigger_number_round_trip() {
        let key = key_qualifier('r' as u32, MOD_CTRL);
        let id = trigger_id(TriggerKind::Key, key, 0);
        assert_eq!(trigger_number(TriggerKind::Key, id), 'r' as i32);
        let id = trigger_id(TriggerKind::Control, 64, 5);
        assert_eq!(trigger_number(TriggerKind::Control, id), 64);
        assert_eq!(trigger_number(TriggerKind::Host, 0), 0);
    }

    #[test]
    fn test_rejects_invalid_bindings() {
        let mut symbols = symbols();
        assert!(compile_binding(&Binding::new(TriggerKind::Key, 'r' as i32, ""), &mut symbols).is_none());
        assert!(compile_binding(&Binding::new(TriggerKind::Key, -1, "Record"), &mut symbols).is_none());
        assert!(compile_binding(&Binding::new(TriggerKind::Note, 128, "Record"), &mut symbols).is_none());
        assert!(compile_binding(&Binding::new(TriggerKind::Control, -3, "Record"), &mut symbols).is_none());
        assert!(compile_binding(
            &Binding::new(TriggerKind::Note, 10, "Record").with_channel(17),
            &mut symbols
        )
        .is_none());
        assert!(compile_binding(&Binding::new(TriggerKind::Pitch, 0, "Record"), &mut symbols).is_none());
    }

    #[test]
    fn test_unresolved_symbol_still_compiles() {
        let mut symbols = symbols();
        let c = compile_binding(&Binding::new(TriggerKind::Key, 'x' as i32, "Later"), &mut symbols)
            .unwrap();
        assert_eq!(c.action.target, Target::Unresolved);
        assert!(symbols.find("Later").is_some());
    }

    #[test]
    fn test_args_and_overrides() {
        let mut symbols = symbols();
        let binding = Binding::new(TriggerKind::Key, 'r' as i32, "Record")
            .with_args("42")
            .with_scope("2");
        let c = compile_binding(&binding, &mut symbols).unwrap();
        assert_eq!(c.action.value, 42);
        assert_eq!(&*c.action.args, "42");
        assert_eq!(c.action.scope, Scope::Track(TrackId::new(1)));
        assert!(!c.action.no_quantize);

        for args in ["noquantize", "quantize=off"] {
            let binding = Binding::new(TriggerKind::Key, 'r' as i32, "Record").with_args(args);
            assert!(compile_binding(&binding, &mut symbols).unwrap().action.no_quantize);
        }
    }

    #[test]
    fn test_key_notation() {
        let mut symbols = symbols();
        let mut binding = Binding::new(TriggerKind::Key, -1, "Record");
        binding.key = Some("Ctrl+r".into());
        let c = compile_binding(&binding, &mut symbols).unwrap();
        assert_eq!(c.qualifier, key_qualifier('r' as u32, MOD_CTRL));
        assert_eq!(c.index, 'r' as usize);

        binding.key = Some("Hyper+r".into());
        assert!(compile_binding(&binding, &mut symbols).is_none());
    }

    #[test]
    fn test_compile_midi_routes_by_kind() {
        let mut symbols = symbols();
        let mut set = BindingSet::new("Common");
        set.push(Binding::new(TriggerKind::Note, 36, "Record"));
        set.push(Binding::new(TriggerKind::Control, 64, "Record"));
        set.push(Binding::new(TriggerKind::Program, 2, "Undo"));
        set.push(Binding::new(TriggerKind::Key, 'r' as i32, "Record"));
        let mut tables = MidiTables::new();
        compile_midi(&[&set], &mut symbols, &mut tables);
        assert_eq!(tables.note.len(), 1);
        assert_eq!(tables.control.len(), 1);
        assert_eq!(tables.program.len(), 1);

        let mut keyboard = BindingTable::new();
        compile_keyboard(&[&set], &mut symbols, &mut keyboard);
        assert_eq!(keyboard.len(), 1);
    }
}
