//! Runtime event dispatcher.
//!
//! Owns the installed binding tables and decides, for each raw key or MIDI
//! event, whether the bound action fires now. The returned action is the
//! table's template, reset for this use; callers that keep it past the
//! current dispatch must clone it.

use super::compiler::MidiTables;
use super::qualifier::{key_index, midi_qualifier};
use super::table::BindingTable;
use crate::action::Action;
use crate::midi::MidiEventKind;

pub const DEFAULT_CONTROLLER_THRESHOLD: u8 = 127;

#[derive(Debug, Default)]
pub struct Binderator {
    keyboard: BindingTable,
    midi: MidiTables,
    controller_threshold: u8,
}

fn normalize_threshold(threshold: u8) -> u8 {
    match threshold {
        0 => DEFAULT_CONTROLLER_THRESHOLD,
        t => t.min(127),
    }
}

impl Binderator {
    pub fn new(controller_threshold: u8) -> Self {
        Self {
            keyboard: BindingTable::new(),
            midi: MidiTables::new(),
            controller_threshold: normalize_threshold(controller_threshold),
        }
    }

    /// Install a new keyboard table, returning the one it replaces.
    pub fn install_keyboard(&mut self, table: BindingTable) -> BindingTable {
        std::mem::replace(&mut self.keyboard, table)
    }

    /// Install new MIDI tables, returning the ones they replace.
    pub fn install_midi(&mut self, tables: MidiTables) -> MidiTables {
        std::mem::replace(&mut self.midi, tables)
    }

    pub fn set_controller_threshold(&mut self, threshold: u8) {
        self.controller_threshold = normalize_threshold(threshold);
    }

    pub fn controller_threshold(&self) -> u8 {
        self.controller_threshold
    }

    pub fn keyboard(&self) -> &BindingTable {
        &self.keyboard
    }

    pub fn midi(&self) -> &MidiTables {
        &self.midi
    }

    /// A key transition. Up transitions only fire sustaining actions.
    pub fn handle_key(&mut self, qualifier: u32, down: bool) -> Option<&mut Action> {
        let entry = self
            .keyboard
            .lookup_mut(key_index(qualifier), qualifier, false)?;
        let action = &mut entry.action;
        action.reset_transient();
        if down {
            action.trigger_value = 127;
            return Some(action);
        }
        if action.sustain {
            action.sustain_end = true;
            return Some(action);
        }
        None
    }

    /// A MIDI message. `channel` in the event is zero-based.
    pub fn handle_midi(&mut self, event: &MidiEventKind) -> Option<&mut Action> {
        match *event {
            MidiEventKind::NoteOn {
                channel,
                note,
                velocity,
            } => {
                let action = lookup(&mut self.midi.note, note, channel)?;
                action.trigger_value = velocity as i32;
                Some(action)
            }
            MidiEventKind::NoteOff { channel, note } => {
                let action = lookup(&mut self.midi.note, note, channel)?;
                if !action.sustain {
                    return None;
                }
                action.sustain_end = true;
                Some(action)
            }
            MidiEventKind::ProgramChange { channel, program } => {
                let action = lookup(&mut self.midi.program, program, channel)?;
                action.trigger_value = program as i32;
                Some(action)
            }
            MidiEventKind::ControlChange {
                channel,
                controller,
                value,
            } => {
                let threshold = self.controller_threshold;
                let action = lookup(&mut self.midi.control, controller, channel)?;
                control_change(action, value, threshold)
            }
            MidiEventKind::PitchBend { channel, value } => {
                log::debug!(
                    target: "binderator",
                    "ignoring pitch bend {} on channel {}",
                    value,
                    channel + 1
                );
                None
            }
            MidiEventKind::Aftertouch { .. } | MidiEventKind::PolyAftertouch { .. } => None,
        }
    }
}

fn lookup(table: &mut BindingTable, number: u8, channel: u8) -> Option<&mut Action> {
    let qualifier = midi_qualifier(channel + 1);
    let entry = table.lookup_mut(number as usize, qualifier, true)?;
    entry.action.reset_transient();
    Some(&mut entry.action)
}

fn control_change(action: &mut Action, value: u8, threshold: u8) -> Option<&mut Action> {
    action.trigger_value = value as i32;
    if action.target.wants_continuous_passthrough() {
        action.value = value as i32;
        return Some(action);
    }
    if action.target.wants_threshold_gating() {
        if value == 0 {
            if action.sustain {
                action.sustain_end = true;
                return Some(action);
            }
            return None;
        }
        if value >= threshold {
            return Some(action);
        }
        return None;
    }
    if value == 127 {
        return Some(action);
    }
    None
}
