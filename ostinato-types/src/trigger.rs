//! Trigger kinds and modes.

use serde::{Deserialize, Serialize};

/// The kind of external stimulus a binding responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Key,
    Note,
    Program,
    Control,
    Host,
    Ui,
    Pitch,
    Script,
    Osc,
}

impl TriggerKind {
    /// Trigger kinds that are dispatched through a binding table.
    pub fn is_table_driven(self) -> bool {
        matches!(
            self,
            TriggerKind::Key | TriggerKind::Note | TriggerKind::Program | TriggerKind::Control
        )
    }

    pub fn is_midi(self) -> bool {
        matches!(
            self,
            TriggerKind::Note | TriggerKind::Program | TriggerKind::Control | TriggerKind::Pitch
        )
    }

    /// Base of the sustain id range for this trigger kind.
    /// Kinds without a base can never sustain.
    pub fn sustain_base(self) -> Option<u32> {
        match self {
            TriggerKind::Key => Some(SUSTAIN_BASE_KEY),
            TriggerKind::Note => Some(SUSTAIN_BASE_NOTE),
            TriggerKind::Control => Some(SUSTAIN_BASE_CONTROL),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Key => "key",
            TriggerKind::Note => "note",
            TriggerKind::Program => "program",
            TriggerKind::Control => "control",
            TriggerKind::Host => "host",
            TriggerKind::Ui => "ui",
            TriggerKind::Pitch => "pitch",
            TriggerKind::Script => "script",
            TriggerKind::Osc => "osc",
        }
    }
}

/// Sustain ids for keys are the key qualifier offset into this range.
pub const SUSTAIN_BASE_KEY: u32 = 0x0100_0000;
/// Sustain ids for notes: base + channel * 128 + note.
pub const SUSTAIN_BASE_NOTE: u32 = 0x0200_0000;
/// Sustain ids for controllers: base + channel * 128 + controller.
pub const SUSTAIN_BASE_CONTROL: u32 = 0x0300_0000;

/// How a trigger behaves over its down/up lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Momentary,
    Toggle,
    Once,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sustain_bases_are_distinct() {
        let key = TriggerKind::Key.sustain_base().unwrap();
        let note = TriggerKind::Note.sustain_base().unwrap();
        let control = TriggerKind::Control.sustain_base().unwrap();
        assert!(key < note && note < control);
        // 16 channels of 128 values fit below the next base
        assert!(note + 16 * 128 < control);
    }

    #[test]
    fn test_unsustainable_kinds() {
        assert!(TriggerKind::Host.sustain_base().is_none());
        assert!(TriggerKind::Program.sustain_base().is_none());
        assert!(TriggerKind::Pitch.sustain_base().is_none());
    }

    #[test]
    fn test_table_driven_kinds() {
        assert!(TriggerKind::Key.is_table_driven());
        assert!(TriggerKind::Control.is_table_driven());
        assert!(!TriggerKind::Pitch.is_table_driven());
        assert!(!TriggerKind::Host.is_table_driven());
    }
}
