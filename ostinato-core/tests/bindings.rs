mod common;

use ostinato_core::binding::compiler::{compile_binding, compile_keyboard, compile_midi, MidiTables};
use ostinato_core::binding::qualifier::{
    decode_key_qualifier, key_index, key_qualifier, midi_qualifier, KEY_CODE_MASK,
};
use ostinato_core::binding::{parse_key, Binderator, BindingTable};
use ostinato_core::midi::{MidiEvent, MidiEventKind};
use ostinato_types::trigger::{SUSTAIN_BASE_KEY, SUSTAIN_BASE_NOTE};
use ostinato_types::{Binding, BindingSet, TriggerKind, TriggerMode};

fn note_on(channel: u8, note: u8) -> MidiEventKind {
    MidiEventKind::NoteOn {
        channel,
        note,
        velocity: 100,
    }
}

fn cc(controller: u8, value: u8) -> MidiEventKind {
    MidiEventKind::ControlChange {
        channel: 0,
        controller,
        value,
    }
}

#[test]
fn test_qualifier_round_trip() {
    let codes = [0u32, 'a' as u32, 0xFF, 0x1002E, KEY_CODE_MASK];
    for code in codes {
        for modifiers in 0u8..16 {
            let q = key_qualifier(code, modifiers);
            assert_eq!(decode_key_qualifier(q), (code, modifiers));
        }
    }
}

#[test]
fn test_bucket_is_low_byte() {
    let mut symbols = common::symbols();
    let mut set = BindingSet::new("Keys");
    let dot = parse_key(".").unwrap();
    let delete = parse_key("Delete").unwrap();
    set.push(Binding::new(TriggerKind::Key, dot as i32, "Record"));
    set.push(Binding::new(TriggerKind::Key, delete as i32, "Mute"));

    let mut table = BindingTable::new();
    compile_keyboard(&[&set], &mut symbols, &mut table);

    assert_eq!(key_index(dot), key_index(delete));
    assert_eq!(table.bucket(key_index(dot)).len(), 2);
    for code in [dot, delete, 0x1FF2E] {
        assert_eq!(key_index(code), (code & 0xFF) as usize);
    }
    let found = |q: u32| {
        table
            .lookup(key_index(q), q, false)
            .map(|e| e.action.name.to_string())
    };
    assert_eq!(found(dot).as_deref(), Some("Record"));
    assert_eq!(found(delete).as_deref(), Some("Mute"));
    assert_eq!(found(0x1FF2E), None);
}

#[test]
fn test_wild_zero_channel() {
    let mut symbols = common::symbols();
    let mut set = BindingSet::new("Notes");
    set.push(Binding::new(TriggerKind::Note, 40, "Record"));
    let mut tables = MidiTables::new();
    compile_midi(&[&set], &mut symbols, &mut tables);

    let mut binderator = Binderator::new(127);
    binderator.install_midi(tables);
    let action = binderator.handle_midi(&note_on(4, 40)).unwrap();
    assert_eq!(&*action.name, "Record");
}

#[test]
fn test_first_registered_wins() {
    let mut symbols = common::symbols();
    let mut set = BindingSet::new("Notes");
    set.push(Binding::new(TriggerKind::Note, 40, "Mute").with_channel(3));
    set.push(Binding::new(TriggerKind::Note, 40, "Record").with_channel(5));
    set.push(Binding::new(TriggerKind::Note, 40, "TrackReset"));
    let mut tables = MidiTables::new();
    compile_midi(&[&set], &mut symbols, &mut tables);

    let mut binderator = Binderator::new(127);
    binderator.install_midi(tables);
    let name = |b: &mut Binderator, channel| {
        b.handle_midi(&note_on(channel, 40)).map(|a| a.name.to_string())
    };
    assert_eq!(name(&mut binderator, 4).as_deref(), Some("Record"));
    assert_eq!(name(&mut binderator, 2).as_deref(), Some("Mute"));
    // the wildcard was registered last, so it only catches other channels
    assert_eq!(name(&mut binderator, 0).as_deref(), Some("TrackReset"));

    // a wildcard registered first shadows the channel-specific binding
    let mut set = BindingSet::new("Shadowed");
    set.push(Binding::new(TriggerKind::Note, 41, "Mute"));
    set.push(Binding::new(TriggerKind::Note, 41, "Record").with_channel(5));
    let mut tables = MidiTables::new();
    compile_midi(&[&set], &mut symbols, &mut tables);
    let entry = tables.note.lookup(41, midi_qualifier(5), true).unwrap();
    assert_eq!(&*entry.action.name, "Mute");
}

#[test]
fn test_sustain_needs_both_trigger_and_target() {
    let mut symbols = common::symbols();

    for mode in [None, Some(TriggerMode::Momentary), Some(TriggerMode::Toggle)] {
        let mut binding = Binding::new(TriggerKind::Key, 'm' as i32, "Mute");
        binding.mode = mode;
        let compiled = compile_binding(&binding, &mut symbols).unwrap();
        assert!(!compiled.action.sustain);
    }

    let binding = Binding::new(TriggerKind::Key, 'r' as i32, "Record");
    let compiled = compile_binding(&binding, &mut symbols).unwrap();
    assert!(compiled.action.sustain);
    assert_ne!(compiled.action.sustain_id, 0);
    assert!((SUSTAIN_BASE_KEY..SUSTAIN_BASE_NOTE).contains(&compiled.action.sustain_id));
}

#[test]
fn test_controller_threshold() {
    let mut symbols = common::symbols();
    let mut set = BindingSet::new("Pedals");
    set.push(Binding::new(TriggerKind::Control, 64, "Record"));
    set.push(Binding::new(TriggerKind::Control, 65, "Mute"));
    let mut tables = MidiTables::new();
    compile_midi(&[&set], &mut symbols, &mut tables);

    let mut binderator = Binderator::new(100);
    binderator.install_midi(tables);

    let release = binderator.handle_midi(&cc(64, 0)).unwrap();
    assert!(release.sustain_end);
    assert!(binderator.handle_midi(&cc(65, 0)).is_none());

    assert!(binderator.handle_midi(&cc(64, 50)).is_none());
    assert!(binderator.handle_midi(&cc(64, 99)).is_none());

    let press = binderator.handle_midi(&cc(64, 127)).unwrap();
    assert!(!press.sustain_end);
    assert!(binderator.handle_midi(&cc(65, 100)).is_some());
}

#[test]
fn test_rebuild_is_idempotent() {
    let mut symbols = common::symbols();
    let mut set = BindingSet::new("Keys");
    set.push(Binding::new(TriggerKind::Key, 'r' as i32, "Record"));
    let mut ctrl_r = Binding::new(TriggerKind::Key, 0, "Mute");
    ctrl_r.key = Some("Ctrl+r".into());
    set.push(ctrl_r);
    set.push(Binding::new(TriggerKind::Key, 'x' as i32, "Nothing"));

    let mut first = BindingTable::new();
    compile_keyboard(&[&set], &mut symbols, &mut first);
    let mut second = BindingTable::new();
    compile_keyboard(&[&set], &mut symbols, &mut second);

    let queries = ['r' as u32, 'x' as u32, 'q' as u32, parse_key("Ctrl+r").unwrap()];
    for q in queries {
        let a = first.lookup(key_index(q), q, false).map(|e| &e.action);
        let b = second.lookup(key_index(q), q, false).map(|e| &e.action);
        match (a, b) {
            (Some(a), Some(b)) => {
                assert_eq!(a.name, b.name);
                assert_eq!(a.target, b.target);
                assert_eq!(a.sustain_id, b.sustain_id);
            }
            (None, None) => {}
            other => panic!("tables disagree for {:#x}: {:?}", q, other),
        }
    }
}

#[test]
fn test_keys_dispatch_end_to_end() {
    let mut engine = common::RecordingEngine::new(2);
    let mut set = BindingSet::new("Keys");
    set.push(Binding::new(TriggerKind::Key, 'r' as i32, "Record").with_scope("2"));
    let (_control, mut core) = common::pair(set, &mut engine);

    core.handle_key('r' as u32, true, &mut engine);
    core.handle_key('r' as u32, false, &mut engine);
    assert_eq!(engine.names(), vec!["Record", "Record"]);
    assert!(engine.calls.iter().all(|c| c.track == Some(ostinato_types::TrackId::new(1))));
    assert!(engine.calls[1].sustain_end);

    let event = MidiEvent::new(0, note_on(0, 60));
    core.handle_midi_event(&event, &mut engine);
    assert_eq!(engine.calls.len(), 2);
}
