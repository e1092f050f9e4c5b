//! Trigger bindings: qualifier codec, tables, compiler and the runtime
//! dispatcher that consults them.

pub mod binderator;
pub mod compiler;
pub mod qualifier;
pub mod table;

pub use binderator::Binderator;
pub use compiler::{compile_binding, compile_keyboard, compile_midi, MidiTables};
pub use qualifier::{parse_key, render_key};
pub use table::{BindingTable, TableEntry};
