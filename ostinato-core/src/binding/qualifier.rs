//! Trigger qualifier codec.
//!
//! A qualifier is the integer compared inside a binding table bucket. For keys
//! it is the full key code plus modifier bits; the bucket index is only the
//! low byte of the code, so keys that share a low byte ('.' and Delete) land in
//! the same bucket and are told apart by the qualifier alone. For MIDI the
//! qualifier is the 1-based channel, with 0 meaning "any channel".

/// Bits of the key code kept in a qualifier.
pub const KEY_CODE_MASK: u32 = 0x1FFFF;
/// Bits of the modifier set kept in a qualifier.
pub const MODIFIER_MASK: u32 = 0xF;
const MODIFIER_SHIFT: u32 = 17;

pub const MOD_SHIFT: u8 = 1;
pub const MOD_CTRL: u8 = 2;
pub const MOD_ALT: u8 = 4;
pub const MOD_CMD: u8 = 8;

/// Named keys live above the character range so their low byte can collide
/// with printable characters without colliding on the full code.
const NAMED_KEY_BASE: u32 = 0x10000;

/// Encode a key code and modifier bits into a qualifier.
pub fn key_qualifier(code: u32, modifiers: u8) -> u32 {
    (code & KEY_CODE_MASK) | ((modifiers as u32 & MODIFIER_MASK) << MODIFIER_SHIFT)
}

/// Split a key qualifier back into (code, modifiers).
pub fn decode_key_qualifier(qualifier: u32) -> (u32, u8) {
    (
        qualifier & KEY_CODE_MASK,
        ((qualifier >> MODIFIER_SHIFT) & MODIFIER_MASK) as u8,
    )
}

/// Bucket index for a key code or qualifier.
pub fn key_index(code: u32) -> usize {
    (code & 0xFF) as usize
}

/// Qualifier for a MIDI event or binding channel (1..=16, 0 = any).
pub fn midi_qualifier(channel: u8) -> u32 {
    channel as u32
}

const NAMED_KEYS: &[(&str, u32)] = &[
    ("Backspace", NAMED_KEY_BASE | 0x08),
    ("Tab", NAMED_KEY_BASE | 0x09),
    ("Enter", NAMED_KEY_BASE | 0x0D),
    ("Escape", NAMED_KEY_BASE | 0x1B),
    ("PageUp", NAMED_KEY_BASE | 0x21),
    ("PageDown", NAMED_KEY_BASE | 0x22),
    ("End", NAMED_KEY_BASE | 0x23),
    ("Home", NAMED_KEY_BASE | 0x24),
    ("Left", NAMED_KEY_BASE | 0x25),
    ("Up", NAMED_KEY_BASE | 0x26),
    ("Right", NAMED_KEY_BASE | 0x27),
    ("Down", NAMED_KEY_BASE | 0x28),
    ("Insert", NAMED_KEY_BASE | 0x2D),
    ("Delete", NAMED_KEY_BASE | 0x2E),
];

const F_KEY_BASE: u32 = NAMED_KEY_BASE | 0x70;

/// Key code for a named key ("Up", "Delete", "F1").
pub fn named_key_code(name: &str) -> Option<u32> {
    if let Some((_, code)) = NAMED_KEYS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        return Some(*code);
    }
    if name.eq_ignore_ascii_case("Space") {
        return Some(' ' as u32);
    }
    let rest = name.strip_prefix('F').or_else(|| name.strip_prefix('f'))?;
    match rest.parse::<u32>() {
        Ok(n) if (1..=24).contains(&n) => Some(F_KEY_BASE + n - 1),
        _ => None,
    }
}

fn key_code_name(code: u32) -> Option<String> {
    if let Some((name, _)) = NAMED_KEYS.iter().find(|(_, c)| *c == code) {
        return Some((*name).to_string());
    }
    if (F_KEY_BASE..F_KEY_BASE + 24).contains(&code) {
        return Some(format!("F{}", code - F_KEY_BASE + 1));
    }
    if code == ' ' as u32 {
        return Some("Space".to_string());
    }
    char::from_u32(code)
        .filter(|c| !c.is_control())
        .map(|c| c.to_string())
}

/// Parse key notation into a qualifier.
///
/// - `"r"` → 'r'
/// - `"Space"`, `"Up"`, `"F1"` → named keys
/// - `"Ctrl+Shift+r"` → 'r' with modifiers
///
/// Returns `None` for unrecognised names.
pub fn parse_key(s: &str) -> Option<u32> {
    let mut modifiers = 0u8;
    let mut rest = s;
    loop {
        let Some((prefix, tail)) = rest.split_once('+') else {
            break;
        };
        // "+" on its own, or "Ctrl++"
        if prefix.is_empty() {
            break;
        }
        let bit = match prefix.to_ascii_lowercase().as_str() {
            "shift" => MOD_SHIFT,
            "ctrl" | "control" => MOD_CTRL,
            "alt" | "option" => MOD_ALT,
            "cmd" | "command" | "meta" => MOD_CMD,
            _ => return None,
        };
        modifiers |= bit;
        rest = tail;
    }

    let mut chars = rest.chars();
    let code = match (chars.next(), chars.next()) {
        (Some(c), None) => c as u32,
        (Some(_), Some(_)) => named_key_code(rest)?,
        (None, _) => return None,
    };
    if code > KEY_CODE_MASK {
        return None;
    }
    Some(key_qualifier(code, modifiers))
}

/// Render a qualifier back to key notation for display.
pub fn render_key(qualifier: u32) -> String {
    let (code, modifiers) = decode_key_qualifier(qualifier);
    let mut out = String::new();
    if modifiers & MOD_CTRL != 0 {
        out.push_str("Ctrl+");
    }
    if modifiers & MOD_ALT != 0 {
        out.push_str("Alt+");
    }
    if modifiers & MOD_CMD != 0 {
        out.push_str("Cmd+");
    }
    if modifiers & MOD_SHIFT != 0 {
        out.push_str("Shift+");
    }
    match key_code_name(code) {
        Some(name) => out.push_str(&name),
        None => out.push_str(&format!("#{code:x}")),
    }
    out
}
