//! Terminal output sanitization.
//!
//! Shell sessions stream raw bytes from a PTY, which carries ANSI escape
//! sequences (cursor movement, color, OSC title-setting) that make no sense
//! once hoisted into a persisted text block. `sanitize` strips those
//! sequences and normalizes line endings before text reaches storage.

use once_cell::sync::Lazy;
use regex::Regex;

// CSI sequences: ESC '[' ... final byte in 0x40-0x7E.
static CSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());
// OSC sequences: ESC ']' ... terminated by BEL or ESC '\'.
static OSC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)?").unwrap());
// Other two-byte escape sequences (e.g. ESC '(' 'B' charset selection).
static ESC2: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[()][A-Za-z0-9]").unwrap());
// Remaining single-character C0 controls other than \n and \t.
static C0: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());

/// Strip ANSI/control sequences from raw terminal output and normalize
/// line endings to `\n`.
///
/// Idempotent: `sanitize(sanitize(s)) == sanitize(s)` for all `s`, since the
/// output contains none of the byte patterns the passes look for.
pub fn sanitize(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let no_osc = OSC.replace_all(&normalized, "");
    let no_csi = CSI.replace_all(&no_osc, "");
    let no_esc2 = ESC2.replace_all(&no_csi, "");
    C0.replace_all(&no_esc2, "").into_owned()
}
