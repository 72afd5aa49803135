//! Free-form mode strings such as `SoundKeeperAllSineF440A5.exe` or `digital white a2`.
//!
//! Keywords are matched case-insensitively anywhere in the string, so the
//! executable can be renamed to pick a mode without any arguments.

use super::config::{DeviceScope, KeeperConfig, StreamConfig, StreamKind};

const DEVICE_KEYWORDS: [(&str, DeviceScope); 5] = [
    ("primary", DeviceScope::Primary),
    ("all", DeviceScope::All),
    ("analog", DeviceScope::Analog),
    ("digital", DeviceScope::Digital),
    ("kill", DeviceScope::None),
];

/// Stream keywords that take trailing parameters, in match priority order.
const TONE_KEYWORDS: [(&str, StreamKind); 5] = [
    ("fluctuate", StreamKind::Fluctuate),
    ("sine", StreamKind::Sine),
    ("white", StreamKind::WhiteNoise),
    ("brown", StreamKind::BrownNoise),
    ("pink", StreamKind::PinkNoise),
];

/// Apply every keyword found in `text` to `config`. Later device keywords win.
///
/// Returns true if anything was changed.
pub fn apply_mode_string(config: &mut KeeperConfig, text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    let mut changed = false;

    for (keyword, scope) in DEVICE_KEYWORDS {
        if lowered.contains(keyword) {
            config.device_scope = scope;
            changed = true;
        }
    }

    if lowered.contains("zero") || lowered.contains("null") {
        config.stream = StreamConfig::with_defaults(StreamKind::Zero);
        return true;
    }

    for (keyword, kind) in TONE_KEYWORDS {
        if let Some(pos) = lowered.find(keyword) {
            config.stream = parse_stream_args(kind, &lowered[pos + keyword.len()..]);
            return true;
        }
    }

    changed
}

/// Parse `f<hz> a<percent> l<s> w<s> t<s>` parameters following a stream keyword.
/// Parsing stops at the first character that is not a separator or parameter letter.
pub fn parse_stream_args(kind: StreamKind, args: &str) -> StreamConfig {
    let mut stream = StreamConfig::with_defaults(kind);
    let mut rest = args;

    while let Some(c) = rest.chars().next() {
        match c {
            ' ' | '-' => rest = &rest[1..],
            'f' | 'a' | 'l' | 'w' | 't' => {
                rest = rest[1..].trim_start_matches([' ', '=']);
                let (value, tail) = leading_number(rest);
                rest = tail;
                let value = value.abs();
                match c {
                    'f' => stream.set_frequency(value),
                    'a' => stream.set_amplitude_percent(value),
                    'l' => stream.set_play_seconds(value),
                    'w' => stream.set_wait_seconds(value),
                    _ => stream.set_fade_seconds(value),
                }
            }
            _ => break,
        }
    }

    stream
}

/// Split the longest decimal number prefix off `text`. Yields 0 and the
/// untouched input when there is none.
fn leading_number(text: &str) -> (f64, &str) {
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return (0.0, text);
    }
    // Exponent only if it is complete.
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    match text[..end].parse::<f64>() {
        Ok(value) => (value, &text[end..]),
        Err(_) => (0.0, text),
    }
}
