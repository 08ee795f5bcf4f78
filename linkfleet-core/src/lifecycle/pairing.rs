//! Pairing code presentation

const GROUP_LEN: usize = 4;

/// Split a raw pairing code into dash-separated groups of four.
///
/// `"ABCDEFGH"` becomes `"ABCD-EFGH"`; a trailing short group is kept as is.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    chars
        .chunks(GROUP_LEN)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
