/// What a key does on the Piano Genie keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Button(usize),
    Sustain,
    Soft,
}

/// Number of digit keys bound to buttons, `1` through `8`.
pub const NUM_BUTTON_KEYS: usize = 8;

/// Maps a key to its action. Digit keys wrap around when the model has fewer
/// than eight buttons.
pub fn map_key(key: char, num_buttons: usize) -> Option<KeyAction> {
    match key {
        ' ' => Some(KeyAction::Sustain),
        's' | 'S' => Some(KeyAction::Soft),
        '1'..='8' if num_buttons > 0 => {
            let digit = key as usize - '1' as usize;
            debug_assert!(digit < NUM_BUTTON_KEYS);
            Some(KeyAction::Button(digit % num_buttons))
        }
        _ => None,
    }
}
