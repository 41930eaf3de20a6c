use terminal_size::{Width, terminal_size};

/// Width of the terminal on stdout minus `margin`, or 120 if stdout
/// is not a terminal.
pub fn get_terminal_width(margin: usize) -> usize {
    if let Some((Width(width), _)) = terminal_size() {
        usize::from(width).saturating_sub(margin).max(20)
    } else {
        120
    }
}
