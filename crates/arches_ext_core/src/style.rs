//! ANSI styling for terminal output.
//!
//! Every function is a pure mapping of `(text, enabled)` to a string. The
//! binary decides once whether color is on and passes a [`Palette`] around.

use std::env;
use std::io::IsTerminal;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[01m";
const BLINK: &str = "\x1b[5m";
const REVERSE: &str = "\x1b[07m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const LIGHT_RED: &str = "\x1b[91m";
const LIGHT_GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Color is on unless `--no-color` was passed, `NO_COLOR` is set, or stdout is not a terminal.
    pub fn detect(no_color_flag: bool) -> Self {
        let no_color_env = env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
        Self::new(color_enabled(
            no_color_flag,
            no_color_env,
            std::io::stdout().is_terminal(),
        ))
    }

    pub fn req(self, text: &str) -> String {
        paint(&[LIGHT_GREEN], text, self.enabled)
    }

    pub fn opt(self, text: &str) -> String {
        paint(&[YELLOW], text, self.enabled)
    }

    pub fn invert(self, text: &str) -> String {
        paint(&[REVERSE], text, self.enabled)
    }

    pub fn error(self, text: &str) -> String {
        paint(&[LIGHT_RED, BOLD, BLINK], text, self.enabled)
    }

    pub fn warn(self, text: &str) -> String {
        paint(&[CYAN, BOLD], text, self.enabled)
    }

    pub fn activation(self, active: bool) -> String {
        if active {
            paint(&[GREEN], "active", self.enabled)
        } else {
            paint(&[RED], "inactive", self.enabled)
        }
    }
}

pub fn color_enabled(no_color_flag: bool, no_color_env: bool, is_terminal: bool) -> bool {
    !no_color_flag && !no_color_env && is_terminal
}

fn paint(codes: &[&str], text: &str, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }
    format!("{}{text}{RESET}", codes.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_palette_returns_plain_text() {
        let palette = Palette::new(false);
        assert_eq!(palette.error("boom"), "boom");
        assert_eq!(palette.activation(true), "active");
        assert_eq!(palette.activation(false), "inactive");
    }

    #[test]
    fn enabled_palette_wraps_and_resets() {
        let palette = Palette::new(true);
        assert_eq!(palette.req("--source"), "\x1b[92m--source\x1b[0m");
        assert_eq!(palette.warn("careful"), "\x1b[36m\x1b[01mcareful\x1b[0m");
        assert!(palette.activation(false).starts_with(RED));
    }

    #[test]
    fn any_opt_out_disables_color() {
        assert!(color_enabled(false, false, true));
        assert!(!color_enabled(true, false, true));
        assert!(!color_enabled(false, true, true));
        assert!(!color_enabled(false, false, false));
    }
}
