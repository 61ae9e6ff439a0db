//! Colored terminal output for `sift` commands.
//!
//! Uses `termcolor`; honours the `NO_COLOR` environment variable and the
//! `--color` flag.

use std::io::Write;

use sift_engine::MetadataTier;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled output writer for the terminal
pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    /// Write text with a specific color and style.
    pub fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Green bold text.
    pub fn success(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Green), true);
    }

    /// Cyan text.
    pub fn info(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Cyan), false);
    }

    /// Dim/gray text.
    pub fn dim(&mut self, text: &str) {
        self.write_styled(text, Some(Color::White), false);
    }

    /// Bold text.
    pub fn bold(&mut self, text: &str) {
        self.write_styled(text, None, true);
    }

    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    // ── Plan-specific badges ─────────────────────────────────────────

    /// Fixed-width tier label, colored by how much metadata it keeps
    pub fn tier(&mut self, tier: MetadataTier) {
        let (label, color, bold) = match tier {
            MetadataTier::Full => ("full       ", Some(Color::Green), true),
            MetadataTier::ConstructedOnly => ("constructed", Some(Color::Cyan), false),
            MetadataTier::NecessaryOnly => ("necessary  ", Some(Color::White), false),
            MetadataTier::None => ("none       ", None, false),
        };
        self.write_styled(label, color, bold);
    }

    /// " THUNK " / " META " badge for a lookup entry
    pub fn entry_badge(&mut self, invokable: bool) {
        let mut spec = ColorSpec::new();
        if invokable {
            spec.set_bg(Some(Color::Green))
                .set_fg(Some(Color::White))
                .set_bold(true);
        } else {
            spec.set_bg(Some(Color::Yellow))
                .set_fg(Some(Color::Black))
                .set_bold(true);
        }
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", if invokable { " THUNK " } else { " META  " });
        let _ = self.stdout.reset();
    }

    // ── Diagnostics (stderr) ─────────────────────────────────────────

    /// Yellow "warning:" prefix followed by the message on stderr
    pub fn stderr_warning(&mut self, text: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Yellow)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "warning:");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, " {}", text);
    }
}
