//! Report rendering for one finished command.

use std::fmt::Write;

use crate::config::{Format, OutputPolicy};

/// Exit status used when the command never started.
pub const SPAWN_FAILURE_CODE: i32 = 127;

#[derive(Debug, Clone)]
pub struct Report<'a> {
    pub title: &'a str,
    /// The command as the user would type it.
    pub command: &'a str,
    pub number: u32,
    pub exit_code: i32,
    pub output: &'a str,
    pub allow_failure: bool,
}

impl Report<'_> {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Exit status for quietrun itself.
    pub fn process_exit_code(&self) -> u8 {
        if self.success() || self.allow_failure {
            0
        } else {
            // Negative codes are signals.
            self.exit_code.clamp(1, 255) as u8
        }
    }

    pub fn render(&self, format: Format, policy: OutputPolicy) -> String {
        let show = policy.shows(self.success()) && !self.output.trim_end().is_empty();
        match format {
            Format::Pretty => self.pretty(show),
            Format::Tap => self.tap(show),
        }
    }

    fn pretty(&self, show: bool) -> String {
        let mut out = String::new();
        if self.success() {
            let _ = writeln!(out, "✓ {}", self.title);
        } else {
            let mark = if self.allow_failure { '⚠' } else { '✗' };
            let _ = writeln!(out, "{mark} {} ({})", self.title, self.exit_code);
        }
        if show {
            if self.title != self.command {
                let _ = writeln!(out, "  > {}", self.command);
            }
            push_indented(&mut out, self.output);
        }
        out
    }

    fn tap(&self, show: bool) -> String {
        let mut out = String::new();
        if self.success() {
            let _ = writeln!(out, "ok {} - {}", self.number, self.title);
        } else if self.allow_failure {
            let _ = writeln!(out, "not ok {} - {} # TODO allowed failure", self.number, self.title);
        } else {
            let _ = writeln!(out, "not ok {} - {}", self.number, self.title);
        }
        if show {
            out.push_str("  ---\n");
            let _ = writeln!(out, "  exit_code: {}", self.exit_code);
            if self.title != self.command {
                let _ = writeln!(out, "  command: {}", self.command);
            }
            out.push_str("  output: |\n");
            push_indented(&mut out, &indent_lines(self.output, "  "));
            out.push_str("  ...\n");
        }
        out
    }
}

fn indent_lines(text: &str, prefix: &str) -> String {
    text.trim_end_matches('\n')
        .lines()
        .map(|line| format!("{prefix}{line}\n"))
        .collect()
}

fn push_indented(out: &mut String, text: &str) {
    out.push_str(&indent_lines(text, "  "));
}
