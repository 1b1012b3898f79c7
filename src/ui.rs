/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! The build log. Every pipeline component reports through a `Ui` instead of
//! printing, so the CLI decides verbosity and colouring in one place.

use crate::{error::SignerError, APP_AUTHOR, APP_NAME, APP_VERSION};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct Ui {
    pub verbose: bool,
    pub very_verbose: bool,
    pub debug: bool,
    silent: bool,
    colors: bool,
    progress_bar: Arc<Mutex<Option<ProgressBar>>>,
    temp_files: Arc<Mutex<Vec<PathBuf>>>,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(false, false, false, false, true)
    }
}

impl Ui {
    pub fn new(v: bool, vv: bool, d: bool, s: bool, c: bool) -> Self {
        Self {
            verbose: v,
            very_verbose: vv,
            debug: d,
            silent: s,
            colors: c,
            progress_bar: Arc::new(Mutex::new(None)),
            temp_files: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_verbosity_level(level: u8, s: bool, c: bool) -> Self {
        Self::new(level >= 1, level >= 2, level >= 3, s, c)
    }

    /// Errors only, no colours. Used when the pipeline is embedded or tested.
    pub fn silent() -> Self {
        Self::new(false, false, false, true, false)
    }

    pub fn show_progress_bar(&self, len: u64, msg: &str) {
        if self.silent {
            return;
        }
        let pb = ProgressBar::new(len);
        let tw = self.term_width();
        let effective_msg = Self::truncate_msg(msg, tw);
        let template = if tw < 60 {
            format!(
                "{{spinner:.green}} {} {{bar:.green/red}} {{pos}}/{{len}}",
                effective_msg
            )
        } else {
            format!(
                "{{spinner:.green}} {} {{wide_bar:.green/red}} {{pos}}/{{len}} {{msg}}",
                effective_msg
            )
        };

        let style = match ProgressStyle::default_bar().template(&template) {
            Ok(style) => style,
            Err(_) => ProgressStyle::default_bar(),
        }
        .tick_strings(&["[|]", "[/]", "[-]", "[\\]"])
        .progress_chars("#>-");

        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        if let Ok(mut g) = self.progress_bar.lock() {
            *g = Some(pb);
        }
    }

    pub fn set_progress_message(&self, msg: &str) {
        let short = Self::truncate_msg(msg, self.term_width() / 3);
        let _ = self.progress_bar.lock().map(|g| {
            if let Some(ref pb) = *g {
                pb.set_message(short);
            }
        });
    }

    pub fn update_progress(&self, pos: u64) {
        let _ = self.progress_bar.lock().map(|g| {
            if let Some(ref pb) = *g {
                pb.set_position(pos);
            }
        });
    }

    pub fn finish_progress(&self) {
        let _ = self.progress_bar.lock().map(|mut g| {
            if let Some(pb) = g.take() {
                pb.finish_and_clear();
            }
        });
    }

    pub fn record_temp_file(&self, path: &Path) {
        if self.debug {
            if let Ok(mut files) = self.temp_files.lock() {
                files.push(path.to_path_buf());
                self.debug(&format!("Recorded temp: {:?}", path));
            }
        }
    }

    pub fn print_temp_files(&self) {
        if self.debug {
            if let Ok(files) = self.temp_files.lock() {
                if !files.is_empty() {
                    self.info(&format!("Temp files: {} item(s), all removed", files.len()));
                    for path in files.iter() {
                        self.debug(&format!("  - {:?}", path));
                    }
                }
            }
        }
    }

    fn truncate_msg(msg: &str, tw: usize) -> String {
        let max_chars = if tw < 60 {
            8
        } else if tw < 80 {
            15
        } else {
            usize::MAX
        };
        if msg.chars().count() > max_chars {
            format!("{}...", msg.chars().take(max_chars).collect::<String>())
        } else {
            msg.to_string()
        }
    }

    fn paint(&self, icon: &str, msg: &str, color: &str, is_error: bool, is_dim: bool) {
        if self.silent && !is_error {
            return;
        }
        let tw = self.term_width();
        let indent_size = if tw < 40 { 2 } else { icon.len() + 1 };
        let indent = " ".repeat(indent_size);
        let wrapped = self.wrap_msg(msg, indent_size);

        let output_lines: Vec<String> = wrapped
            .split('\n')
            .enumerate()
            .map(|(i, line)| {
                if !self.supports_color() {
                    return if i == 0 {
                        format!("{} {}", icon, line)
                    } else {
                        format!("{}{}", indent, line)
                    };
                }
                let ic = match color {
                    "31" => icon.red().bold(),
                    "32" => icon.green().bold(),
                    "33" => icon.yellow().bold(),
                    "34" => icon.blue().bold(),
                    "36" => icon.cyan().bold(),
                    _ => icon.bold(),
                };
                match (i == 0, is_dim) {
                    (true, true) => format!("{} {}", ic.dimmed(), line.dimmed()),
                    (true, false) => format!("{} {}", ic, line.normal()),
                    (false, true) => format!("{}{}", indent, line.dimmed()),
                    (false, false) => format!("{}{}", indent, line.normal()),
                }
            })
            .collect();

        // Keep log lines from tearing through an active progress bar.
        let bar = self.progress_bar.lock().ok().and_then(|g| g.clone());
        match bar {
            Some(pb) => pb.suspend(|| {
                for line in &output_lines {
                    eprintln!("{}", line);
                }
            }),
            None => {
                for line in &output_lines {
                    eprintln!("{}", line);
                }
            }
        }
    }

    pub fn print_banner(&self) {
        if !self.silent && self.verbose {
            self.print_rich_banner();
        }
    }

    pub fn print_rich_banner(&self) {
        let title = format!(" {} v{} ", APP_NAME, APP_VERSION);
        let width = title.len();
        let tw = self.term_width();

        if tw < width + 4 {
            if self.colors {
                eprintln!("{}", title.cyan().bold());
            } else {
                eprintln!("{}", title);
            }
        } else {
            let border = "-".repeat(width);
            if self.colors {
                let tb = format!("+-{}-+", border).magenta().bold();
                let mid = format!("| {} |", title.cyan().bold()).blue();
                eprintln!("{}\n{}\n{}", tb, mid, tb);
            } else {
                eprintln!("+-{}-+\n| {} |\n+-{}-+", border, title, border);
            }
        }
    }

    pub fn print_version_info(&self) {
        self.print_rich_banner();
        if self.colors {
            println!("{}", format!("Author:      {}", APP_AUTHOR).yellow());
            println!("{}", "License:     MIT".green());
            println!(
                "{}",
                "Description: APK signing step for build pipelines.".magenta()
            );
        } else {
            println!("Author:      {}\nLicense:     MIT\nDescription: APK signing step for build pipelines.", APP_AUTHOR);
        }
    }

    fn supports_color(&self) -> bool {
        std::env::var("NO_COLOR").is_err() && self.colors
    }

    pub fn enable_colors_if_supported(&mut self) {
        #[cfg(windows)]
        if self.colors {
            colored::control::set_override(true);
        }
    }

    pub fn print_mode_header(&self, title: &str) {
        if self.silent || !self.verbose {
            return;
        }
        eprintln!();
        let header = format!("-- {} --", title);
        let shown = if self.term_width() < header.len() {
            title.to_string()
        } else {
            header
        };
        if self.colors {
            eprintln!("{}", shown.yellow().bold());
        } else {
            eprintln!("{}", shown);
        }
    }

    pub fn info(&self, msg: &str) {
        if self.verbose {
            self.paint("[i]", msg, "34", false, false);
        }
    }
    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            self.paint("[v]", msg, "2", false, true);
        }
    }
    pub fn very_verbose(&self, msg: &str) {
        if self.very_verbose {
            self.paint("[vv]", msg, "2", false, true);
        }
    }
    pub fn debug(&self, msg: &str) {
        if self.debug {
            self.paint("[dbg]", msg, "2", false, true);
        }
    }
    pub fn success(&self, msg: &str) {
        if !self.silent {
            self.paint("[+]", msg, "32", false, false);
        }
    }
    pub fn warn(&self, msg: &str) {
        if !self.silent {
            self.paint("[!]", msg, "33", true, false);
        }
    }
    pub fn error(&self, msg: &str) {
        self.paint("[x]", msg, "31", true, false);
    }

    /// Report a run failure. Security-layer failures get their kind name
    /// appended so the log line is greppable.
    pub fn failure(&self, err: &SignerError) {
        if err.is_security_failure() {
            self.error(&format!("{} [{}]", err, err.kind()));
        } else {
            self.error(&err.to_string());
        }
        self.debug(&format!("error kind: {}", err.kind()));
    }

    pub fn print_summary(&self, title: &str, fields: &[(&str, String)]) {
        if self.silent || !self.verbose {
            return;
        }
        if self.colors {
            eprintln!("{}", format!("{}:", title).green().bold());
        } else {
            eprintln!("{}:", title);
        }
        let tw = self.term_width();
        let key_width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(8).max(8);

        for (key, val) in fields {
            let base_indent = if tw < 60 { 2 } else { key_width + 3 };
            let wrapped = self.wrap_msg(val, base_indent);

            for (i, line) in wrapped.split('\n').enumerate() {
                if i > 0 {
                    if self.colors {
                        eprintln!("{}{}", " ".repeat(base_indent), line.green());
                    } else {
                        eprintln!("{}{}", " ".repeat(base_indent), line);
                    }
                } else if tw < 60 {
                    if self.colors {
                        eprintln!("{}: {}", key.cyan().bold(), line.green());
                    } else {
                        eprintln!("{}: {}", key, line);
                    }
                } else if self.colors {
                    eprintln!(
                        "  {:<width$} {}",
                        key.cyan().bold(),
                        line.green(),
                        width = key_width
                    );
                } else {
                    eprintln!("  {:<width$} {}", key, line, width = key_width);
                }
            }
        }
    }

    fn wrap_msg(&self, msg: &str, indent: usize) -> String {
        let max_width = self.term_width();
        let effective_width = if max_width > 20 {
            max_width.saturating_sub(indent).max(20)
        } else {
            max_width.saturating_sub(indent).max(10)
        };
        let mut lines = Vec::new();
        let mut current_line = String::with_capacity(effective_width);

        for word in msg.split_whitespace() {
            let word_len = word.chars().count();
            let needed = if current_line.is_empty() {
                word_len
            } else {
                current_line.chars().count() + 1 + word_len
            };

            if needed <= effective_width {
                if !current_line.is_empty() {
                    current_line.push(' ');
                }
                current_line.push_str(word);
                continue;
            }
            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }
            if word_len <= effective_width {
                current_line.push_str(word);
                continue;
            }
            // Long paths are common here; hard-break them.
            let chars: Vec<char> = word.chars().collect();
            for (i, chunk) in chars.chunks(effective_width).enumerate() {
                if i > 0 {
                    lines.push(std::mem::take(&mut current_line));
                }
                current_line.extend(chunk.iter());
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines.join("\n")
    }

    fn term_width(&self) -> usize {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| terminal_size::terminal_size().map(|(w, _)| w.0 as usize))
            .unwrap_or(80)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_breaks_long_paths() {
        std::env::set_var("COLUMNS", "40");
        let ui = Ui::silent();
        let long = "a".repeat(70);
        let wrapped = ui.wrap_msg(&format!("placed {}", long), 4);
        assert!(wrapped.lines().count() >= 3);
        assert!(wrapped.lines().all(|l| l.chars().count() <= 36));
    }

    #[test]
    fn truncates_progress_messages_on_narrow_terminals() {
        assert_eq!(Ui::truncate_msg("app-release-unsigned.apk", 50), "app-rele...");
        assert_eq!(Ui::truncate_msg("app.apk", 120), "app.apk");
    }
}
