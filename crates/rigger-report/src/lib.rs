use std::fmt::Write;
use std::io::{self, IsTerminal};
use std::path::Path;

use console::Style;
use rigger_domain::{CategoryReport, GeneratedFile, LayerKind, RenderReport};

mod error;
mod options;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};

/// Render a render report in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_report(
    report: &RenderReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_text(report, options)),
    }
}

fn render_text(report: &RenderReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    let _ = write!(output, "{}", style.header_command(&options.command));
    if let Some(target) = &report.target {
        let _ = write!(output, " {}", style.header_target(target));
    }
    let _ = writeln!(output);

    if report.categories.is_empty() {
        let _ = writeln!(output, "  Nothing rendered.");
        return output;
    }

    for category in &report.categories {
        let _ = writeln!(output);
        append_category(&mut output, category, options, &style);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "{}", Tally::from_report(report).format(&style));
    output
}

fn append_category(
    output: &mut String,
    category: &CategoryReport,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let name = category.category.to_string();
    if category.skipped {
        let _ = writeln!(
            output,
            "{} {}",
            style.category(&name),
            style.dim(&format!(
                "skipped, no templates at {}",
                category.source_dir.display()
            ))
        );
        append_warnings(output, &category.warnings, style);
        return;
    }

    let _ = writeln!(
        output,
        "{} {}",
        style.category(&name),
        style.dim(&category.output_dir.display().to_string())
    );

    let (changed, unchanged): (Vec<&GeneratedFile>, Vec<&GeneratedFile>) =
        category.files.iter().partition(|file| file.changed);

    for file in &changed {
        append_file_line(output, file, &category.output_dir, style);
    }
    if options.verbose {
        for file in &unchanged {
            append_file_line(output, file, &category.output_dir, style);
        }
    }
    for removed in &category.removed {
        let _ = writeln!(
            output,
            "  {} {}{}",
            style.remove_symbol("-"),
            TextStyle::pad_label(&style.remove_label("removed")),
            relative_display(removed, &category.output_dir)
        );
    }
    if !unchanged.is_empty() && !options.verbose {
        let _ = writeln!(
            output,
            "  {}",
            style.dim(&format!("{} unchanged", unchanged.len()))
        );
    }
    append_warnings(output, &category.warnings, style);
}

fn append_file_line(output: &mut String, file: &GeneratedFile, root: &Path, style: &TextStyle) {
    let (symbol, label) = if file.changed {
        (style.write_symbol("+"), style.write_label("written"))
    } else {
        (style.noop_symbol("="), style.noop_label("unchanged"))
    };
    let layer = match file.layer {
        LayerKind::Base => String::new(),
        LayerKind::Override => format!(" {}", style.dim("(override)")),
    };
    let _ = writeln!(
        output,
        "  {symbol} {}{}{layer}",
        TextStyle::pad_label(&label),
        style.primary_text(&relative_display(&file.path, root))
    );
}

fn append_warnings(output: &mut String, warnings: &[String], style: &TextStyle) {
    for warning in warnings {
        let _ = writeln!(output, "  {} {warning}", style.warn_prefix("warn:"));
    }
}

fn relative_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    written: usize,
    unchanged: usize,
    removed: usize,
    skipped: usize,
}

impl Tally {
    fn from_report(report: &RenderReport) -> Self {
        let mut tally = Self::default();
        for category in &report.categories {
            if category.skipped {
                tally.skipped += 1;
            }
            let changed = category.changed_count();
            tally.written += changed;
            tally.unchanged += category.files.len() - changed;
            tally.removed += category.removed.len();
        }
        tally
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.written > 0 {
            parts.push(style.write_label(&format!("{} written", self.written)));
        }
        if self.removed > 0 {
            parts.push(style.remove_label(&format!("{} removed", self.removed)));
        }
        if self.unchanged > 0 {
            parts.push(style.dim(&format!("{} unchanged", self.unchanged)));
        }
        if self.skipped > 0 {
            parts.push(style.dim(&format!("{} skipped", self.skipped)));
        }
        if parts.is_empty() {
            format!("{} nothing to do", style.tally_label("Render:"))
        } else {
            format!("{} {}", style.tally_label("Render:"), parts.join(", "))
        }
    }
}

const LABEL_WIDTH: usize = 12;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    write_sym_style: Style,
    remove_sym_style: Style,
    noop_sym_style: Style,
    write_label_style: Style,
    remove_label_style: Style,
    noop_label_style: Style,
    primary_style: Style,
    dim_style: Style,
    category_style: Style,
    header_cmd_style: Style,
    header_target_style: Style,
    warn_prefix_style: Style,
    tally_label_style: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        Self {
            color_enabled: should_color(choice),
            write_sym_style: Style::new().green().bold(),
            remove_sym_style: Style::new().red().bold(),
            noop_sym_style: Style::new().dim(),
            write_label_style: Style::new().green(),
            remove_label_style: Style::new().red(),
            noop_label_style: Style::new().dim(),
            primary_style: Style::new().white(),
            dim_style: Style::new().dim(),
            category_style: Style::new().cyan().bold(),
            header_cmd_style: Style::new().white().bold(),
            header_target_style: Style::new().dim(),
            warn_prefix_style: Style::new().yellow().bold(),
            tally_label_style: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if self.color_enabled {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    fn write_symbol(&self, s: &str) -> String {
        self.paint(&self.write_sym_style, s)
    }
    fn remove_symbol(&self, s: &str) -> String {
        self.paint(&self.remove_sym_style, s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop_sym_style, s)
    }

    fn write_label(&self, s: &str) -> String {
        self.paint(&self.write_label_style, s)
    }
    fn remove_label(&self, s: &str) -> String {
        self.paint(&self.remove_label_style, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop_label_style, s)
    }

    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary_style, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim_style, s)
    }
    fn category(&self, s: &str) -> String {
        self.paint(&self.category_style, s)
    }

    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_cmd_style, s)
    }
    fn header_target(&self, s: &str) -> String {
        self.paint(&self.header_target_style, s)
    }

    fn warn_prefix(&self, s: &str) -> String {
        self.paint(&self.warn_prefix_style, s)
    }
    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label_style, s)
    }
}

fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal(),
    }
}
