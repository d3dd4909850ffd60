//! Output formatting and reporting
//!
//! Renders build diagnostics and statistics either for a terminal or as a
//! single JSON report on stdout.

use colored::*;
use nori_core::{BuildStats, Diagnostic, Severity};
use std::path::PathBuf;
use std::time::Duration;

use crate::OutputFormat;

const TABLE_WIDTH: usize = 66;

/// Everything a build run reports back to the user
#[derive(Debug)]
pub struct BuildReport<'a> {
    pub diagnostics: &'a [Diagnostic],
    pub stats: &'a BuildStats,
    pub written: &'a [PathBuf],
    pub elapsed: Duration,
}

/// Output formatter for different formats
pub struct OutputFormatter {
    format: OutputFormat,
    use_colors: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, use_colors: bool) -> Self {
        Self { format, use_colors }
    }

    pub fn print_report(&self, report: &BuildReport<'_>) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_human_format(report);
                Ok(())
            }
            OutputFormat::Json => self.print_json_format(report),
        }
    }

    fn print_human_format(&self, report: &BuildReport<'_>) {
        for diagnostic in report.diagnostics {
            println!("{}", self.render_diagnostic(diagnostic));
        }
        print_build_results(report.stats, report.elapsed);
    }

    /// `error[unresolvable-path]: message` followed by a `-->` location line
    pub fn render_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let kind = serde_json::to_value(diagnostic.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let header = format!("{}[{}]", diagnostic.severity, kind);
        let header = if self.use_colors {
            match diagnostic.severity {
                Severity::Error => header.red().bold().to_string(),
                Severity::Warning => header.yellow().bold().to_string(),
                Severity::Info => header.blue().to_string(),
                Severity::Hint => header.cyan().to_string(),
            }
        } else {
            header
        };

        let mut rendered = format!("{}: {}", header, diagnostic.message);
        if diagnostic.location.is_known() {
            let arrow = if self.use_colors {
                "-->".bright_blue().to_string()
            } else {
                "-->".to_string()
            };
            rendered.push_str(&format!("\n  {} {}", arrow, diagnostic.location));
        }
        rendered
    }

    fn print_json_format(&self, report: &BuildReport<'_>) -> anyhow::Result<()> {
        let result = serde_json::json!({
            "diagnostics": report.diagnostics,
            "stats": report.stats,
            "files": report.written,
            "elapsedMs": report.elapsed.as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}

fn border(left: &str, right: &str, color: Color) -> ColoredString {
    format!("{}{}{}", left, "═".repeat(TABLE_WIDTH), right).color(color)
}

fn print_build_results(stats: &BuildStats, elapsed: Duration) {
    println!();

    let color = if stats.has_errors() {
        Color::Red
    } else if stats.has_warnings() {
        Color::Yellow
    } else {
        Color::Green
    };

    println!("{}", border("╔", "╗", color));
    println!(
        "{}{:^width$}{}",
        "║".color(color),
        "BUILD RESULTS",
        "║".color(color),
        width = TABLE_WIDTH
    );
    println!("{}", border("╠", "╣", color));
    println!(
        "{} │ {:^18} │ {:^18} │ {:^18} │ {}",
        "║".color(color),
        "CodeSystems",
        "Instances",
        "Skipped",
        "║".color(color)
    );
    println!(
        "{} │ {:^18} │ {:^18} │ {:^18} │ {}",
        "║".color(color),
        stats.code_systems,
        stats.instances,
        stats.skipped,
        "║".color(color)
    );
    println!("{}", border("╚", "╝", color));

    let summary = format!(
        "{} resources generated in {:.2}s",
        stats.total_resources(),
        elapsed.as_secs_f64()
    );
    let errors_msg = plural(stats.errors, "error");
    let warnings_msg = plural(stats.warnings, "warning");
    let errors_msg = if stats.errors > 0 {
        errors_msg.red()
    } else {
        errors_msg.green()
    };
    let warnings_msg = if stats.warnings > 0 {
        warnings_msg.yellow()
    } else {
        warnings_msg.green()
    };

    println!("{}, {}, {}", summary.bold(), errors_msg, warnings_msg);
}

fn plural(count: usize, noun: &str) -> String {
    format!("{} {}{}", count, noun, if count != 1 { "s" } else { "" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nori_core::{DiagnosticKind, Location};

    #[test]
    fn test_render_diagnostic_without_colors() {
        let formatter = OutputFormatter::new(OutputFormat::Human, false);
        let diagnostic = Diagnostic::error(
            DiagnosticKind::UnresolvablePath,
            "Cannot resolve element from path: name[0].nickname",
            Location::new("input/fsh/patients.fsh", 12, 3),
        );

        assert_eq!(
            formatter.render_diagnostic(&diagnostic),
            "error[unresolvable-path]: Cannot resolve element from path: name[0].nickname\n  \
             --> input/fsh/patients.fsh:12:3"
        );
    }

    #[test]
    fn test_render_diagnostic_unknown_location() {
        let formatter = OutputFormatter::new(OutputFormat::Human, false);
        let diagnostic = Diagnostic::warning(
            DiagnosticKind::CountMismatch,
            "count differs",
            Location::default(),
        );

        assert_eq!(
            formatter.render_diagnostic(&diagnostic),
            "warning[count-mismatch]: count differs"
        );
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "error"), "1 error");
        assert_eq!(plural(0, "warning"), "0 warnings");
    }
}
