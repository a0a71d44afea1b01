use std::path::Path;
use std::time::Duration;

use console::style;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

use crate::resolver::ResolvedPlan;

/// `--verbose` raises the log level to DEBUG, where tool output is logged.
pub fn level(requested: Level, verbose: bool) -> Level {
    if verbose && requested < Level::DEBUG {
        Level::DEBUG
    } else {
        requested
    }
}

pub fn subscriber<W>(level: Level, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let mut subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(writer);

    // when we run the command with `TRACE` or `DEBUG` level, we want to see
    // the file and line number...
    if [Level::DEBUG, Level::TRACE].contains(&level) {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    subscriber.finish()
}

pub fn badge_success() -> String {
    style("[✓]").green().to_string()
}

pub fn badge_skipped() -> String {
    style("[-]").color256(244).to_string()
}

pub fn badge_failed() -> String {
    style("[✗]").red().to_string()
}

pub fn format_stage_name(stage: &str) -> String {
    format!("{} ➜", style(stage).bold().on_color256(238))
}

/// `3 minutes and 7 seconds`
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();

    format!("{} minutes and {} seconds", secs / 60, secs % 60)
}

pub fn print_plan(plan: &ResolvedPlan) {
    println!(
        "{} {} GCC {} for {}",
        style("Plan:").bold().green(),
        plan.flavor,
        plan.version,
        style(&plan.target).bold(),
    );

    for dep in &plan.dependencies {
        println!("- {}: {}", dep.kind, style(&dep.locator).italic());
    }

    if let Some(patch) = plan.patch {
        println!("- patch: {}", style(patch.file_name()).italic());
    }
}

pub fn print_stage_start(stage: &str) {
    println!("{} Starting", format_stage_name(stage));
}

pub fn print_stage_done(stage: &str, elapsed: Duration) {
    println!(
        "{} Done in {} {}",
        format_stage_name(stage),
        format_duration(elapsed),
        badge_success(),
    );
}

pub fn print_stage_skipped(stage: &str) {
    println!("{} Skipped {}", format_stage_name(stage), badge_skipped());
}

pub fn print_stage_failed(stage: &str, message: &str) {
    println!(
        "{} {} {}",
        format_stage_name(stage),
        style(message).red(),
        badge_failed(),
    );
}

pub fn print_package(archive: &Path) {
    println!(
        "{} {}",
        style("Package:").bold().green(),
        style(archive.display().to_string()).green()
    );
}

pub fn print_report(compiler: &str, install: &Path, elapsed: Duration) {
    println!("{} {}", style("Compiler:").bold().green(), compiler);
    println!(
        "{} {}",
        style("Installed:").bold().green(),
        style(install.display().to_string()).italic()
    );
    println!(
        "{} Script ran in {}",
        style("Total:").bold().green(),
        format_duration(elapsed)
    );
}

pub fn print_aborted() {
    println!("{}", style("Build aborted by user").bold().yellow());
}
