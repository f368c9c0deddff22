use crate::import::report::PhaseTiming;
use crate::import::{ImportReport, Outcome, RecordFailure};
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().dim.clone()), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn key(text: &str) -> String {
    text.style(theme().key.clone()).to_string()
}

pub fn phase(name: &str) {
    println!();
    println!(
        "{} {}",
        Icons::GEAR.style(theme().info.clone()),
        name.style(theme().header.clone())
    );
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}

/// One failed record: key, stage, reason
pub fn failure(failure: &RecordFailure) {
    let marker = if failure.fatal { "fatal" } else { "failed" };
    eprintln!(
        "  {} {} {} {}",
        marker.style(theme().error.clone()),
        key(&failure.key.to_string()),
        format!("[{}]", failure.stage).style(theme().muted.clone()),
        failure.reason
    );
}

/// Closing line of an import, colored by outcome
pub fn outcome(report: &ImportReport) {
    let summary = format!(
        "Run {} {} ({} completed, {} failed, {} warnings)",
        report.run_id,
        report.state,
        report.completed,
        report.failed,
        report.warnings.len()
    );
    match report.outcome() {
        Outcome::Success => success(&summary),
        Outcome::Partial => warn(&summary),
        Outcome::Failed => error(&summary),
    }
    if let Some(reason) = &report.error {
        error(reason);
    }
}

/// `writing:entities   42 ms`
pub fn timing_line(timing: &PhaseTiming) -> String {
    format!("{:<20} {:>6} ms", timing.phase, timing.millis)
}

/// Time spent in each phase of a run
pub fn timings(report: &ImportReport) {
    if report.phases.is_empty() {
        return;
    }
    println!("{} {}", Icons::CLOCK, "Phases".style(theme().header.clone()));
    for timing in &report.phases {
        println!("  {}", dim(&timing_line(timing)));
    }
}
