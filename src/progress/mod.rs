//! Operator-facing progress output. Logging via `tracing` is for debugging;
//! this is the stdout narrative of an upgrade run.

use std::time::Duration;

use console::style;

use crate::engine::{MigrationReport, Outcome, RollbackReport};
use crate::error::StepError;

pub struct PlanReporter {
    verbose: bool,
}

impl PlanReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn plan_started(&self, version: &str, total_steps: usize) {
        println!(
            "\nApplying version {} ({} step{})",
            style(version).bold(),
            total_steps,
            if total_steps == 1 { "" } else { "s" }
        );
    }

    pub fn step_skipped(&self, version: &str, name: &str) {
        if self.verbose {
            println!("  {} '{}' already applied (skipping)", version, name);
        }
    }

    pub fn step_applied(&self, index: usize, total: usize, name: &str, duration: Duration) {
        println!(
            "  Step {}/{}: {} ({})",
            index + 1,
            total,
            name,
            format_duration(duration)
        );
    }

    pub fn step_failed(&self, error: &StepError) {
        println!("{} {}", style("✗").red(), style(error.to_string()).red());
    }

    pub fn rollback_started(&self, version: &str) {
        println!(
            "{} Rolling back version {} (reverse completion order)",
            style("↩").yellow(),
            style(version).bold()
        );
    }

    pub fn step_reverted(&self, name: &str, nothing_to_undo: bool) {
        if nothing_to_undo {
            println!("  Reverted {} (declared no-op)", name);
        } else {
            println!("  Reverted {}", name);
        }
    }

    pub fn revert_failed(&self, name: &str, error: &str) {
        println!(
            "  {} Revert of '{}' failed: {} (continuing)",
            style("⚠").yellow(),
            name,
            style(error).yellow()
        );
    }

    pub fn plan_completed(&self, version: &str, duration: Duration, applied: usize) {
        println!(
            "{} Version {} applied ({} step{}, {})",
            style("✓").green(),
            version,
            applied,
            if applied == 1 { "" } else { "s" },
            style(format_duration(duration)).green()
        );
    }

    pub fn cancelled(&self, version: &str, next_step: &str) {
        println!(
            "{} Cancelled before step '{}' of {}; run again to resume",
            style("⏹").yellow(),
            next_step,
            version
        );
    }

    /// Final summary for an `up` run.
    pub fn summary(&self, report: &MigrationReport) {
        match report.outcome() {
            Outcome::Done if report.applied.is_empty() => {
                println!(
                    "{} Environment '{}' already at {}",
                    style("✓").green(),
                    report.environment,
                    report.target
                );
            }
            Outcome::Done => {
                println!(
                    "{} Environment '{}' migrated to {} ({} step{} applied)",
                    style("✓").green(),
                    report.environment,
                    report.target,
                    report.applied.len(),
                    if report.applied.len() == 1 { "" } else { "s" }
                );
            }
            Outcome::Cancelled => {
                println!(
                    "{} Migration cancelled; ledger is consistent and the run is resumable",
                    style("⏹").yellow()
                );
            }
            Outcome::RolledBack => {
                let failure = report.failure.as_ref().expect("failed outcome has report");
                println!(
                    "{} Version {} failed at step '{}'; rolled back {} step{} cleanly",
                    style("✗").red(),
                    failure.version,
                    failure.step,
                    failure.reverted.len(),
                    if failure.reverted.len() == 1 { "" } else { "s" }
                );
            }
            Outcome::Dirty => {
                let failure = report.failure.as_ref().expect("failed outcome has report");
                println!(
                    "{} Version {} failed at step '{}' and rollback is incomplete",
                    style("✗").red(),
                    failure.version,
                    failure.step
                );
                for (name, error) in &failure.failed_to_revert {
                    println!("    not reverted: {} ({})", style(name).red(), error);
                }
                println!(
                    "  {} Environment '{}' needs operator attention",
                    style("⚠").yellow(),
                    report.environment
                );
            }
        }
    }

    /// Final summary for a `down` run.
    pub fn rollback_summary(&self, report: &RollbackReport) {
        if report.is_clean() {
            println!(
                "{} Rolled back version {} ({} step{})",
                style("✓").green(),
                report.version,
                report.reverted.len(),
                if report.reverted.len() == 1 { "" } else { "s" }
            );
        } else {
            println!(
                "{} Rollback of {} incomplete",
                style("✗").red(),
                report.version
            );
            for (name, error) in &report.failed_to_revert {
                println!("    not reverted: {} ({})", style(name).red(), error);
            }
        }
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let millis = d.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{}s", total_secs, millis / 100)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m{}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
