//! Report printing
//!
//! Human readable, colored summaries of pipeline and deployment reports.

use colored::*;
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::domain::deployment::{DeploymentRecord, DeploymentState};
use conveyor_core::domain::log::{LogEntry, LogLevel};
use conveyor_core::domain::stage::{StageOutcome, StageResult, StepRecord, StepStatus};
use conveyor_core::dto::report::PipelineReport;

/// Print the full report of a run
pub fn print_pipeline_report(report: &PipelineReport) {
    let result = &report.result;

    println!();
    println!(
        "{} {} {}",
        "Pipeline".bold(),
        result.pipeline.cyan(),
        format!("(build {})", result.build_id).dimmed()
    );
    println!("{}", "─".repeat(80).dimmed());

    if result.stage_results.is_empty() {
        println!("  {}", "No stages were run.".yellow());
    }
    for stage in result.stage_results.iter() {
        print_stage(stage);
    }

    if !result.hooks.is_empty() {
        println!("\n{}", "Pipeline hooks:".bold());
        for hook in &result.hooks {
            let mark = if hook.succeeded { "✓".green() } else { "✗".red() };
            let trigger = format!("[{:?}]", hook.trigger);
            println!("  {} {} {}", mark, hook.description, trigger.dimmed());
            if let Some(error) = &hook.error {
                println!("      {}", error.red());
            }
        }
    }

    for record in &report.deployments {
        println!();
        print_deployment(record);
    }

    let warnings: Vec<&LogEntry> = report
        .logs
        .iter()
        .filter(|l| matches!(l.level, LogLevel::Warning | LogLevel::Error))
        .collect();
    if !warnings.is_empty() {
        println!("\n{}", "Warnings:".bold());
        for log in warnings {
            print_log_entry(log);
        }
    }

    println!("{}", "─".repeat(80).dimmed());
    let seconds = result.elapsed_ms() as f64 / 1000.0;
    if result.is_success() {
        println!("{} in {:.1}s", "✓ Pipeline succeeded".green().bold(), seconds);
    } else {
        let cause = match result.first_failure() {
            Some(failure) => format!(": {}", failure),
            None if result.cancelled => ": cancelled".to_string(),
            None => String::new(),
        };
        println!(
            "{}{} {}",
            "✗ Pipeline failed".red().bold(),
            cause.red(),
            format!("(exit code {}, {:.1}s)", report.exit_code(), seconds).dimmed()
        );
    }
}

/// Print one stage result with its steps
fn print_stage(stage: &StageResult) {
    let outcome = match stage.outcome {
        StageOutcome::Passed => "passed".green(),
        StageOutcome::Failed => "failed".red(),
        StageOutcome::Skipped => "skipped".dimmed(),
    };
    println!(
        "  {} {:<20} {} {}",
        "▸".cyan(),
        stage.stage.bold(),
        outcome,
        format_ms(stage.elapsed_ms).dimmed()
    );

    for step in &stage.steps {
        print_step(step);
    }

    for hook in &stage.hooks {
        if !hook.succeeded {
            println!(
                "      {} hook {} {}",
                "!".yellow(),
                hook.description,
                hook.error.as_deref().unwrap_or_default().dimmed()
            );
        }
    }

    if let Some(failure) = &stage.failure {
        let label = if failure.kind.is_deployment() { "deployment:" } else { "cause:" };
        println!("      {} {}", label.red(), failure);
    }
}

fn print_step(step: &StepRecord) {
    let status = match step.status {
        StepStatus::Succeeded => "ok".green(),
        StepStatus::Failed if step.is_advisory_failure() => "failed (advisory)".yellow(),
        StepStatus::Failed => "failed".red(),
        StepStatus::TimedOut => "timed out".red(),
        StepStatus::Cancelled => "cancelled".red(),
    };
    let exit = step
        .exit_code
        .map(|c| format!("exit {}", c))
        .unwrap_or_else(|| "no exit status".to_string());

    println!(
        "      {} {} {} {}",
        step.command,
        status,
        exit.dimmed(),
        format_ms(step.elapsed_ms).dimmed()
    );

    if let Some(summary) = &step.summary {
        let coverage = summary
            .coverage
            .map(|c| format!(", coverage {:.1}%", c))
            .unwrap_or_default();
        let line = format!(
            "tests: {} passed, {} failed{}",
            summary.passed, summary.failed, coverage
        );
        println!("        {}", line.dimmed());
    }
    if let Some(error) = &step.error {
        println!("        {}", error.red());
    }
    if !step.succeeded() {
        if let Some(tail) = &step.output_tail {
            for line in tail.lines() {
                println!("        {}", line.dimmed());
            }
        }
    }
}

/// Print a deployment record and its state history
pub fn print_deployment(record: &DeploymentRecord) {
    println!(
        "{} {} {}",
        "Deployment".bold(),
        record.target().cyan(),
        record.image().dimmed()
    );
    println!(
        "  {}",
        format!(
            "id {}, started {}",
            record.id(),
            record.started_at().format("%Y-%m-%d %H:%M:%S")
        )
        .dimmed()
    );

    for transition in record.history() {
        println!(
            "  {} {} → {}",
            transition.at.format("%H:%M:%S").to_string().dimmed(),
            transition.from,
            colorize_state(transition.to)
        );
    }

    if let Some(decision) = record.approval() {
        print_decision(decision);
    }

    if let Some(error) = record.error() {
        println!("  {} {}", "error:".red(), error);
    }
}

/// Print an approval decision
pub fn print_decision(decision: &ApprovalDecision) {
    let status = if decision.is_approved() {
        decision.status().to_string().green()
    } else {
        decision.status().to_string().red()
    };
    print!("  Approval: {}", status);
    if let Some(actor) = decision.decided_by() {
        print!(" by {}", actor.bold());
    }
    if let Some(at) = decision.decided_at() {
        print!(" at {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
}

fn colorize_state(state: DeploymentState) -> ColoredString {
    let text = state.to_string();
    match state {
        DeploymentState::Succeeded => text.green(),
        DeploymentState::Failed | DeploymentState::RolledBack => text.red(),
        _ => text.cyan(),
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "  {} [{}] {}: {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.source,
        log.message
    );
}

fn format_ms(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(250), "250ms");
        assert_eq!(format_ms(1500), "1.5s");
    }
}
