use std::io::BufRead;

use anyhow::Context;
use dotpatch::patch::{CompilerService, PatchConfig, PatchEngine, PatchReport, ProcessCompiler};

use crate::app::Cli;

/// Print the process id and block until a line arrives on stdin.
pub fn wait_for_debugger() -> anyhow::Result<()> {
    println!(
        "dotpatch pid {}: attach a debugger, then press Enter",
        std::process::id()
    );
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(())
}

/// Run one cycle and write its report. Any error exits with status 1.
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = PatchConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration: {}", cli.config.display()))?;

    let mut compiler = config.compiler.as_ref().map(ProcessCompiler::from_config);
    let outcome = PatchEngine::new()
        .run(
            &config,
            compiler.as_mut().map(|c| c as &mut dyn CompilerService),
        )
        .with_context(|| format!("patch cycle {} failed", config.patch_no))?;

    outcome
        .report
        .write(&cli.report)
        .with_context(|| format!("failed to write report: {}", cli.report.display()))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print_summary(&outcome.report);
    }
    Ok(())
}

fn print_summary(report: &PatchReport) {
    if report.assembly_changed_from_last.is_empty() {
        println!("Patch {}: nothing changed since the last cycle", report.patch_no);
        return;
    }

    println!(
        "Patch {}: {} function(s) to hook",
        report.patch_no,
        report.methods_need_hook.len()
    );
    for method in &report.methods_need_hook {
        let marker = if method.il_changed { "*" } else { " " };
        println!(
            "  {marker} [{}]{}::{}",
            method.assembly, method.type_name, method.signature
        );
    }
    if !report.generic_wrappers.is_empty() {
        println!("  {} generic wrapper(s)", report.generic_wrappers.len());
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}
