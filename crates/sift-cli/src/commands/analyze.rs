//! `sift analyze`: compute the retention plan and print it.

use std::path::Path;

use anyhow::Context;
use serde_json::json;
use sift_engine::runtime::LookupEntry;
use sift_engine::{MetadataTable, MetadataTier, ReflectionMode};

use super::{OutputFormat, Session};
use crate::output::StyledOutput;

/// Full machine-readable report: plan, lookup table, counters and digest
pub fn json_report(session: &Session) -> serde_json::Value {
    let Session {
        table,
        program,
        plan,
        ..
    } = session;
    let lookup: Vec<serde_json::Value> = MetadataTable::build(program, table, plan)
        .iter()
        .map(|(name, entry)| {
            json!({
                "owner": name.owner,
                "name": name.name,
                "signature": name.signature,
                "entry": entry,
            })
        })
        .collect();

    json!({
        "digest": plan.digest(program, table),
        "stats": plan.stats(),
        "plan": plan.report(program, table),
        "lookup": lookup,
    })
}

pub fn execute(
    session: &Session,
    format: OutputFormat,
    output: Option<&Path>,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    if let Some(path) = output {
        let text = serde_json::to_string_pretty(&json_report(session))?;
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    for lookup in session.plan.unresolved() {
        out.stderr_warning(&format!("reflection target not known statically: {}", lookup));
    }

    match format {
        OutputFormat::Json => {
            out.plain(&serde_json::to_string_pretty(&json_report(session))?);
            out.newline();
        }
        OutputFormat::Pretty => print_pretty(session, out),
    }
    out.flush();
    Ok(())
}

fn print_pretty(session: &Session, out: &mut StyledOutput) {
    let Session {
        table,
        program,
        config,
        plan,
    } = session;
    let report = plan.report(program, table);
    let stats = plan.stats();

    let mode = match config.mode {
        ReflectionMode::StaticAnalysis => "static-analysis",
        ReflectionMode::FromUsage => "from-usage",
    };
    out.bold("Retention plan");
    out.dim(&format!(" ({} mode, {} workers)", mode, stats.workers));
    out.newline();
    out.newline();

    out.bold("Types");
    out.newline();
    for ty in &report.types {
        out.plain("  ");
        out.tier(ty.tier);
        out.plain("  ");
        out.plain(&ty.name);
        if ty.browsable {
            out.info(" [browsable]");
        } else if ty.handle {
            out.dim(" [handle]");
        }
        if !ty.interfaces.is_empty() {
            out.dim(&format!(" : {}", ty.interfaces.join(", ")));
        }
        out.newline();
    }

    if !report.members.is_empty() {
        out.newline();
        out.bold("Members");
        out.newline();
        for member in &report.members {
            out.plain("  ");
            out.entry_badge(member.invoke_thunk);
            out.plain("  ");
            out.plain(&member.name);
            out.newline();
        }
    }

    if !report.static_bases.is_empty() {
        out.newline();
        out.bold("Static bases");
        out.newline();
        for name in &report.static_bases {
            out.plain(&format!("  {}", name));
            out.newline();
        }
    }

    let full = report
        .types
        .iter()
        .filter(|t| t.tier == MetadataTier::Full)
        .count();
    let thunks = MetadataTable::build(program, table, plan)
        .iter()
        .filter(|(_, entry)| matches!(entry, LookupEntry::Thunk(_)))
        .count();

    out.newline();
    out.success("Done");
    out.plain(&format!(
        ": {} types ({} full), {} members ({} invokable), {} bodies, {} templates",
        report.types.len(),
        full,
        report.members.len(),
        thunks,
        report.bodies.len(),
        report.templates.len(),
    ));
    out.newline();
    out.dim(&format!(
        "  {} work items, {} bodies scanned, {} dispatches",
        stats.work_items, stats.bodies_scanned, stats.dispatches
    ));
    out.newline();
    out.dim(&format!("  digest {}", plan.digest(program, table)));
    out.newline();
}
