//! Report rendering. Everything here goes to stdout; logs go to stderr.

use fimguard_core::action::RunMode;
use fimguard_core::attributes::CATALOG;
use fimguard_core::{
    AttrChange, AttrValue, DiffRecord, FileType, GroupResolver, RuleMatch, RunContext, RunOutcome,
};
use serde_json::{json, Value};
use std::io::{self, Write};

fn value_text(value: &Option<AttrValue>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

fn value_json(value: &Option<AttrValue>) -> Value {
    value
        .as_ref()
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}

fn change_json(change: &AttrChange) -> Value {
    json!({
        "attr": change.attr.to_string(),
        "old": value_json(&change.old),
        "new": value_json(&change.new),
        "forced": change.forced,
    })
}

fn record_json(record: &DiffRecord) -> Value {
    json!({
        "path": record.path,
        "verdict": record.verdict,
        "file_type": record.file_type,
        "changes": record.changes.iter().map(change_json).collect::<Vec<_>>(),
    })
}

pub fn write_outcome<W: Write>(
    out: &mut W,
    outcome: &RunOutcome,
    ctx: &RunContext,
    json: bool,
) -> io::Result<()> {
    if json {
        let doc = json!({
            "mode": outcome.mode,
            "summary": outcome.summary,
            "records": outcome.records.iter().map(record_json).collect::<Vec<_>>(),
            "degraded": outcome.degraded,
            "written": outcome.written,
            "scan": outcome.scan,
            "exit_code": outcome.exit_code(),
        });
        return writeln!(out, "{}", serde_json::to_string_pretty(&doc)?);
    }

    let mode = outcome.mode.as_str();
    match outcome.mode {
        RunMode::ConfigCheck => {
            writeln!(
                out,
                "fimguard {}: configuration ok ({} rules)",
                mode,
                ctx.rules.rule_count()
            )?;
        }
        RunMode::DryInit => {
            if let Some(scan) = &outcome.scan {
                writeln!(
                    out,
                    "fimguard {}: {} paths visited, {} would be captured, {} skipped",
                    mode, scan.visited, scan.captured, scan.skipped
                )?;
            }
        }
        RunMode::Init => {}
        RunMode::Check | RunMode::Update | RunMode::Compare => {
            let summary = &outcome.summary;
            writeln!(
                out,
                "fimguard {}: {} added, {} removed, {} changed",
                mode, summary.added, summary.removed, summary.changed
            )?;
            if !outcome.records.is_empty() {
                writeln!(out)?;
            }
            for record in &outcome.records {
                writeln!(out, "{}: {}", record.verdict.as_str(), record.path)?;
                for change in &record.changes {
                    write!(
                        out,
                        "  {}: {} -> {}",
                        change.attr,
                        value_text(&change.old),
                        value_text(&change.new)
                    )?;
                    if change.forced {
                        write!(out, " (forced)")?;
                    }
                    writeln!(out)?;
                }
            }
        }
    }

    if !outcome.degraded.is_empty() {
        writeln!(out)?;
        for entry in &outcome.degraded {
            writeln!(out, "degraded: {}: {}", entry.path, entry.reason)?;
        }
    }
    if let Some(written) = outcome.written {
        writeln!(
            out,
            "fimguard {}: {} entries written to {}",
            mode,
            written,
            ctx.database_out.path.display()
        )?;
    }
    Ok(())
}

pub fn write_path_check<W: Write>(
    out: &mut W,
    path: &str,
    file_type: FileType,
    decision: Option<&RuleMatch>,
    json: bool,
) -> io::Result<()> {
    if json {
        let doc = json!({
            "path": path,
            "file_type": file_type,
            "monitored": decision.map_or(false, |m| m.is_monitored()),
            "rule": decision.map(|m| json!({
                "kind": m.kind,
                "pattern": m.pattern,
                "node": m.node,
                "location": m.location,
                "attrs": m.attrs.to_string(),
            })),
        });
        return writeln!(out, "{}", serde_json::to_string_pretty(&doc)?);
    }

    match decision {
        Some(m) if m.is_monitored() => writeln!(
            out,
            "{}:{} is monitored with {} by {}{} ({})",
            file_type,
            path,
            if m.attrs.is_empty() { "no attributes".to_string() } else { m.attrs.to_string() },
            m.kind.sigil(),
            m.pattern,
            m.location
        ),
        Some(m) => writeln!(
            out,
            "{}:{} is excluded by !{} ({})",
            file_type, path, m.pattern, m.location
        ),
        None => writeln!(out, "{}:{} is not matched by any rule", file_type, path),
    }
}

pub fn write_outside_limit<W: Write>(
    out: &mut W,
    path: &str,
    file_type: FileType,
    limit: &str,
    json: bool,
) -> io::Result<()> {
    if json {
        let doc = json!({
            "path": path,
            "file_type": file_type,
            "monitored": false,
            "outside_limit": limit,
        });
        return writeln!(out, "{}", serde_json::to_string_pretty(&doc)?);
    }
    writeln!(out, "{}:{} is outside of the limit ({})", file_type, path, limit)
}

pub fn write_info<W: Write>(out: &mut W, json: bool) -> io::Result<()> {
    let groups = GroupResolver::new();
    if json {
        let attributes: Vec<Value> = CATALOG
            .iter()
            .map(|row| {
                json!({
                    "name": row.config_name,
                    "field": row.field_name,
                    "capability": row.capability.as_str(),
                    "available": row.available,
                })
            })
            .collect();
        let compound: Vec<Value> = groups
            .available_groups()
            .into_iter()
            .map(|(name, mask)| json!({ "name": name, "attrs": mask.to_string() }))
            .collect();
        let doc = json!({ "attributes": attributes, "groups": compound });
        return writeln!(out, "{}", serde_json::to_string_pretty(&doc)?);
    }

    writeln!(out, "Attributes:")?;
    for row in CATALOG.iter() {
        writeln!(
            out,
            "  {:<10} {:<10} {:<9} {}",
            row.config_name,
            row.field_name.unwrap_or("-"),
            row.capability.as_str(),
            if row.available { "yes" } else { "no" }
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Groups:")?;
    for (name, mask) in groups.available_groups() {
        writeln!(out, "  {:<3} {}", name, mask)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fimguard_core::Attribute;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn info_lists_catalog_and_groups() {
        let text = render(|out| write_info(out, false));
        assert!(text.contains("sha256"));
        assert!(text.contains("md5"));
        assert!(text.contains("  R "));

        let doc: Value = serde_json::from_str(&render(|out| write_info(out, true))).unwrap();
        assert_eq!(doc["attributes"].as_array().unwrap().len(), CATALOG.len());
        assert_eq!(doc["groups"][0]["name"], "R");
    }

    #[test]
    fn changes_render_old_and_new() {
        let change = AttrChange {
            attr: Attribute::Perm,
            old: Some(AttrValue::Mode(0o644)),
            new: None,
            forced: false,
        };
        let value = change_json(&change);
        assert_eq!(value["attr"], "perm");
        assert_eq!(value["old"], "0644");
        assert!(value["new"].is_null());
        assert_eq!(value_text(&change.new), "(none)");
    }

    #[test]
    fn path_check_outside_limit() {
        let text = render(|out| write_outside_limit(out, "/etc/hosts", FileType::Regular, "/usr", false));
        assert_eq!(text, "f:/etc/hosts is outside of the limit (/usr)\n");
    }

    #[test]
    fn path_check_without_rule() {
        let text = render(|out| write_path_check(out, "/tmp/x", FileType::Regular, None, false));
        assert_eq!(text, "f:/tmp/x is not matched by any rule\n");
    }
}
