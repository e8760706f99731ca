//! YAML table definition files.
//!
//! A table file is a CloudFormation-style `AWS::DynamoDB::Table` resource.
//! Only the key-related properties are generated; they live between two
//! marker comments so they can be regenerated without touching anything a
//! person wrote around them. Edits are line-based because YAML parsers drop
//! comments.

use crate::dynamodb::TableDefinition;
use crate::error::{Error, Result};
use serde_yaml::Value;
use std::path::Path;
use tracing::{debug, info};

pub const BEGIN_MARKER: &str = "# >>> generated sections";
pub const END_MARKER: &str = "# <<< generated sections";

/// Properties owned by the generator.
const GENERATED_KEYS: [&str; 3] = ["AttributeDefinitions", "KeySchema", "GlobalSecondaryIndexes"];

const DEFAULT_INDENT: usize = 2;

/// What `write_table_file` did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileUpdate {
    Created,
    Updated,
    Unchanged,
}

/// Renders a new table file around `definition`.
pub fn render_new(table_name: Option<&str>, definition: &TableDefinition) -> Result<String> {
    let mut lines = vec![
        "# DynamoDB table definition. The generated sections are rewritten from the".to_string(),
        "# entity manager config; edit anything outside them freely.".to_string(),
        "Type: AWS::DynamoDB::Table".to_string(),
        "Properties:".to_string(),
    ];
    let indent = " ".repeat(DEFAULT_INDENT);
    if let Some(name) = table_name {
        lines.push(format!("{indent}TableName: {name}"));
    }
    lines.push(format!("{indent}BillingMode: PAY_PER_REQUEST"));
    lines.extend(marked_region(definition, DEFAULT_INDENT)?);

    let text = lines.join("\n") + "\n";
    check(&text, definition)?;
    Ok(text)
}

/// Rewrites the generated sections of `existing` to match `definition`.
///
/// With markers present only the lines between them change. Without markers
/// any generated property already under `Properties` is removed and a marked
/// region is appended to the `Properties` block. All other lines are kept
/// verbatim.
pub fn sync(existing: &str, definition: &TableDefinition) -> Result<String> {
    // Lines keep their terminators so untouched lines come back byte for byte.
    let mut lines: Vec<String> = existing.split_inclusive('\n').map(str::to_string).collect();
    let newline = if existing.contains("\r\n") { "\r\n" } else { "\n" };

    match find_markers(&lines)? {
        Some((begin, end)) => {
            let indent = indent_of(&lines[begin]);
            let body = terminated(generated_lines(definition, indent)?, newline);
            lines.splice(begin + 1..end, body);
        }
        None => {
            debug!("No generated section markers, splicing into Properties");
            insert_region(&mut lines, definition, newline)?;
        }
    }

    let text = lines.concat();
    check(&text, definition)?;
    Ok(text)
}

/// Reads the generated properties back out of a table file.
///
/// Returns `None` when the file has no `Properties.AttributeDefinitions`.
pub fn read_generated(text: &str) -> Result<Option<TableDefinition>> {
    let document: Value = serde_yaml::from_str(text)?;
    let Some(properties) = document.get("Properties") else {
        return Ok(None);
    };
    if properties.get("AttributeDefinitions").is_none() {
        return Ok(None);
    }

    let mut generated = serde_yaml::Mapping::new();
    for key in GENERATED_KEYS {
        if let Some(value) = properties.get(key) {
            generated.insert(Value::from(key), value.clone());
        }
    }
    Ok(Some(serde_yaml::from_value(Value::Mapping(generated))?))
}

/// Whether the file's generated properties equal `definition`.
pub fn is_current(text: &str, definition: &TableDefinition) -> Result<bool> {
    Ok(read_generated(text)?.as_ref() == Some(definition))
}

/// Creates the file at `path`, or syncs it if it exists.
pub fn write_table_file(
    path: impl AsRef<Path>,
    table_name: Option<&str>,
    definition: &TableDefinition,
) -> Result<FileUpdate> {
    let path = path.as_ref();

    if !path.exists() {
        std::fs::write(path, render_new(table_name, definition)?)?;
        info!("Created table definition file {}", path.display());
        return Ok(FileUpdate::Created);
    }

    let existing = std::fs::read_to_string(path)?;
    let updated = sync(&existing, definition)?;
    if updated == existing {
        info!("Table definition file {} is up to date", path.display());
        return Ok(FileUpdate::Unchanged);
    }

    std::fs::write(path, updated)?;
    info!("Updated generated sections of {}", path.display());
    Ok(FileUpdate::Updated)
}

fn check(text: &str, definition: &TableDefinition) -> Result<()> {
    match read_generated(text)? {
        Some(found) if &found == definition => Ok(()),
        _ => Err(Error::TableFile(
            "generated sections did not survive the rewrite; check the indentation under Properties"
                .into(),
        )),
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn find_markers(lines: &[String]) -> Result<Option<(usize, usize)>> {
    let begin = lines.iter().position(|l| l.trim() == BEGIN_MARKER);
    let end = lines.iter().position(|l| l.trim() == END_MARKER);

    match (begin, end) {
        (None, None) => Ok(None),
        (Some(begin), Some(end)) if begin < end => Ok(Some((begin, end))),
        _ => Err(Error::TableFile(
            "unbalanced generated section markers".into(),
        )),
    }
}

/// Generated properties as YAML lines at `indent`, without markers.
fn generated_lines(definition: &TableDefinition, indent: usize) -> Result<Vec<String>> {
    let pad = " ".repeat(indent);
    Ok(serde_yaml::to_string(definition)?
        .lines()
        .map(|line| format!("{pad}{line}"))
        .collect())
}

fn marked_region(definition: &TableDefinition, indent: usize) -> Result<Vec<String>> {
    let pad = " ".repeat(indent);
    let mut region = vec![format!("{pad}{BEGIN_MARKER}")];
    region.extend(generated_lines(definition, indent)?);
    region.push(format!("{pad}{END_MARKER}"));
    Ok(region)
}

fn terminated(lines: Vec<String>, newline: &str) -> Vec<String> {
    lines.into_iter().map(|line| line + newline).collect()
}

/// Gives the line before `at` a terminator so new lines can follow it.
fn close_line_before(lines: &mut [String], at: usize, newline: &str) {
    if let Some(previous) = at.checked_sub(1).and_then(|i| lines.get_mut(i)) {
        if !previous.ends_with('\n') {
            previous.push_str(newline);
        }
    }
}

/// `Properties:` at column zero, optionally followed by a comment.
fn is_properties_header(line: &str) -> bool {
    indent_of(line) == 0
        && line.strip_prefix("Properties:").is_some_and(|rest| {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        })
}

fn insert_region(lines: &mut Vec<String>, definition: &TableDefinition, newline: &str) -> Result<()> {
    let properties = match lines.iter().position(|l| is_properties_header(l)) {
        Some(index) => index,
        None => {
            let end = lines.len();
            close_line_before(lines, end, newline);
            lines.push(format!("Properties:{newline}"));
            lines.len() - 1
        }
    };

    // The block runs until the next line at column zero.
    let block_end = lines[properties + 1..]
        .iter()
        .position(|l| !l.trim().is_empty() && indent_of(l) == 0)
        .map_or(lines.len(), |offset| properties + 1 + offset);

    let indent = lines[properties + 1..block_end]
        .iter()
        .find(|l| is_content(l))
        .map_or(DEFAULT_INDENT, |l| indent_of(l));

    let mut kept = Vec::with_capacity(block_end - properties - 1);
    let mut removing = false;
    for line in lines.drain(properties + 1..block_end) {
        if removing {
            let continues = line.trim().is_empty()
                || indent_of(&line) > indent
                || (indent_of(&line) == indent && line.trim_start().starts_with("- "));
            if continues {
                continue;
            }
            removing = false;
        }

        let trimmed = line.trim_start();
        if indent_of(&line) == indent
            && GENERATED_KEYS
                .iter()
                .any(|key| trimmed.strip_prefix(key).is_some_and(|rest| rest.starts_with(':')))
        {
            removing = true;
            continue;
        }
        kept.push(line);
    }

    // Insert after the last non-blank line so spacing before the next
    // top-level key stays where it was.
    let insert_at = kept
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    let mut block = kept;
    let trailing = block.split_off(insert_at);
    close_line_before(&mut block, insert_at, newline);
    block.extend(terminated(marked_region(definition, indent)?, newline));
    block.extend(trailing);

    close_line_before(lines, properties + 1, newline);
    lines.splice(properties + 1..properties + 1, block);
    Ok(())
}
