//! Bulk-load export of a term collection.
//!
//! The XML form is the Solr update format (`<add><doc><field/>...`), with one
//! `<field>` element per value and the selection boost on every field. The
//! JSON form is an array of documents with one array per field; JSON Lines
//! holds the same documents one per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::fields::FieldSelection;
use crate::model::types::{Term, TermCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    SolrXml,
    Json,
    JsonLines,
}

impl ExportFormat {
    /// `.json` → JSON, `.jsonl` / `.ndjson` → JSON Lines, anything else → Solr XML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("jsonl") | Some("ndjson") => Self::JsonLines,
            _ => Self::SolrXml,
        }
    }
}

/// Escape text for use in XML character data and attribute values.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

fn exported_fields<'a>(
    term: &'a Term,
    selection: &'a FieldSelection,
) -> impl Iterator<Item = (&'a str, &'a std::collections::BTreeSet<String>)> + 'a {
    term.fields()
        .iter()
        .filter(move |(name, _)| selection.is_exported(name))
        .map(|(name, values)| (name.as_str(), values))
}

/// Write the collection as a Solr `<add>` document.
pub fn write_solr_xml<W: Write>(
    out: &mut W,
    terms: &TermCollection,
    selection: &FieldSelection,
) -> std::io::Result<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, "<add>")?;
    for term in terms {
        writeln!(out, "  <doc>")?;
        for (name, values) in exported_fields(term, selection) {
            let boost = selection.boost(name);
            let name = xml_escape(name);
            for value in values {
                writeln!(
                    out,
                    r#"    <field name="{name}" boost="{boost:?}">{}</field>"#,
                    xml_escape(value)
                )?;
            }
        }
        writeln!(out, "  </doc>")?;
    }
    writeln!(out, "</add>")?;
    Ok(())
}

fn json_document(term: &Term, selection: &FieldSelection) -> serde_json::Map<String, serde_json::Value> {
    exported_fields(term, selection)
        .map(|(name, values)| {
            (
                name.to_string(),
                serde_json::Value::from(values.iter().cloned().collect::<Vec<_>>()),
            )
        })
        .collect()
}

/// Write the collection as a JSON array of documents.
pub fn write_json<W: Write>(
    out: &mut W,
    terms: &TermCollection,
    selection: &FieldSelection,
) -> std::io::Result<()> {
    let docs: Vec<_> = terms.iter().map(|term| json_document(term, selection)).collect();
    serde_json::to_writer_pretty(&mut *out, &docs)?;
    writeln!(out)?;
    Ok(())
}

/// Write one compact JSON document per line.
pub fn write_json_lines<W: Write>(
    out: &mut W,
    terms: &TermCollection,
    selection: &FieldSelection,
) -> std::io::Result<()> {
    for term in terms {
        serde_json::to_writer(&mut *out, &json_document(term, selection))?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Export to `path`, choosing the format from its extension. Returns the format used.
pub fn export_to_file(
    path: &Path,
    terms: &TermCollection,
    selection: &FieldSelection,
) -> Result<ExportFormat> {
    let format = ExportFormat::from_path(path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("creating output file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        ExportFormat::SolrXml => write_solr_xml(&mut out, terms, selection),
        ExportFormat::Json => write_json(&mut out, terms, selection),
        ExportFormat::JsonLines => write_json_lines(&mut out, terms, selection),
    }
    .with_context(|| format!("writing {}", path.display()))?;
    out.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    tracing::info!(path = %path.display(), terms = terms.len(), format = ?format, "export_complete");
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::obo::parse_str;

    fn sample() -> TermCollection {
        parse_str(
            "[Term]\nid: HP:0000002\nname: Growth <abnormal> & odd\nis_a: HP:0000001 ! All\n",
            &FieldSelection::all(),
        )
        .terms
    }

    #[test]
    fn xml_contains_boosted_escaped_fields() {
        let selection = FieldSelection::parse("name:2.5,is_a,term_category");
        let mut buf = Vec::new();
        write_solr_xml(&mut buf, &sample(), &selection).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<field name="id" boost="1.0">HP:0000002</field>"#));
        assert!(xml.contains(
            r#"<field name="name" boost="2.5">Growth &lt;abnormal&gt; &amp; odd</field>"#
        ));
        assert!(xml.contains(r#"<field name="is_a" boost="1.0">HP:0000001 ! All</field>"#));
        assert!(xml.contains(r#"<field name="term_category" boost="1.0">HP:0000001</field>"#));
        assert!(xml.trim_end().ends_with("</add>"));
    }

    #[test]
    fn unselected_fields_are_not_exported() {
        let selection = FieldSelection::parse("name");
        let mut buf = Vec::new();
        write_solr_xml(&mut buf, &sample(), &selection).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(!xml.contains(r#"name="is_a""#));
        assert!(xml.contains(r#"name="id""#));
    }

    #[test]
    fn json_is_an_array_of_documents() {
        let mut buf = Vec::new();
        write_json(&mut buf, &sample(), &FieldSelection::all()).unwrap();
        let docs: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(docs[0]["id"][0], "HP:0000002");
        assert_eq!(docs[0]["term_category"][0], "HP:0000001");
    }

    #[test]
    fn jsonl_file_has_one_document_per_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("terms.jsonl");
        let mut terms = sample();
        terms.insert(
            parse_str("[Term]\nid: HP:0000001\nname: All\n", &FieldSelection::all())
                .terms
                .into_terms()
                .remove(0),
        );
        let format = export_to_file(&path, &terms, &FieldSelection::parse("name")).unwrap();
        assert_eq!(format, ExportFormat::JsonLines);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"][0], "HP:0000002");
        assert!(first.get("is_a").is_none());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["name"][0], "All");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("out.xml")), ExportFormat::SolrXml);
        assert_eq!(ExportFormat::from_path(Path::new("out.JSON")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("out")), ExportFormat::SolrXml);
        assert_eq!(ExportFormat::from_path(Path::new("out.jsonl")), ExportFormat::JsonLines);
        assert_eq!(ExportFormat::from_path(Path::new("out.ndjson")), ExportFormat::JsonLines);
    }

    #[test]
    fn control_characters_are_dropped() {
        assert_eq!(xml_escape("a\u{1}b\tc"), "ab\tc");
        assert_eq!(xml_escape(r#"'q'"#), "&apos;q&apos;");
    }
}
