//! DOCX rendering with minijinja.
//!
//! Tags use `[[ expr ]]` and `[% stmt %]` so Word's autocorrect and run
//! splitting leave them alone more often than `{{ }}` would. Before rendering,
//! each paragraph is normalized:
//! - a paragraph holding nothing but block tags is replaced by the bare tags,
//!   so a loop repeats whole paragraphs;
//! - a paragraph whose tags were split across runs is collapsed into one run
//!   that keeps the paragraph properties and the first run's formatting.

use std::io::{Cursor, Read, Write};
use std::sync::OnceLock;

use minijinja::syntax::SyntaxConfig;
use minijinja::value::Value as TemplateValue;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::ooxml;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not a readable DOCX package: {0}")]
    Archive(#[from] ZipError),

    #[error("cannot read template part {name}: {source}")]
    Part {
        name: String,
        source: std::io::Error,
    },

    #[error("template render failed in {part}: {detail}")]
    Render { part: String, detail: String },
}

const BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;
const TAB: &str = r#"</w:t><w:tab/><w:t xml:space="preserve">"#;

fn paragraph_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").expect("paragraph pattern compiles"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[\[.*?\]\]|\[%.*?%\]").expect("tag pattern compiles"))
}

fn block_only_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^\s*(?:\[%.*?%\]\s*)+$").expect("block pattern compiles"))
}

fn paragraph_parts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(<w:p[^>]*>)(<w:pPr\s*/>|<w:pPr(?:\s[^>]*)?>.*?</w:pPr>)?")
            .expect("paragraph head pattern compiles")
    })
}

fn run_props_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:rPr>.*?</w:rPr>").expect("run props pattern compiles"))
}

/// Parts that may carry tags.
pub fn is_renderable(name: &str) -> bool {
    if name == ooxml::DOCUMENT_PART {
        return true;
    }
    let Some(file) = name.strip_prefix("word/") else {
        return false;
    };
    (file.starts_with("header") || file.starts_with("footer"))
        && file.ends_with(".xml")
        && !file.contains('/')
}

/// Text for a `<w:t>` element: escaped, newlines as breaks, tabs as tabs.
pub fn xml_text(value: &str) -> String {
    ooxml::escape(value)
        .replace("\r\n", "\n")
        .replace('\n', BREAK)
        .replace('\t', TAB)
}

fn straighten_tag(tag: &str) -> String {
    ooxml::unescape(tag)
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
}

fn collapse_paragraph(paragraph: &str, text: &str) -> String {
    let (open, props, rest_at) = match paragraph_parts_regex().captures(paragraph) {
        Some(caps) => (
            caps.get(1).map_or("<w:p>", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(0).map_or(0, |m| m.end()),
        ),
        None => ("<w:p>", "", 0),
    };
    let run_props = run_props_regex()
        .find(&paragraph[rest_at..])
        .map_or("", |m| m.as_str());
    format!(
        r#"{open}{props}<w:r>{run_props}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        xml_text(text)
    )
}

fn prepare_paragraph(paragraph: &str) -> String {
    let text = ooxml::part_text(paragraph);
    let text = text.trim_end_matches('\n');
    let tags_in_text = tag_regex().find_iter(text).count();
    if tags_in_text == 0 {
        return paragraph.to_string();
    }
    if block_only_regex().is_match(text) {
        return text.trim().to_string();
    }
    let intact = tag_regex()
        .find_iter(paragraph)
        .filter(|m| !m.as_str().contains('<'))
        .count();
    if intact == tags_in_text {
        paragraph.to_string()
    } else {
        collapse_paragraph(paragraph, text)
    }
}

/// Rewrites a part so every tag is contiguous and in plain template syntax.
pub fn prepare_part(xml: &str) -> String {
    let paragraphs = paragraph_regex().replace_all(xml, |caps: &Captures| prepare_paragraph(&caps[0]));
    tag_regex()
        .replace_all(&paragraphs, |caps: &Captures| straighten_tag(&caps[0]))
        .into_owned()
}

fn environment() -> Result<Environment<'static>, TemplateError> {
    let syntax = SyntaxConfig::builder()
        .block_delimiters("[%", "%]")
        .variable_delimiters("[[", "]]")
        .comment_delimiters("[#", "#]")
        .build()
        .map_err(|e| TemplateError::Render {
            part: "syntax".to_string(),
            detail: e.to_string(),
        })?;

    let mut env = Environment::new();
    env.set_syntax(syntax);
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    // The formatter below does the XML escaping.
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_formatter(|out, _state, value| {
        if value.is_undefined() || value.is_none() {
            return Ok(());
        }
        let rendered = if value.is_safe() {
            value.to_string()
        } else {
            xml_text(&value.to_string())
        };
        out.write_str(&rendered)
            .map_err(|_| minijinja::Error::from(ErrorKind::WriteFailure))
    });
    Ok(env)
}

fn render_part(
    env: &Environment<'_>,
    name: &str,
    xml: &str,
    ctx: &TemplateValue,
) -> Result<String, TemplateError> {
    let source = prepare_part(xml);
    env.render_named_str(name, &source, ctx)
        .map_err(|e| TemplateError::Render {
            part: name.to_string(),
            detail: format!("{e:#}"),
        })
}

/// Renders `data` into every renderable part of `template`; other entries
/// are copied through unchanged.
pub fn render_docx(template: &[u8], data: &Value) -> Result<Vec<u8>, TemplateError> {
    let env = environment()?;
    let ctx = TemplateValue::from_serialize(data);
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(template.len())));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let rendered = {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if is_renderable(&name) {
                let mut xml = String::new();
                entry
                    .read_to_string(&mut xml)
                    .map_err(|source| TemplateError::Part {
                        name: name.clone(),
                        source,
                    })?;
                Some((name.clone(), render_part(&env, &name, &xml, &ctx)?))
            } else {
                None
            }
        };

        match rendered {
            Some((name, xml)) => {
                writer.start_file(name.as_str(), options)?;
                writer
                    .write_all(xml.as_bytes())
                    .map_err(|source| TemplateError::Part { name, source })?;
            }
            None => writer.raw_copy_file(archive.by_index_raw(index)?)?,
        }
    }

    Ok(writer.finish()?.into_inner())
}

fn write_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    body: &str,
) -> Result<(), TemplateError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(name, options)?;
    writer
        .write_all(body.as_bytes())
        .map_err(|source| TemplateError::Part {
            name: name.to_string(),
            source,
        })
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

fn paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

fn heading(text: &str) -> String {
    format!(r#"<w:p><w:r><w:rPr><w:b/><w:sz w:val="28"/></w:rPr><w:t>{text}</w:t></w:r></w:p>"#)
}

fn sample_body() -> String {
    [
        r#"<w:p><w:r><w:rPr><w:b/><w:sz w:val="36"/></w:rPr><w:t>[[ name ]]</w:t></w:r></w:p>"#.to_string(),
        paragraph("[[ contact.email ]] | [[ contact.phone ]]"),
        paragraph("Target: [[ role ]][% if company %] at [[ company ]][% endif %]"),
        paragraph("[[ summary ]]"),
        heading("Experience"),
        paragraph("[% for job in experience %]"),
        r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">[[ job.title ]], [[ job.company ]] ([[ job.dates ]])</w:t></w:r></w:p>"#.to_string(),
        paragraph("[% for bullet in job.bullets %]"),
        paragraph("• [[ bullet ]]"),
        paragraph("[% endfor %]"),
        paragraph("[% endfor %]"),
        heading("Education"),
        paragraph("[% for edu in education %]"),
        paragraph("[[ edu.degree ]], [[ edu.school ]] ([[ edu.dates ]])"),
        paragraph("[% endfor %]"),
        heading("Skills"),
        paragraph(r#"[[ skills | join(", ") ]]"#),
    ]
    .concat()
}

/// A minimal résumé template exercising scalars, loops and nested loops.
pub fn sample_template() -> Result<Vec<u8>, TemplateError> {
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1080" w:right="1080" w:bottom="1080" w:left="1080" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr></w:body></w:document>"#,
        sample_body()
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    write_entry(&mut writer, "[Content_Types].xml", CONTENT_TYPES)?;
    write_entry(&mut writer, "_rels/.rels", PACKAGE_RELS)?;
    write_entry(&mut writer, ooxml::DOCUMENT_RELS_PART, DOCUMENT_RELS)?;
    write_entry(&mut writer, ooxml::DOCUMENT_PART, &document)?;
    Ok(writer.finish()?.into_inner())
}

/// A package whose body is one paragraph with `text`.
#[cfg(test)]
pub(crate) fn single_paragraph_docx(text: &str) -> Vec<u8> {
    let document = format!(
        "<w:document><w:body>{}</w:body></w:document>",
        paragraph(&ooxml::escape(text))
    );
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    write_entry(&mut writer, ooxml::DOCUMENT_PART, &document).unwrap();
    writer.finish().unwrap().into_inner()
}
