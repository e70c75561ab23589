//! Local report rendering used when the backend cannot produce the PDF.
//!
//! Emits a paginated PDF using only the built-in Helvetica font, so text is
//! restricted to printable ASCII. Anything else falls back to a plain-text
//! artifact carrying the same lines.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use shared::domain::CaseMetadata;
use thiserror::Error;

pub const REPORT_BANNER: &str = "MOCK RADIOLOGY REPORT";
pub const REPORT_MODE_LINE: &str = "Generated in Demo Mode";
pub const REPORT_DISCLAIMER: &str = "This is a sample report generated without backend.";

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN_LEFT: u32 = 72;
const TOP_BASELINE: u32 = 730;
const BOTTOM_MARGIN: u32 = 72;
const LINE_GAP: u32 = 6;
const WRAP_COLUMNS: usize = 88;

/// Case fields rendered when present, in this order.
const CASE_FIELDS: &[(&str, &str)] = &[
    ("patientName", "Patient"),
    ("patientId", "Patient ID"),
    ("patientAge", "Age"),
    ("patientGender", "Gender"),
    ("studyDate", "Study date"),
    ("referringPhysician", "Referring physician"),
    ("patientHistory", "History"),
    ("findings", "Findings"),
    ("caseDiagnosis", "Diagnosis"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Pdf,
    PlainText,
}

impl ReportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::PlainText => "text/plain",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::PlainText => "txt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub format: ReportFormat,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdfRenderError {
    #[error("character {0:?} cannot be encoded with the standard PDF font")]
    UnencodableText(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReportLine {
    font_size: u32,
    text: String,
}

impl ReportLine {
    fn heading(text: impl Into<String>) -> Self {
        Self {
            font_size: 16,
            text: text.into(),
        }
    }

    fn body(text: impl Into<String>) -> Self {
        Self {
            font_size: 11,
            text: text.into(),
        }
    }
}

/// Builds the local report for `case`. Never fails; degrades to plain text.
pub fn render_report(case: &CaseMetadata, generated_at: DateTime<Utc>) -> ReportArtifact {
    let lines = report_lines(case, generated_at);
    let stem = format!("xray_analysis_report_{}", generated_at.format("%Y-%m-%d"));

    match render_pdf(&lines) {
        Ok(bytes) => ReportArtifact {
            format: ReportFormat::Pdf,
            file_name: format!("{stem}.{}", ReportFormat::Pdf.extension()),
            bytes,
        },
        Err(error) => {
            tracing::warn!(%error, "report: pdf rendering unavailable, using text fallback");
            ReportArtifact {
                format: ReportFormat::PlainText,
                file_name: format!("{stem}.{}", ReportFormat::PlainText.extension()),
                bytes: render_text(&lines).into_bytes(),
            }
        }
    }
}

fn report_lines(case: &CaseMetadata, generated_at: DateTime<Utc>) -> Vec<ReportLine> {
    let mut lines = vec![
        ReportLine::heading(REPORT_BANNER),
        ReportLine::body(REPORT_MODE_LINE),
        ReportLine::body(format!(
            "Generated at: {}",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        ReportLine::body(""),
    ];

    for (key, label) in CASE_FIELDS {
        let Some(value) = case.field(key).map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        push_wrapped(&mut lines, &format!("{label}: {value}"));
    }

    if let Some(caption) = case
        .ai_caption
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        lines.push(ReportLine::body(""));
        push_wrapped(&mut lines, &format!("AI analysis: {caption}"));
    }

    lines.push(ReportLine::body(""));
    lines.push(ReportLine::body(REPORT_DISCLAIMER));
    lines
}

fn push_wrapped(lines: &mut Vec<ReportLine>, text: &str) {
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > WRAP_COLUMNS
        {
            lines.push(ReportLine::body(std::mem::take(&mut current)));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(ReportLine::body(current));
    }
}

fn render_text(lines: &[ReportLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        out.push('\n');
    }
    out
}

fn escape_pdf_text(text: &str) -> Result<String, PdfRenderError> {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' '..='~' => escaped.push(ch),
            other => return Err(PdfRenderError::UnencodableText(other)),
        }
    }
    Ok(escaped)
}

/// Lays lines out top to bottom, starting a new page before a line would
/// cross the bottom margin.
fn paginate(lines: &[ReportLine]) -> Result<Vec<String>, PdfRenderError> {
    let mut pages = Vec::new();
    let mut content = String::new();
    let mut baseline = TOP_BASELINE;
    for line in lines {
        let text = escape_pdf_text(&line.text)?;
        if baseline < BOTTOM_MARGIN + line.font_size {
            pages.push(std::mem::take(&mut content));
            baseline = TOP_BASELINE;
        }
        if !text.is_empty() {
            // Writing into a String cannot fail.
            let _ = writeln!(
                content,
                "BT /F1 {} Tf {MARGIN_LEFT} {baseline} Td ({text}) Tj ET",
                line.font_size
            );
        }
        baseline -= line.font_size + LINE_GAP;
    }
    pages.push(content);
    Ok(pages)
}

fn render_pdf(lines: &[ReportLine]) -> Result<Vec<u8>, PdfRenderError> {
    let pages = paginate(lines)?;

    // 1 catalog, 2 page tree, 3 font, then a page and its content stream per page.
    let page_ids: Vec<usize> = (0..pages.len()).map(|idx| 4 + 2 * idx).collect();
    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    ];
    for (content, page_id) in pages.iter().zip(&page_ids) {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            page_id + 1
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (idx, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        let _ = write!(out, "{} 0 obj\n{body}\nendobj\n", idx + 1);
    }

    let xref_offset = out.len();
    let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in &offsets {
        let _ = write!(out, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    );

    Ok(out.into_bytes())
}

#[cfg(test)]
#[path = "tests/report_tests.rs"]
mod tests;
