//! Per-user PDF manuals attached by the manual producer.

use std::{fmt::Write as _, path::Path};

use async_trait::async_trait;

use crate::{
    account::{Plan, User},
    error::ProductionFailure,
};

/// Writes a user's manual to a file.
#[async_trait]
pub trait ManualWriter: Send + Sync {
    /// Write the manual for `user` on `plan` to `path`, replacing any
    /// existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ProductionFailure::Manual`] if the document cannot be
    /// produced or written.
    async fn write(&self, user: &User, plan: &Plan, path: &Path) -> Result<(), ProductionFailure>;
}

/// One US Letter page with the user's name and the plan's guide title.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfManualWriter;

/// Letter, in points.
const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const FONT_SIZE: f64 = 16.0;
/// Helvetica's average advance is a little over half the font size.
const CHAR_WIDTH: f64 = FONT_SIZE * 0.55;

#[async_trait]
impl ManualWriter for PdfManualWriter {
    async fn write(&self, user: &User, plan: &Plan, path: &Path) -> Result<(), ProductionFailure> {
        let lines = [user.full_name(), format!("{} User Guide", plan.name)];
        let document = render_pdf(&lines);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProductionFailure::Manual(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, document)
            .await
            .map_err(|e| ProductionFailure::Manual(format!("{}: {e}", path.display())))
    }
}

/// Lay out `lines` centred near the top of a single page.
fn render_pdf(lines: &[String]) -> Vec<u8> {
    let mut content = String::from("BT\n");
    let _ = writeln!(content, "/F1 {FONT_SIZE} Tf");
    for (index, line) in lines.iter().enumerate() {
        #[allow(clippy::cast_precision_loss, reason = "lines are short")]
        let (width, row) = (line.chars().count() as f64 * CHAR_WIDTH, index as f64);
        let x = ((PAGE_WIDTH - width) / 2.0).max(36.0);
        let y = row.mul_add(-FONT_SIZE * 1.5, PAGE_HEIGHT - 120.0);
        let _ = writeln!(content, "1 0 0 1 {x:.2} {y:.2} Tm ({}) Tj", escape(line));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        ),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (number, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        let _ = write!(pdf, "{} 0 obj\n{body}\nendobj\n", number + 1);
    }

    let xref = pdf.len();
    let _ = write!(pdf, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(pdf, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        pdf,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1
    );

    pdf.into_bytes()
}

/// Escape a PDF literal string. Non-ASCII characters become `?`.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            ' '..='~' => escaped.push(c),
            _ => escaped.push('?'),
        }
    }
    escaped
}
