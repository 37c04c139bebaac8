use std::io::{self, Write};
use std::path::Path;

use crate::db::ExportRow;

pub const HEADER: &str = "author,comment_url,extracted_link";

/// Write every row as a fully quoted CSV line, header first.
pub fn write_csv<W: Write>(mut w: W, rows: &[ExportRow]) -> io::Result<()> {
    writeln!(w, "{HEADER}")?;
    for r in rows {
        writeln!(
            w,
            "{},{},{}",
            quote(&r.author),
            quote(&r.comment_url),
            quote(&r.extracted_link)
        )?;
    }
    w.flush()
}

pub fn render_csv(rows: &[ExportRow]) -> String {
    let mut buf = Vec::new();
    // writing into a Vec cannot fail
    let _ = write_csv(&mut buf, rows);
    String::from_utf8(buf).unwrap_or_default()
}

pub fn export_to_file(path: &Path, rows: &[ExportRow]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv(io::BufWriter::new(file), rows)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
