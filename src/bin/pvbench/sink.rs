//! CSV row sink.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

use pvbench::rows::{Row, RowSink};

/// Writes the header on creation, then one line per row.
pub struct CsvSink<R: Row, W: Write> {
    writer: BufWriter<W>,
    rows: u64,
    _row: PhantomData<fn(&R)>,
}

impl<R: Row> CsvSink<R, File> {
    /// Creates (truncates) `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(File::create(path)?)
    }
}

impl<R: Row, W: Write> CsvSink<R, W> {
    pub fn new(inner: W) -> io::Result<Self> {
        let mut sink = Self {
            writer: BufWriter::new(inner),
            rows: 0,
            _row: PhantomData,
        };
        sink.write_line(R::HEADER.iter().map(|h| Cow::Borrowed(*h)))?;
        Ok(sink)
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn write_line<'a>(&mut self, fields: impl Iterator<Item = Cow<'a, str>>) -> io::Result<()> {
        let line: Vec<Cow<'a, str>> = fields.map(escape).collect();
        writeln!(self.writer, "{}", line.join(","))
    }

    #[cfg(test)]
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<R: Row, W: Write> RowSink<R> for CsvSink<R, W> {
    fn emit(&mut self, row: &R) -> io::Result<()> {
        self.write_line(row.fields().into_iter().map(Cow::Owned))?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Quotes a field containing a separator, quote or line break.
fn escape(field: Cow<'_, str>) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        field
    }
}
