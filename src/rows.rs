//! Result rows and the sink contract they are handed to.

use std::io;

/// A flat result record with a fixed column order.
pub trait Row {
    /// Column names, in the order `fields()` renders them.
    const HEADER: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

/// Destination for result rows (CSV file, stdout, in-memory buffer).
pub trait RowSink<R: Row> {
    fn emit(&mut self, row: &R) -> io::Result<()>;

    fn emit_all(&mut self, rows: &[R]) -> io::Result<()> {
        for row in rows {
            self.emit(row)?;
        }
        Ok(())
    }

    /// Makes emitted rows durable. Called once per reporting tick.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects rows in memory.
impl<R: Row + Clone> RowSink<R> for Vec<R> {
    fn emit(&mut self, row: &R) -> io::Result<()> {
        self.push(row.clone());
        Ok(())
    }
}
