use std::io::{self, BufRead, Write};

pub const LINE_TERMINATOR: u8 = b'\n';

/// Reads the next line record into `buf`, without its `\n`.
///
/// Returns `Ok(false)` at end of input. A final line with no terminator is
/// still a record; an empty line is an empty record.
pub fn read_record<R: BufRead + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(LINE_TERMINATOR, buf)? == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&LINE_TERMINATOR) {
        buf.pop();
    }
    Ok(true)
}

/// Drops one trailing `\r` left over from CRLF input.
pub fn trim_carriage_return(record: &[u8]) -> &[u8] {
    record.strip_suffix(b"\r").unwrap_or(record)
}

pub fn write_record<W: Write + ?Sized>(writer: &mut W, record: &[u8]) -> io::Result<()> {
    writer.write_all(record)?;
    writer.write_all(&[LINE_TERMINATOR])
}

/// Approximate heap footprint of a buffered record.
pub fn estimated_size(record: &[u8]) -> usize {
    record.len() + crate::constants::RECORD_OVERHEAD_BYTES
}
