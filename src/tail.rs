use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRead {
    pub lines: Vec<String>,
    pub offset: u64,
    pub rotated: bool,
}

impl TailRead {
    fn unchanged(offset: u64) -> Self {
        Self {
            lines: Vec::new(),
            offset,
            rotated: false,
        }
    }
}

pub fn read_new_lines(path: &Path, offset: u64, max_bytes: u64) -> io::Result<TailRead> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(TailRead::unchanged(offset))
        }
        Err(err) => return Err(err),
    };
    let len = file.metadata()?.len();

    let (start, rotated) = if len < offset { (0, true) } else { (offset, false) };
    if start == len {
        return Ok(TailRead {
            lines: Vec::new(),
            offset: start,
            rotated,
        });
    }

    let want = (len - start).min(max_bytes.max(1));
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(want as usize);
    file.take(want).read_to_end(&mut buf)?;

    // Capped read: stop at the last complete line. A chunk with no newline
    // at all is consumed whole so the offset always advances.
    let capped = start + (buf.len() as u64) < len;
    if capped {
        if let Some(pos) = buf.iter().rposition(|b| *b == b'\n') {
            buf.truncate(pos + 1);
        }
    }

    Ok(TailRead {
        lines: split_lines(&buf),
        offset: start + buf.len() as u64,
        rotated,
    })
}

pub fn last_lines(path: &Path, n: usize, max_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    // Drop a partial first line when the window starts mid-file.
    if start > 0 {
        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                buf.drain(..=pos);
            }
            None => buf.clear(),
        }
    }

    let mut lines = split_lines(&buf);
    if lines.len() > n {
        let excess = lines.len() - n;
        lines.drain(..excess);
    }
    Ok(lines)
}

fn split_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buf)
        .lines()
        .map(str::to_string)
        .collect()
}
