//! Discontiguous inputs.
//!
//! A codestream may be stored as several byte ranges of one file. The
//! [`SegmentReader`] presents those ranges, in list order, as a single
//! seekable stream so that neither the probe nor the codec can tell the
//! difference.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{DecodeError, Result};

/// One byte range of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub position: u64,
    pub length: u64,
}

/// Caller-supplied segment table, as received at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentList {
    pub positions: Vec<i64>,
    pub lengths: Vec<i64>,
}

impl SegmentList {
    pub fn new(positions: Vec<i64>, lengths: Vec<i64>) -> Self {
        Self { positions, lengths }
    }

    /// Parses `pos:len,pos:len,...`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut list = SegmentList::default();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (pos, len) = item.split_once(':').ok_or_else(|| {
                DecodeError::InvalidInput(format!("segment `{item}` is not of the form pos:len"))
            })?;
            let parse = |v: &str| {
                v.trim().parse::<i64>().map_err(|e| {
                    DecodeError::InvalidInput(format!("segment `{item}`: {e}"))
                })
            };
            list.positions.push(parse(pos)?);
            list.lengths.push(parse(len)?);
        }
        Ok(list)
    }

    pub fn validate(&self) -> Result<Vec<Segment>> {
        if self.positions.is_empty() || self.lengths.is_empty() {
            return Err(DecodeError::InvalidInput("segment list is empty".into()));
        }
        if self.positions.len() != self.lengths.len() {
            return Err(DecodeError::InvalidInput(format!(
                "segment positions ({}) and lengths ({}) differ in count",
                self.positions.len(),
                self.lengths.len()
            )));
        }

        // Offsets must stay representable as signed 64-bit stream offsets.
        let mut total: i64 = 0;
        let mut segments = Vec::with_capacity(self.positions.len());
        for (i, (&position, &length)) in self.positions.iter().zip(&self.lengths).enumerate() {
            if position < 0 || length < 0 {
                return Err(DecodeError::InvalidInput(format!(
                    "segment {i} has negative offset or length ({position}:{length})"
                )));
            }
            total = position
                .checked_add(length)
                .and(total.checked_add(length))
                .ok_or_else(|| DecodeError::InvalidInput(format!("segment {i} overflows")))?;
            segments.push(Segment {
                position: position as u64,
                length: length as u64,
            });
        }
        Ok(segments)
    }
}

/// Logical `Read + Seek` view over a list of segments.
pub struct SegmentReader<R> {
    inner: R,
    segments: Vec<Segment>,
    /// Cumulative logical end of each segment.
    ends: Vec<u64>,
    pos: u64,
    /// Physical offset the inner reader is known to sit at.
    inner_pos: Option<u64>,
}

impl<R: Read + Seek> SegmentReader<R> {
    pub fn new(inner: R, segments: Vec<Segment>) -> Self {
        let mut total = 0u64;
        let ends = segments
            .iter()
            .map(|s| {
                total += s.length;
                total
            })
            .collect();
        Self {
            inner,
            segments,
            ends,
            pos: 0,
            inner_pos: None,
        }
    }

    /// Sum of the segment lengths.
    pub fn len(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maps the logical position to (segment index, offset within it).
    fn locate(&self, pos: u64) -> Option<(usize, u64)> {
        let idx = self.ends.partition_point(|&end| end <= pos);
        let end = *self.ends.get(idx)?;
        let start = end - self.segments[idx].length;
        Some((idx, pos - start))
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some((idx, within)) = self.locate(self.pos) else {
            return Ok(0);
        };
        let segment = self.segments[idx];
        let physical = segment.position + within;
        if self.inner_pos != Some(physical) {
            self.inner.seek(SeekFrom::Start(physical))?;
        }
        let remaining = segment.length - within;
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want])?;
        self.inner_pos = Some(physical + n as u64);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Read for SegmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_some(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.inner_pos = None;
                    if filled > 0 {
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> Seek for SegmentReader<R> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let next = match target {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.len().checked_add_signed(d),
        };
        let next = next.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.pos = next;
        Ok(next)
    }
}
