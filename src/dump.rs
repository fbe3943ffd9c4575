use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::Bitrate;

/// One line per processed feedback entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DumpLine {
    pub feedback_time_us: u64,
    pub seq: u32,
    pub feedback_num: u8,
    pub size: u32,
    pub sent_us: u64,
    pub recv_us: u64,
    pub delta_sent_us: i64,
    pub delta_recv_us: i64,
    pub delta_us: i64,
    pub estimate: Bitrate,
    pub target: Bitrate,
    pub available: Bitrate,
    pub rtt_ms: u32,
    pub marker: bool,
    pub rtx: bool,
    pub probing: bool,
}

impl DumpLine {
    fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(
            w,
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.feedback_time_us,
            self.seq,
            self.feedback_num,
            self.size,
            self.sent_us,
            self.recv_us,
            self.delta_sent_us,
            self.delta_recv_us,
            self.delta_us,
            self.estimate.as_u64(),
            self.target.as_u64(),
            self.available.as_u64(),
            self.rtt_ms,
            self.marker as u8,
            self.rtx as u8,
            self.probing as u8,
        )
    }
}

/// Writes feedback processing detail to a file for offline analysis.
#[derive(Debug)]
pub(crate) struct BweDump {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BweDump {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, line: &DumpLine) -> io::Result<()> {
        line.write_to(&mut self.writer)
    }

    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_format() {
        let line = DumpLine {
            feedback_time_us: 1_000_000,
            seq: 42,
            feedback_num: 3,
            size: 1200,
            sent_us: 900_000,
            recv_us: 910_000,
            delta_sent_us: 5_000,
            delta_recv_us: 6_000,
            delta_us: 1_000,
            estimate: Bitrate::kbps(800),
            target: Bitrate::kbps(840),
            available: Bitrate::kbps(760),
            rtt_ms: 45,
            marker: true,
            rtx: false,
            probing: true,
        };

        let mut out = Vec::new();
        line.write_to(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1000000|42|3|1200|900000|910000|5000|6000|1000|800000|840000|760000|45|1|0|1\n"
        );
    }
}
