// kernel-agent/src/events.rs
// Write event record shared between kernel and user space

use std::fmt;

use crate::error::{Result, ShieldError};

/// Width of the kernel `comm` buffer (TASK_COMM_LEN)
pub const COMM_LEN: usize = 16;

/// Sample width emitted by the reference kernel program
pub const DEFAULT_SAMPLE_LEN: usize = 128;

/// Largest sample width the decoder accepts
pub const MAX_SAMPLE_LEN: usize = 4096;

pub const PID_OFFSET: usize = 0;
pub const WRITE_LEN_OFFSET: usize = 8;
pub const COMM_OFFSET: usize = 16;
pub const SAMPLE_OFFSET: usize = COMM_OFFSET + COMM_LEN;

/// Fixed-width prefix of every record, mirrored from the kernel struct.
///
/// The 4 bytes between `pid` and `write_len` are alignment padding and are
/// part of the wire format.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WriteEventHeader {
    pub pid: u32,
    pub _pad: u32,
    pub write_len: u64,
    pub comm: [u8; COMM_LEN],
}

const _: () = assert!(std::mem::size_of::<WriteEventHeader>() == SAMPLE_OFFSET);

/// Positional layout of a raw ring buffer record.
///
/// Only the trailing sample width varies; it must match the `SAMPLE_LEN` the
/// kernel program was compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    sample_len: usize,
}

impl RecordLayout {
    pub fn new(sample_len: usize) -> Result<Self> {
        if sample_len == 0 || sample_len > MAX_SAMPLE_LEN {
            return Err(ShieldError::Config {
                field: "ebpf.sample_len".to_string(),
                message: format!("must be within 1..={}, got {}", MAX_SAMPLE_LEN, sample_len),
            });
        }
        Ok(Self { sample_len })
    }

    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    /// Total width of one record in bytes
    pub fn record_len(&self) -> usize {
        SAMPLE_OFFSET + self.sample_len
    }

    /// Upper bound of the Shannon entropy a sample of this width can reach
    pub fn max_sample_entropy(&self) -> f64 {
        (self.sample_len.min(256) as f64).log2()
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            sample_len: DEFAULT_SAMPLE_LEN,
        }
    }
}

/// One write syscall observed by the kernel probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub pid: u32,
    /// Full length of the write, independent of the sample width
    pub write_length: u64,
    /// `comm` with trailing NUL padding removed
    pub process_name: String,
    /// Prefix of the written buffer, zero-padded by the producer
    pub sample: Box<[u8]>,
}

impl WriteEvent {
    pub fn new(pid: u32, write_length: u64, process_name: &str, sample: &[u8]) -> Self {
        Self {
            pid,
            write_length,
            process_name: process_name.to_string(),
            sample: sample.into(),
        }
    }

    /// Serialize into the kernel wire format.
    ///
    /// The name is cut to 15 bytes so a terminating NUL always fits, as the
    /// kernel does for `comm`. The sample is truncated or zero-padded to the
    /// layout width.
    pub fn encode(&self, layout: &RecordLayout) -> Vec<u8> {
        let mut buf = vec![0u8; layout.record_len()];
        buf[PID_OFFSET..PID_OFFSET + 4].copy_from_slice(&self.pid.to_le_bytes());
        buf[WRITE_LEN_OFFSET..WRITE_LEN_OFFSET + 8].copy_from_slice(&self.write_length.to_le_bytes());

        let name = self.process_name.as_bytes();
        let name_len = name.len().min(COMM_LEN - 1);
        buf[COMM_OFFSET..COMM_OFFSET + name_len].copy_from_slice(&name[..name_len]);

        let sample_len = self.sample.len().min(layout.sample_len());
        buf[SAMPLE_OFFSET..SAMPLE_OFFSET + sample_len].copy_from_slice(&self.sample[..sample_len]);
        buf
    }
}

impl fmt::Display for WriteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WRITE: {} (PID:{}) -> {} bytes",
            self.process_name, self.pid, self.write_length
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_matches_kernel_struct() {
        let layout = RecordLayout::default();
        assert_eq!(layout.sample_len(), 128);
        assert_eq!(layout.record_len(), 4 + 4 + 8 + 16 + 128);
    }

    #[test]
    fn test_layout_rejects_out_of_range_widths() {
        assert!(RecordLayout::new(0).is_err());
        assert!(RecordLayout::new(MAX_SAMPLE_LEN + 1).is_err());
        assert!(RecordLayout::new(256).is_ok());
    }

    #[test]
    fn test_max_sample_entropy() {
        assert_eq!(RecordLayout::default().max_sample_entropy(), 7.0);
        assert_eq!(RecordLayout::new(256).unwrap().max_sample_entropy(), 8.0);
        assert_eq!(RecordLayout::new(4096).unwrap().max_sample_entropy(), 8.0);
    }

    #[test]
    fn test_encode_places_fields_at_fixed_offsets() {
        let event = WriteEvent::new(0x0102_0304, 0x1122_3344_5566_7788, "vim", &[0xAB; 4]);
        let buf = event.encode(&RecordLayout::default());

        assert_eq!(buf.len(), 160);
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 0]);
        assert_eq!(&buf[8..16], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&buf[16..19], b"vim");
        assert!(buf[19..32].iter().all(|&b| b == 0));
        assert_eq!(&buf[32..36], &[0xAB; 4]);
        assert!(buf[36..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_truncates_long_names() {
        let event = WriteEvent::new(1, 1, "a-very-long-process-name", &[]);
        let buf = event.encode(&RecordLayout::default());
        assert_eq!(&buf[16..31], b"a-very-long-pro");
        assert_eq!(buf[31], 0);
    }

    #[test]
    fn test_display() {
        let event = WriteEvent::new(4242, 4096, "evil", &[]);
        assert_eq!(event.to_string(), "WRITE: evil (PID:4242) -> 4096 bytes");
    }
}
