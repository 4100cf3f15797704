// kernel-agent/src/safe_parser.rs
// Safe record decoding without unsafe memory operations

use crate::error::*;
use crate::events::*;

/// Bounds-checked little-endian cursor over one raw record
struct RecordReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> RecordReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        let end = self.position + size;
        if end > self.buffer.len() {
            return Err(ShieldError::MalformedRecord {
                expected: end,
                actual: self.buffer.len(),
            });
        }

        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let actual = self.buffer.len();
        self.take(N)?
            .try_into()
            .map_err(|_| ShieldError::MalformedRecord { expected: N, actual })
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }
}

/// Decode one ring buffer record into a [`WriteEvent`].
///
/// Buffers shorter than `layout.record_len()` are rejected up front; bytes
/// past the record width are ignored.
pub fn decode_record(data: &[u8], layout: &RecordLayout) -> Result<WriteEvent> {
    if data.len() < layout.record_len() {
        return Err(ShieldError::MalformedRecord {
            expected: layout.record_len(),
            actual: data.len(),
        });
    }

    let mut reader = RecordReader::new(data);
    let pid = reader.read_u32()?;
    reader.skip_bytes(WRITE_LEN_OFFSET - PID_OFFSET - 4)?;
    let write_length = reader.read_u64()?;
    let comm = reader.take(COMM_LEN)?;
    let sample = reader.take(layout.sample_len())?;

    Ok(WriteEvent {
        pid,
        write_length,
        process_name: trim_comm(comm),
        sample: sample.into(),
    })
}

/// Strip trailing NUL padding from a fixed-width name field.
///
/// Interior bytes are kept as-is; invalid UTF-8 is replaced rather than
/// rejected.
pub fn trim_comm(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);

    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout() -> RecordLayout {
        RecordLayout::default()
    }

    #[test]
    fn test_decode_well_formed_record() {
        let sample: Vec<u8> = (0..128u8).collect();
        let event = WriteEvent::new(31337, 65536, "openssl", &sample);

        let decoded = decode_record(&event.encode(&layout()), &layout()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_padding_between_pid_and_length_is_ignored() {
        let event = WriteEvent::new(7, 512, "cp", &[1, 2, 3]);
        let mut buf = event.encode(&layout());
        buf[4..8].copy_from_slice(&[0xFF; 4]);

        let decoded = decode_record(&buf, &layout()).unwrap();
        assert_eq!(decoded.pid, 7);
        assert_eq!(decoded.write_length, 512);
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let buf = WriteEvent::new(1, 1, "sh", &[]).encode(&layout());

        for len in [0, 3, 16, 31, 159] {
            match decode_record(&buf[..len], &layout()) {
                Err(ShieldError::MalformedRecord { expected, actual }) => {
                    assert_eq!(expected, 160);
                    assert_eq!(actual, len);
                }
                other => panic!("expected MalformedRecord for {len} bytes, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let event = WriteEvent::new(99, 10, "tar", &[9; 128]);
        let mut buf = event.encode(&layout());
        buf.extend_from_slice(&[0xEE; 8]);

        assert_eq!(decode_record(&buf, &layout()).unwrap(), event);
    }

    #[test]
    fn test_wider_layout_reads_wider_sample() {
        let wide = RecordLayout::new(256).unwrap();
        let sample: Vec<u8> = (0..=255u8).collect();
        let buf = WriteEvent::new(5, 8192, "evil", &sample).encode(&wide);

        let decoded = decode_record(&buf, &wide).unwrap();
        assert_eq!(decoded.sample.len(), 256);
        assert_eq!(&decoded.sample[..], &sample[..]);

        // The same bytes under the default layout yield a truncated sample
        let narrow = decode_record(&buf, &layout()).unwrap();
        assert_eq!(&narrow.sample[..], &sample[..128]);
    }

    #[test]
    fn test_trim_comm() {
        assert_eq!(trim_comm(b"bash\0\0\0\0\0\0\0\0\0\0\0\0"), "bash");
        assert_eq!(trim_comm(b"0123456789abcdef"), "0123456789abcdef");
        assert_eq!(trim_comm(&[0u8; 16]), "");
        // only trailing padding is removed
        assert_eq!(trim_comm(b"a\0b\0\0"), "a\0b");

        let lossy = trim_comm(&[0xFF, 0xFE, b'h', b'i', 0, 0]);
        assert!(lossy.ends_with("hi"));
    }

    proptest! {
        #[test]
        fn prop_decode_reproduces_fields(
            pid in any::<u32>(),
            write_length in any::<u64>(),
            name in "[a-zA-Z0-9_.-]{0,15}",
            sample in proptest::collection::vec(any::<u8>(), 128),
        ) {
            let event = WriteEvent::new(pid, write_length, &name, &sample);
            let decoded = decode_record(&event.encode(&layout()), &layout()).unwrap();
            prop_assert_eq!(decoded, event);
        }

        #[test]
        fn prop_truncated_records_never_decode(cut in 0usize..160) {
            let buf = WriteEvent::new(1, 2, "x", &[3; 128]).encode(&layout());
            prop_assert!(decode_record(&buf[..cut], &layout()).is_err());
        }
    }
}
