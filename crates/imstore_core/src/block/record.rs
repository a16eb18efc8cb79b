//! On-disk record and block header layout.
//!
//! A block file starts with a 32-byte header (`MAGIC u32 | FORMAT_VERSION u32 |
//! zero padding`). Each record that follows is `MAGIC | frame | MAGIC`, where
//! `frame` is a codec frame whose header carries the body length.

use imstore_codec::{FrameHeader, Message, HEADER_LEN};
use imstore_storage::{StorageBackend, StorageError};

use crate::error::{CoreError, CoreResult};

/// Magic number framing block headers and records.
pub const MAGIC: u32 = 0x494d_494d;

/// Block format version (1.0).
pub const FORMAT_VERSION: u32 = 1 << 16;

/// Size of the block header.
pub const HEADER_SIZE: u64 = 32;

/// Bytes a record adds around its frame.
pub const RECORD_OVERHEAD: usize = 8;

const ZERO_SCAN_CHUNK: u64 = 64 * 1024;

/// Encodes a block header.
#[must_use]
pub fn block_header() -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    header[4..8].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    header
}

/// Checks the magic and version of a block header.
pub fn check_block_header(header: &[u8]) -> CoreResult<()> {
    if header.len() < 8 {
        return Err(CoreError::invalid_format("block header too short"));
    }
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if magic != MAGIC {
        return Err(CoreError::invalid_format(format!(
            "bad block magic {magic:#010x}"
        )));
    }
    if version != FORMAT_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported block version {version:#x}"
        )));
    }
    Ok(())
}

/// Encodes a message as a log record.
pub fn encode_record(message: &Message) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(RECORD_OVERHEAD + HEADER_LEN + 64);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    message.encode_frame_into(&mut buf)?;
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    Ok(buf)
}

/// Outcome of reading one record.
#[derive(Debug)]
pub enum RecordRead {
    /// A valid record and its encoded length.
    Record(Message, usize),
    /// `offset` is exactly the end of the block.
    End,
    /// The bytes at `offset` are not a valid record.
    Invalid(String),
}

/// Reads and validates the record at `offset`.
///
/// Short reads and bad framing are reported as [`RecordRead::Invalid`];
/// only real I/O failures are errors.
pub fn read_record(block: &dyn StorageBackend, offset: u64) -> CoreResult<RecordRead> {
    let size = block.size()?;
    if offset >= size {
        return Ok(if offset == size {
            RecordRead::End
        } else {
            RecordRead::Invalid(format!("offset {offset} past block end {size}"))
        });
    }

    let head = match block.read_at(offset, 4 + HEADER_LEN) {
        Ok(head) => head,
        Err(err) if err.is_end_of_data() => {
            return Ok(RecordRead::Invalid("truncated record header".into()))
        }
        Err(err) => return Err(err.into()),
    };
    let magic = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    if magic != MAGIC {
        return Ok(RecordRead::Invalid(format!(
            "bad leading magic {magic:#010x}"
        )));
    }
    let header = match FrameHeader::parse(&head[4..]) {
        Ok(header) => header,
        Err(err) => return Ok(RecordRead::Invalid(err.to_string())),
    };

    let total = RECORD_OVERHEAD + header.frame_len();
    if offset + total as u64 > size {
        return Ok(RecordRead::Invalid(format!(
            "record of {total} bytes runs past block end"
        )));
    }
    let bytes = match block.read_at(offset, total) {
        Ok(bytes) => bytes,
        Err(StorageError::ReadPastEnd { .. }) => {
            return Ok(RecordRead::Invalid("truncated record".into()))
        }
        Err(err) => return Err(err.into()),
    };
    let tail = &bytes[total - 4..];
    if u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) != MAGIC {
        return Ok(RecordRead::Invalid("bad trailing magic".into()));
    }
    match Message::decode_frame(&bytes[4..total - 4]) {
        Ok((message, _)) => Ok(RecordRead::Record(message, total)),
        Err(err) => Ok(RecordRead::Invalid(err.to_string())),
    }
}

/// Length of the run of zero bytes starting at `offset`.
///
/// Replica blocks hold zero padding wherever the master's log had a gap. A
/// record starts with `MAGIC`, which has no zero byte, so the run ends at the
/// next record or at the end of the block.
pub fn zero_run(block: &dyn StorageBackend, offset: u64) -> CoreResult<u64> {
    let size = block.size()?;
    let mut pos = offset;
    while pos < size {
        let len = (size - pos).min(ZERO_SCAN_CHUNK);
        let chunk = block.read_at(pos, len as usize)?;
        if let Some(i) = chunk.iter().position(|b| *b != 0) {
            return Ok(pos + i as u64 - offset);
        }
        pos += len;
    }
    Ok(pos.saturating_sub(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::{ImMessage, OfflineMessage};
    use imstore_storage::InMemoryBackend;

    fn block_with(records: &[Message]) -> (InMemoryBackend, Vec<u64>) {
        let mut block = InMemoryBackend::new();
        block.append(&block_header()).unwrap();
        let offsets = records
            .iter()
            .map(|m| block.append(&encode_record(m).unwrap()).unwrap())
            .collect();
        (block, offsets)
    }

    fn im() -> Message {
        Message::im(ImMessage {
            sender: 1,
            receiver: 2,
            timestamp: 3,
            msgid: 4,
            content: "hello".into(),
        })
    }

    #[test]
    fn header_layout() {
        let header = block_header();
        assert_eq!(&header[0..4], b"IMIM");
        assert_eq!(&header[4..8], &[0, 1, 0, 0]);
        assert!(header[8..].iter().all(|b| *b == 0));
        assert!(check_block_header(&header).is_ok());
    }

    #[test]
    fn bad_header_rejected() {
        let mut header = block_header();
        header[0] = 0;
        assert!(check_block_header(&header).is_err());
        let mut header = block_header();
        header[5] = 2;
        assert!(check_block_header(&header).is_err());
    }

    #[test]
    fn reads_records_in_sequence() {
        let off = Message::offline(OfflineMessage::default());
        let (block, offsets) = block_with(&[im(), off.clone()]);
        assert_eq!(offsets[0], HEADER_SIZE);

        match read_record(&block, offsets[0]).unwrap() {
            RecordRead::Record(m, len) => {
                assert_eq!(m, im());
                assert_eq!(offsets[0] + len as u64, offsets[1]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match read_record(&block, offsets[1]).unwrap() {
            RecordRead::Record(m, len) => {
                assert_eq!(m, off);
                assert_eq!(len, RECORD_OVERHEAD + HEADER_LEN + OfflineMessage::ENCODED_LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
        let end = block.size().unwrap();
        assert!(matches!(read_record(&block, end).unwrap(), RecordRead::End));
    }

    #[test]
    fn torn_record_is_invalid() {
        let record = encode_record(&im()).unwrap();
        let mut block = InMemoryBackend::new();
        block.append(&block_header()).unwrap();
        block.append(&record[..record.len() - 3]).unwrap();
        assert!(matches!(
            read_record(&block, HEADER_SIZE).unwrap(),
            RecordRead::Invalid(_)
        ));
    }

    #[test]
    fn misaligned_offset_is_invalid() {
        let (block, offsets) = block_with(&[im()]);
        assert!(matches!(
            read_record(&block, offsets[0] + 1).unwrap(),
            RecordRead::Invalid(_)
        ));
    }

    #[test]
    fn zero_run_stops_at_next_record() {
        let mut block = InMemoryBackend::new();
        block.append(&block_header()).unwrap();
        block.append(&[0u8; 40]).unwrap();
        let at = block.append(&encode_record(&im()).unwrap()).unwrap();
        assert_eq!(zero_run(&block, HEADER_SIZE).unwrap(), 40);
        assert_eq!(zero_run(&block, at).unwrap(), 0);
        block.append(&[0u8; 7]).unwrap();
        let end = block.size().unwrap();
        assert_eq!(zero_run(&block, end - 7).unwrap(), 7);
        assert_eq!(zero_run(&block, end).unwrap(), 0);
    }

    #[test]
    fn trailing_magic_checked() {
        let mut record = encode_record(&im()).unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xff;
        let mut block = InMemoryBackend::new();
        block.append(&block_header()).unwrap();
        block.append(&record).unwrap();
        match read_record(&block, HEADER_SIZE).unwrap() {
            RecordRead::Invalid(reason) => assert!(reason.contains("trailing")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
