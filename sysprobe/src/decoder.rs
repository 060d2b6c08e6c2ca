use crate::error::DecodeError;
use crate::text::FixedText;
use sysprobe_common::{COMM_LEN, FUNC_NAME_LEN, RAW_EVENT_SIZE};

const PID_OFFSET: usize = 0;
const TGID_OFFSET: usize = 4;
const COMM_OFFSET: usize = 8;
const FUNC_NAME_OFFSET: usize = COMM_OFFSET + COMM_LEN;
const TIMESTAMP_OFFSET: usize = FUNC_NAME_OFFSET + FUNC_NAME_LEN;

const _: () = assert!(TIMESTAMP_OFFSET + 8 == RAW_EVENT_SIZE);

/// A decoded kprobe hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub pid: u32,
    pub tgid: u32,
    pub comm: FixedText<COMM_LEN>,
    pub func_name: FixedText<FUNC_NAME_LEN>,
    pub timestamp_ns: u64,
}

impl EventRecord {
    pub const SIZE: usize = RAW_EVENT_SIZE;

    pub fn new(pid: u32, tgid: u32, comm: &str, func_name: &str, timestamp_ns: u64) -> Self {
        Self {
            pid,
            tgid,
            comm: FixedText::from_str_truncated(comm),
            func_name: FixedText::from_str_truncated(func_name),
            timestamp_ns,
        }
    }

    pub fn encode(&self) -> [u8; RAW_EVENT_SIZE] {
        let mut out = [0u8; RAW_EVENT_SIZE];
        out[PID_OFFSET..TGID_OFFSET].copy_from_slice(&self.pid.to_le_bytes());
        out[TGID_OFFSET..COMM_OFFSET].copy_from_slice(&self.tgid.to_le_bytes());
        out[COMM_OFFSET..FUNC_NAME_OFFSET].copy_from_slice(&self.comm.encode());
        out[FUNC_NAME_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&self.func_name.encode());
        out[TIMESTAMP_OFFSET..].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out
    }
}

/// Decodes one raw record using the fixed little-endian `RawEvent` layout.
pub fn decode(raw: &[u8]) -> Result<EventRecord, DecodeError> {
    let raw: &[u8; RAW_EVENT_SIZE] = raw.try_into().map_err(|_| DecodeError::SizeMismatch {
        expected: RAW_EVENT_SIZE,
        actual: raw.len(),
    })?;

    Ok(EventRecord {
        pid: u32::from_le_bytes(field(raw, PID_OFFSET)),
        tgid: u32::from_le_bytes(field(raw, TGID_OFFSET)),
        comm: FixedText::decode(&field(raw, COMM_OFFSET)),
        func_name: FixedText::decode(&field(raw, FUNC_NAME_OFFSET)),
        timestamp_ns: u64::from_le_bytes(field(raw, TIMESTAMP_OFFSET)),
    })
}

fn field<const W: usize>(raw: &[u8; RAW_EVENT_SIZE], offset: usize) -> [u8; W] {
    let mut out = [0u8; W];
    out.copy_from_slice(&raw[offset..offset + W]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash_read() -> EventRecord {
        EventRecord::new(1234, 1234, "bash", "sys_read", 1000)
    }

    #[test]
    fn decodes_known_layout() {
        let mut raw = [0u8; RAW_EVENT_SIZE];
        raw[0..4].copy_from_slice(&7u32.to_le_bytes());
        raw[4..8].copy_from_slice(&9u32.to_le_bytes());
        raw[8..12].copy_from_slice(b"curl");
        raw[24..33].copy_from_slice(b"sys_write");
        raw[40..48].copy_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());

        let event = decode(&raw).expect("valid record");
        assert_eq!(event.pid, 7);
        assert_eq!(event.tgid, 9);
        assert_eq!(event.comm.to_string(), "curl");
        assert_eq!(event.func_name.to_string(), "sys_write");
        assert_eq!(event.timestamp_ns, 0x0102_0304_0506_0708);
    }

    #[test]
    fn numeric_fields_survive_reencoding() {
        let raw = bash_read().encode();
        let decoded = decode(&raw).unwrap();
        let reencoded = decoded.encode();
        assert_eq!(reencoded[0..8], raw[0..8]);
        assert_eq!(reencoded[40..48], raw[40..48]);
        assert_eq!(decoded, bash_read());
    }

    #[test]
    fn comm_without_terminator_fills_field() {
        let mut raw = bash_read().encode();
        raw[8..24].copy_from_slice(b"kworker/u16:3abc");
        let event = decode(&raw).unwrap();
        assert_eq!(event.comm.to_string(), "kworker/u16:3abc");
        assert_eq!(event.func_name.to_string(), "sys_read");
    }

    #[test]
    fn rejects_short_and_long_records() {
        let raw = bash_read().encode();
        assert_eq!(
            decode(&raw[..RAW_EVENT_SIZE - 1]),
            Err(DecodeError::SizeMismatch {
                expected: RAW_EVENT_SIZE,
                actual: RAW_EVENT_SIZE - 1
            })
        );

        let mut long = raw.to_vec();
        long.push(0);
        assert_eq!(
            decode(&long),
            Err(DecodeError::SizeMismatch {
                expected: RAW_EVENT_SIZE,
                actual: RAW_EVENT_SIZE + 1
            })
        );
        assert!(decode(&[]).is_err());
    }
}
