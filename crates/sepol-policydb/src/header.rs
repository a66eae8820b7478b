//! Reading back the fixed prefix of a binary policy.

use serde::Serialize;
use sepol_types::{
    HandleUnknown, POLICYDB_CONFIG_MLS, POLICYDB_MAGIC, PolicyCapability, PolicyVersion,
    TargetPlatform,
};

use crate::ebitmap::Ebitmap;
use crate::reader::PolicyReader;
use crate::{PolicyDbError, Result};

/// Longest target string accepted in a header.
const MAX_TARGET_LEN: u32 = 32;

/// The header fields of a kernel policy file, plus its capability bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyHeader {
    pub target: TargetPlatform,
    pub version: u32,
    pub config: u32,
    pub sym_num: u32,
    pub ocon_num: u32,
    pub capabilities: Vec<String>,
}

impl PolicyHeader {
    pub fn read(data: &[u8]) -> Result<PolicyHeader> {
        let mut reader = PolicyReader::new(data);

        let magic = reader.read_u32()?;
        if magic != POLICYDB_MAGIC {
            return Err(PolicyDbError::InvalidHeader(format!(
                "magic number {magic:#x} does not match {POLICYDB_MAGIC:#x}"
            )));
        }

        let len = reader.read_u32()?;
        if len == 0 || len > MAX_TARGET_LEN {
            return Err(PolicyDbError::InvalidHeader(format!(
                "target string length {len} out of range"
            )));
        }
        let raw = reader.read_bytes(len as usize)?;
        let target = std::str::from_utf8(raw)
            .ok()
            .and_then(TargetPlatform::from_target_string)
            .ok_or_else(|| {
                PolicyDbError::InvalidHeader(format!(
                    "unknown target string {:?}",
                    String::from_utf8_lossy(raw)
                ))
            })?;

        let version = reader.read_u32()?;
        let config = reader.read_u32()?;
        let sym_num = reader.read_u32()?;
        let ocon_num = reader.read_u32()?;

        let mut capabilities = Vec::new();
        if version >= PolicyVersion::POLCAP {
            let caps = Ebitmap::read(&mut reader)?;
            for bit in caps.iter() {
                let known = PolicyCapability::from_number(bit);
                capabilities.push(known.map_or_else(|| format!("unknown({bit})"), |cap| cap.name().to_string()));
            }
        }

        Ok(PolicyHeader {
            target,
            version,
            config,
            sym_num,
            ocon_num,
            capabilities,
        })
    }

    pub fn mls(&self) -> bool {
        self.config & POLICYDB_CONFIG_MLS != 0
    }

    pub fn handle_unknown(&self) -> HandleUnknown {
        HandleUnknown::from_config_bits(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn header(magic: u32, target: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(magic);
        buf.put_u32_le(target.len() as u32);
        buf.put_slice(target.as_bytes());
        for word in [21u32, POLICYDB_CONFIG_MLS | 2, 8, 7] {
            buf.put_u32_le(word);
        }
        buf
    }

    #[test]
    fn reads_header_without_capabilities() {
        let buf = header(POLICYDB_MAGIC, "SE Linux");
        let parsed = PolicyHeader::read(&buf).unwrap();
        assert_eq!(parsed.target, TargetPlatform::SELinux);
        assert_eq!(parsed.version, 21);
        assert!(parsed.mls());
        assert_eq!(parsed.handle_unknown(), HandleUnknown::Reject);
        assert!(parsed.capabilities.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = header(0xdead_beef, "SE Linux");
        assert!(matches!(
            PolicyHeader::read(&buf),
            Err(PolicyDbError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_unknown_target() {
        let buf = header(POLICYDB_MAGIC, "Plan 9");
        assert!(PolicyHeader::read(&buf).is_err());
    }

    #[test]
    fn truncated_input_is_eof() {
        let buf = header(POLICYDB_MAGIC, "XenFlask");
        assert!(matches!(
            PolicyHeader::read(&buf[..12]),
            Err(PolicyDbError::UnexpectedEof { .. })
        ));
    }
}
