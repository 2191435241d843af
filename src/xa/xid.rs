// # Xid Value Key
//
// Byte-wise normalized form of a global transaction identifier. Two Xids are
// equal iff format id, global transaction id, and branch qualifier are all
// byte-equal, which makes this type usable as a map key across the XA
// registry and the wire protocol.

use serde::{Deserialize, Serialize};

/// XA transaction branch flags (subset of the XA specification).
pub mod flags {
    pub const TMNOFLAGS: u32 = 0;
    pub const TMJOIN: u32 = 0x0020_0000;
    pub const TMENDRSCAN: u32 = 0x0080_0000;
    pub const TMSTARTRSCAN: u32 = 0x0100_0000;
    pub const TMSUSPEND: u32 = 0x0200_0000;
    pub const TMSUCCESS: u32 = 0x0400_0000;
    pub const TMRESUME: u32 = 0x0800_0000;
    pub const TMFAIL: u32 = 0x2000_0000;
    pub const TMONEPHASE: u32 = 0x4000_0000;
}

/// Value-equality key for an XA branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct XidKey {
    pub format_id: i32,
    pub global_txn_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl XidKey {
    pub fn new(format_id: i32, global_txn_id: Vec<u8>, branch_qualifier: Vec<u8>) -> Self {
        Self {
            format_id,
            global_txn_id,
            branch_qualifier,
        }
    }

    /// Convenience constructor from string components, used heavily in tests.
    pub fn from_parts(format_id: i32, gtrid: &str, bqual: &str) -> Self {
        Self::new(format_id, gtrid.as_bytes().to_vec(), bqual.as_bytes().to_vec())
    }
}

impl std::fmt::Display for XidKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "xid({},{},{})",
            self.format_id,
            hex::encode(&self.global_txn_id),
            hex::encode(&self.branch_qualifier)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_equality_is_bytewise() {
        let a = XidKey::from_parts(1, "gtx", "b1");
        let b = XidKey::new(1, b"gtx".to_vec(), b"b1".to_vec());
        assert_eq!(a, b);

        assert_ne!(a, XidKey::from_parts(2, "gtx", "b1"));
        assert_ne!(a, XidKey::from_parts(1, "gtx2", "b1"));
        assert_ne!(a, XidKey::from_parts(1, "gtx", "b2"));
    }

    #[test]
    fn test_usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(XidKey::from_parts(1, "gtx", "b1"), "entry");
        assert_eq!(map.get(&XidKey::from_parts(1, "gtx", "b1")), Some(&"entry"));
        assert_eq!(map.get(&XidKey::from_parts(1, "gtx", "b2")), None);
    }
}
