use std::fmt::{self, Display, Formatter};

/// 32-byte identity of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Leading zeros carry no information, print the significant suffix only.
        let start = self.0.iter().position(|b| *b != 0).unwrap_or(31).min(24);
        for byte in &self.0[start..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A storage node that is able to receive pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
}

impl Node {
    pub fn new<Addr>(id: NodeId, address: Addr) -> Self
    where
        Addr: AsRef<str>,
    {
        Self {
            id,
            address: address.as_ref().to_owned(),
        }
    }
}
