// network_service/src/merkle_path.rs
//
// Binary layout: block height (varint), tree height (u8), then per level a
// leaf count (varint) followed by leaves of offset (varint), flags (u8) and a
// 32 byte hash in internal byte order unless the duplicate flag is set.
use crate::error::MerklePathError;
use sv::util::{sha256d, Hash256};

const FLAG_HASH: u8 = 0;
const FLAG_DUPLICATE: u8 = 1;
const FLAG_TXID: u8 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePathLeaf {
    pub offset: u64,
    /// Internal byte order. `None` only for duplicate leaves.
    pub hash: Option<[u8; 32]>,
    pub txid: bool,
    pub duplicate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    pub block_height: u32,
    pub path: Vec<Vec<MerklePathLeaf>>,
}

fn decode_hash(hex_hash: &str) -> Result<[u8; 32], MerklePathError> {
    Hash256::decode(hex_hash)
        .map(|h| h.0)
        .map_err(|_| MerklePathError::InvalidHash(hex_hash.to_string()))
}

fn encode_hash(hash: [u8; 32]) -> String {
    Hash256(hash).encode()
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut joined = [0u8; 64];
    joined[..32].copy_from_slice(left);
    joined[32..].copy_from_slice(right);
    sha256d(&joined).0
}

fn write_varint(n: u64, out: &mut Vec<u8>) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MerklePathError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(MerklePathError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, MerklePathError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, MerklePathError> {
        let first = self.u8()?;
        let value = match first {
            0xfd => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => {
                let b = self.take(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            0xff => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                u64::from_le_bytes(raw)
            }
            n => n as u64,
        };
        Ok(value)
    }

    fn hash(&mut self) -> Result<[u8; 32], MerklePathError> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        Ok(hash)
    }
}

impl MerklePath {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerklePathError> {
        let mut reader = Reader { bytes, pos: 0 };
        let block_height = reader.varint()? as u32;
        let tree_height = reader.u8()? as usize;
        if tree_height == 0 {
            return Err(MerklePathError::Empty);
        }
        let mut path = Vec::with_capacity(tree_height);
        for _ in 0..tree_height {
            let count = reader.varint()?;
            let mut leaves = Vec::new();
            for _ in 0..count {
                let offset = reader.varint()?;
                let flags = reader.u8()?;
                let leaf = match flags {
                    FLAG_DUPLICATE => MerklePathLeaf {
                        offset,
                        hash: None,
                        txid: false,
                        duplicate: true,
                    },
                    FLAG_HASH | FLAG_TXID => MerklePathLeaf {
                        offset,
                        hash: Some(reader.hash()?),
                        txid: flags == FLAG_TXID,
                        duplicate: false,
                    },
                    other => return Err(MerklePathError::InvalidFlags(other)),
                };
                leaves.push(leaf);
            }
            path.push(leaves);
        }
        Ok(Self { block_height, path })
    }

    pub fn from_hex(hex_path: &str) -> Result<Self, MerklePathError> {
        let bytes = hex::decode(hex_path)
            .map_err(|e| MerklePathError::InvalidHash(format!("merkle path hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(self.block_height as u64, &mut out);
        out.push(self.path.len() as u8);
        for level in &self.path {
            write_varint(level.len() as u64, &mut out);
            for leaf in level {
                write_varint(leaf.offset, &mut out);
                match (leaf.duplicate, leaf.hash) {
                    (true, _) | (false, None) => out.push(FLAG_DUPLICATE),
                    (false, Some(hash)) => {
                        out.push(if leaf.txid { FLAG_TXID } else { FLAG_HASH });
                        out.extend_from_slice(&hash);
                    }
                }
            }
        }
        out
    }

    /// Position of `txid` in the block, if it is a leaf of this path.
    pub fn leaf_index(&self, txid: &str) -> Option<u64> {
        let target = decode_hash(txid).ok()?;
        self.path
            .first()?
            .iter()
            .find(|leaf| leaf.hash == Some(target))
            .map(|leaf| leaf.offset)
    }

    /// Merkle root (display hex) implied by this path for `txid`.
    pub fn compute_root(&self, txid: &str) -> Result<String, MerklePathError> {
        let level0 = self.path.first().ok_or(MerklePathError::Empty)?;
        let index = self
            .leaf_index(txid)
            .ok_or_else(|| MerklePathError::TxidNotFound(txid.to_string()))?;
        let mut working = decode_hash(txid)?;
        if self.path.len() == 1 && level0.len() == 1 {
            return Ok(encode_hash(working));
        }
        let mut index = index;
        for (level, leaves) in self.path.iter().enumerate() {
            let sibling_offset = index ^ 1;
            let sibling = match leaves.iter().find(|leaf| leaf.offset == sibling_offset) {
                Some(leaf) if leaf.duplicate => working,
                Some(MerklePathLeaf { hash: Some(hash), .. }) => *hash,
                _ => {
                    return Err(MerklePathError::MissingSibling {
                        level,
                        offset: sibling_offset,
                    })
                }
            };
            working = if index % 2 == 1 {
                hash_pair(&sibling, &working)
            } else {
                hash_pair(&working, &sibling)
            };
            index >>= 1;
        }
        Ok(encode_hash(working))
    }

    /// Builds the path proving `txid` from every txid of a block in order.
    /// Returns the path and the block's merkle root.
    pub fn from_block_txids(
        block_height: u32,
        txids: &[String],
        txid: &str,
    ) -> Result<(Self, String), MerklePathError> {
        let mut level: Vec<[u8; 32]> = txids
            .iter()
            .map(|t| decode_hash(t))
            .collect::<Result<_, _>>()?;
        let target = decode_hash(txid)?;
        let mut index = level
            .iter()
            .position(|h| *h == target)
            .ok_or_else(|| MerklePathError::TxidNotFound(txid.to_string()))? as u64;

        if level.len() == 1 {
            let path = vec![vec![MerklePathLeaf {
                offset: 0,
                hash: Some(target),
                txid: true,
                duplicate: false,
            }]];
            return Ok((Self { block_height, path }, encode_hash(target)));
        }

        let mut path = Vec::new();
        while level.len() > 1 {
            let sibling_offset = index ^ 1;
            let mut leaves = Vec::new();
            if path.is_empty() {
                leaves.push(MerklePathLeaf {
                    offset: index,
                    hash: Some(target),
                    txid: true,
                    duplicate: false,
                });
            }
            let sibling = match level.get(sibling_offset as usize) {
                Some(hash) => MerklePathLeaf {
                    offset: sibling_offset,
                    hash: Some(*hash),
                    txid: false,
                    duplicate: false,
                },
                None => MerklePathLeaf {
                    offset: sibling_offset,
                    hash: None,
                    txid: false,
                    duplicate: true,
                },
            };
            leaves.push(sibling);
            leaves.sort_by_key(|leaf| leaf.offset);
            path.push(leaves);

            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two hashes"),
                })
                .collect();
            index >>= 1;
        }
        let root = encode_hash(level[0]);
        Ok((Self { block_height, path }, root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txid::txid_for_raw_tx;

    fn block_txids(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| txid_for_raw_tx(format!("tx-{}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn every_leaf_of_odd_block_proves_the_same_root() {
        let txids = block_txids(5);
        let (_, root) = MerklePath::from_block_txids(800_000, &txids, &txids[0]).unwrap();
        for txid in &txids {
            let (path, expected) = MerklePath::from_block_txids(800_000, &txids, txid).unwrap();
            assert_eq!(expected, root);
            assert_eq!(path.compute_root(txid).unwrap(), root);
        }
    }

    #[test]
    fn binary_encoding_survives_parsing() {
        let txids = block_txids(7);
        let (path, root) = MerklePath::from_block_txids(1_234_567, &txids, &txids[6]).unwrap();
        let parsed = MerklePath::from_bytes(&path.to_bytes()).unwrap();
        assert_eq!(parsed, path);
        assert_eq!(parsed.block_height, 1_234_567);
        assert_eq!(parsed.leaf_index(&txids[6]), Some(6));
        assert_eq!(parsed.compute_root(&txids[6]).unwrap(), root);
    }

    #[test]
    fn single_transaction_block_root_is_the_txid() {
        let txids = block_txids(1);
        let (path, root) = MerklePath::from_block_txids(10, &txids, &txids[0]).unwrap();
        assert_eq!(root, txids[0]);
        assert_eq!(path.compute_root(&txids[0]).unwrap(), txids[0]);
    }

    #[test]
    fn unknown_txid_and_truncated_bytes_are_rejected() {
        let txids = block_txids(4);
        let (path, _) = MerklePath::from_block_txids(10, &txids, &txids[1]).unwrap();
        let stranger = txid_for_raw_tx(b"stranger");
        assert_eq!(
            path.compute_root(&stranger),
            Err(MerklePathError::TxidNotFound(stranger.clone()))
        );
        let bytes = path.to_bytes();
        assert!(matches!(
            MerklePath::from_bytes(&bytes[..bytes.len() - 3]),
            Err(MerklePathError::Truncated(_))
        ));
    }
}
