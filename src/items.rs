//! Item storage: one logical value per key, inline or chunked.
//!
//! Values below the inline threshold are stored directly under the item key
//! behind a tag byte. Larger values are split into fixed-size chunks written
//! under `blobs/<blob-id>/<chunk>`, and the item key holds a small stub
//! pointing at the blob. Readers and scanners materialize either
//! representation transparently; chunk ranges are owned by exactly one item
//! key and cleared whenever the item is rewritten or deleted.

use rand::RngCore;
use tracing::trace;

use lodestone_core::kv::{KvTransaction, RangeScan, StreamingMode};
use lodestone_core::{StoreError, Subspace, Value};

/// Stub tag bytes. The tag is the first byte of every stored item value.
mod tag {
    pub const INLINE: u8 = 0;
    pub const BLOB: u8 = 1;
}

#[derive(Debug, Clone)]
pub struct ItemConfig {
    /// Values strictly below this many bytes are stored inline.
    pub inline_threshold: usize,
    /// Chunk size for external values; a power of two.
    pub chunk_size: usize,
    /// Hard cap on a single logical value.
    pub max_value_size: usize,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 90 * 1024,
            chunk_size: 64 * 1024,
            max_value_size: 64 * 1024 * 1024,
        }
    }
}

/// What an item key currently points at.
enum Stub {
    Inline(Vec<u8>),
    Blob { id: [u8; 8], total_len: usize },
}

fn decode_stub(raw: &[u8]) -> Result<Stub, StoreError> {
    match raw.split_first() {
        Some((&tag::INLINE, body)) => Ok(Stub::Inline(body.to_vec())),
        Some((&tag::BLOB, body)) => {
            if body.len() != 16 {
                return Err(StoreError::decode("malformed blob stub"));
            }
            let mut id = [0u8; 8];
            id.copy_from_slice(&body[..8]);
            let total_len =
                u64::from_le_bytes(body[8..16].try_into().expect("slice is 8 bytes")) as usize;
            Ok(Stub::Blob { id, total_len })
        }
        Some((other, _)) => Err(StoreError::decode(format!("unknown stub tag {other}"))),
        None => Err(StoreError::decode("empty item value")),
    }
}

#[derive(Debug, Clone)]
pub struct ItemStore {
    blobs: Subspace,
    config: ItemConfig,
}

impl ItemStore {
    pub fn new(blobs: Subspace, config: ItemConfig) -> Self {
        Self { blobs, config }
    }

    fn blob_space(&self, id: &[u8; 8]) -> Subspace {
        self.blobs.subspace(&[Value::Bytes(id.to_vec())])
    }

    /// Store `bytes` under `key`, replacing any prior representation.
    pub fn write<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        key: &[u8],
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        if bytes.len() > self.config.max_value_size {
            return Err(StoreError::SizeLimitExceeded {
                size: bytes.len(),
                limit: self.config.max_value_size,
            });
        }

        self.clear_external(tx, key)?;

        if bytes.len() < self.config.inline_threshold {
            let mut value = Vec::with_capacity(1 + bytes.len());
            value.push(tag::INLINE);
            value.extend_from_slice(bytes);
            tx.set(key, &value);
            return Ok(());
        }

        let mut id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id);

        let space = self.blob_space(&id);
        for (seq, chunk) in bytes.chunks(self.config.chunk_size).enumerate() {
            tx.set(&space.pack(&[Value::Int(seq as i64)]), chunk);
        }

        let mut stub = Vec::with_capacity(17);
        stub.push(tag::BLOB);
        stub.extend_from_slice(&id);
        stub.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        tx.set(key, &stub);

        trace!(
            blob = %hex::encode(id),
            len = bytes.len(),
            "externalized item value"
        );
        Ok(())
    }

    /// Materialize the value under `key`, whichever representation it uses.
    pub fn read<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let raw = match tx.get(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        Ok(Some(self.materialize(tx, &raw)?))
    }

    /// Remove the value under `key` along with any chunks it owns.
    pub fn delete<Tx: KvTransaction>(&self, tx: &mut Tx, key: &[u8]) -> Result<(), StoreError> {
        self.clear_external(tx, key)?;
        tx.clear(key);
        Ok(())
    }

    /// Scan `[begin, end)` yielding materialized values. The limit applies
    /// to items, not chunks; chunks live in their own region and never show
    /// up in an item scan.
    pub fn scan<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut scan = RangeScan::new(begin.to_vec(), end.to_vec()).mode(StreamingMode::WantAll);
        if let Some(limit) = limit {
            scan = scan.limit(limit);
        }
        let stubs = tx.get_range(scan)?;

        let mut items = Vec::with_capacity(stubs.len());
        for (key, raw) in stubs {
            let value = self.materialize(tx, &raw)?;
            items.push((key, value));
        }
        Ok(items)
    }

    fn materialize<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        raw: &[u8],
    ) -> Result<Vec<u8>, StoreError> {
        match decode_stub(raw)? {
            Stub::Inline(bytes) => Ok(bytes),
            Stub::Blob { id, total_len } => {
                let (begin, end) = self.blob_space(&id).range();
                let chunks =
                    tx.get_range(RangeScan::new(begin, end).mode(StreamingMode::WantAll))?;
                let mut bytes = Vec::with_capacity(total_len);
                for (_, chunk) in chunks {
                    bytes.extend_from_slice(&chunk);
                }
                if bytes.len() != total_len {
                    return Err(StoreError::decode(format!(
                        "blob 0x{} materialized {} bytes, stub claims {}",
                        hex::encode(id),
                        bytes.len(),
                        total_len
                    )));
                }
                Ok(bytes)
            }
        }
    }

    /// If `key` currently points at an external blob, clear its chunk range.
    fn clear_external<Tx: KvTransaction>(&self, tx: &mut Tx, key: &[u8]) -> Result<(), StoreError> {
        if let Some(raw) = tx.get(key)? {
            if let Stub::Blob { id, .. } = decode_stub(&raw)? {
                let (begin, end) = self.blob_space(&id).range();
                tx.clear_range(&begin, &end);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::kv::{KvEngine, TransactionConfig};
    use lodestone_core::Subspace;
    use lodestone_memkv::MemKv;

    fn store() -> ItemStore {
        let blobs = Subspace::from_tuple(&[Value::from("blobs-test")]);
        ItemStore::new(
            blobs,
            ItemConfig {
                inline_threshold: 64,
                chunk_size: 16,
                max_value_size: 1024,
            },
        )
    }

    fn with_tx<T>(
        engine: &MemKv,
        body: impl FnMut(&mut <MemKv as KvEngine>::Tx) -> Result<T, StoreError>,
    ) -> T {
        engine
            .with_transaction(&TransactionConfig::default(), body)
            .unwrap()
    }

    #[test]
    fn test_inline_roundtrip() {
        let engine = MemKv::new();
        let items = store();
        with_tx(&engine, |tx| items.write(tx, b"k", b"small value"));
        let value = with_tx(&engine, |tx| items.read(tx, b"k"));
        assert_eq!(value, Some(b"small value".to_vec()));
    }

    #[test]
    fn test_external_roundtrip() {
        let engine = MemKv::new();
        let items = store();
        let big: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        with_tx(&engine, |tx| items.write(tx, b"k", &big));
        let value = with_tx(&engine, |tx| items.read(tx, b"k"));
        assert_eq!(value, Some(big));
    }

    #[test]
    fn test_boundary_sizes_roundtrip() {
        let engine = MemKv::new();
        let items = store();
        for len in [0usize, 63, 64, 65, 16 * 3, 16 * 3 + 1] {
            let bytes = vec![0xabu8; len];
            let key = format!("k{len}").into_bytes();
            with_tx(&engine, |tx| items.write(tx, &key, &bytes));
            let value = with_tx(&engine, |tx| items.read(tx, &key));
            assert_eq!(value.as_deref(), Some(bytes.as_slice()), "len {len}");
        }
    }

    #[test]
    fn test_rewrite_clears_old_chunks() {
        let engine = MemKv::new();
        let items = store();
        let big = vec![1u8; 200];
        with_tx(&engine, |tx| items.write(tx, b"k", &big));
        with_tx(&engine, |tx| items.write(tx, b"k", b"now inline"));

        let value = with_tx(&engine, |tx| items.read(tx, b"k"));
        assert_eq!(value, Some(b"now inline".to_vec()));

        // no chunks may remain anywhere in the blob region
        let leftovers = with_tx(&engine, |tx| {
            let (begin, end) = Subspace::from_tuple(&[Value::from("blobs-test")]).range();
            Ok(tx.get_range(RangeScan::new(begin, end))?)
        });
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_delete_clears_chunks() {
        let engine = MemKv::new();
        let items = store();
        let big = vec![2u8; 300];
        with_tx(&engine, |tx| items.write(tx, b"k", &big));
        with_tx(&engine, |tx| items.delete(tx, b"k"));

        assert_eq!(with_tx(&engine, |tx| items.read(tx, b"k")), None);
        let leftovers = with_tx(&engine, |tx| {
            let (begin, end) = Subspace::from_tuple(&[Value::from("blobs-test")]).range();
            Ok(tx.get_range(RangeScan::new(begin, end))?)
        });
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_size_limit_enforced() {
        let engine = MemKv::new();
        let items = store();
        let oversized = vec![0u8; 2048];
        let result = engine.with_transaction(&TransactionConfig::default(), |tx| {
            items.write(tx, b"k", &oversized)
        });
        assert!(matches!(
            result,
            Err(StoreError::SizeLimitExceeded { size: 2048, .. })
        ));
    }

    #[test]
    fn test_scan_materializes_mixed_items() {
        let engine = MemKv::new();
        let items = store();
        let space = Subspace::from_tuple(&[Value::from("scan-test")]);
        let big = vec![7u8; 100];
        with_tx(&engine, |tx| {
            items.write(tx, &space.pack(&[Value::from("a")]), b"inline")?;
            items.write(tx, &space.pack(&[Value::from("b")]), &big)
        });

        let (begin, end) = space.range();
        let scanned = with_tx(&engine, |tx| items.scan(tx, &begin, &end, None));
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].1, b"inline".to_vec());
        assert_eq!(scanned[1].1, big);
    }
}
