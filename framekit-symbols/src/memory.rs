//! メモリ読み取りの抽象化
//!
//! 変数値の読み取りや逆アセンブルは、このトレイト越しにターゲットのメモリを参照します。

use crate::Result;
use std::collections::BTreeMap;

/// メモリ読み取りトレイト
///
/// デバッガのメモリインターフェースを抽象化します。
pub trait MemoryReader: Send + Sync {
    /// `addr` から `size` バイト読み取る
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>>;

    fn read_u8(&self, addr: u64) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        Ok(bytes[0])
    }

    fn read_u16(&self, addr: u64) -> Result<u16> {
        let bytes = self.read(addr, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        let bytes = self.read(addr, 4)?;
        let array: [u8; 4] = bytes[..4]
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert {} bytes to u32", bytes.len()))?;
        Ok(u32::from_le_bytes(array))
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes[..8]
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert {} bytes to u64", bytes.len()))?;
        Ok(u64::from_le_bytes(array))
    }
}

/// どこも読めないメモリ（プロセス未接続時の既定値）
#[derive(Debug, Default)]
pub struct NoMemory;

impl MemoryReader for NoMemory {
    fn read(&self, addr: u64, _size: usize) -> Result<Vec<u8>> {
        Err(anyhow::anyhow!("No memory available at 0x{:x}", addr))
    }
}

/// メモリ領域の集合（スナップショットやテスト用）
///
/// 読み取りは1つの領域に完全に収まる必要があります。
#[derive(Debug, Default, Clone)]
pub struct MemoryMap {
    /// 開始アドレス -> データ
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemoryMap {
    /// 空のメモリマップを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 領域を追加する（同じ開始アドレスの領域は置き換える）
    pub fn insert(&mut self, start: u64, data: Vec<u8>) {
        self.regions.insert(start, data);
    }

    /// バイト列を書き込む
    ///
    /// 既存の領域に収まればその場で書き換え、そうでなければ新しい領域を作ります。
    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        if let Some((start, data)) = self.regions.range_mut(..=addr).next_back() {
            let offset = (addr - *start) as usize;
            if offset + bytes.len() <= data.len() {
                data[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        self.regions.insert(addr, bytes.to_vec());
    }

    /// u64値を書き込む（リトルエンディアン）
    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write(addr, &value.to_le_bytes());
    }

    /// 領域の数
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl MemoryReader for MemoryMap {
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let (start, data) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or_else(|| anyhow::anyhow!("Address 0x{:x} is not mapped", addr))?;

        let offset = (addr - start) as usize;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| anyhow::anyhow!("Read of {} bytes at 0x{:x} overflows", size, addr))?;
        if end > data.len() {
            return Err(anyhow::anyhow!(
                "Read of {} bytes at 0x{:x} crosses the end of region 0x{:x}",
                size,
                addr,
                start
            ));
        }

        Ok(data[offset..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_map_read() {
        let mut mem = MemoryMap::new();
        mem.insert(0x1000, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(mem.read(0x1002, 2).unwrap(), vec![3, 4]);
        assert_eq!(mem.read_u8(0x1007).unwrap(), 8);
        assert_eq!(mem.read_u32(0x1000).unwrap(), 0x04030201);
        assert!(mem.read(0x1006, 4).is_err());
        assert!(mem.read(0xfff, 1).is_err());
    }

    #[test]
    fn test_memory_map_write_u64() {
        let mut mem = MemoryMap::new();
        mem.insert(0x2000, vec![0; 16]);
        mem.write_u64(0x2008, 0xdead_beef);
        assert_eq!(mem.read_u64(0x2008).unwrap(), 0xdead_beef);
        assert_eq!(mem.region_count(), 1);

        mem.write_u64(0x9000, 7);
        assert_eq!(mem.read_u64(0x9000).unwrap(), 7);
        assert_eq!(mem.region_count(), 2);
    }

    #[test]
    fn test_no_memory() {
        assert!(NoMemory.read(0, 1).is_err());
    }
}
