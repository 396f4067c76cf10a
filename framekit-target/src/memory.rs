//! プロセスのメモリアクセス

use crate::Result;
use framekit_symbols::MemoryReader;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::Path;

/// メモリマッピング情報（/proc/pid/maps の1行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// ファイル内オフセット
    pub offset: u64,
    pub pathname: Option<String>,
}

impl MemoryMapping {
    /// maps の1行を解析する
    ///
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let (start, end) = parts.next()?.split_once('-')?;
        let perms = parts.next()?.as_bytes();
        let offset = parts.next()?;
        let pathname = parts.nth(2).map(|s| s.to_string());

        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            readable: perms.first() == Some(&b'r'),
            writable: perms.get(1) == Some(&b'w'),
            executable: perms.get(2) == Some(&b'x'),
            offset: u64::from_str_radix(offset, 16).ok()?,
            pathname,
        })
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// プロセスのメモリアクセス
#[derive(Debug, Clone)]
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/mem が EIO を返す場合は PTRACE_PEEKDATA にフォールバックします。
    pub fn read_bytes(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        tracing::trace!(addr = format_args!("{:#x}", addr), "falling back to ptrace read");
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    fn read_via_proc_mem(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mut file = File::open(self.mem_path())?;
        file.seek(SeekFrom::Start(addr))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// PTRACE_PEEKDATA でワード単位に読み取る
    pub fn read_via_ptrace(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let word_size = std::mem::size_of::<nix::libc::c_long>();
        let mut data = Vec::with_capacity(size + word_size);

        for offset in (0..size).step_by(word_size) {
            let word_addr = addr + offset as u64;
            let word = nix::sys::ptrace::read(self.pid, word_addr as nix::sys::ptrace::AddressType)
                .map_err(|e| anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", word_addr, e))?;
            data.extend_from_slice(&word.to_ne_bytes());
        }

        data.truncate(size);
        Ok(data)
    }

    /// メモリにデータを書き込む
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))?;
        file.write_all(data)
            .map_err(|e| anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e))?;
        Ok(())
    }

    /// /proc/pid/maps を解析する
    pub fn mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let contents = fs::read_to_string(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", maps_path, e))?;
        Ok(contents.lines().filter_map(MemoryMapping::parse).collect())
    }

    /// 実行可能ファイルのロードベースアドレスを取得する
    ///
    /// `binary` のマッピングのうちファイルオフセットが最も小さいものから求めます。
    /// 該当するマッピングがなければ、最初の実行可能セグメントから求めます。
    pub fn base_address(&self, binary: Option<&Path>) -> Result<u64> {
        let mappings = self.mappings()?;

        let file_name = binary.and_then(|p| p.file_name()).map(|n| n.to_string_lossy().into_owned());
        if let Some(file_name) = file_name {
            let base = mappings
                .iter()
                .filter(|m| {
                    m.pathname
                        .as_deref()
                        .and_then(|p| Path::new(p).file_name())
                        .is_some_and(|n| n.to_string_lossy() == file_name)
                })
                .min_by_key(|m| m.offset)
                .map(|m| m.start - m.offset);
            if let Some(base) = base {
                return Ok(base);
            }
        }

        mappings
            .iter()
            .find(|m| m.executable)
            .map(|m| m.start - m.offset)
            .ok_or_else(|| anyhow::anyhow!("Could not find executable segment in memory mappings"))
    }
}

impl MemoryReader for Memory {
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.read_bytes(addr, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping() {
        let m = MemoryMapping::parse(
            "55d4c6a00000-55d4c6a21000 r-xp 00002000 08:01 123456 /usr/bin/app",
        )
        .unwrap();
        assert_eq!(m.start, 0x55d4_c6a0_0000);
        assert_eq!(m.end, 0x55d4_c6a2_1000);
        assert!(m.readable && m.executable && !m.writable);
        assert_eq!(m.offset, 0x2000);
        assert_eq!(m.pathname.as_deref(), Some("/usr/bin/app"));
        assert!(m.contains(0x55d4_c6a0_0010));

        let anon = MemoryMapping::parse("7ffd1000-7ffd2000 rw-p 00000000 00:00 0").unwrap();
        assert!(anon.pathname.is_none());
        assert!(MemoryMapping::parse("garbage").is_none());
    }

    #[test]
    fn test_read_own_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = Memory::new(std::process::id() as i32);
        let addr = &value as *const u64 as u64;
        assert_eq!(memory.read_u64(addr).unwrap(), value);
        assert!(!memory.mappings().unwrap().is_empty());
    }
}
