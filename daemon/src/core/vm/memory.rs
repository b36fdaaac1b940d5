use primitive_types::U256;

use super::gas::{words, MEMORY_WORD_COST};

/// Byte-addressable linear memory. Grows monotonically in 32-byte words;
/// reads past the high-water mark see zeroes and expand to cover the read.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes, always word-aligned.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Gas needed to grow memory so that `end` bytes are addressable.
    pub fn expansion_cost(&self, end: usize) -> u64 {
        let current = words(self.data.len());
        let needed = words(end);
        if needed > current {
            MEMORY_WORD_COST * (needed - current)
        } else {
            0
        }
    }

    /// Grow so that `end` bytes are addressable, rounding up to whole words.
    pub fn resize(&mut self, end: usize) {
        let needed = (words(end) as usize) * 32;
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
    }

    /// 32 bytes big-endian at `offset`. Memory must already cover the range.
    pub fn load_word(&self, offset: usize) -> U256 {
        U256::from_big_endian(&self.data[offset..offset + 32])
    }

    /// Write 32 bytes big-endian at `offset`.
    pub fn store_word(&mut self, offset: usize, value: U256) {
        let bytes: [u8; 32] = value.to_big_endian();
        self.data[offset..offset + 32].copy_from_slice(&bytes);
    }

    /// Write the low byte of `value` at `offset`.
    pub fn store_byte(&mut self, offset: usize, value: U256) {
        self.data[offset] = value.byte(0);
    }

    pub fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        self.data[offset..offset + size].to_vec()
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy `size` bytes from `src[src_offset..]` to memory at `offset`,
    /// zero-padding where the source runs out.
    pub fn write_padded(&mut self, offset: usize, src: &[u8], src_offset: usize, size: usize) {
        for i in 0..size {
            let byte = src.get(src_offset + i).copied().unwrap_or(0);
            self.data[offset + i] = byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_is_word_aligned() {
        let mut memory = Memory::new();
        memory.resize(1);
        assert_eq!(memory.len(), 32);
        memory.resize(33);
        assert_eq!(memory.len(), 64);
        // never shrinks
        memory.resize(0);
        assert_eq!(memory.len(), 64);
    }

    #[test]
    fn test_store_load_word() {
        let mut memory = Memory::new();
        memory.resize(64);
        let value = U256::from(0xdeadbeefu64);
        memory.store_word(32, value);
        assert_eq!(memory.load_word(32), value);
        // big-endian layout: the low byte sits at the end of the word
        assert_eq!(memory.read(63, 1), vec![0xef]);
    }

    #[test]
    fn test_store_byte() {
        let mut memory = Memory::new();
        memory.resize(32);
        memory.store_byte(5, U256::from(0xabcdu64));
        assert_eq!(memory.read(5, 1), vec![0xcd]);
    }

    #[test]
    fn test_write_padded() {
        let mut memory = Memory::new();
        memory.resize(32);
        memory.write_padded(0, b"\x01\x02", 1, 4);
        assert_eq!(memory.read(0, 4), vec![0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_expansion_cost() {
        let memory = Memory::new();
        assert_eq!(memory.expansion_cost(0), 0);
        assert_eq!(memory.expansion_cost(1), MEMORY_WORD_COST);
        assert_eq!(memory.expansion_cost(64), 2 * MEMORY_WORD_COST);

        let mut memory = Memory::new();
        memory.resize(64);
        assert_eq!(memory.expansion_cost(64), 0);
        assert_eq!(memory.expansion_cost(65), MEMORY_WORD_COST);
    }
}
