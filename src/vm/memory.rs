//! Bounds-checked little-endian access to the processor's flat memory buffer.

use std::ops::Range;

/// Return `[address, address + len)` as a slice range if it lies fully inside the buffer.
pub fn checked_range(memory: &[u8], address: i64, len: usize) -> Option<Range<usize>> {
    let start = usize::try_from(address).ok()?;
    let end = start.checked_add(len)?;
    (end <= memory.len()).then_some(start..end)
}

pub fn read_bytes<const N: usize>(memory: &[u8], address: i64) -> Option<[u8; N]> {
    let range = checked_range(memory, address, N)?;
    memory[range].try_into().ok()
}

/// Read a signed integer of `size` bytes (1, 2, 4 or 8).
pub fn read_int(memory: &[u8], address: i64, size: usize) -> Option<i64> {
    match size {
        1 => read_bytes::<1>(memory, address).map(|b| i8::from_le_bytes(b) as i64),
        2 => read_bytes::<2>(memory, address).map(|b| i16::from_le_bytes(b) as i64),
        4 => read_bytes::<4>(memory, address).map(|b| i32::from_le_bytes(b) as i64),
        8 => read_bytes::<8>(memory, address).map(i64::from_le_bytes),
        _ => None,
    }
}

/// Read a pointer-sized value, pointers are signed like the processor's registers.
pub fn read_pointer(memory: &[u8], address: i64, pointer_size: usize) -> Option<i64> {
    read_int(memory, address, pointer_size)
}

/// Write `bytes` at `address`, returns `false` if the target range is out of bounds.
pub fn write_bytes(memory: &mut [u8], address: i64, bytes: &[u8]) -> bool {
    match checked_range(memory, address, bytes.len()) {
        Some(range) => {
            memory[range].copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

/// Encode a pointer-sized value.
pub fn pointer_bytes(value: i64, pointer_size: usize) -> Vec<u8> {
    value.to_le_bytes()[..pointer_size.min(8)].to_vec()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_out_of_bounds_reads() {
        let memory = [1u8, 0, 0, 0, 0xff];
        assert_eq!(read_int(&memory, 0, 4), Some(1));
        assert_eq!(read_int(&memory, 4, 1), Some(-1));
        assert_eq!(read_int(&memory, 2, 4), None);
        assert_eq!(read_int(&memory, -1, 1), None);
        assert_eq!(read_int(&memory, 5, 1), None);
        assert_eq!(read_int(&memory, 0, 3), None);
    }

    #[test]
    fn test_write() {
        let mut memory = [0u8; 4];
        assert!(write_bytes(&mut memory, 1, &[7, 8]));
        assert_eq!(memory, [0, 7, 8, 0]);
        assert!(!write_bytes(&mut memory, 3, &[1, 2]));
        assert_eq!(pointer_bytes(-2, 4), vec![0xfe, 0xff, 0xff, 0xff]);
    }
}
