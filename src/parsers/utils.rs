//! Common parsing utilities

/// Position of a `00 00 01 xx` start code inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartCode {
    /// Offset of the first `00`
    pub offset: usize,
    /// The byte following the prefix
    pub code: u8,
}

impl StartCode {
    /// Offset of the first byte after the four start-code bytes
    pub fn body(&self) -> usize {
        self.offset + 4
    }
}

/// Iterates over three-byte start codes in `data`
pub struct StartCodes<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for StartCodes<'a> {
    type Item = StartCode;

    fn next(&mut self) -> Option<StartCode> {
        let found = find_start_code(self.data, self.pos)?;
        self.pos = found.offset + 3;
        Some(found)
    }
}

pub fn start_codes(data: &[u8]) -> StartCodes<'_> {
    StartCodes { data, pos: 0 }
}

/// First start code at or after `from` that has a code byte behind it
pub fn find_start_code(data: &[u8], from: usize) -> Option<StartCode> {
    let mut i = from;
    while i + 3 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            return Some(StartCode { offset: i, code: data[i + 3] });
        }
        i += 1;
    }
    None
}

/// True when `data` opens with `00 00 01`
pub fn begins_with_start_code(data: &[u8]) -> bool {
    data.len() >= 3 && data[..3] == crate::constants::PES_START_CODE
}

/// Remove emulation prevention bytes (0x000003)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            v.push(0);
            v.push(0);
            i += 3;
        } else {
            v.push(data[i]);
            i += 1;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_every_start_code() {
        let data = [0xAA, 0, 0, 1, 0x0F, 1, 2, 0, 0, 1, 0x0E, 0, 0, 1];
        let codes: Vec<_> = start_codes(&data).collect();
        assert_eq!(
            codes,
            vec![StartCode { offset: 1, code: 0x0F }, StartCode { offset: 7, code: 0x0E }]
        );
        assert_eq!(codes[0].body(), 5);
    }

    #[test]
    fn strips_emulation_prevention() {
        assert_eq!(remove_emulation_prevention(&[0, 0, 3, 1, 0, 0, 3]), vec![0, 0, 1, 0, 0]);
        assert_eq!(remove_emulation_prevention(&[5, 0, 0, 2]), vec![5, 0, 0, 2]);
    }
}
