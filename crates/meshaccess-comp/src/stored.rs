//! Element walker for stored high data pages (128, 129 and 130).
//!
//! Stored pages are opaque blobs written by a configuration client. They
//! can only be served element by element after walking their own length
//! fields.

use crate::buf::PageBuf;
use crate::error::{CompError, Result};
use crate::page::{HIGH_PAGE_BASE, PAGE_0_HEADER_LEN};

/// Size of the next element or record at the front of `data`, or 0 if none
/// can be read.
pub fn next_elem_size(page: u8, data: &[u8]) -> usize {
    match page.checked_sub(HIGH_PAGE_BASE) {
        Some(0) => page_0_elem_size(data),
        Some(1) => page_1_elem_size(data),
        Some(2) => page_2_record_size(data),
        _ => 0,
    }
}

fn page_0_elem_size(data: &[u8]) -> usize {
    if data.len() < 4 {
        return 0;
    }
    4 + data[2] as usize * 2 + data[3] as usize * 4
}

fn page_1_elem_size(data: &[u8]) -> usize {
    if data.len() < 2 {
        return 0;
    }

    let models = data[0] as usize + data[1] as usize;
    let mut size = 2;
    for _ in 0..models {
        let Some(&header) = data.get(size) else {
            return 0;
        };
        let cor_present = (header & 0x01) as usize;
        let item_len = if header & 0x02 != 0 { 2 } else { 1 };
        size += 1 + cor_present + item_len * (header >> 2) as usize;
    }
    size
}

fn page_2_record_size(data: &[u8]) -> usize {
    if data.len() < 8 {
        return 0;
    }

    let size = 6 + data[5] as usize;
    match data.get(size..size + 2) {
        Some(len) => size + 2 + u16::from_le_bytes([len[0], len[1]]) as usize,
        None => 0,
    }
}

/// Copy whole elements of a stored page into `buf`, stopping at the first
/// one that does not fit. Page 128 starts with the Page 0 header, which is
/// always copied.
pub fn write_elems(buf: &mut PageBuf, page: u8, data: &[u8]) -> Result<()> {
    let mut rest = data;

    if page == HIGH_PAGE_BASE {
        if rest.len() < PAGE_0_HEADER_LEN {
            return Err(CompError::Malformed("stored page 128 header".into()));
        }
        buf.put_slice(&rest[..PAGE_0_HEADER_LEN]);
        rest = &rest[PAGE_0_HEADER_LEN..];
    }

    loop {
        let size = next_elem_size(page, rest);
        if size == 0 {
            break;
        }
        if rest.len() < size {
            return Err(CompError::Malformed(format!(
                "stored page {page}: element of {size} bytes, {} left",
                rest.len()
            )));
        }
        if buf.tailroom() < size {
            return Ok(());
        }
        buf.put_slice(&rest[..size]);
        rest = &rest[size..];
    }

    if !rest.is_empty() {
        return Err(CompError::Malformed(format!(
            "stored page {page}: {} trailing bytes",
            rest.len()
        )));
    }
    Ok(())
}

/// Number of elements in a stored page 128.
pub fn elem_count_128(data: &[u8]) -> Result<u8> {
    let mut rest = data
        .get(PAGE_0_HEADER_LEN..)
        .ok_or_else(|| CompError::Malformed("stored page 128 header".into()))?;

    let mut count = 0u8;
    loop {
        let size = page_0_elem_size(rest);
        if size == 0 {
            break;
        }
        if rest.len() < size {
            return Err(CompError::Malformed("stored page 128: short element".into()));
        }
        rest = &rest[size..];
        count = count.saturating_add(1);
    }

    if !rest.is_empty() {
        return Err(CompError::Malformed("stored page 128: trailing bytes".into()));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 10] = [0x59, 0, 1, 0, 2, 0, 10, 0, 3, 0];

    fn page_128() -> Vec<u8> {
        let mut data = HEADER.to_vec();
        data.extend_from_slice(&[0x01, 0x00, 2, 1, 0x00, 0x00, 0x00, 0x10, 0x59, 0x00, 0x01, 0x00]);
        data.extend_from_slice(&[0x02, 0x00, 1, 0, 0x02, 0x10]);
        data
    }

    #[test]
    fn element_sizes() {
        let data = page_128();
        assert_eq!(next_elem_size(128, &data[10..]), 12);
        assert_eq!(next_elem_size(128, &data[22..]), 6);
        assert_eq!(next_elem_size(128, &[0, 0]), 0);

        // two models: one with cor id and 2 long items, one plain
        let p1 = [2, 0, 0b0000_1011, 7, 0xFF, 0, 0x01, 0, 0x00];
        assert_eq!(next_elem_size(129, &p1), 9);
        assert_eq!(next_elem_size(129, &p1[..3]), 0);
        assert_eq!(next_elem_size(129, &[2, 0, 0x00]), 0);

        let p2 = [0x00, 0x16, 1, 0, 0, 1, 0, 2, 0, 0xAA, 0xBB];
        assert_eq!(next_elem_size(130, &p2), 11);
        assert_eq!(next_elem_size(130, &p2[..7]), 0);
        assert_eq!(next_elem_size(131, &p2), 0);
    }

    #[test]
    fn write_whole_elements_only() {
        let data = page_128();
        let mut buf = PageBuf::unbounded();
        write_elems(&mut buf, 128, &data).unwrap();
        assert_eq!(&buf[..], &data[..]);

        let mut buf = PageBuf::with_limit(10 + 12 + 5);
        write_elems(&mut buf, 128, &data).unwrap();
        assert_eq!(&buf[..], &data[..22]);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut data = page_128();
        data.push(0xEE);
        let mut buf = PageBuf::unbounded();
        assert!(matches!(
            write_elems(&mut buf, 128, &data),
            Err(CompError::Malformed(_))
        ));

        let data = page_128();
        assert!(write_elems(&mut PageBuf::unbounded(), 128, &data[..20]).is_err());
        assert!(write_elems(&mut PageBuf::unbounded(), 128, &HEADER[..5]).is_err());
    }

    #[test]
    fn count_elements_in_page_128() {
        assert_eq!(elem_count_128(&page_128()).unwrap(), 2);
        assert_eq!(elem_count_128(&HEADER).unwrap(), 0);
        assert!(elem_count_128(&page_128()[..21]).is_err());
        assert!(elem_count_128(&[0; 3]).is_err());
    }
}
