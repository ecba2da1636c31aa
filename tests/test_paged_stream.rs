use std::fs;
use std::io::{self, Cursor, SeekFrom};

use proxypool::diag;
use proxypool::error::ErrorKind;
use proxypool::{FileHandle, MmapHandle, PageLayout, PagedStreamHandle, VirtualHandle, Whence};
use tempfile::TempDir;

const TRAILER: u8 = 0xEE;

// Physical image of a container whose logical stream anchored at `base`
// holds `i % 251` at logical offset `i`; trailer bytes are `TRAILER`
fn synthetic_container(layout: PageLayout, base: u64, logical_len: u64) -> Vec<u8> {
    let end = layout.to_physical(base, logical_len);
    let pages = end.div_ceil(layout.page_size());
    let mut buf = vec![0u8; (pages * layout.page_size()) as usize];
    for p in 0..buf.len() as u64 {
        if p % layout.page_size() >= layout.logical_page_size() {
            buf[p as usize] = TRAILER;
        }
    }
    for i in 0..logical_len {
        buf[layout.to_physical(base, i) as usize] = (i % 251) as u8;
    }
    buf
}

fn expected(range: std::ops::Range<u64>) -> Vec<u8> {
    range.map(|i| (i % 251) as u8).collect()
}

fn setup_test_file(
    layout: PageLayout,
    base: u64,
    logical_len: u64,
) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("container.bin");
    fs::write(&path, synthetic_container(layout, base, logical_len)).unwrap();
    (temp_dir, path)
}

#[test]
fn test_read_whole_stream_skips_trailers() {
    let layout = PageLayout::new(16, 4).unwrap();
    for base in [0u64, 5, 12, 20, 32] {
        let image = synthetic_container(layout, base, 100);
        let raw = FileHandle::new(Cursor::new(image));
        let mut stream = PagedStreamHandle::new(raw, layout, base, 0, 100).unwrap();

        let mut buf = vec![0u8; 100];
        assert_eq!(stream.read(&mut buf), 100, "base {}", base);
        assert_eq!(buf, expected(0..100), "base {}", base);
        assert!(!buf.contains(&TRAILER));
        assert_eq!(stream.tell(), 100);
    }
}

#[test]
fn test_read_in_odd_chunks() {
    let layout = PageLayout::new(16, 4).unwrap();
    let (_dir, path) = setup_test_file(layout, 20, 90);
    let raw = FileHandle::open(&path).unwrap();
    let mut stream = PagedStreamHandle::new(raw, layout, 20, 0, 90).unwrap();

    let mut out = Vec::new();
    let mut chunk = [0u8; 7];
    loop {
        let n = stream.read(&mut chunk);
        out.extend_from_slice(&chunk[..n]);
        if n < chunk.len() {
            break;
        }
    }
    assert_eq!(out, expected(0..90));
    assert!(stream.eof());
}

#[test]
fn test_header_is_skipped() {
    let layout = PageLayout::new(32, 8).unwrap();
    let image = synthetic_container(layout, 3, 80);
    let raw = FileHandle::new(Cursor::new(image));
    // The first 10 logical bytes are a header
    let mut stream = PagedStreamHandle::new(raw, layout, 3, 10, 70).unwrap();

    let mut buf = vec![0u8; 70];
    assert_eq!(stream.read(&mut buf), 70);
    assert_eq!(buf, expected(10..80));
}

#[test]
fn test_read_clipped_at_logical_length() {
    let layout = PageLayout::new(16, 4).unwrap();
    let image = synthetic_container(layout, 0, 60);
    let raw = FileHandle::new(Cursor::new(image));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 30).unwrap();

    stream.seek(25, Whence::Set).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(stream.read(&mut buf), 5);
    assert_eq!(&buf[..5], &expected(25..30)[..]);
    assert!(stream.eof());

    // Further reads return nothing until a seek clears the flag
    assert_eq!(stream.read(&mut buf), 0);
    stream.seek(0, Whence::Set).unwrap();
    assert!(!stream.eof());
    assert_eq!(stream.read(&mut buf), 10);
    assert_eq!(&buf[..], &expected(0..10)[..]);
}

#[test]
fn test_seek_variants() {
    let layout = PageLayout::new(16, 4).unwrap();
    let image = synthetic_container(layout, 0, 50);
    let raw = FileHandle::new(Cursor::new(image));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 50).unwrap();

    stream.seek(10, Whence::Set).unwrap();
    stream.seek(5, Whence::Cur).unwrap();
    assert_eq!(stream.tell(), 15);
    let mut buf = [0u8; 4];
    assert_eq!(stream.read(&mut buf), 4);
    assert_eq!(&buf[..], &expected(15..19)[..]);

    stream.seek(0, Whence::End).unwrap();
    assert_eq!(stream.tell(), 50);
    assert_eq!(stream.read(&mut buf), 0);

    // Zero-length reads never touch the stream
    stream.seek(0, Whence::Set).unwrap();
    assert_eq!(stream.read(&mut []), 0);
    assert!(!stream.eof());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "unsupported seek"))]
fn test_seek_from_end_with_offset_is_rejected() {
    let layout = PageLayout::new(16, 4).unwrap();
    let raw = FileHandle::new(Cursor::new(vec![0u8; 64]));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 40).unwrap();

    let err = stream.seek(4, Whence::End).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedSeek);
}

#[test]
fn test_stream_starting_inside_trailer_is_rejected() {
    let layout = PageLayout::new(16, 4).unwrap();
    for base in [13u64, 14, 15, 29, 31] {
        let raw = FileHandle::new(Cursor::new(vec![0u8; 64]));
        let err = PagedStreamHandle::new(raw, layout, base, 0, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOffset);
        assert_eq!(diag::last_error().unwrap().kind, ErrorKind::InvalidOffset);
    }
}

#[test]
fn test_truncated_trailer_degrades_to_eof() {
    let layout = PageLayout::new(16, 4).unwrap();
    let mut image = synthetic_container(layout, 0, 40);
    // Drop the trailer of the first page and everything after it
    image.truncate(12);
    let raw = FileHandle::new(Cursor::new(image));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 40).unwrap();
    diag::clear_last_error();

    let mut buf = [0u8; 20];
    assert_eq!(stream.read(&mut buf), 12);
    assert_eq!(&buf[..12], &expected(0..12)[..]);
    assert!(stream.eof());
    let last = diag::last_error().unwrap();
    assert_eq!(last.kind, ErrorKind::MalformedTrailer);
    assert_eq!(last.severity, diag::Severity::Warning);
}

#[test]
fn test_writes_are_rejected() {
    let layout = PageLayout::new(16, 4).unwrap();
    let raw = FileHandle::new(Cursor::new(vec![0u8; 64]));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 40).unwrap();
    assert_eq!(stream.write(b"data"), 0);
}

#[test]
fn test_take_raw_makes_close_a_noop() {
    let layout = PageLayout::new(16, 4).unwrap();
    let image = synthetic_container(layout, 0, 40);
    let raw = FileHandle::new(Cursor::new(image));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 20).unwrap();

    let mut buf = [0u8; 20];
    assert_eq!(stream.read(&mut buf), 20);

    // Continue with a second sub-stream over the same raw handle
    let raw = stream.take_raw().unwrap();
    assert!(stream.take_raw().is_none());
    stream.close().unwrap();
    assert_eq!(stream.read(&mut buf), 0);

    let mut second = PagedStreamHandle::new(raw, layout, 0, 20, 20).unwrap();
    assert_eq!(second.read(&mut buf), 20);
    assert_eq!(&buf[..], &expected(20..40)[..]);
    second.close().unwrap();
    second.close().unwrap();
}

#[test]
fn test_mmap_handle_matches_file_handle() {
    let layout = PageLayout::new(64, 8).unwrap();
    let (_dir, path) = setup_test_file(layout, 17, 500);

    let file = FileHandle::open(&path).unwrap();
    let mut via_file = PagedStreamHandle::new(file, layout, 17, 0, 500).unwrap();
    let mmap = MmapHandle::open(&path).unwrap();
    let mut via_mmap = PagedStreamHandle::new(mmap, layout, 17, 0, 500).unwrap();

    let mut a = vec![0u8; 500];
    let mut b = vec![0u8; 500];
    assert_eq!(via_file.read(&mut a), 500);
    assert_eq!(via_mmap.read(&mut b), 500);
    assert_eq!(a, b);
    assert_eq!(a, expected(0..500));
}

#[test]
fn test_std_io_traits() {
    let layout = PageLayout::new(16, 4).unwrap();
    let image = synthetic_container(layout, 0, 64);
    let raw = FileHandle::new(Cursor::new(image));
    let mut stream = PagedStreamHandle::new(raw, layout, 0, 0, 64).unwrap();

    assert_eq!(io::Seek::seek(&mut stream, SeekFrom::End(-4)).unwrap(), 60);
    let mut tail = Vec::new();
    io::Read::read_to_end(&mut stream, &mut tail).unwrap();
    assert_eq!(tail, expected(60..64));

    io::Seek::seek(&mut stream, SeekFrom::Start(0)).unwrap();
    let mut all = Vec::new();
    io::Read::read_to_end(&mut stream, &mut all).unwrap();
    assert_eq!(all, expected(0..64));
}
