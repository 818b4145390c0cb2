//! Archive-as-filesystem behaviour across the full stack.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{create_zip, read_all};
use streampack::archive::{Archive, ArchiveFileSystem, ArchiveFileSystemOptions, ArchiveReader};
use streampack::fs::{FileSystem, MemoryFileSystem, OpenMode};
use streampack::zip::{ZipReader, ZipWriterOptions};

fn zip_reader(entries: &[(&str, &[u8])]) -> Rc<RefCell<ZipReader>> {
    let bytes = create_zip(entries, ZipWriterOptions::new());
    let fs = Rc::new(MemoryFileSystem::new());
    fs.add_file("a.zip", bytes);
    Rc::new(RefCell::new(ZipReader::open_path(fs, "a.zip").unwrap()))
}

const TREE: &[(&str, &[u8])] = &[
    ("root.txt", b"root file"),
    ("sub/a.txt", b"sub a"),
    ("sub/b.txt", b"sub b"),
    ("sub/deeper/c.txt", b"deep c"),
];

#[test]
fn test_test_iff_open_succeeds() {
    let fs = ArchiveFileSystem::new(zip_reader(TREE), &ArchiveFileSystemOptions::new()).unwrap();

    let candidates = [
        "root.txt",
        "sub/a.txt",
        "sub/deeper/c.txt",
        "missing.txt",
        "sub/missing",
        "SUB/a.txt",
        "",
    ];
    for path in candidates {
        let tested = fs.test(path).unwrap().is_some();
        let opened = fs.open(path, &OpenMode::open_read()).is_ok();
        assert_eq!(tested, opened, "test/open disagree for {path:?}");
    }
}

#[test]
fn test_full_stack_contents() {
    let fs = ArchiveFileSystem::new(zip_reader(TREE), &ArchiveFileSystemOptions::new()).unwrap();

    for (path, expected) in TREE {
        let mut stream = fs.open(path, &OpenMode::open_read()).unwrap();
        assert_eq!(&read_all(stream.as_mut()).unwrap(), expected);
    }
}

#[test]
fn test_directory_listing_through_view() {
    let fs = ArchiveFileSystem::new(zip_reader(TREE), &ArchiveFileSystemOptions::new()).unwrap();

    let mut names = Vec::new();
    let mut reader = fs.read_directory("sub").unwrap();
    while let Some(entry) = reader.next_entry().unwrap() {
        names.push(entry.name);
    }
    names.sort();
    assert_eq!(names, ["a.txt", "b.txt"]);
}

#[test]
fn test_aggregated_archives_behind_one_view() {
    // Two ZIP archives merged through the in-memory aggregator, then
    // exposed as a single filesystem.
    let first = zip_reader(&[("one.txt", b"from the first archive")]);
    let second = zip_reader(&[("two.txt", b"from the second archive")]);

    let mut aggregate = Archive::new();
    aggregate.load(first).unwrap();
    aggregate.load(second).unwrap();
    assert_eq!(aggregate.len(), 2);

    let fs = ArchiveFileSystem::new(
        Rc::new(RefCell::new(aggregate)),
        &ArchiveFileSystemOptions::new(),
    )
    .unwrap();

    let mut one = fs.open("one.txt", &OpenMode::open_read()).unwrap();
    assert_eq!(read_all(one.as_mut()).unwrap(), b"from the first archive");
    let mut two = fs.open("two.txt", &OpenMode::open_read()).unwrap();
    assert_eq!(read_all(two.as_mut()).unwrap(), b"from the second archive");
}

#[test]
fn test_reopen_restarts_iteration() {
    let reader = zip_reader(TREE);

    let mut first_pass = Vec::new();
    while let Some(entry) = reader.borrow_mut().read_directory_entry().unwrap() {
        first_pass.push(entry.name);
    }
    assert_eq!(first_pass.len(), TREE.len());

    reader.borrow_mut().reopen().unwrap();
    let mut second_pass = Vec::new();
    while let Some(entry) = reader.borrow_mut().read_directory_entry().unwrap() {
        second_pass.push(entry.name);
    }
    assert_eq!(first_pass, second_pass);
}
