//! Integration tests for vellum
//!
//! These tests exercise the full save/load cycle: standard and
//! incremental saves in both cross-reference encodings, free-list
//! maintenance, object-stream packing, and the byte-level file layout.

use vellum::{
    Dict, Document, Name, ObjRef, Object, PdfString, Reader, SaveMode, XrefMode,
};

/// Build the standard three-object fixture: catalog -> pages -> page
fn sample_document() -> Document {
    let mut doc = Document::new();

    let mut catalog = Dict::new();
    catalog.insert(Name::new("Type"), Object::Name(Name::new("Catalog")));
    catalog.insert(Name::new("Pages"), Object::Ref(ObjRef::new(2, 0)));
    let root = doc.add_object(Object::Dict(catalog));

    let mut pages = Dict::new();
    pages.insert(Name::new("Type"), Object::Name(Name::new("Pages")));
    pages.insert(Name::new("Kids"), Object::Array(vec![Object::Ref(ObjRef::new(3, 0))]));
    pages.insert(Name::new("Count"), Object::Int(1));
    doc.add_object(Object::Dict(pages));

    let mut page = Dict::new();
    page.insert(Name::new("Type"), Object::Name(Name::new("Page")));
    page.insert(Name::new("Parent"), Object::Ref(ObjRef::new(2, 0)));
    doc.add_object(Object::Dict(page));

    doc.set_root(root);
    doc
}

fn save_standard(doc: &mut Document) -> Vec<u8> {
    let mut out = Vec::new();
    doc.save_to(&mut out, SaveMode::Standard).unwrap();
    out
}

fn find_pattern(data: &[u8], pattern: &[u8]) -> bool {
    data.windows(pattern.len()).any(|w| w == pattern)
}

mod standard_plain {
    use super::*;

    #[test]
    fn test_file_layout() {
        let mut doc = sample_document();
        let data = save_standard(&mut doc);

        assert!(data.starts_with(b"%PDF-1.4\n"));
        // Binary hint line: at least 4 bytes with the high bit set
        assert!(find_pattern(&data, b"%\xE2\xE3\xCF\xD3\n"));
        assert!(find_pattern(&data, b"\nxref\n0 4\n"));
        assert!(find_pattern(&data, b"0000000000 65535 f\r\n"));
        assert!(find_pattern(&data, b"/Size 4"));
        assert!(find_pattern(&data, b"/Root 1 0 R"));
        assert!(find_pattern(&data, b"startxref\n"));
        assert!(data.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_entries_ascend_and_locate_objects() {
        let mut doc = sample_document();
        let data = save_standard(&mut doc);

        let reader = Reader::from_bytes(data.clone()).unwrap();
        assert!(reader.entry(0).unwrap().is_free());

        let mut last = 0;
        for num in 1..=3u32 {
            let offset = reader.entry(num).unwrap().offset().unwrap();
            assert!(offset > last, "offsets must ascend");
            last = offset;

            let header = format!("{} 0 obj", num);
            assert!(data[offset as usize..].starts_with(header.as_bytes()));
        }
    }

    #[test]
    fn test_round_trip_preserves_contents() {
        let mut doc = sample_document();
        let data = save_standard(&mut doc);

        let reloaded = Document::from_bytes(data).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.root(), Some(ObjRef::new(1, 0)));
        for num in 1..=3u32 {
            assert_eq!(reloaded.get(num), doc.get(num), "object {} differs", num);
        }
    }

    #[test]
    fn test_consecutive_saves_are_byte_identical() {
        let mut doc = sample_document();
        let first = save_standard(&mut doc);
        let second = save_standard(&mut doc);
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_to_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.pdf");

        let mut doc = sample_document();
        doc.save(&path, SaveMode::Standard).unwrap();

        let reloaded = Document::open(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn test_deleted_objects_join_free_list() {
        let mut doc = sample_document();
        for _ in 0..3 {
            doc.add_object(Object::Int(0));
        }
        doc.delete_object(4).unwrap();
        doc.delete_object(6).unwrap();

        let data = save_standard(&mut doc);
        let reader = Reader::from_bytes(data).unwrap();

        // Walk from object 0; the chain must visit every free entry
        // exactly once and close at 0
        let mut visited = vec![0u32];
        let mut current = reader.entry(0).unwrap().next_free().unwrap();
        while current != 0 {
            visited.push(current);
            current = reader.entry(current).unwrap().next_free().unwrap();
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 4, 6]);

        // Freed generations are bumped for reuse
        assert_eq!(reader.entry(4).unwrap().generation, 1);
    }
}

mod standard_compressed {
    use super::*;

    fn compressed_sample() -> Document {
        let mut doc = sample_document();
        doc.config_mut().set_xref_mode(XrefMode::Compressed);
        doc
    }

    #[test]
    fn test_layout_uses_streams() {
        let mut doc = compressed_sample();
        let data = save_standard(&mut doc);

        // Version is upgraded by the mode selection
        assert!(data.starts_with(b"%PDF-1.5\n"));
        assert!(find_pattern(&data, b"/Type /ObjStm"));
        assert!(find_pattern(&data, b"/Type /XRef"));
        // No plain table section
        assert!(!find_pattern(&data, b"\nxref\n"));
        assert!(data.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_members_resolve_through_stream() {
        let mut doc = compressed_sample();
        let data = save_standard(&mut doc);

        let reader = Reader::from_bytes(data).unwrap();
        for num in 1..=3u32 {
            assert!(reader.entry(num).unwrap().is_in_stream());
            assert_eq!(&reader.read_object(num).unwrap(), doc.get(num).unwrap());
        }
    }

    #[test]
    fn test_round_trip_preserves_contents() {
        let mut doc = compressed_sample();
        let data = save_standard(&mut doc);

        let reloaded = Document::from_bytes(data).unwrap();
        assert_eq!(reloaded.len(), 3);
        for num in 1..=3u32 {
            assert_eq!(reloaded.get(num), doc.get(num));
        }
    }

    #[test]
    fn test_xref_stream_entry_set_round_trips() {
        let mut doc = compressed_sample();
        let data = save_standard(&mut doc);

        // Decoding the written xref stream per its /W widths must
        // reproduce exactly the entries the writer supplied
        let reader = Reader::from_bytes(data).unwrap();
        let section = reader.section();
        assert_eq!(section.len(), 6); // 0, 1..3, container, xref stream
        assert!(section.get(0).unwrap().is_free());
        assert!(section.get(4).unwrap().is_in_use());
        assert!(section.get(5).unwrap().is_in_use());
        assert_eq!(
            reader.trailer().get(&Name::new("Size")).unwrap().as_int(),
            Some(6)
        );
    }

    #[test]
    fn test_no_stream_exceeds_member_cap() {
        let mut doc = compressed_sample();
        for i in 0..250 {
            doc.add_object(Object::Int(i));
        }

        let data = save_standard(&mut doc);
        let reader = Reader::from_bytes(data).unwrap();

        let mut containers = 0;
        for entry in reader.section().entries() {
            if !entry.is_in_use() || entry.num == 0 {
                continue;
            }
            if let Object::Stream { dict, .. } = reader.read_object(entry.num).unwrap() {
                if dict.get(&Name::new("Type")).and_then(|o| o.as_name()).map(|n| n.as_str())
                    == Some("ObjStm")
                {
                    containers += 1;
                    let n = dict.get(&Name::new("N")).unwrap().as_int().unwrap();
                    assert!(n <= 100, "object stream holds {} members", n);
                }
            }
        }
        // 253 packable objects need at least three containers
        assert!(containers >= 3);
    }

    #[test]
    fn test_consecutive_saves_are_byte_identical() {
        let mut doc = compressed_sample();
        let first = save_standard(&mut doc);
        let second = save_standard(&mut doc);
        assert_eq!(first, second);
    }
}

mod incremental {
    use super::*;

    fn mutate_page(doc: &mut Document) {
        let mut page = Dict::new();
        page.insert(Name::new("Type"), Object::Name(Name::new("Page")));
        page.insert(Name::new("Parent"), Object::Ref(ObjRef::new(2, 0)));
        page.insert(
            Name::new("Contents"),
            Object::String(PdfString::from("updated")),
        );
        doc.update_object(3, Object::Dict(page)).unwrap();
    }

    #[test]
    fn test_original_bytes_are_a_verbatim_prefix() {
        let mut doc = sample_document();
        let original = save_standard(&mut doc);

        let mut loaded = Document::from_bytes(original.clone()).unwrap();
        mutate_page(&mut loaded);

        let mut out = Vec::new();
        loaded.save_to(&mut out, SaveMode::Incremental).unwrap();

        assert!(out.len() > original.len());
        assert_eq!(&out[..original.len()], &original[..]);
    }

    #[test]
    fn test_new_section_lists_only_touched_numbers() {
        let mut doc = sample_document();
        let original = save_standard(&mut doc);
        let original_startxref = Reader::from_bytes(original.clone()).unwrap().start_xref();

        let mut loaded = Document::from_bytes(original.clone()).unwrap();
        mutate_page(&mut loaded);

        let mut out = Vec::new();
        loaded.save_to(&mut out, SaveMode::Incremental).unwrap();

        let appended = &out[original.len()..];
        assert!(find_pattern(appended, b"3 0 obj"));
        assert!(!find_pattern(appended, b"1 0 obj"));
        assert!(!find_pattern(appended, b"2 0 obj"));
        assert!(find_pattern(appended, b"xref\n3 1\n"));
        assert!(find_pattern(
            appended,
            format!("/Prev {}", original_startxref).as_bytes()
        ));
        // Size remains document-wide
        assert!(find_pattern(appended, b"/Size 4"));
    }

    #[test]
    fn test_reload_sees_the_mutation() {
        let mut doc = sample_document();
        let original = save_standard(&mut doc);

        let mut loaded = Document::from_bytes(original).unwrap();
        mutate_page(&mut loaded);

        let mut out = Vec::new();
        loaded.save_to(&mut out, SaveMode::Incremental).unwrap();

        let reloaded = Document::from_bytes(out).unwrap();
        assert_eq!(reloaded.get(3), loaded.get(3));
        assert_eq!(reloaded.get(1), loaded.get(1));
    }

    #[test]
    fn test_without_reader_falls_back_to_standard() {
        let mut doc = sample_document();
        let mut out = Vec::new();
        doc.save_to(&mut out, SaveMode::Incremental).unwrap();

        // Fallback writes a complete standard file
        assert!(out.starts_with(b"%PDF-"));
        assert!(find_pattern(&out, b"\nxref\n0 4\n"));
        assert!(!find_pattern(&out, b"/Prev"));
    }

    #[test]
    fn test_chained_incremental_saves() {
        let mut doc = sample_document();
        let v0 = save_standard(&mut doc);

        let mut loaded = Document::from_bytes(v0).unwrap();
        mutate_page(&mut loaded);
        let mut v1 = Vec::new();
        loaded.save_to(&mut v1, SaveMode::Incremental).unwrap();

        loaded.update_object(3, Object::Int(7)).unwrap();
        let mut v2 = Vec::new();
        loaded.save_to(&mut v2, SaveMode::Incremental).unwrap();

        assert_eq!(&v2[..v1.len()], &v1[..]);

        let reloaded = Document::from_bytes(v2).unwrap();
        assert_eq!(reloaded.get(3), Some(&Object::Int(7)));
    }

    #[test]
    fn test_freed_object_heads_new_chain() {
        let mut doc = sample_document();
        doc.add_object(Object::Int(42));
        let original = save_standard(&mut doc);

        let mut loaded = Document::from_bytes(original.clone()).unwrap();
        loaded.delete_object(4).unwrap();

        let mut out = Vec::new();
        loaded.save_to(&mut out, SaveMode::Incremental).unwrap();

        let appended = &out[original.len()..];
        assert!(find_pattern(appended, b"xref\n0 1\n"));
        assert!(find_pattern(appended, b"4 1\n"));

        // The merged table still satisfies the free-list walk (the
        // reader validates it on load)
        let reader = Reader::from_bytes(out).unwrap();
        assert_eq!(reader.entry(0).unwrap().next_free(), Some(4));
        assert!(reader.entry(4).unwrap().is_free());
        assert_eq!(reader.entry(4).unwrap().generation, 1);
    }

    #[test]
    fn test_modified_compressed_member_extends_original_stream() {
        let mut doc = sample_document();
        doc.config_mut().set_xref_mode(XrefMode::Compressed);
        let original = save_standard(&mut doc);

        let mut loaded = Document::from_bytes(original.clone()).unwrap();
        mutate_page(&mut loaded);

        let mut out = Vec::new();
        loaded.save_to(&mut out, SaveMode::Incremental).unwrap();

        // The original container (object 4) is never rewritten; the new
        // extension stream links back to it
        let appended = &out[original.len()..];
        assert!(find_pattern(appended, b"/Extends 4 0 R"));

        let reader = Reader::from_bytes(out).unwrap();
        let entry = reader.entry(3).unwrap();
        assert!(entry.is_in_stream());

        let reloaded = Document::from_bytes(reader.data().to_vec()).unwrap();
        assert_eq!(reloaded.get(3), loaded.get(3));
    }
}

mod structural_errors {
    use super::*;

    #[test]
    fn test_linearized_mode_is_fatal() {
        let mut doc = sample_document();
        let mut out = Vec::new();
        let err = doc.save_to(&mut out, SaveMode::Linearized).unwrap_err();
        assert!(matches!(err, vellum::Error::Unsupported(_)));
    }

    #[test]
    fn test_free_entry_pointing_at_in_use_object() {
        // Object 0's free link names object 1, which is in use
        let body = "%PDF-1.4\n\
                    1 0 obj\n42\nendobj\n";
        let xref_offset = body.len();
        let file = format!(
            "{}xref\n0 2\n\
             0000000001 65535 f\r\n\
             0000000009 00000 n\r\n\
             trailer\n<< /Root 1 0 R /Size 2 >>\n\
             startxref\n{}\n%%EOF\n",
            body, xref_offset
        );

        let err = Reader::from_bytes(file.into_bytes()).unwrap_err();
        assert!(matches!(err, vellum::Error::Structure(_)));
    }

    #[test]
    fn test_cyclic_prev_chain() {
        // The single section names itself as its predecessor
        let file = "%PDF-1.4\n\
                    xref\n0 1\n\
                    0000000000 65535 f\r\n\
                    trailer\n<< /Prev 9 /Size 1 >>\n\
                    startxref\n9\n%%EOF\n";

        let err = Reader::from_bytes(file.as_bytes().to_vec()).unwrap_err();
        assert!(matches!(err, vellum::Error::Structure(_)));
    }

    #[test]
    fn test_free_list_not_closing_at_zero() {
        // Object 0 points at 1, 1 points at 2, but 2 does not exist
        let file = "%PDF-1.4\n\
                    xref\n0 2\n\
                    0000000001 65535 f\r\n\
                    0000000002 00001 f\r\n\
                    trailer\n<< /Size 2 >>\n\
                    startxref\n9\n%%EOF\n";

        let err = Reader::from_bytes(file.as_bytes().to_vec()).unwrap_err();
        assert!(matches!(err, vellum::Error::Structure(_)));
    }
}
