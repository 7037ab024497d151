//! End-to-end traversal of a synthetic in-memory ROOT file holding two
//! RNTuples: one fully uncompressed, one with a zlib-compressed page list
//! and a compressed stream-descriptor record.

use std::io::{Read, Write};

use rootfile::rootfile::{
    buffer::{DataFetch, SliceFetch},
    codec::{Dictionary, TIOFeaturesLayout},
    compression::{CompressionTag, Decompressors},
    rntuple::{
        anchor::RNTupleAnchor,
        locator::Locator,
        schema::ColumnType,
        RNTuple,
    },
    streamed::StreamedItem,
    tfile::{read_root_file, TFile},
    RootError,
};

const CONTRIB_HEADER_CHECKSUM: u64 = 9_346_497_350_689_737_328;
const CONTRIB_FOOTER_CHECKSUM: u64 = 9_038_192_899_957_947_137;
const CONTRIB_PAGELIST_CHECKSUM: u64 = 12_340_257_838_343_085_244;
const A_HEADER_CHECKSUM: u64 = 1_772_847_515_747_675_522;
const A_FOOTER_CHECKSUM: u64 = 16_904_131_729_352_343_975;
const A_PAGELIST_CHECKSUM: u64 = 748_677_678_342_101_309;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn inflate_zlib(data: &[u8], uncompressed: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(uncompressed);
    flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn zlib_codecs() -> Decompressors {
    Decompressors::new().with(CompressionTag::Zlib, inflate_zlib)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Wrap a zlib stream in the nine-byte ROOT block header.
fn compressed_block(uncompressed: &[u8]) -> Vec<u8> {
    let payload = deflate(uncompressed);
    let mut out = b"ZL".to_vec();
    out.push(8);
    let c = payload.len() as u32;
    out.extend([c as u8, (c >> 8) as u8, (c >> 16) as u8]);
    let u = uncompressed.len() as u32;
    out.extend([u as u8, (u >> 8) as u8, (u >> 16) as u8]);
    out.extend(payload);
    out
}

fn tstring(s: &[u8]) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend(s);
    out
}

fn rstring(s: &[u8]) -> Vec<u8> {
    let mut out = (s.len() as u32).to_le_bytes().to_vec();
    out.extend(s);
    out
}

fn key_len(class_name: &[u8], name: &[u8], title: &[u8]) -> usize {
    26 + 3 + class_name.len() + name.len() + title.len()
}

/// Short-form (version 4) TKey record head.
fn tkey(
    nbytes: usize,
    obj_len: usize,
    seek_key: usize,
    seek_pdir: usize,
    class_name: &[u8],
    name: &[u8],
    title: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend((nbytes as i32).to_be_bytes());
    out.extend(4i16.to_be_bytes());
    out.extend((obj_len as i32).to_be_bytes());
    out.extend(0u32.to_be_bytes());
    out.extend((key_len(class_name, name, title) as i16).to_be_bytes());
    out.extend(1i16.to_be_bytes());
    out.extend((seek_key as i32).to_be_bytes());
    out.extend((seek_pdir as i32).to_be_bytes());
    out.extend(tstring(class_name));
    out.extend(tstring(name));
    out.extend(tstring(title));
    out
}

fn field_description(parent_id: u32, name: &[u8], type_name: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(0u32.to_le_bytes());
    payload.extend(0u32.to_le_bytes());
    payload.extend(parent_id.to_le_bytes());
    payload.extend(0u16.to_le_bytes());
    payload.extend(0u16.to_le_bytes());
    payload.extend(rstring(name));
    payload.extend(rstring(type_name));
    payload.extend(rstring(b""));
    payload.extend(rstring(b""));
    let mut out = ((payload.len() + 8) as i64).to_le_bytes().to_vec();
    out.extend(payload);
    out
}

fn column_description(column_type: u16, bits: u16, field_id: u32) -> Vec<u8> {
    let mut out = 20i64.to_le_bytes().to_vec();
    out.extend(column_type.to_le_bytes());
    out.extend(bits.to_le_bytes());
    out.extend(field_id.to_le_bytes());
    out.extend(0u16.to_le_bytes());
    out.extend(0u16.to_le_bytes());
    out
}

fn list_frame(items: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = items.iter().map(Vec::len).sum();
    let mut out = (-(12 + body as i64)).to_le_bytes().to_vec();
    out.extend((items.len() as u32).to_le_bytes());
    for item in items {
        out.extend(item);
    }
    out
}

fn envelope(type_id: u16, payload: &[u8], checksum: u64) -> Vec<u8> {
    let length = 8 + payload.len() as u64 + 8;
    let mut out = ((length << 16) | u64::from(type_id)).to_le_bytes().to_vec();
    out.extend(payload);
    out.extend(checksum.to_le_bytes());
    out
}

fn header_envelope(
    name: &[u8],
    description: &[u8],
    library: &[u8],
    fields: &[Vec<u8>],
    columns: &[Vec<u8>],
    checksum: u64,
) -> Vec<u8> {
    let mut payload = 0i64.to_le_bytes().to_vec();
    payload.extend(rstring(name));
    payload.extend(rstring(description));
    payload.extend(rstring(library));
    payload.extend(list_frame(fields));
    payload.extend(list_frame(columns));
    payload.extend(list_frame(&[]));
    payload.extend(list_frame(&[]));
    envelope(0x01, &payload, checksum)
}

fn footer_envelope(
    header_checksum: u64,
    entry_span: u64,
    page_list_len: u64,
    page_list_size: usize,
    page_list_offset: usize,
    checksum: u64,
) -> Vec<u8> {
    let mut payload = 0i64.to_le_bytes().to_vec();
    payload.extend(header_checksum.to_le_bytes());
    // Schema extension: a record frame of four empty list frames.
    payload.extend(56i64.to_le_bytes());
    for _ in 0..4 {
        payload.extend(list_frame(&[]));
    }
    let mut group = 48i64.to_le_bytes().to_vec();
    group.extend(0u64.to_le_bytes());
    group.extend(entry_span.to_le_bytes());
    group.extend(1u32.to_le_bytes());
    group.extend(page_list_len.to_le_bytes());
    group.extend((page_list_size as i32).to_le_bytes());
    group.extend((page_list_offset as u64).to_le_bytes());
    payload.extend(list_frame(&[group]));
    envelope(0x02, &payload, checksum)
}

fn page_locations(pages: &[(i32, usize, usize)], compression_settings: u32) -> Vec<u8> {
    let mut body = (pages.len() as u32).to_le_bytes().to_vec();
    for (n_elements, size, offset) in pages {
        body.extend(n_elements.to_le_bytes());
        body.extend((*size as i32).to_le_bytes());
        body.extend((*offset as u64).to_le_bytes());
    }
    body.extend(0i64.to_le_bytes());
    body.extend(compression_settings.to_le_bytes());
    let mut out = (-(8 + body.len() as i64)).to_le_bytes().to_vec();
    out.extend(body);
    out
}

fn page_list_envelope(
    header_checksum: u64,
    n_entries: u64,
    columns: &[Vec<u8>],
    checksum: u64,
) -> Vec<u8> {
    let mut payload = header_checksum.to_le_bytes().to_vec();
    let mut summary = 24i64.to_le_bytes().to_vec();
    summary.extend(0u64.to_le_bytes());
    summary.extend(n_entries.to_le_bytes());
    payload.extend(list_frame(&[summary]));
    let cluster = list_frame(columns);
    payload.extend(list_frame(&[cluster]));
    envelope(0x03, &payload, checksum)
}

fn anchor_object(anchor: &RNTupleAnchor) -> Vec<u8> {
    let member_len: u32 = 2 + 4 * 2 + 7 * 8 + 8;
    let mut out = (member_len | 0x4000_0000).to_be_bytes().to_vec();
    out.extend(2u16.to_be_bytes());
    for v in [
        anchor.version_epoch,
        anchor.version_major,
        anchor.version_minor,
        anchor.version_patch,
    ] {
        out.extend(v.to_be_bytes());
    }
    for v in [
        anchor.seek_header,
        anchor.nbytes_header,
        anchor.len_header,
        anchor.seek_footer,
        anchor.nbytes_footer,
        anchor.len_footer,
        anchor.max_key_size,
    ] {
        out.extend(v.to_be_bytes());
    }
    // Anchor checksum word, opaque to the reader.
    out.extend(0x5EED_5EED_5EED_5EEDu64.to_be_bytes());
    out
}

/// TList record body holding one unknown streamed item, as a stream
/// descriptor record would.
fn streamer_info_list() -> Vec<u8> {
    let mut item = Vec::new();
    item.extend(0xFFFF_FFFFu32.to_be_bytes());
    item.extend(b"TStreamerInfo\0");
    item.extend([0xAB; 6]);
    let mut item_bytes = ((item.len() as u32) | 0x4000_0000).to_be_bytes().to_vec();
    item_bytes.extend(item);

    let mut body = Vec::new();
    // TObject base in the bare-version legacy form.
    body.extend(1i16.to_be_bytes());
    body.extend(0i32.to_be_bytes());
    body.extend(0i32.to_be_bytes());
    body.extend(tstring(b""));
    body.extend(1i32.to_be_bytes());
    body.extend(&item_bytes);
    body.push(0);

    let mut out = ((body.len() as u32 + 2) | 0x4000_0000).to_be_bytes().to_vec();
    out.extend(2u16.to_be_bytes());
    out.extend(body);
    out
}

struct Image {
    data: Vec<u8>,
}

impl Image {
    fn append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Append a TKey record followed by its literal (uncompressed) body.
    fn append_record(&mut self, class_name: &[u8], name: &[u8], body: &[u8]) -> usize {
        let offset = self.data.len();
        let nbytes = key_len(class_name, name, b"") + body.len();
        let key = tkey(nbytes, body.len(), offset, 0, class_name, name, b"");
        self.append(&key);
        self.append(body);
        offset
    }
}

struct BuiltFile {
    image: Vec<u8>,
    contributors_pages: Vec<Vec<u8>>,
}

/// Assemble the complete file image. Every offset is computed as the
/// segments are appended; the file header and directory are patched last.
fn build_file(corrupt_footer_checksum: bool) -> BuiltFile {
    let mut image = Image {
        data: vec![0u8; 100],
    };

    // --- First record: the TFile object (name, title, root directory).
    let file_name = b"test.root";
    let tfile_key_len = key_len(b"TFile", file_name, b"");
    let nbytes_name = tfile_key_len + 1 + file_name.len() + 1;
    // Directory body is patched once the keys record exists.
    let tfile_offset = image.data.len();
    assert_eq!(tfile_offset, 100);
    let mut tfile_body = tstring(file_name);
    tfile_body.extend(tstring(b""));
    let dir_offset_in_body = tfile_body.len();
    tfile_body.extend(5i16.to_be_bytes());
    tfile_body.extend(0u32.to_be_bytes());
    tfile_body.extend(0u32.to_be_bytes());
    tfile_body.extend(0i32.to_be_bytes()); // nbytes_keys, patched below
    tfile_body.extend((nbytes_name as i32).to_be_bytes());
    tfile_body.extend(100i32.to_be_bytes()); // seek_dir
    tfile_body.extend(0i32.to_be_bytes()); // seek_parent
    tfile_body.extend(0i32.to_be_bytes()); // seek_keys, patched below
    tfile_body.extend(1i16.to_be_bytes());
    tfile_body.extend([0u8; 16]);
    tfile_body.extend([0u8; 12]);
    image.append_record(b"TFile", file_name, &tfile_body);
    let dir_field_base = tfile_offset + tfile_key_len + dir_offset_in_body;

    // --- Contributors: header envelope, pages, page list, footer.
    let contrib_header = header_envelope(
        b"Contributors",
        b"The first ever RNTuple.",
        b"ROOT v6.35.001",
        &[
            field_description(0, b"firstName", b"std::string"),
            field_description(1, b"lastName", b"std::string"),
        ],
        &[
            column_description(ColumnType::Index64 as u16, 64, 0),
            column_description(ColumnType::Char as u16, 8, 0),
            column_description(ColumnType::Index64 as u16, 64, 1),
            column_description(ColumnType::Char as u16, 8, 1),
        ],
        CONTRIB_HEADER_CHECKSUM,
    );
    assert_eq!(contrib_header.len(), 332);
    let contrib_header_offset = image.append(&contrib_header);

    let page_sizes = [176usize, 178, 176, 193];
    let page_elements = [-22i32, -178, -22, -193];
    let mut pages = Vec::new();
    let mut page_offsets = Vec::new();
    for (i, size) in page_sizes.iter().enumerate() {
        let payload: Vec<u8> = (0..*size).map(|b| (b as u8) ^ (i as u8)).collect();
        page_offsets.push(image.append(&payload));
        pages.push(payload);
    }

    let contrib_columns: Vec<Vec<u8>> = (0..4)
        .map(|i| page_locations(&[(page_elements[i], page_sizes[i], page_offsets[i])], 0))
        .collect();
    let contrib_page_list = page_list_envelope(
        CONTRIB_HEADER_CHECKSUM,
        22,
        &contrib_columns,
        CONTRIB_PAGELIST_CHECKSUM,
    );
    assert_eq!(contrib_page_list.len(), 244);
    let contrib_page_list_offset = image.append(&contrib_page_list);

    let contrib_footer = footer_envelope(
        if corrupt_footer_checksum {
            CONTRIB_HEADER_CHECKSUM ^ 1
        } else {
            CONTRIB_HEADER_CHECKSUM
        },
        22,
        contrib_page_list.len() as u64,
        contrib_page_list.len(),
        contrib_page_list_offset,
        CONTRIB_FOOTER_CHECKSUM,
    );
    assert_eq!(contrib_footer.len(), 148);
    let contrib_footer_offset = image.append(&contrib_footer);

    let contrib_anchor = RNTupleAnchor {
        version_epoch: 1,
        version_major: 0,
        version_minor: 0,
        version_patch: 0,
        seek_header: contrib_header_offset as u64,
        nbytes_header: contrib_header.len() as u64,
        len_header: contrib_header.len() as u64,
        seek_footer: contrib_footer_offset as u64,
        nbytes_footer: contrib_footer.len() as u64,
        len_footer: contrib_footer.len() as u64,
        max_key_size: 1_073_741_824,
    };
    let contrib_key_offset =
        image.append_record(b"ROOT::RNTuple", b"Contributors", &anchor_object(&contrib_anchor));

    // --- Tuple "A": compressed page list behind a standard locator.
    let a_header = header_envelope(
        b"A",
        b"",
        b"ROOT v6.35.01",
        &[field_description(0, b"f", b"float")],
        &[column_description(ColumnType::SplitReal32 as u16, 32, 0)],
        A_HEADER_CHECKSUM,
    );
    assert_eq!(a_header.len(), 164);
    let a_header_offset = image.append(&a_header);

    let a_page: Vec<u8> = vec![0x5A; 138];
    let a_page_offset = image.append(&a_page);

    let a_page_list = page_list_envelope(
        A_HEADER_CHECKSUM,
        100,
        &[page_locations(&[(-100, a_page.len(), a_page_offset)], 505)],
        A_PAGELIST_CHECKSUM,
    );
    assert_eq!(a_page_list.len(), 124);
    let a_page_list_stored = compressed_block(&a_page_list);
    let a_page_list_offset = image.append(&a_page_list_stored);

    let a_footer = footer_envelope(
        A_HEADER_CHECKSUM,
        100,
        a_page_list.len() as u64,
        a_page_list_stored.len(),
        a_page_list_offset,
        A_FOOTER_CHECKSUM,
    );
    let a_footer_offset = image.append(&a_footer);
    let a_anchor = RNTupleAnchor {
        version_epoch: 1,
        version_major: 0,
        version_minor: 0,
        version_patch: 0,
        seek_header: a_header_offset as u64,
        nbytes_header: a_header.len() as u64,
        len_header: a_header.len() as u64,
        seek_footer: a_footer_offset as u64,
        nbytes_footer: a_footer.len() as u64,
        len_footer: a_footer.len() as u64,
        max_key_size: 1_073_741_824,
    };
    let a_key_offset = image.append_record(b"ROOT::RNTuple", b"A", &anchor_object(&a_anchor));

    // --- Stream-descriptor record, stored compressed.
    let info_list = streamer_info_list();
    let info_stored = compressed_block(&info_list);
    let info_offset = image.data.len();
    let info_key_len = key_len(b"TList", b"StreamerInfo", b"");
    let info_nbytes = info_key_len + info_stored.len();
    let info_key = tkey(
        info_nbytes,
        info_list.len(),
        info_offset,
        0,
        b"TList",
        b"StreamerInfo",
        b"",
    );
    image.append(&info_key);
    image.append(&info_stored);

    // --- Keys record for the root directory.
    let keys_offset = image.data.len();
    let mut keys_body = 2i32.to_be_bytes().to_vec();
    let contrib_anchor_bytes = anchor_object(&contrib_anchor);
    keys_body.extend(tkey(
        key_len(b"ROOT::RNTuple", b"Contributors", b"") + contrib_anchor_bytes.len(),
        contrib_anchor_bytes.len(),
        contrib_key_offset,
        100,
        b"ROOT::RNTuple",
        b"Contributors",
        b"",
    ));
    let a_anchor_bytes = anchor_object(&a_anchor);
    keys_body.extend(tkey(
        key_len(b"ROOT::RNTuple", b"A", b"") + a_anchor_bytes.len(),
        a_anchor_bytes.len(),
        a_key_offset,
        100,
        b"ROOT::RNTuple",
        b"A",
        b"",
    ));
    let keys_key_len = key_len(b"TList", file_name, b"");
    let nbytes_keys = keys_key_len + keys_body.len();
    let keys_key = tkey(
        nbytes_keys,
        keys_body.len(),
        keys_offset,
        100,
        b"TList",
        file_name,
        b"",
    );
    image.append(&keys_key);
    image.append(&keys_body);

    // --- Patch the directory now that the keys record exists.
    let nbytes_keys_field = dir_field_base + 10;
    image.data[nbytes_keys_field..nbytes_keys_field + 4]
        .copy_from_slice(&(nbytes_keys as i32).to_be_bytes());
    let seek_keys_field = dir_field_base + 26;
    image.data[seek_keys_field..seek_keys_field + 4]
        .copy_from_slice(&(keys_offset as i32).to_be_bytes());

    // --- File header.
    let end = image.data.len();
    let mut header = b"root".to_vec();
    header.extend(63200i32.to_be_bytes());
    header.extend(100i32.to_be_bytes());
    header.extend((end as u32).to_be_bytes());
    header.extend(0u32.to_be_bytes());
    header.extend(0i32.to_be_bytes());
    header.extend(1i32.to_be_bytes());
    header.extend((nbytes_name as i32).to_be_bytes());
    header.push(4);
    header.extend(0i32.to_be_bytes());
    header.extend((info_offset as u32).to_be_bytes());
    header.extend((info_nbytes as i32).to_be_bytes());
    header.extend(1i16.to_be_bytes());
    header.extend([0u8; 16]);
    image.data[..header.len()].copy_from_slice(&header);

    BuiltFile {
        image: image.data,
        contributors_pages: pages,
    }
}

#[test]
fn traverses_uncompressed_rntuple() {
    init_logging();
    let built = build_file(false);
    let fetch = SliceFetch::new(built.image);
    let codecs = Decompressors::new();

    let file = read_root_file(&fetch).unwrap();
    assert_eq!(file.begin, 100);
    assert!(!file.is_large());

    let tfile = file.tfile(&fetch, &codecs).unwrap();
    assert_eq!(tfile.name.display(), "test.root");
    assert_eq!(tfile.rootdir.seek_dir, 100);

    let keys = tfile.key_list(&fetch, &codecs).unwrap();
    assert_eq!(keys.len(), 2);
    let key = keys.get("Contributors").unwrap();
    assert_eq!(key.class_name.display(), "ROOT::RNTuple");

    let anchor = key
        .read_object_strict::<RNTupleAnchor>(&fetch, &codecs)
        .unwrap();
    assert_eq!(anchor.version_epoch, 1);
    assert_eq!(anchor.nbytes_header, 332);
    assert_eq!(anchor.len_header, 332);
    assert_eq!(anchor.nbytes_footer, 148);
    assert_eq!(anchor.max_key_size, 1_073_741_824);

    let header = anchor.header(&fetch, &codecs).unwrap();
    assert_eq!(header.length, 332);
    assert_eq!(header.checksum, CONTRIB_HEADER_CHECKSUM);
    assert_eq!(header.name.display(), "Contributors");
    assert_eq!(header.description.display(), "The first ever RNTuple.");
    assert_eq!(header.library.display(), "ROOT v6.35.001");
    assert_eq!(header.schema.fields.len(), 2);
    assert_eq!(header.schema.fields.size, 131);
    assert_eq!(header.schema.fields[0].size, 60);
    assert_eq!(header.schema.fields[0].field_name.display(), "firstName");
    assert_eq!(header.schema.fields[1].size, 59);
    assert_eq!(header.schema.columns.len(), 4);
    assert_eq!(header.schema.columns.size, 92);
    assert_eq!(header.schema.columns[0].column_type, ColumnType::Index64);
    assert_eq!(header.schema.columns[1].column_type, ColumnType::Char);

    let footer = anchor.footer(&fetch, &codecs).unwrap();
    assert_eq!(footer.length, 148);
    assert_eq!(footer.checksum, CONTRIB_FOOTER_CHECKSUM);
    assert_eq!(footer.header_checksum, CONTRIB_HEADER_CHECKSUM);
    assert_eq!(footer.schema_extension.size, 56);
    assert_eq!(footer.cluster_groups.len(), 1);
    let group = &footer.cluster_groups[0];
    assert_eq!(group.min_entry_number, 0);
    assert_eq!(group.entry_span, 22);
    assert_eq!(group.n_clusters, 1);
    assert_eq!(group.page_list_link.length, 244);
    assert_eq!(group.page_list_link.locator.size(), 244);

    let page_lists = footer.page_lists(&fetch, &codecs).unwrap();
    assert_eq!(page_lists.len(), 1);
    let page_list = &page_lists[0];
    assert_eq!(page_list.checksum, CONTRIB_PAGELIST_CHECKSUM);
    assert_eq!(page_list.header_checksum, CONTRIB_HEADER_CHECKSUM);
    assert_eq!(page_list.cluster_summaries.len(), 1);
    assert_eq!(page_list.cluster_summaries[0].first_entry_number, 0);
    assert_eq!(page_list.cluster_summaries[0].n_entries(), 22);
    let cluster = &page_list.page_locations[0];
    assert_eq!(cluster.len(), 4);
    assert_eq!(cluster[0].pages[0].n_elements, -22);
    assert_eq!(cluster[0].element_offset, 0);
    assert_eq!(cluster[0].compression_settings, Some(0));

    // Page payloads round-trip through the locators.
    let pages = page_list.read_pages(&fetch).unwrap();
    assert_eq!(pages[0][0][0].data, built.contributors_pages[0]);
    assert_eq!(pages[0][3][0].data, built.contributors_pages[3]);

    // Whole-tuple traversal with checksum cross-checks and page metadata.
    let tuple = RNTuple::from_anchor(&anchor, &fetch, &codecs).unwrap();
    assert_eq!(tuple.schema().fields.len(), 2);
    assert_eq!(tuple.schema().columns.len(), 4);
    assert_eq!(tuple.feature_flags().0, 0);
    let interpretable = tuple.interpretable_pages().unwrap();
    let first = &interpretable[0][0][0][0];
    assert_eq!(first.uncompressed_size, 176);
    assert_eq!(first.column_type, ColumnType::Index64);
    assert_eq!(interpretable[0][0][1][0].uncompressed_size, 178);
    assert_eq!(interpretable[0][0][3][0].uncompressed_size, 193);
}

#[test]
fn traverses_compressed_page_list() {
    init_logging();
    let built = build_file(false);
    let fetch = SliceFetch::new(built.image);
    let codecs = zlib_codecs();

    let file = read_root_file(&fetch).unwrap();
    let keys = file.tfile(&fetch, &codecs).unwrap().key_list(&fetch, &codecs).unwrap();
    let anchor = keys
        .get("A")
        .unwrap()
        .read_object_strict::<RNTupleAnchor>(&fetch, &codecs)
        .unwrap();

    let header = anchor.header(&fetch, &codecs).unwrap();
    assert_eq!(header.length, 164);
    assert_eq!(header.checksum, A_HEADER_CHECKSUM);
    assert_eq!(header.schema.columns[0].column_type, ColumnType::SplitReal32);

    let tuple = RNTuple::from_anchor(&anchor, &fetch, &codecs).unwrap();
    let page_list = &tuple.page_lists[0];
    assert_eq!(page_list.length, 124);
    assert_eq!(page_list.header_checksum, A_HEADER_CHECKSUM);
    let column = &page_list.page_locations[0][0];
    assert_eq!(column.compression_settings, Some(505));
    assert!(matches!(
        column.pages[0].locator,
        Locator::Standard { size: 138, .. }
    ));
    assert_eq!(column.pages[0].n_elements, -100);
    assert_eq!(
        tuple.interpretable_pages().unwrap()[0][0][0][0].uncompressed_size,
        400
    );

    // Without a registered codec the same traversal must fail.
    let err = RNTuple::from_anchor(&anchor, &fetch, &Decompressors::new()).unwrap_err();
    assert_eq!(
        err.downcast::<RootError>().unwrap(),
        RootError::CodecError {
            context: "no decompressor registered for compression tag"
        }
    );
}

#[test]
fn compressed_key_body_inflates_to_obj_len() {
    init_logging();
    let built = build_file(false);
    let fetch = SliceFetch::new(built.image);
    let codecs = zlib_codecs();
    let dict = Dictionary::bootstrap(TIOFeaturesLayout::TrailingWhenSet);

    let file = read_root_file(&fetch).unwrap();
    let info = file.streamer_info(&fetch, &codecs, &dict).unwrap().unwrap();
    assert_eq!(info.items.len(), 1);
    match &info.items[0].0 {
        StreamedItem::Uninterpreted { header, data } => {
            assert_eq!(header.class_name.as_deref(), Some(&b"TStreamerInfo"[..]));
            assert_eq!(data, &vec![0xAB; 6]);
        }
        other => panic!("expected an uninterpreted item, got {other:?}"),
    }
}

#[test]
fn strict_object_read_rejects_class_mismatch() {
    init_logging();
    let built = build_file(false);
    let fetch = SliceFetch::new(built.image);
    let codecs = Decompressors::new();

    let keys = read_root_file(&fetch)
        .unwrap()
        .tfile(&fetch, &codecs)
        .unwrap()
        .key_list(&fetch, &codecs)
        .unwrap();
    let err = keys
        .get("A")
        .unwrap()
        .read_object_strict::<TFile>(&fetch, &codecs)
        .unwrap_err();
    assert_eq!(
        err.downcast::<RootError>().unwrap(),
        RootError::UnknownClass {
            name: "ROOT3a3aRNTuple".into()
        }
    );
}

#[test]
fn footer_with_wrong_header_checksum_is_rejected() {
    init_logging();
    let built = build_file(true);
    let fetch = SliceFetch::new(built.image);
    let codecs = Decompressors::new();

    let keys = read_root_file(&fetch)
        .unwrap()
        .tfile(&fetch, &codecs)
        .unwrap()
        .key_list(&fetch, &codecs)
        .unwrap();
    let anchor = keys
        .get("Contributors")
        .unwrap()
        .read_object_strict::<RNTupleAnchor>(&fetch, &codecs)
        .unwrap();
    let err = RNTuple::from_anchor(&anchor, &fetch, &codecs).unwrap_err();
    assert!(matches!(
        err.downcast::<RootError>().unwrap(),
        RootError::Corrupt {
            context: "footer header-checksum",
            ..
        }
    ));
}

#[test]
fn file_and_mmap_fetchers_traverse_the_same_image() {
    use rootfile::rootfile::buffer::{FileFetch, MmapFetch};

    init_logging();
    let built = build_file(false);
    let path = std::env::temp_dir().join(format!(
        "rootfile-reader-test-{}.root",
        std::process::id()
    ));
    std::fs::write(&path, &built.image).unwrap();

    fn traverse(fetch: &impl DataFetch) {
        let codecs = Decompressors::new();
        let file = read_root_file(fetch).unwrap();
        let keys = file
            .tfile(fetch, &codecs)
            .unwrap()
            .key_list(fetch, &codecs)
            .unwrap();
        let anchor = keys
            .get("Contributors")
            .unwrap()
            .read_object_strict::<RNTupleAnchor>(fetch, &codecs)
            .unwrap();
        let tuple = RNTuple::from_anchor(&anchor, fetch, &codecs).unwrap();
        assert_eq!(tuple.header.name.display(), "Contributors");
    }

    traverse(&FileFetch::open(&path).unwrap());
    traverse(&MmapFetch::open(&path).unwrap());
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn fetch_returns_exact_ranges_only() {
    let built = build_file(false);
    let len = built.image.len() as u64;
    let fetch = SliceFetch::new(built.image);
    assert!(fetch.fetch(len - 4, 8).is_err());
    let buf = fetch.fetch(len - 4, 4).unwrap();
    assert_eq!(buf.len(), 4);
}
