//! Merge and split over real in-memory fixtures.
//!
//! Fixtures are generated per test: multi-frame TIFFs through the `tiff`
//! encoder, PNGs through `image`, PDFs through `lopdf`. No pdfium library is
//! needed; form flattening goes through a fake rasteriser.

use case_intake::pipeline::compose::PdfBuilder;
use case_intake::pipeline::flatten::PageRasterizer;
use case_intake::pipeline::merge::{merge_to_pdf, MergeInput, MergeOptions};
use case_intake::pipeline::split::{split_pdf_bytes, split_to_dir, SplitOptions};
use case_intake::IntakeError;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiff::encoder::{colortype, TiffEncoder};

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn tiff_with_frames(shades: &[u8]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut enc = TiffEncoder::new(&mut buf).unwrap();
        for &shade in shades {
            // A shade-dependent stripe so no two frames are alike.
            let mut data = vec![shade; 40 * 30];
            data[..40].fill(255 - shade);
            enc.write_image::<colortype::Gray8>(40, 30, &data).unwrap();
        }
    }
    buf.into_inner()
}

fn png(color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb(color)));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let mut b = PdfBuilder::new();
    for p in pages {
        b.push_text_page(p);
    }
    b.finish().unwrap()
}

/// A two-page PDF whose second page carries a text-field widget with no
/// appearance stream, registered in a `NeedAppearances` AcroForm.
fn pdf_with_form_on_page_two() -> Vec<u8> {
    let mut doc = Document::load_mem(&text_pdf(&["cover", "form"])).unwrap();
    let page_two = doc.get_pages()[&2];
    let widget = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Tx",
        "T" => Object::string_literal("beneficiary_name"),
        "V" => Object::string_literal("filled in"),
        "P" => page_two,
        "Rect" => vec![72.into(), 600.into(), 300.into(), 620.into()],
    });
    doc.get_object_mut(page_two)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Annots", vec![Object::Reference(widget)]);
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    doc.get_object_mut(root).unwrap().as_dict_mut().unwrap().set(
        "AcroForm",
        dictionary! {
            "Fields" => vec![Object::Reference(widget)],
            "NeedAppearances" => true,
            "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
        },
    );
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, bytes).unwrap();
    p
}

fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).unwrap().get_pages().len()
}

fn content_of_only_page(bytes: &[u8]) -> String {
    let doc = Document::load_mem(bytes).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    String::from_utf8_lossy(&doc.get_page_content(pages[&1]).unwrap()).into_owned()
}

/// `(field count, NeedAppearances)` of the catalog's AcroForm, plus the
/// `/P` page of its first field.
fn form_summary(bytes: &[u8]) -> Option<(usize, bool, Option<ObjectId>)> {
    let doc = Document::load_mem(bytes).unwrap();
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_dictionary(root).unwrap();
    let form = catalog.get(b"AcroForm").ok()?.as_dict().unwrap();
    let fields = form.get(b"Fields").unwrap().as_array().unwrap();
    let need = form
        .get(b"NeedAppearances")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let page = fields
        .first()
        .and_then(|f| doc.get_dictionary(f.as_reference().unwrap()).ok())
        .and_then(|f| f.get(b"P").and_then(|p| p.as_reference()).ok());
    Some((fields.len(), need, page))
}

/// Records which pages it was asked for and paints them solid.
#[derive(Default)]
struct FakeRasterizer {
    calls: Mutex<Vec<Vec<usize>>>,
    fail: bool,
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize_pages(&self, _pdf: &[u8], indices: &[usize]) -> Result<Vec<(usize, DynamicImage)>, IntakeError> {
        self.calls.lock().unwrap().push(indices.to_vec());
        if self.fail {
            return Err(IntakeError::PdfiumBindingFailed("no library".into()));
        }
        Ok(indices
            .iter()
            .map(|&i| (i, DynamicImage::ImageRgb8(RgbImage::from_pixel(85, 110, Rgb([200, 10, 10])))))
            .collect())
    }
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[test]
fn merged_page_count_is_the_sum_of_sources() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        MergeInput::new(write(dir.path(), "a.pdf", &text_pdf(&["1", "2", "3"])), "application/pdf"),
        MergeInput::new(write(dir.path(), "b.tif", &tiff_with_frames(&[20, 90])), "image/tiff"),
        MergeInput::new(write(dir.path(), "c.png", &png([1, 2, 3])), "image/png"),
        MergeInput::new(write(dir.path(), "d.txt", b"free text note"), "text/plain"),
    ];
    let out = dir.path().join("merged.pdf");
    let artifact = merge_to_pdf(&inputs, &out, &MergeOptions::default()).unwrap();

    assert_eq!(artifact.contributions, vec![3, 2, 1, 1]);
    assert_eq!(artifact.page_count, 7);
    assert_eq!(page_count(&std::fs::read(&out).unwrap()), 7);
}

#[test]
fn merge_preserves_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        MergeInput::new(write(dir.path(), "z.txt", b"zulu"), "text/plain"),
        MergeInput::new(write(dir.path(), "a.pdf", &text_pdf(&["alpha"])), "application/pdf"),
    ];
    let out = dir.path().join("merged.pdf");
    merge_to_pdf(&inputs, &out, &MergeOptions::default()).unwrap();

    let pages = split_pdf_bytes(&std::fs::read(&out).unwrap(), &SplitOptions::default(), None).unwrap();
    assert!(content_of_only_page(&pages[0]).contains("(zulu)"));
    assert!(content_of_only_page(&pages[1]).contains("(alpha)"));
}

#[test]
fn corrupt_pdf_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        MergeInput::new(write(dir.path(), "ok.txt", b"fine"), "text/plain"),
        MergeInput::new(write(dir.path(), "bad.pdf", b"%PDF-1.4\nnot really"), "application/pdf"),
    ];
    let out = dir.path().join("merged.pdf");
    let err = merge_to_pdf(&inputs, &out, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, IntakeError::CorruptPdf { index: 1, .. }));
    assert!(!out.exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 2, "{leftovers:?}");
}

// ── Merge then split ─────────────────────────────────────────────────────────

#[test]
fn every_tiff_frame_becomes_a_distinct_page() {
    let shades = [10u8, 60, 110, 160, 210];
    let dir = tempfile::tempdir().unwrap();
    let tif = write(dir.path(), "scan.tif", &tiff_with_frames(&shades));
    let merged = dir.path().join("merged.pdf");
    let artifact = merge_to_pdf(&[MergeInput::new(&tif, "image/tiff")], &merged, &MergeOptions::default()).unwrap();
    assert_eq!(artifact.page_count, shades.len());

    let pages = split_to_dir(
        &merged,
        "application/pdf",
        &dir.path().join("pages"),
        &SplitOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(pages.len(), shades.len());
    let hashes: HashSet<_> = pages.iter().map(|p| p.sha256.clone()).collect();
    assert_eq!(hashes.len(), shades.len(), "duplicate page content");
    let numbers: Vec<_> = pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[test]
fn splitter_accepts_a_tiff_directly() {
    let dir = tempfile::tempdir().unwrap();
    let tif = write(dir.path(), "scan.tif", &tiff_with_frames(&[30, 130, 230]));
    let pages = split_to_dir(&tif, "image/tiff", &dir.path().join("pages"), &SplitOptions::default(), None).unwrap();
    assert_eq!(pages.len(), 3);
    let hashes: HashSet<_> = pages.iter().map(|p| p.sha256.as_str()).collect();
    assert_eq!(hashes.len(), 3);
}

#[test]
fn split_hashes_match_file_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let src = write(dir.path(), "in.pdf", &text_pdf(&["a", "b"]));
    let pages = split_to_dir(&src, "application/pdf", &dir.path().join("out"), &SplitOptions::default(), None).unwrap();
    for page in &pages {
        let bytes = std::fs::read(&page.local_path).unwrap();
        assert_eq!(page.size_bytes, bytes.len() as u64);
        assert_eq!(page.sha256, case_intake::pipeline::sha256_hex(&bytes));
    }
}

// ── Form flattening ──────────────────────────────────────────────────────────

#[test]
fn form_pages_are_rasterised() {
    let rasterizer = FakeRasterizer::default();
    let pages = split_pdf_bytes(&pdf_with_form_on_page_two(), &SplitOptions::default(), Some(&rasterizer)).unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(*rasterizer.calls.lock().unwrap(), vec![vec![1]]);
    assert!(content_of_only_page(&pages[0]).contains("(cover)"));
    assert!(content_of_only_page(&pages[1]).contains("/Im0 Do"));
}

#[test]
fn form_survives_merge_and_split() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        MergeInput::new(write(dir.path(), "note.txt", b"fax cover"), "text/plain"),
        MergeInput::new(write(dir.path(), "form.pdf", &pdf_with_form_on_page_two()), "application/pdf"),
    ];
    let out = dir.path().join("merged.pdf");
    merge_to_pdf(&inputs, &out, &MergeOptions::default()).unwrap();
    let merged = std::fs::read(&out).unwrap();

    let merged_pages = Document::load_mem(&merged).unwrap().get_pages();
    let (fields, need, page) = form_summary(&merged).expect("merged PDF keeps the form");
    assert_eq!(fields, 1);
    assert!(need);
    assert_eq!(page, Some(merged_pages[&3]));

    // The rasteriser is handed the merged bytes, form included.
    let rasterizer = FakeRasterizer::default();
    let pages = split_pdf_bytes(&merged, &SplitOptions::default(), Some(&rasterizer)).unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(*rasterizer.calls.lock().unwrap(), vec![vec![2]]);

    let options = SplitOptions {
        flatten_forms: false,
        ..SplitOptions::default()
    };
    let copied = split_pdf_bytes(&merged, &options, None).unwrap();
    assert!(form_summary(&copied[0]).is_none());
    assert!(form_summary(&copied[1]).is_none());
    let (fields, need, page) = form_summary(&copied[2]).expect("form page keeps its field");
    assert_eq!((fields, need), (1, true));
    assert_eq!(page, Some(Document::load_mem(&copied[2]).unwrap().get_pages()[&1]));
}

#[test]
fn forms_from_several_sources_are_combined() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        MergeInput::new(write(dir.path(), "a.pdf", &pdf_with_form_on_page_two()), "application/pdf"),
        MergeInput::new(write(dir.path(), "b.pdf", &pdf_with_form_on_page_two()), "application/pdf"),
    ];
    let out = dir.path().join("merged.pdf");
    merge_to_pdf(&inputs, &out, &MergeOptions::default()).unwrap();
    let (fields, need, _) = form_summary(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(fields, 2);
    assert!(need);
}

#[test]
fn flattening_can_be_disabled() {
    let rasterizer = FakeRasterizer::default();
    let options = SplitOptions {
        flatten_forms: false,
        ..SplitOptions::default()
    };
    let pages = split_pdf_bytes(&pdf_with_form_on_page_two(), &options, Some(&rasterizer)).unwrap();
    assert_eq!(pages.len(), 2);
    assert!(rasterizer.calls.lock().unwrap().is_empty());
    assert!(content_of_only_page(&pages[1]).contains("(form)"));
}

#[test]
fn rasteriser_failure_falls_back_to_copying() {
    let rasterizer = FakeRasterizer {
        fail: true,
        ..FakeRasterizer::default()
    };
    let pages = split_pdf_bytes(&pdf_with_form_on_page_two(), &SplitOptions::default(), Some(&rasterizer)).unwrap();
    assert_eq!(pages.len(), 2);
    assert!(content_of_only_page(&pages[1]).contains("(form)"));
}

#[test]
fn pages_without_widgets_never_reach_the_rasteriser() {
    let rasterizer = FakeRasterizer::default();
    split_pdf_bytes(&text_pdf(&["x", "y"]), &SplitOptions::default(), Some(&rasterizer)).unwrap();
    assert!(rasterizer.calls.lock().unwrap().is_empty());
}
