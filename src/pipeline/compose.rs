//! Pure-Rust PDF assembly over `lopdf`.
//!
//! [`PdfBuilder`] produces a fresh single-revision PDF from three kinds of
//! page: an imported page of an existing PDF, a page-sized raster image, or
//! a page of reflowed plain text. Imported pages are deep-copied object by
//! object with inherited attributes (`Resources`, `MediaBox`, `CropBox`,
//! `Rotate`) materialised on the page, so each output is self-contained and
//! carries no objects from pages that were not imported.
//!
//! The catalog's `/AcroForm` is not part of any page, so it is carried
//! separately by [`PdfBuilder::import_form`]: only fields with a widget on an
//! imported page come along, and forms from several sources are combined.
//!
//! Output is deterministic for identical input: no timestamps, no IDs, and
//! objects are written in id order.

use crate::error::IntakeError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, warn};

/// US Letter, in points.
pub const LETTER: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

const TEXT_FONT_SIZE: f32 = 10.0;
const TEXT_LEADING: f32 = 12.0;
const TEXT_MARGIN: f32 = 54.0;
/// Courier is 0.6 em wide.
const TEXT_COLUMNS: usize = ((LETTER.width - 2.0 * TEXT_MARGIN) / (TEXT_FONT_SIZE * 0.6)) as usize;
const TEXT_ROWS: usize = ((LETTER.height - 2.0 * TEXT_MARGIN) / TEXT_LEADING) as usize;

/// Inherited attributes copied onto imported pages.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Page dimensions in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// Physical size of an image scanned at `dpi`.
    pub fn for_image(image: &DynamicImage, dpi: u32) -> Self {
        let dpi = dpi.max(1) as f32;
        Self {
            width: image.width() as f32 * 72.0 / dpi,
            height: image.height() as f32 * 72.0 / dpi,
        }
    }

    /// Displayed size of an existing page: its `MediaBox`, swapped for
    /// quarter-turn rotations. Falls back to Letter.
    pub fn of_page(doc: &Document, page_id: ObjectId) -> Self {
        let Ok(page) = doc.get_dictionary(page_id) else {
            return LETTER;
        };
        let media_box = page
            .get(b"MediaBox")
            .ok()
            .cloned()
            .or_else(|| inherited(doc, page, b"MediaBox"));
        let rotate = page
            .get(b"Rotate")
            .ok()
            .cloned()
            .or_else(|| inherited(doc, page, b"Rotate"))
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0);

        let size = media_box
            .as_ref()
            .and_then(|mb| resolve(doc, mb).as_array().ok().cloned())
            .and_then(|arr| {
                let n: Vec<f32> = arr.iter().filter_map(number).collect();
                (n.len() == 4).then(|| PageSize {
                    width: (n[2] - n[0]).abs(),
                    height: (n[3] - n[1]).abs(),
                })
            })
            .filter(|s| s.width > 0.0 && s.height > 0.0)
            .unwrap_or(LETTER);

        if rotate.rem_euclid(180) == 90 {
            PageSize {
                width: size.height,
                height: size.width,
            }
        } else {
            size
        }
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Look `key` up the `Parent` chain of a page.
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
    // Page trees are shallow; the bound guards against cycles.
    for _ in 0..32 {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(v) = node.get(key) {
            return Some(v.clone());
        }
        parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    None
}

fn is_page_tree_node(obj: &Object) -> bool {
    obj.as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
        .map(|name| name == b"Page" || name == b"Pages")
        .unwrap_or(false)
}

/// The catalog's `/AcroForm` dictionary, if any.
fn source_acroform(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    let catalog = resolve(doc, root).as_dict().ok()?;
    resolve(doc, catalog.get(b"AcroForm").ok()?).as_dict().ok()
}

/// Whether field `id`, or a descendant through `/Kids`, was imported.
fn field_was_imported(doc: &Document, id: ObjectId, map: &ImportMap) -> bool {
    let mut stack = vec![(id, 0)];
    while let Some((id, depth)) = stack.pop() {
        if map.contains_key(&id) {
            return true;
        }
        // Field trees are shallow; the bound guards against cycles.
        if depth >= 16 {
            continue;
        }
        let Ok(field) = doc.get_dictionary(id) else {
            continue;
        };
        if let Ok(kids) = field.get(b"Kids").and_then(|k| resolve(doc, k).as_array()) {
            stack.extend(
                kids.iter()
                    .filter_map(|k| k.as_reference().ok())
                    .map(|k| (k, depth + 1)),
            );
        }
    }
    false
}

/// Whether a page carries interactive form widgets.
pub fn page_has_form_widgets(doc: &Document, page_id: ObjectId) -> bool {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return false;
    };
    let Ok(annots) = page.get(b"Annots") else {
        return false;
    };
    let Ok(annots) = resolve(doc, annots).as_array() else {
        return false;
    };
    annots.iter().any(|a| {
        resolve(doc, a)
            .as_dict()
            .ok()
            .and_then(|d| d.get(b"Subtype").ok())
            .and_then(|s| s.as_name().ok())
            .map(|s| s == b"Widget")
            .unwrap_or(false)
    })
}

/// Parse a PDF, rejecting encrypted files whose streams we cannot copy.
pub fn load_pdf(bytes: &[u8], index: usize) -> Result<Document, IntakeError> {
    let doc = Document::load_mem(bytes).map_err(|e| IntakeError::CorruptPdf {
        index,
        detail: e.to_string(),
    })?;
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(IntakeError::CorruptPdf {
            index,
            detail: "document is encrypted".into(),
        });
    }
    Ok(doc)
}

/// Old → new object ids for one source document.
pub type ImportMap = BTreeMap<ObjectId, ObjectId>;

/// Interactive form gathered from imported sources.
#[derive(Debug, Default)]
struct FormFields {
    fields: Vec<Object>,
    need_appearances: bool,
    default_appearance: Option<Object>,
    resources: Dictionary,
}

impl FormFields {
    /// Union `incoming` into the default resources. Sub-dictionaries such
    /// as `/Font` are merged by key; the first source wins on conflicts.
    fn merge_resources(&mut self, incoming: &Dictionary) {
        for (key, value) in incoming.iter() {
            if !self.resources.has(key) {
                self.resources.set(key.clone(), value.clone());
                continue;
            }
            if let (Ok(Object::Dictionary(existing)), Object::Dictionary(more)) =
                (self.resources.get_mut(key), value)
            {
                for (k, v) in more.iter() {
                    if !existing.has(k) {
                        existing.set(k.clone(), v.clone());
                    }
                }
            }
        }
    }

    fn into_dictionary(self) -> Dictionary {
        let mut form = dictionary! { "Fields" => self.fields };
        if self.need_appearances {
            form.set("NeedAppearances", true);
        }
        if let Some(da) = self.default_appearance {
            form.set("DA", da);
        }
        if !self.resources.is_empty() {
            form.set("DR", self.resources);
        }
        form
    }
}

/// Incrementally builds one output PDF.
pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    font_id: Option<ObjectId>,
    form: Option<FormFields>,
    dropped_text_lines: usize,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            font_id: None,
            form: None,
            dropped_text_lines: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Text lines cut from text pages because they did not fit on one page.
    pub fn dropped_text_lines(&self) -> usize {
        self.dropped_text_lines
    }

    fn add_page(&mut self, size: PageSize, resources: Dictionary, content: Vec<u8>) {
        let content_id = self.doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(size.width.into()), Object::Real(size.height.into())],
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.kids.push(page_id);
    }

    /// Append a page showing `image` stretched over `size`.
    pub fn push_image_page(&mut self, image: &DynamicImage, size: PageSize) -> Result<(), IntakeError> {
        let (color_space, raw) = match image {
            DynamicImage::ImageLuma8(gray) => ("DeviceGray", gray.as_raw().clone()),
            other => ("DeviceRGB", other.to_rgb8().into_raw()),
        };
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| IntakeError::PdfAssembly(format!("image compression: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| IntakeError::PdfAssembly(format!("image compression: {e}")))?;

        let mut xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width() as i64,
                "Height" => image.height() as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            compressed,
        );
        xobject.allows_compression = false;
        let image_id = self.doc.add_object(xobject);

        let content = format!(
            "q\n{:.3} 0 0 {:.3} 0 0 cm\n/Im0 Do\nQ\n",
            size.width, size.height
        );
        self.add_page(
            size,
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
            content.into_bytes(),
        );
        Ok(())
    }

    /// Append one Letter page of monospaced, word-wrapped `text`.
    ///
    /// Text beyond one page is dropped with a warning and counted in
    /// [`dropped_text_lines`](Self::dropped_text_lines).
    pub fn push_text_page(&mut self, text: &str) {
        let font_id = *self.font_id.get_or_insert_with(|| {
            self.doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Courier",
                "Encoding" => "WinAnsiEncoding",
            })
        });

        let mut lines = wrap_text(text, TEXT_COLUMNS);
        if lines.len() > TEXT_ROWS {
            warn!(
                "Text source has {} lines; keeping the first {}",
                lines.len(),
                TEXT_ROWS
            );
            self.dropped_text_lines += lines.len() - TEXT_ROWS;
            lines.truncate(TEXT_ROWS);
        }

        let top = LETTER.height - TEXT_MARGIN - TEXT_FONT_SIZE;
        let mut content = format!(
            "BT\n/F1 {TEXT_FONT_SIZE} Tf\n{TEXT_LEADING} TL\n{TEXT_MARGIN} {top} Td\n"
        )
        .into_bytes();
        for line in &lines {
            content.push(b'(');
            content.extend(encode_pdf_text(line));
            content.extend_from_slice(b") Tj\nT*\n");
        }
        content.extend_from_slice(b"ET\n");

        self.add_page(
            LETTER,
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
            content,
        );
    }

    /// Deep-copy one page of `src`. Pass the same `map` for every page of
    /// one source so shared resources are copied once.
    pub fn import_page(&mut self, src: &Document, page_id: ObjectId, map: &mut ImportMap) -> Result<(), IntakeError> {
        let mut page = src
            .get_dictionary(page_id)
            .map_err(|e| IntakeError::PdfAssembly(format!("page object: {e}")))?
            .clone();
        for key in INHERITABLE {
            if !page.has(key) {
                if let Some(v) = inherited(src, &page, key) {
                    page.set(key.to_vec(), v);
                }
            }
        }
        if !page.has(b"MediaBox") {
            page.set(
                "MediaBox",
                vec![0.into(), 0.into(), Object::Real(LETTER.width.into()), Object::Real(LETTER.height.into())],
            );
        }
        page.remove(b"Parent");

        // Mapped up front so widget `/P` links resolve to the copy.
        let new_page_id = self.doc.new_object_id();
        map.insert(page_id, new_page_id);

        let mut queue = Vec::new();
        let mut copied = self.remap_dict(src, &page, map, &mut queue);
        copied.set("Parent", self.pages_id);
        self.doc.objects.insert(new_page_id, Object::Dictionary(copied));
        self.drain(src, map, &mut queue);

        self.kids.push(new_page_id);
        Ok(())
    }

    /// Import every page of `src` in order, then its form; returns how many
    /// pages were added.
    pub fn import_all(&mut self, src: &Document) -> Result<usize, IntakeError> {
        let mut map = ImportMap::new();
        let pages = src.get_pages();
        for page_id in pages.values() {
            self.import_page(src, *page_id, &mut map)?;
        }
        self.import_form(src, &mut map);
        Ok(pages.len())
    }

    /// Carry `src`'s `/AcroForm` over for the fields whose widgets were
    /// imported through `map`. Call after importing the pages.
    ///
    /// Without the form dictionary a viewer has no field values to draw for
    /// widgets that lack an appearance stream.
    pub fn import_form(&mut self, src: &Document, map: &mut ImportMap) {
        let Some(acro) = source_acroform(src) else {
            return;
        };
        let Ok(all_fields) = acro.get(b"Fields").and_then(|f| resolve(src, f).as_array()) else {
            return;
        };
        let seen: &ImportMap = map;
        let imported: Vec<ObjectId> = all_fields
            .iter()
            .filter_map(|f| f.as_reference().ok())
            .filter(|id| field_was_imported(src, *id, seen))
            .collect();
        if imported.is_empty() {
            return;
        }

        let mut queue = Vec::new();
        let fields: Vec<Object> = imported
            .iter()
            .map(|id| self.remap(src, &Object::Reference(*id), map, &mut queue))
            .collect();
        let resources = acro
            .get(b"DR")
            .ok()
            .map(|dr| self.remap(src, resolve(src, dr), map, &mut queue));
        self.drain(src, map, &mut queue);

        let default_appearance = acro.get(b"DA").ok().map(|da| resolve(src, da).clone());
        let need_appearances = acro
            .get(b"NeedAppearances")
            .ok()
            .and_then(|v| resolve(src, v).as_bool().ok())
            .unwrap_or(false);

        debug!("Carrying {} form field(s) into output", fields.len());
        let form = self.form.get_or_insert_with(FormFields::default);
        form.fields.extend(fields);
        form.need_appearances |= need_appearances;
        if form.default_appearance.is_none() {
            form.default_appearance = default_appearance;
        }
        if let Some(Object::Dictionary(dr)) = resources {
            form.merge_resources(&dr);
        }
    }

    /// Copy every queued source object under its mapped id.
    fn drain(&mut self, src: &Document, map: &mut ImportMap, queue: &mut Vec<ObjectId>) {
        while let Some(old) = queue.pop() {
            let Some(new) = map.get(&old).copied() else {
                continue;
            };
            let obj = src.objects.get(&old).cloned().unwrap_or(Object::Null);
            let copied = self.remap(src, &obj, map, queue);
            self.doc.objects.insert(new, copied);
        }
    }

    fn remap(&mut self, src: &Document, obj: &Object, map: &mut ImportMap, queue: &mut Vec<ObjectId>) -> Object {
        match obj {
            Object::Reference(id) => {
                if let Some(new) = map.get(id) {
                    return Object::Reference(*new);
                }
                match src.objects.get(id) {
                    // Links back into the page tree would drag other pages along.
                    Some(target) if !is_page_tree_node(target) => {
                        let new = self.doc.new_object_id();
                        map.insert(*id, new);
                        queue.push(*id);
                        Object::Reference(new)
                    }
                    _ => Object::Null,
                }
            }
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|o| self.remap(src, o, map, queue))
                    .collect(),
            ),
            Object::Dictionary(d) => Object::Dictionary(self.remap_dict(src, d, map, queue)),
            Object::Stream(s) => {
                let mut copy = s.clone();
                copy.dict = self.remap_dict(src, &s.dict, map, queue);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn remap_dict(&mut self, src: &Document, dict: &Dictionary, map: &mut ImportMap, queue: &mut Vec<ObjectId>) -> Dictionary {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            let copied = self.remap(src, value, map, queue);
            out.set(key.clone(), copied);
        }
        out
    }

    /// Close the page tree and serialise.
    pub fn finish(mut self) -> Result<Vec<u8>, IntakeError> {
        let kids: Vec<Object> = self.kids.iter().map(|id| Object::Reference(*id)).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        };
        if let Some(form) = self.form.take() {
            catalog.set("AcroForm", form.into_dictionary());
        }
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        self.doc
            .save_to(&mut buf)
            .map_err(|e| IntakeError::PdfAssembly(e.to_string()))?;
        Ok(buf)
    }
}

/// Greedy word wrap at `width` characters. Blank input lines are kept;
/// words longer than a line are hard-split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.replace('\t', "    ");
        if line.trim().is_empty() {
            out.push(String::new());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(width);
                out.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if current.is_empty() { word.len() } else { current.chars().count() + 1 + word.len() };
            if needed > width {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(word);
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out
}

/// Encode a line as WinAnsi bytes for a literal string, escaping
/// delimiters. Characters outside Latin-1 become `?`.
fn encode_pdf_text(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            ' '..='~' => out.push(c as u8),
            '\u{a0}'..='\u{ff}' => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

/// Decode a text source: UTF-8 when valid, else Latin-1.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn wraps_on_words() {
        let lines = wrap_text("aaa bbb ccc\n\nddddddddd", 7);
        assert_eq!(lines, vec!["aaa bbb", "ccc", "", "ddddddd", "dd"]);
    }

    #[test]
    fn escapes_delimiters_and_non_latin() {
        assert_eq!(encode_pdf_text("a(b)\\ é€"), b"a\\(b\\)\\\\ \xe9?".to_vec());
    }

    #[test]
    fn latin1_fallback() {
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(decode_text("\u{feff}hi".as_bytes()), "hi");
    }

    #[test]
    fn builds_loadable_pdf_from_mixed_pages() {
        let mut b = PdfBuilder::new();
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([90])));
        b.push_image_page(&img, PageSize::for_image(&img, 100)).unwrap();
        b.push_text_page("hello (world)");
        assert_eq!(b.page_count(), 2);
        let bytes = b.finish().unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let first = pages[&1];
        let size = PageSize::of_page(&doc, first);
        assert!((size.width - 144.0).abs() < 0.01);
        assert!((size.height - 72.0).abs() < 0.01);
    }

    #[test]
    fn import_copies_only_requested_page() {
        let mut src = PdfBuilder::new();
        src.push_text_page("one");
        src.push_text_page("two");
        src.push_text_page("three");
        let src = Document::load_mem(&src.finish().unwrap()).unwrap();

        let mut out = PdfBuilder::new();
        let mut map = ImportMap::new();
        out.import_page(&src, src.get_pages()[&2], &mut map).unwrap();
        let doc = Document::load_mem(&out.finish().unwrap()).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        let page_id = doc.get_pages()[&1];
        let content = doc.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("(two)"));
    }

    #[test]
    fn overlong_text_is_counted() {
        let mut b = PdfBuilder::new();
        b.push_text_page("short");
        assert_eq!(b.dropped_text_lines(), 0);
        let long = "line\n".repeat(TEXT_ROWS + 7);
        b.push_text_page(&long);
        assert_eq!(b.dropped_text_lines(), 7);
        assert_eq!(b.page_count(), 2);
    }

    #[test]
    fn output_is_deterministic() {
        let build = || {
            let mut b = PdfBuilder::new();
            b.push_text_page("same");
            b.finish().unwrap()
        };
        assert_eq!(build(), build());
    }
}
