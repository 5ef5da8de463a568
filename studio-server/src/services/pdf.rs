//! PDF rendering and signature stamping
//!
//! Two jobs:
//! - render a contract body snapshot into a simple paginated PDF at send time
//! - stamp a captured signature image plus an attestation text block onto the
//!   final page of an existing PDF at sign time
//!
//! Output bytes are SHA-256 hashed and stored under a content-addressed
//! filename, so any mutation of the artifact changes its name and the stored
//! hash detects tampering in place.

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Static notice stamped beneath every signature
const LEGAL_NOTICE: &str =
    "This electronic signature is legally binding and equivalent to a handwritten signature.";

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const BODY_FONT_SIZE: f32 = 11.0;
const LEADING: f32 = 14.0;
const LINES_PER_PAGE: usize = 46;
const WRAP_COLUMNS: usize = 88;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF error: {0}")]
    Lopdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature image: {0}")]
    InvalidImage(String),

    #[error("Document has no pages")]
    NoPages,
}

/// Supported embedded signature image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureImageKind {
    Png,
    Jpeg,
}

/// Decode a `data:image/png;base64,...` or `data:image/jpeg;base64,...` URL.
///
/// Rejects other media types, missing payloads and malformed base64.
pub fn decode_signature_data_url(data_url: &str) -> Result<(SignatureImageKind, Vec<u8>), PdfError> {
    let (kind, rest) = if let Some(rest) = data_url.strip_prefix("data:image/png;base64,") {
        (SignatureImageKind::Png, rest)
    } else if let Some(rest) = data_url.strip_prefix("data:image/jpeg;base64,") {
        (SignatureImageKind::Jpeg, rest)
    } else {
        return Err(PdfError::InvalidImage(
            "expected a data:image/png or data:image/jpeg URL".into(),
        ));
    };

    if rest.is_empty() {
        return Err(PdfError::InvalidImage("empty image payload".into()));
    }

    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(rest.trim())
        .map_err(|e| PdfError::InvalidImage(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(PdfError::InvalidImage("empty image payload".into()));
    }

    Ok((kind, bytes))
}

/// SHA-256 of a byte buffer, lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Content-addressed filename for a signed artifact:
/// `contract_<number>_signed_<hash16>.pdf`
pub fn signed_filename(contract_number: &str, hash: &str) -> String {
    let short = &hash[..hash.len().min(16)];
    format!("contract_{}_signed_{}.pdf", contract_number, short)
}

/// Filename for the unsigned rendered snapshot
pub fn rendered_filename(contract_number: &str, hash: &str) -> String {
    let short = &hash[..hash.len().min(16)];
    format!("contract_{}_{}.pdf", contract_number, short)
}

/// Reduce a rendered HTML body to plain text lines for PDF layout.
///
/// Tags are stripped; `<br>`, `</p>`, `</h1>`..`</h6>` and `</li>` become
/// line breaks; the common entities are decoded. This is deliberately not an
/// HTML renderer: contract bodies are simple formatted prose.
pub fn html_to_lines(html: &str) -> Vec<String> {
    let mut text = String::with_capacity(html.len());
    let mut chars = html.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '<' {
            let rest = &html[i..];
            let end = match rest.find('>') {
                Some(e) => e,
                None => break,
            };
            let tag = rest[1..end].trim().to_ascii_lowercase();
            let tag_name = tag
                .trim_start_matches('/')
                .split([' ', '/'])
                .next()
                .unwrap_or("");
            if tag.starts_with('/') {
                if matches!(tag_name, "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "tr") {
                    text.push('\n');
                }
            } else if tag_name == "br" {
                text.push('\n');
            }
            // Skip to the closing '>'
            while let Some(&(j, _)) = chars.peek() {
                if j > i + end {
                    break;
                }
                chars.next();
            }
        } else if c == '&' {
            let rest = &html[i..];
            let (replacement, len) = if rest.starts_with("&amp;") {
                ("&", 5)
            } else if rest.starts_with("&lt;") {
                ("<", 4)
            } else if rest.starts_with("&gt;") {
                (">", 4)
            } else if rest.starts_with("&nbsp;") {
                (" ", 6)
            } else if rest.starts_with("&quot;") {
                ("\"", 6)
            } else if rest.starts_with("&#39;") {
                ("'", 5)
            } else {
                ("&", 1)
            };
            text.push_str(replacement);
            for _ in 0..len - 1 {
                chars.next();
            }
        } else {
            text.push(c);
        }
    }

    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            if !lines.last().map(|l: &String| l.is_empty()).unwrap_or(true) {
                lines.push(String::new());
            }
            continue;
        }
        lines.extend(wrap_line(line, WRAP_COLUMNS));
    }
    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

/// Greedy word wrap
fn wrap_line(line: &str, columns: usize) -> Vec<String> {
    let mut wrapped = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= columns {
            current.push(' ');
            current.push_str(word);
        } else {
            wrapped.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        wrapped.push(current);
    }
    wrapped
}

/// Render a contract into a paginated PDF
pub fn render_contract_pdf(
    title: &str,
    contract_number: &str,
    body_html: &str,
) -> Result<Vec<u8>, PdfError> {
    let mut lines = vec![title.to_string(), contract_number.to_string(), String::new()];
    lines.extend(html_to_lines(body_html));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for chunk in lines.chunks(LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), BODY_FONT_SIZE.into()]),
            Operation::new("TL", vec![LEADING.into()]),
            Operation::new(
                "Td",
                vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()],
            ),
        ];
        for line in chunk {
            operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    set_metadata(
        &mut doc,
        title,
        &format!("Contract {}", contract_number),
        Utc::now(),
    );

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// Signer identity stamped onto the document
pub struct StampInfo<'a> {
    pub signer_name: &'a str,
    pub signer_email: &'a str,
    pub contract_number: &'a str,
    pub signed_at: DateTime<Utc>,
}

/// Stamp a decoded signature image and attestation text onto the final page.
///
/// The panel sits inside the bottom margin area of the last page: image
/// above, text block beneath. Document Info metadata is refreshed so the
/// signed artifact is self-describing.
pub fn stamp_signature(
    pdf_bytes: &[u8],
    image_bytes: &[u8],
    info: &StampInfo<'_>,
) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::load_mem(pdf_bytes)?;
    let pages = doc.get_pages();
    let last_page_id = *pages.values().next_back().ok_or(PdfError::NoPages)?;

    let image = lopdf::xobject::image_from(image_bytes.to_vec())
        .map_err(|e| PdfError::InvalidImage(e.to_string()))?;
    doc.insert_image(last_page_id, image, (MARGIN, 132.0), (180.0, 60.0))?;

    ensure_page_font(&mut doc, last_page_id, "Fsig")?;

    let when = info.signed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let text_lines = [
        format!("Signed by: {} <{}>", info.signer_name, info.signer_email),
        format!("Contract: {}", info.contract_number),
        format!("Date: {}", when),
        LEGAL_NOTICE.to_string(),
    ];

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["Fsig".into(), 8.0_f32.into()]),
        Operation::new("TL", vec![11.0_f32.into()]),
        Operation::new("Td", vec![MARGIN.into(), 120.0_f32.into()]),
    ];
    for line in &text_lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    doc.add_to_page_content(last_page_id, Content { operations })?;

    set_metadata(
        &mut doc,
        &format!("Signed contract {}", info.contract_number),
        &format!("Signed by {} on {}", info.signer_name, when),
        info.signed_at,
    );

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// Register a Helvetica font under `name` in the page's resources
fn ensure_page_font(doc: &mut Document, page_id: ObjectId, name: &str) -> Result<(), PdfError> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let resources = doc.get_or_create_resources(page_id)?;
    let resources_dict = resources.as_dict_mut()?;
    if !resources_dict.has(b"Font") {
        resources_dict.set("Font", lopdf::Dictionary::new());
    }
    match resources_dict.get_mut(b"Font")? {
        Object::Dictionary(fonts) => {
            fonts.set(name, Object::Reference(font_id));
        }
        Object::Reference(font_dict_id) => {
            let font_dict_id = *font_dict_id;
            doc.get_object_mut(font_dict_id)?
                .as_dict_mut()?
                .set(name, Object::Reference(font_id));
        }
        _ => {
            resources_dict.set("Font", dictionary! { name => font_id });
        }
    }
    Ok(())
}

/// Smallest valid 1x1 transparent PNG, shared by signature-capture tests
#[cfg(test)]
pub(crate) const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Refresh the document Info dictionary
fn set_metadata(doc: &mut Document, title: &str, subject: &str, modified: DateTime<Utc>) {
    let mod_date = format!("D:{}Z", modified.format("%Y%m%d%H%M%S"));
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Subject" => Object::string_literal(subject),
        "Producer" => Object::string_literal("StudioDesk"),
        "ModDate" => Object::string_literal(mod_date),
    });
    doc.trailer.set("Info", info_id);
}
