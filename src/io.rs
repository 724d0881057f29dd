// ============================================================================
// IMAGE ARTIFACTS & DATA URL CODEC
// ============================================================================
//
// Artifacts are immutable image payloads. They arrive as files (scene or
// product upload) or as data-URL text (collaborator output), and leave as
// data-URL text (collaborator input) or transient object references
// (display).

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use image::{ImageFormat, RgbaImage};

use crate::error::CodecError;
use crate::geometry::Size;

/// Decoder that accepts payloads with or without trailing `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// An immutable image payload with its filename and MIME type.
///
/// The MIME type is normalized on construction (see [`normalize_mime`]) so
/// every artifact can be written into a data URL header and read back
/// unchanged.
///
/// The bytes are shared, so cloning an artifact (to put it in a request, a
/// history entry and a display cache at once) never copies pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    bytes: Arc<[u8]>,
    filename: String,
    mime: String,
}

impl fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageArtifact {
    pub fn new(
        bytes: impl Into<Arc<[u8]>>,
        filename: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            mime: normalize_mime(&mime.into()),
        }
    }

    /// Read an image file. The MIME type is sniffed from the content, falling
    /// back to the extension.
    pub fn from_path(path: &Path) -> Result<Self, CodecError> {
        let bytes = std::fs::read(path)?;
        let format = image::guess_format(&bytes)
            .ok()
            .or_else(|| ImageFormat::from_path(path).ok());
        let mime = format.map_or(FALLBACK_MIME, mime_for_format);
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        log::info!(
            "Loaded artifact {} ({} bytes, {})",
            path.display(),
            bytes.len(),
            mime
        );
        Ok(Self::new(bytes, filename, mime))
    }

    /// Encode an RGBA buffer as a PNG artifact.
    pub fn from_rgba_png(image: &RgbaImage, filename: impl Into<String>) -> Result<Self, CodecError> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)?;
        Ok(Self::new(buf, filename, "image/png"))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Approximate heap footprint, used by the history's memory cap.
    pub fn memory_size(&self) -> usize {
        self.bytes.len() + self.filename.len() + self.mime.len()
    }

    /// True when both artifacts point at the same payload allocation.
    pub fn same_payload(&self, other: &ImageArtifact) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Natural pixel size, read from the image header only.
    pub fn dimensions(&self) -> Result<Size, CodecError> {
        let (w, h) = image::io::Reader::new(Cursor::new(self.bytes()))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Size::from((w, h)))
    }

    /// Fully decode to 8-bit RGBA.
    pub fn to_rgba(&self) -> Result<RgbaImage, CodecError> {
        Ok(image::load_from_memory(self.bytes())?.into_rgba8())
    }
}

pub fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Ico => "image/x-icon",
        ImageFormat::Avif => "image/avif",
        _ => FALLBACK_MIME,
    }
}

// ============================================================================
// DATA URLS
// ============================================================================

/// `data:<mime>;base64,<payload>`
pub fn encode_data_url(artifact: &ImageArtifact) -> String {
    format!("data:{};base64,{}", artifact.mime(), STANDARD.encode(artifact.bytes()))
}

/// Parse `data:<mime>[;param]*[;base64],<payload>` into an artifact.
///
/// The header must carry a `type/subtype` MIME; its other parameters are
/// kept on the artifact's MIME. Base64 payloads may omit
/// padding and may contain whitespace; other payloads are percent-decoded.
pub fn decode_data_url(text: &str, filename: impl Into<String>) -> Result<ImageArtifact, CodecError> {
    let (header, payload) = text
        .trim()
        .split_once(',')
        .ok_or(CodecError::MalformedDataUrl("no ',' between header and payload"))?;

    let header = header
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &header[5..])
        .ok_or(CodecError::MalformedDataUrl("missing data: scheme"))?;

    let essence = header.split(';').next().unwrap_or_default().trim();
    if !is_mime_type(essence) {
        return Err(CodecError::MalformedDataUrl("header has no MIME type"));
    }
    let is_base64 = header
        .split(';')
        .skip(1)
        .any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        LENIENT_BASE64.decode(compact)?
    } else {
        percent_decode(payload)
    };

    // Parameters other than `base64` stay part of the MIME type
    Ok(ImageArtifact::new(bytes, filename, header))
}

/// Canonical `type/subtype[;param]*` form of a MIME string.
///
/// Segments are trimmed and empty ones dropped. A `base64` segment and any
/// parameter containing `,` cannot live in a data URL header and are
/// dropped. An unusable `type/subtype` becomes [`FALLBACK_MIME`].
pub fn normalize_mime(raw: &str) -> String {
    let mut segments = raw.split(';').map(str::trim).filter(|s| !s.is_empty());
    let essence = match segments.next() {
        Some(m) if is_mime_type(m) => m,
        _ => FALLBACK_MIME,
    };
    let mut mime = essence.to_string();
    for param in segments.filter(|p| !p.eq_ignore_ascii_case("base64") && !p.contains(',')) {
        mime.push(';');
        mime.push_str(param);
    }
    mime
}

fn is_mime_type(s: &str) -> bool {
    match s.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty()
                && !sub.is_empty()
                && !sub.contains('/')
                && !s.contains(',')
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

// ============================================================================
// OBJECT REFERENCES - transient display URLs
// ============================================================================

/// A transient display reference to an artifact.
///
/// Deliberately not `Clone`: whoever holds the value owns the reference and
/// must hand it back to [`ObjectUrlRegistry::release`], which consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-scoped table of live object references.
#[derive(Default)]
pub struct ObjectUrlRegistry {
    live: HashMap<String, ImageArtifact>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, artifact: &ImageArtifact) -> ObjectUrl {
        let url = format!("blob:roomstage/{}", uuid::Uuid::new_v4());
        self.live.insert(url.clone(), artifact.clone());
        ObjectUrl(url)
    }

    pub fn resolve(&self, url: &str) -> Option<&ImageArtifact> {
        self.live.get(url)
    }

    /// Returns `false` if the reference was not live (already released, or
    /// minted by another registry).
    pub fn release(&mut self, url: ObjectUrl) -> bool {
        if self.live.remove(&url.0).is_some() {
            true
        } else {
            log::warn!("Release of unknown object reference {}", url.0);
            false
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Drop for ObjectUrlRegistry {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            log::warn!(
                "{} object reference(s) still live at teardown",
                self.live.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(bytes: &[u8], mime: &str) -> ImageArtifact {
        ImageArtifact::new(bytes.to_vec(), "scene.png", mime)
    }

    #[test]
    fn full_byte_range_round_trips() {
        let all: Vec<u8> = (0..=255u8).collect();
        let original = artifact(&all, "image/png");
        let decoded = decode_data_url(&encode_data_url(&original), "scene.png").unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn empty_payload_round_trips() {
        let original = artifact(&[], "image/jpeg");
        let decoded = decode_data_url(&encode_data_url(&original), "scene.png").unwrap();
        assert_eq!(decoded.bytes(), original.bytes());
        assert_eq!(decoded.mime(), "image/jpeg");
    }

    #[test]
    fn missing_comma_is_malformed() {
        let err = decode_data_url("data:image/png;base64", "x").unwrap_err();
        assert!(matches!(err, CodecError::MalformedDataUrl(_)));
    }

    #[test]
    fn missing_mime_is_malformed() {
        for text in ["data:;base64,AAAA", "data:png;base64,AAAA", "data:/png;base64,AAAA"] {
            let err = decode_data_url(text, "x").unwrap_err();
            assert!(matches!(err, CodecError::MalformedDataUrl(_)), "{text}");
        }
    }

    #[test]
    fn missing_scheme_is_malformed() {
        let err = decode_data_url("image/png;base64,AAAA", "x").unwrap_err();
        assert!(matches!(err, CodecError::MalformedDataUrl(_)));
    }

    #[test]
    fn unpadded_and_wrapped_base64_is_accepted() {
        let decoded = decode_data_url("data:image/png;base64,/w\n", "x").unwrap();
        assert_eq!(decoded.bytes(), &[0xFF]);
    }

    #[test]
    fn bad_base64_is_reported() {
        let err = decode_data_url("data:image/png;base64,@@@@", "x").unwrap_err();
        assert!(matches!(err, CodecError::InvalidBase64(_)));
    }

    #[test]
    fn plain_payload_is_percent_decoded() {
        let decoded = decode_data_url("data:text/plain,a%20b%zz", "x").unwrap();
        assert_eq!(decoded.bytes(), b"a b%zz");
    }

    #[test]
    fn mime_parameters_round_trip() {
        let original = artifact(&[1, 2, 3], "image/svg+xml;charset=utf-8");
        let text = encode_data_url(&original);
        assert!(text.starts_with("data:image/svg+xml;charset=utf-8;base64,"));
        let decoded = decode_data_url(&text, "scene.png").unwrap();
        assert_eq!(decoded.mime(), "image/svg+xml;charset=utf-8");
        assert_eq!(decoded, original);
    }

    #[test]
    fn mime_is_normalized_on_construction() {
        assert_eq!(normalize_mime(" image/png ; q=1 ;; base64"), "image/png;q=1");
        assert_eq!(normalize_mime("image/png;a=b,c"), "image/png");
        assert_eq!(normalize_mime("image,png/x"), FALLBACK_MIME);
        assert_eq!(normalize_mime(""), FALLBACK_MIME);

        let odd = artifact(b"xy", "text/plain; name=a,b ;BASE64");
        assert_eq!(odd.mime(), "text/plain");
        assert_eq!(decode_data_url(&encode_data_url(&odd), "scene.png").unwrap(), odd);
    }

    #[test]
    fn decoded_header_parameters_are_kept() {
        let decoded = decode_data_url("data:text/plain;charset=US-ASCII,hi", "x").unwrap();
        assert_eq!(decoded.mime(), "text/plain;charset=US-ASCII");
        assert_eq!(decoded.bytes(), b"hi");
    }

    #[test]
    fn png_round_trip_keeps_dimensions() {
        let img = RgbaImage::from_pixel(7, 3, image::Rgba([1, 2, 3, 255]));
        let art = ImageArtifact::from_rgba_png(&img, "p.png").unwrap();
        assert_eq!(art.mime(), "image/png");
        assert_eq!(art.dimensions().unwrap(), Size::new(7.0, 3.0));
        assert_eq!(art.to_rgba().unwrap().get_pixel(6, 2)[2], 3);
    }

    #[test]
    fn object_urls_release_exactly_once() {
        let mut registry = ObjectUrlRegistry::new();
        let art = artifact(b"abc", "image/png");
        let url = registry.create(&art);
        let text = url.as_str().to_string();
        assert!(text.starts_with("blob:roomstage/"));
        assert_eq!(registry.resolve(&text), Some(&art));
        assert!(registry.release(url));
        assert_eq!(registry.live_count(), 0);
        assert!(registry.resolve(&text).is_none());
    }

    #[test]
    fn foreign_object_url_is_not_released() {
        let mut a = ObjectUrlRegistry::new();
        let mut b = ObjectUrlRegistry::new();
        let url = a.create(&artifact(b"x", "image/png"));
        assert!(!b.release(url));
        assert_eq!(a.live_count(), 1);
        // a is dropped with one live reference; that only logs
    }
}
