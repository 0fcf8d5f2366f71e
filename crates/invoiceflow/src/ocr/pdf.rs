//! Input format detection and PDF rasterization.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::OcrError;

/// DPI used when rasterizing PDF pages unless configured otherwise.
pub const DEFAULT_DPI: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(image::ImageFormat),
}

/// Sniffs the format from the leading bytes. The file extension is ignored.
pub fn detect_format(bytes: &[u8]) -> Option<DocumentKind> {
    if bytes.starts_with(b"%PDF-") {
        return Some(DocumentKind::Pdf);
    }
    image::guess_format(bytes).ok().map(DocumentKind::Image)
}

/// A file in the scratch directory that is removed when the guard drops.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Renders a single PDF page to PNG bytes.
pub trait PageRasterizer: Send + Sync {
    fn render_page(
        &self,
        pdf_path: &Path,
        page: u32,
        dpi: u32,
        scratch_dir: &Path,
    ) -> Result<Vec<u8>, OcrError>;
}

/// Rasterizes with `pdftoppm` from poppler-utils.
#[derive(Debug, Default, Clone)]
pub struct PdftoppmRasterizer;

impl PageRasterizer for PdftoppmRasterizer {
    fn render_page(
        &self,
        pdf_path: &Path,
        page: u32,
        dpi: u32,
        scratch_dir: &Path,
    ) -> Result<Vec<u8>, OcrError> {
        let _span = tracing::info_span!("ocr.rasterize", page, dpi).entered();

        std::fs::create_dir_all(scratch_dir).map_err(|e| {
            OcrError::Conversion(format!(
                "Failed to create scratch directory {}: {}",
                scratch_dir.display(),
                e
            ))
        })?;

        let output_prefix = scratch_dir.join(format!("invoiceflow_page_{}", uuid::Uuid::new_v4()));

        // pdftoppm pads the page suffix depending on the page count.
        let candidates: Vec<ScratchFile> = [
            format!("{}-{}.png", output_prefix.display(), page),
            format!("{}-{:02}.png", output_prefix.display(), page),
            format!("{}-{:03}.png", output_prefix.display(), page),
        ]
        .into_iter()
        .map(|p| ScratchFile::new(PathBuf::from(p)))
        .collect();

        let output = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg(pdf_path)
            .arg(&output_prefix)
            .output()
            .map_err(|e| {
                OcrError::Conversion(format!(
                    "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(OcrError::Conversion(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let rendered = candidates
            .iter()
            .find(|c| c.path().exists())
            .ok_or_else(|| OcrError::Conversion("Failed to find rendered page image".to_string()))?;

        std::fs::read(rendered.path())
            .map_err(|e| OcrError::Conversion(format!("Failed to read rendered image: {}", e)))
    }
}

/// The bytes that will be sent to the engine.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    pub converted_from_pdf: bool,
}

/// Turns an input document into a single engine-ready image. PDFs are
/// reduced to their first page.
pub fn prepare_document(
    path: &Path,
    bytes: Vec<u8>,
    rasterizer: &dyn PageRasterizer,
    dpi: u32,
    scratch_dir: &Path,
) -> Result<PreparedImage, OcrError> {
    let stem = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();

    match detect_format(&bytes) {
        Some(DocumentKind::Pdf) => {
            match lopdf::Document::load_mem(&bytes) {
                Ok(doc) => {
                    let pages = doc.get_pages().len();
                    if pages > 1 {
                        log::info!(
                            "{} has {} pages; only the first page is sent for extraction",
                            path.display(),
                            pages
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "lopdf failed to parse {}: {}. Rasterizing anyway.",
                        path.display(),
                        e
                    );
                }
            }

            let png = rasterizer.render_page(path, 1, dpi, scratch_dir)?;
            if png.is_empty() {
                return Err(OcrError::Conversion(
                    "Rasterizer produced an empty image".to_string(),
                ));
            }
            Ok(PreparedImage {
                bytes: png,
                filename: format!("{}.png", stem),
                mime_type: "image/png".to_string(),
                converted_from_pdf: true,
            })
        }
        Some(DocumentKind::Image(format)) => {
            let mime_type = format.to_mime_type().to_string();
            let extension = format.extensions_str().first().copied().unwrap_or("img");
            Ok(PreparedImage {
                bytes,
                filename: format!("{}.{}", stem, extension),
                mime_type,
                converted_from_pdf: false,
            })
        }
        None => Err(OcrError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    struct FixedRasterizer(Vec<u8>);

    impl PageRasterizer for FixedRasterizer {
        fn render_page(&self, _: &Path, page: u32, dpi: u32, _: &Path) -> Result<Vec<u8>, OcrError> {
            assert_eq!(page, 1);
            assert_eq!(dpi, DEFAULT_DPI);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_detect_format_ignores_extension() {
        assert_eq!(detect_format(b"%PDF-1.7\n..."), Some(DocumentKind::Pdf));
        assert_eq!(
            detect_format(PNG_MAGIC),
            Some(DocumentKind::Image(image::ImageFormat::Png))
        );
        assert_eq!(
            detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]),
            Some(DocumentKind::Image(image::ImageFormat::Jpeg))
        );
        assert_eq!(detect_format(b"hello, world"), None);
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, b"png").unwrap();
        {
            let guard = ScratchFile::new(path.clone());
            assert!(guard.path().exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_prepare_image_passes_bytes_through() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = prepare_document(
            Path::new("/in/scan.pdf"),
            PNG_MAGIC.to_vec(),
            &FixedRasterizer(vec![]),
            DEFAULT_DPI,
            dir.path(),
        )
        .unwrap();
        assert!(!prepared.converted_from_pdf);
        assert_eq!(prepared.mime_type, "image/png");
        assert_eq!(prepared.filename, "scan.png");
        assert_eq!(prepared.bytes, PNG_MAGIC);
    }

    #[test]
    fn test_prepare_pdf_uses_rasterizer() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = prepare_document(
            Path::new("/in/invoice.pdf"),
            b"%PDF-1.4 not really".to_vec(),
            &FixedRasterizer(PNG_MAGIC.to_vec()),
            DEFAULT_DPI,
            dir.path(),
        )
        .unwrap();
        assert!(prepared.converted_from_pdf);
        assert_eq!(prepared.filename, "invoice.png");
        assert_eq!(prepared.bytes, PNG_MAGIC);
    }

    #[test]
    fn test_prepare_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_document(
            Path::new("/in/notes.txt"),
            b"plain text".to_vec(),
            &FixedRasterizer(vec![]),
            DEFAULT_DPI,
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_pdftoppm_failure_leaves_no_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let missing = dir.path().join("missing.pdf");

        let err = PdftoppmRasterizer
            .render_page(&missing, 1, DEFAULT_DPI, &scratch)
            .unwrap_err();
        assert!(matches!(err, OcrError::Conversion(_)));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
