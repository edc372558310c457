// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page intake: decodes the image bytes delivered by ingestion, rejects
// anything undecodable before it reaches an engine, and downscales oversized
// scans so recognition memory stays bounded.

use std::sync::Arc;

use image::{DynamicImage, ImageFormat, imageops::FilterType};
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{DocumentId, SourceFormat};
use tracing::{debug, info, instrument};

/// A page as delivered by the ingestion layer.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub document_id: DocumentId,
    pub page_index: u32,
    pub bytes: Vec<u8>,
    /// Format hint from the ingestion layer; sniffed from the bytes if absent.
    pub format: Option<SourceFormat>,
}

impl PageInput {
    pub fn new(document_id: DocumentId, page_index: u32, bytes: Vec<u8>) -> Self {
        Self {
            document_id,
            page_index,
            bytes,
            format: None,
        }
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// A decoded page image, cheap to clone and share between engine tasks.
#[derive(Debug, Clone)]
pub struct PageImage {
    bytes: Arc<[u8]>,
    image: Arc<DynamicImage>,
    format: SourceFormat,
    /// Dimensions of the original image, before any downscale.
    original_dimensions: (u32, u32),
}

impl PageImage {
    /// Decode raw encoded bytes (PNG, JPEG, TIFF, ...).
    ///
    /// Fails with [`LecternError::Input`] for empty, undecodable or
    /// zero-sized images.
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn decode(data: &[u8], hint: Option<SourceFormat>) -> Result<Self> {
        if data.is_empty() {
            return Err(LecternError::Input("empty image payload".into()));
        }

        let sniffed = image::guess_format(data).ok();
        let format = hint
            .filter(|f| *f != SourceFormat::Other)
            .or_else(|| sniffed.map(source_format))
            .unwrap_or(SourceFormat::Other);

        let image = image::load_from_memory(data)
            .map_err(|err| LecternError::Input(format!("failed to decode image: {err}")))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(LecternError::Input(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }

        debug!(
            width = image.width(),
            height = image.height(),
            ?format,
            "page image decoded"
        );

        Ok(Self {
            bytes: Arc::from(data),
            original_dimensions: (image.width(), image.height()),
            image: Arc::new(image),
            format,
        })
    }

    /// Decode a [`PageInput`].
    pub fn from_input(input: &PageInput) -> Result<Self> {
        Self::decode(&input.bytes, input.format)
    }

    /// Wrap an already-decoded image. The bytes are re-encoded as PNG so the
    /// adapter boundary always has an encoded payload.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|err| LecternError::Input(format!("failed to encode PNG: {err}")))?;
        Self::decode(buf.get_ref(), Some(SourceFormat::Png))
    }

    /// Downscale so neither side exceeds `max_dimension`, keeping the aspect
    /// ratio. Smaller images are returned unchanged.
    pub fn preprocess(self, max_dimension: u32) -> Self {
        let (width, height) = (self.image.width(), self.image.height());
        if width <= max_dimension && height <= max_dimension {
            return self;
        }

        info!(
            width,
            height, max_dimension, "downscaling oversized page before recognition"
        );
        let resized = self
            .image
            .resize(max_dimension, max_dimension, FilterType::Lanczos3);

        Self {
            image: Arc::new(resized),
            ..self
        }
    }

    /// The original encoded bytes, as received from ingestion.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The (possibly downscaled) decoded image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn original_dimensions(&self) -> (u32, u32) {
        self.original_dimensions
    }
}

fn source_format(format: ImageFormat) -> SourceFormat {
    match format {
        ImageFormat::Png => SourceFormat::Png,
        ImageFormat::Jpeg => SourceFormat::Jpeg,
        ImageFormat::Tiff => SourceFormat::Tiff,
        ImageFormat::Bmp => SourceFormat::Bmp,
        ImageFormat::WebP => SourceFormat::WebP,
        _ => SourceFormat::Other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    /// Encode a grayscale test image as PNG bytes.
    pub(crate) fn png_bytes(width: u32, height: u32, fill: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([fill(x, y)]));
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    #[test]
    fn decode_png_sniffs_format() {
        let bytes = png_bytes(20, 10, |_, _| 255);
        let page = PageImage::decode(&bytes, None).expect("decode");
        assert_eq!(page.format(), SourceFormat::Png);
        assert_eq!((page.width(), page.height()), (20, 10));
        assert_eq!(page.bytes(), bytes.as_slice());
    }

    #[test]
    fn empty_payload_is_input_error() {
        let err = PageImage::decode(&[], None).unwrap_err();
        assert!(matches!(err, LecternError::Input(_)));
    }

    #[test]
    fn garbage_payload_is_input_error() {
        let err = PageImage::decode(b"definitely not an image", None).unwrap_err();
        assert!(matches!(err, LecternError::Input(_)));
    }

    #[test]
    fn preprocess_downscales_large_pages() {
        let bytes = png_bytes(400, 200, |x, _| (x % 255) as u8);
        let page = PageImage::decode(&bytes, None).unwrap().preprocess(100);
        assert_eq!(page.width(), 100);
        assert_eq!(page.height(), 50);
        assert_eq!(page.original_dimensions(), (400, 200));
    }

    #[test]
    fn preprocess_keeps_small_pages() {
        let bytes = png_bytes(40, 30, |_, _| 0);
        let page = PageImage::decode(&bytes, None).unwrap().preprocess(1600);
        assert_eq!((page.width(), page.height()), (40, 30));
    }

    #[test]
    fn from_input_uses_hint() {
        let bytes = png_bytes(8, 8, |_, _| 128);
        let input = PageInput::new(DocumentId::new(), 0, bytes).with_format(SourceFormat::Png);
        let page = PageImage::from_input(&input).unwrap();
        assert_eq!(page.format(), SourceFormat::Png);
    }
}
