//! MuPDF-backed renderer producing PNG page images

use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::backend::{DocumentHandle, RenderBackend};
use super::request::WorkerFault;
use super::types::{DocumentSource, PageSize, RenderSpec};

const PDF_MAGIC: &str = "application/pdf";

/// Renders PDF pages through MuPDF
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfBackend;

impl RenderBackend for MupdfBackend {
    fn open(&self, source: &DocumentSource) -> Result<Box<dyn DocumentHandle>, WorkerFault> {
        let doc = match source {
            DocumentSource::File(path) => Document::open(&path.to_string_lossy())?,
            DocumentSource::Bytes(data) => Document::from_bytes(data, PDF_MAGIC)?,
        };
        let page_count = doc.page_count()?;
        let page_count = usize::try_from(page_count)
            .map_err(|_| WorkerFault::generic(format!("invalid page count {page_count}")))?;

        Ok(Box::new(MupdfHandle { doc, page_count }))
    }
}

struct MupdfHandle {
    doc: Document,
    page_count: usize,
}

impl MupdfHandle {
    fn check_range(&self, index: usize) -> Result<i32, WorkerFault> {
        if index >= self.page_count {
            return Err(WorkerFault::PageOutOfRange {
                page: index,
                page_count: self.page_count,
            });
        }
        i32::try_from(index).map_err(|_| WorkerFault::generic("page index overflow"))
    }
}

impl DocumentHandle for MupdfHandle {
    fn page_count(&self) -> usize {
        self.page_count
    }

    // MuPDF reports bounds after applying /Rotate, so no swap is needed here.
    fn page_size(&self, index: usize) -> Result<PageSize, WorkerFault> {
        let page = self.doc.load_page(self.check_range(index)?)?;
        let bounds = page.bounds()?;
        Ok(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn render_page(&self, index: usize, spec: &RenderSpec) -> Result<Vec<u8>, WorkerFault> {
        let page = self.doc.load_page(self.check_range(index)?)?;
        let mag = spec.resolution.scale_factor();
        let transform = Matrix::new_scale(mag, mag);

        let rgb = Colorspace::device_rgb();
        let pixmap = page.to_pixmap(&transform, &rgb, false, false)?;

        encode_png(&pixmap)
    }
}

fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, WorkerFault> {
    let pixels = packed_rgb(pixmap)?;
    let encode_err = |e: png::EncodingError| WorkerFault::Encode(e.to_string());

    let mut png_data = Vec::new();
    let mut encoder = png::Encoder::new(&mut png_data, pixmap.width(), pixmap.height());
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);
    encoder
        .write_header()
        .and_then(|mut writer| writer.write_image_data(&pixels))
        .map_err(encode_err)?;

    Ok(png_data)
}

/// Tightly packed RGB samples, dropping alpha and row padding
fn packed_rgb(pixmap: &Pixmap) -> Result<Vec<u8>, WorkerFault> {
    let channels = pixmap.n() as usize;
    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();

    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }
    if channels < 3 || width * channels > stride || samples.len() < stride * height {
        return Err(WorkerFault::Encode(format!(
            "unexpected pixmap layout: {channels} channels, {width}x{height}, stride {stride}"
        )));
    }

    Ok(samples
        .chunks(stride)
        .take(height)
        .flat_map(|row| row[..width * channels].chunks_exact(channels))
        .flat_map(|px| &px[..3])
        .copied()
        .collect())
}
