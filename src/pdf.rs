use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

pub trait ArtifactEncoder: Send + Sync {
    /// With the leading dot, e.g. `.pdf`.
    fn extension(&self) -> &'static str;
    fn encode(&self, images: &[PathBuf], out_path: &Path) -> anyhow::Result<()>;
}

/// One PDF page per image, sized to the image at 96 dpi. JPEG sources are
/// embedded as-is; other formats are re-encoded to JPEG.
#[derive(Debug, Clone)]
pub struct PdfEncoder {
    pub jpeg_quality: u8,
}

impl Default for PdfEncoder {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

struct PageImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: Vec<u8>,
}

impl PdfEncoder {
    fn load(&self, path: &Path) -> anyhow::Result<PageImage> {
        let reader = ImageReader::open(path)
            .with_context(|| format!("open image: {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("sniff image format: {}", path.display()))?;
        let format = reader.format();
        let image = reader
            .decode()
            .with_context(|| format!("decode image: {}", path.display()))?;

        let passthrough = match (format, image.color()) {
            (Some(ImageFormat::Jpeg), ColorType::Rgb8) => Some("DeviceRGB"),
            (Some(ImageFormat::Jpeg), ColorType::L8) => Some("DeviceGray"),
            _ => None,
        };
        if let Some(color_space) = passthrough {
            let jpeg = std::fs::read(path)
                .with_context(|| format!("read image: {}", path.display()))?;
            return Ok(PageImage {
                width: image.width(),
                height: image.height(),
                color_space,
                jpeg,
            });
        }

        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut jpeg = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality);
        rgb.write_with_encoder(encoder)
            .with_context(|| format!("re-encode image: {}", path.display()))?;
        Ok(PageImage {
            width: rgb.width(),
            height: rgb.height(),
            color_space: "DeviceRGB",
            jpeg,
        })
    }
}

impl ArtifactEncoder for PdfEncoder {
    fn extension(&self) -> &'static str {
        ".pdf"
    }

    fn encode(&self, images: &[PathBuf], out_path: &Path) -> anyhow::Result<()> {
        if images.is_empty() {
            anyhow::bail!("no images to encode");
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(images.len());

        for path in images {
            let page = self.load(path)?;
            let width = page.width as f32 * 72.0 / 96.0;
            let height = page.height as f32 * 72.0 / 96.0;

            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => page.width as i64,
                    "Height" => page.height as i64,
                    "ColorSpace" => page.color_space,
                    "BitsPerComponent" => 8_i64,
                    "Filter" => "DCTDecode",
                },
                page.jpeg,
            ));

            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            width.into(),
                            0_i64.into(),
                            0_i64.into(),
                            height.into(),
                            0_i64.into(),
                            0_i64.into(),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().context("encode page content")?,
            ));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0_i64.into(), 0_i64.into(), width.into(), height.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let file = std::fs::File::create(out_path)
            .with_context(|| format!("create artifact: {}", out_path.display()))?;
        let mut writer = BufWriter::new(file);
        doc.save_to(&mut writer)
            .with_context(|| format!("write artifact: {}", out_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush artifact: {}", out_path.display()))?;
        Ok(())
    }
}

/// Whether `path` decodes as an image. Used to drop corrupt or truncated
/// downloads before encoding.
pub fn decodes_as_image(path: &Path) -> bool {
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(_) => return false,
    };
    reader.decode().is_ok()
}

pub fn page_count(bytes: &[u8]) -> anyhow::Result<usize> {
    let doc = Document::load_mem(bytes).context("parse pdf")?;
    Ok(doc.get_pages().len())
}
