use std::fs;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::error::{GatewayError, GatewayResult};

/// Image content types accepted for uploads and produced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
    Webp,
}

impl ImageMime {
    pub const ALL: [ImageMime; 3] = [ImageMime::Png, ImageMime::Jpeg, ImageMime::Webp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn from_content_type(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let essence = lowered.split(';').next().unwrap_or("").trim();
        match essence {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Content type detected from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    mime: ImageMime,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime: ImageMime) -> Self {
        Self { bytes, mime }
    }

    /// Validates a user-picked file. The declared type must be on the
    /// allow-list and agree with the sniffed content when it can be sniffed.
    pub fn from_upload(bytes: Vec<u8>, declared: &str) -> GatewayResult<Self> {
        let Some(mime) = ImageMime::from_content_type(declared) else {
            return Err(GatewayError::malformed_upload(format!(
                "'{}' is not one of {}",
                declared.trim(),
                allowed_list()
            )));
        };
        if bytes.is_empty() {
            return Err(GatewayError::malformed_upload("file is empty"));
        }
        match ImageMime::sniff(&bytes) {
            Some(sniffed) if sniffed != mime => Err(GatewayError::malformed_upload(format!(
                "declared {} but content is {}",
                mime.as_str(),
                sniffed.as_str()
            ))),
            None => Err(GatewayError::malformed_upload(format!(
                "content is not a {} image",
                mime.as_str()
            ))),
            Some(_) => Ok(Self { bytes, mime }),
        }
    }

    pub fn open(path: &Path) -> GatewayResult<Self> {
        let Some(mime) = ImageMime::from_path(path) else {
            return Err(GatewayError::malformed_upload(format!(
                "{} must end in .png, .jpg, .jpeg or .webp",
                path.display()
            )));
        };
        let bytes = fs::read(path).map_err(|err| {
            GatewayError::malformed_upload(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_upload(bytes, mime.as_str())
    }

    /// Decodes an inline image returned by the provider. The provider's
    /// content type is trusted when allow-listed, otherwise it is sniffed.
    pub fn from_base64(data: &str, content_type: Option<&str>) -> GatewayResult<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|err| GatewayError::transport(format!("image base64 decode failed: {err}")))?;
        let mime = content_type
            .and_then(ImageMime::from_content_type)
            .or_else(|| ImageMime::sniff(&bytes))
            .unwrap_or(ImageMime::Png);
        Ok(Self { bytes, mime })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.bytes).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn allowed_list() -> String {
    ImageMime::ALL
        .iter()
        .map(ImageMime::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::{ImageMime, ImagePayload};
    use crate::error::GatewayError;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn content_type_parsing_is_lenient_about_case_and_params() {
        assert_eq!(ImageMime::from_content_type("IMAGE/JPG"), Some(ImageMime::Jpeg));
        assert_eq!(
            ImageMime::from_content_type("image/webp; q=1"),
            Some(ImageMime::Webp)
        );
        assert_eq!(ImageMime::from_content_type("image/gif"), None);
    }

    #[test]
    fn upload_rejects_types_outside_allow_list() {
        let err = ImagePayload::from_upload(png_bytes(), "image/gif").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedUpload(_)));
    }

    #[test]
    fn upload_rejects_content_that_disagrees_with_declared_type() {
        let err = ImagePayload::from_upload(png_bytes(), "image/jpeg").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedUpload(message) if message.contains("image/png")));

        let err = ImagePayload::from_upload(b"hello".to_vec(), "image/png").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedUpload(_)));
    }

    #[test]
    fn open_validates_extension_and_content() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let good = temp.path().join("cat.PNG");
        fs::write(&good, png_bytes())?;
        let payload = ImagePayload::open(&good)?;
        assert_eq!(payload.mime(), ImageMime::Png);

        let bad = temp.path().join("notes.txt");
        fs::write(&bad, "text")?;
        assert!(matches!(
            ImagePayload::open(&bad),
            Err(GatewayError::MalformedUpload(_))
        ));
        Ok(())
    }

    #[test]
    fn provider_payload_falls_back_to_sniffing() -> anyhow::Result<()> {
        let encoded = ImagePayload::new(png_bytes(), ImageMime::Png).to_base64();
        let decoded = ImagePayload::from_base64(&encoded, Some("application/octet-stream"))?;
        assert_eq!(decoded.mime(), ImageMime::Png);
        assert_eq!(decoded.bytes(), png_bytes().as_slice());
        Ok(())
    }
}
