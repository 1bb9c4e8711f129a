//! Icon pipeline
//!
//! Icons arrive as URLs (`http(s)://`, `file://`) from container labels or
//! as raw base64 data from the dashboard. Whatever the source, the pipeline
//! is the same: decode (PNG/JPEG/WebP/BMP/ICO, detected by magic bytes),
//! pad to a centered transparent square, resize with Catmull-Rom, and emit
//! 64x64 and 256x256 PNGs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WatchcowError};

/// Timeout for icon downloads.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum length for a string to be sniffed as base64 icon data.
const BASE64_MIN_LEN: usize = 100;

/// Extensions probed in the local icon library.
const LIBRARY_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".bmp", ".ico"];

/// An icon source.
///
/// Two variants correspond to the two configuration origins: label-based
/// configuration carries URLs, dashboard-based configuration carries base64
/// data from an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum IconSource {
    Url {
        url: String,
        /// Base directory for resolving relative `file://` paths
        base_path: Option<PathBuf>,
    },
    Base64 {
        data: String,
    },
}

impl IconSource {
    /// Parses an icon source string. Returns `None` for an empty source and
    /// an error when the string is neither a recognized URL nor plausible
    /// base64 data.
    pub fn parse(source: &str, base_path: Option<&Path>) -> Result<Option<Self>> {
        if source.is_empty() {
            return Ok(None);
        }

        if source.starts_with("file://")
            || source.starts_with("http://")
            || source.starts_with("https://")
        {
            return Ok(Some(Self::Url {
                url: source.to_string(),
                base_path: base_path.map(Path::to_path_buf),
            }));
        }

        if is_plausible_base64(source) {
            return Ok(Some(Self::Base64 {
                data: source.to_string(),
            }));
        }

        Err(WatchcowError::Icon(format!(
            "unrecognized icon source format: {}",
            describe_source(source)
        )))
    }

    /// Loads and decodes the icon.
    pub async fn load(&self, client: &reqwest::Client) -> Result<DynamicImage> {
        match self {
            Self::Url { url, base_path } => {
                if let Some(path) = url.strip_prefix("file://") {
                    let resolved = resolve_file_path(path, base_path.as_deref())?;
                    let data = std::fs::read(&resolved).map_err(|e| {
                        WatchcowError::Icon(format!(
                            "failed to read {}: {}",
                            resolved.display(),
                            e
                        ))
                    })?;
                    decode_image_data(&data)
                } else {
                    let data = fetch_icon(client, url).await?;
                    decode_image_data(&data)
                }
            }
            Self::Base64 { data } => {
                let bytes = decode_base64_tolerant(data)
                    .map_err(|e| WatchcowError::Icon(format!("failed to decode base64: {}", e)))?;
                decode_image_data(&bytes)
            }
        }
    }
}

impl std::fmt::Display for IconSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url { url, .. } => write!(f, "URL({})", url),
            Self::Base64 { data } => write!(f, "Base64({})", describe_source(data)),
        }
    }
}

fn describe_source(s: &str) -> String {
    if s.chars().count() > 20 {
        format!("{}...", s.chars().take(20).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Resolves a `file://` payload to a filesystem path. Paths starting with
/// `/` are absolute; relative paths require a base directory (the compose
/// project working dir).
pub fn resolve_file_path(path: &str, base_path: Option<&Path>) -> Result<PathBuf> {
    if path.starts_with('/') {
        return Ok(PathBuf::from(path));
    }

    match base_path {
        Some(base) => Ok(base.join(path)),
        None => Err(WatchcowError::Icon(format!(
            "relative path requires base path: {}",
            path
        ))),
    }
}

/// Whether a string plausibly holds base64-encoded image data: long enough,
/// and a length-aligned prefix trial-decodes.
fn is_plausible_base64(s: &str) -> bool {
    if s.len() < BASE64_MIN_LEN || !s.is_ascii() {
        return false;
    }
    // Test a prefix aligned to the base64 quantum
    let test_len = (BASE64_MIN_LEN / 4) * 4;
    BASE64.decode(&s[..test_len]).is_ok()
}

/// Decodes base64 accepting both padded and unpadded input. Unpadded forms
/// show up when `=` is stripped by URL handling.
pub fn decode_base64_tolerant(s: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let padded;
    let input = match s.len() % 4 {
        2 => {
            padded = format!("{}==", s);
            &padded
        }
        3 => {
            padded = format!("{}=", s);
            &padded
        }
        _ => s,
    };
    BASE64.decode(input)
}

async fn fetch_icon(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(WatchcowError::Icon(format!(
            "failed to download icon: status {}",
            resp.status()
        )));
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Raster formats recognized by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconFormat {
    Png,
    Jpeg,
    WebP,
    Bmp,
    Ico,
}

/// Detects the image format from leading magic bytes; the file extension is
/// never consulted.
pub fn detect_format(data: &[u8]) -> Option<IconFormat> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(IconFormat::Png)
    } else if data.starts_with(b"\xff\xd8\xff") {
        Some(IconFormat::Jpeg)
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some(IconFormat::WebP)
    } else if data.starts_with(b"BM") {
        Some(IconFormat::Bmp)
    } else if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some(IconFormat::Ico)
    } else {
        None
    }
}

/// Decodes raw image bytes.
pub fn decode_image_data(data: &[u8]) -> Result<DynamicImage> {
    let format = detect_format(data)
        .ok_or_else(|| WatchcowError::Icon("unsupported image format".to_string()))?;

    match format {
        IconFormat::Ico => decode_ico(data),
        IconFormat::Png => Ok(image::load_from_memory_with_format(data, ImageFormat::Png)?),
        IconFormat::Jpeg => Ok(image::load_from_memory_with_format(
            data,
            ImageFormat::Jpeg,
        )?),
        IconFormat::WebP => Ok(image::load_from_memory_with_format(
            data,
            ImageFormat::WebP,
        )?),
        IconFormat::Bmp => Ok(image::load_from_memory_with_format(data, ImageFormat::Bmp)?),
    }
}

/// Size of the ICONDIR header and one ICONDIRENTRY.
const ICO_HEADER_LEN: usize = 6;
const ICO_ENTRY_LEN: usize = 16;

/// Decodes an ICO container by selecting the largest embedded image (by
/// pixel area) and decoding only that one. The winning entry is re-wrapped
/// as a single-image ICO so both PNG-compressed and DIB entries decode.
fn decode_ico(data: &[u8]) -> Result<DynamicImage> {
    let corrupt = || WatchcowError::Icon("corrupted ICO header".to_string());

    if data.len() < ICO_HEADER_LEN {
        return Err(corrupt());
    }
    let count = u16::from_le_bytes([data[4], data[5]]) as usize;
    if count == 0 || data.len() < ICO_HEADER_LEN + count * ICO_ENTRY_LEN {
        return Err(corrupt());
    }

    // Pick the entry with the largest pixel area; width/height of 0 mean 256
    let mut best: Option<(usize, u64)> = None;
    for i in 0..count {
        let off = ICO_HEADER_LEN + i * ICO_ENTRY_LEN;
        let entry = &data[off..off + ICO_ENTRY_LEN];
        let width = if entry[0] == 0 { 256u64 } else { entry[0] as u64 };
        let height = if entry[1] == 0 { 256u64 } else { entry[1] as u64 };
        let area = width * height;
        if best.map_or(true, |(_, a)| area > a) {
            best = Some((i, area));
        }
    }
    let (index, _) = best.ok_or_else(corrupt)?;

    let off = ICO_HEADER_LEN + index * ICO_ENTRY_LEN;
    let entry = &data[off..off + ICO_ENTRY_LEN];
    let size = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as usize;
    let data_offset = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]) as usize;
    if data_offset
        .checked_add(size)
        .map_or(true, |end| end > data.len())
    {
        return Err(corrupt());
    }

    // Single-image ICO: header, one directory entry pointing right past it,
    // then the image data
    let mut single = Vec::with_capacity(ICO_HEADER_LEN + ICO_ENTRY_LEN + size);
    single.extend_from_slice(&[0, 0, 1, 0, 1, 0]);
    single.extend_from_slice(&entry[..8]);
    single.extend_from_slice(&(size as u32).to_le_bytes());
    single.extend_from_slice(&((ICO_HEADER_LEN + ICO_ENTRY_LEN) as u32).to_le_bytes());
    single.extend_from_slice(&data[data_offset..data_offset + size]);

    Ok(image::load_from_memory_with_format(
        &single,
        ImageFormat::Ico,
    )?)
}

/// Pads a non-square image onto a centered transparent square canvas.
/// Square inputs pass through unchanged.
pub fn square_pad(img: &DynamicImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba8();
    if width == height {
        return rgba;
    }

    let side = width.max(height);
    let mut canvas = RgbaImage::new(side, side);
    let x = (side - width) / 2;
    let y = (side - height) / 2;
    imageops::overlay(&mut canvas, &rgba, x as i64, y as i64);
    canvas
}

/// Squares and downscales an icon to `size`x`size`.
pub fn render_icon(img: &DynamicImage, size: u32) -> RgbaImage {
    let squared = square_pad(img);
    imageops::resize(&squared, size, size, FilterType::CatmullRom)
}

/// Writes an icon variant as PNG.
pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// The embedded default icon: a light disc on a dark rounded canvas, drawn
/// programmatically so no binary asset ships with the daemon.
pub fn default_icon() -> DynamicImage {
    const SIDE: u32 = 256;
    let center = (SIDE / 2) as i64;
    let radius = (SIDE as i64) * 5 / 16;
    let mut img = RgbaImage::new(SIDE, SIDE);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = x as i64 - center;
        let dy = y as i64 - center;
        if dx * dx + dy * dy <= radius * radius {
            *pixel = image::Rgba([0xE8, 0xEB, 0xF0, 0xFF]);
        } else {
            *pixel = image::Rgba([0x2B, 0x31, 0x3E, 0xFF]);
        }
    }

    DynamicImage::ImageRgba8(img)
}

/// Resolves icons through the fallback chain: explicit source, then a
/// name-derived lookup (local library, then CDN), then the embedded
/// default.
pub struct IconResolver {
    client: reqwest::Client,
    cdn_template: String,
    data_share_path: Option<PathBuf>,
}

impl IconResolver {
    pub fn new(cdn_template: String, data_share_path: Option<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            cdn_template,
            data_share_path,
        }
    }

    /// Builds an icon URL for a bare name. The local icon library wins over
    /// the CDN; returns `None` when neither yields a source.
    pub fn build_icon_url(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();

        if let Some(dir) = &self.data_share_path {
            for ext in LIBRARY_EXTENSIONS {
                let candidate = dir.join(format!("{}{}", name, ext));
                if candidate.exists() {
                    return Some(format!("file://{}", candidate.display()));
                }
            }
        }

        if self.cdn_template.is_empty() {
            return None;
        }
        Some(self.cdn_template.replacen("%s", &name, 1))
    }

    /// Loads an entry icon, falling through the chain on every failure.
    /// `fallback_name` is the image basename for the default entry or the
    /// entry name for a named entry.
    pub async fn resolve(
        &self,
        explicit: &str,
        fallback_name: &str,
        base_path: Option<&Path>,
    ) -> DynamicImage {
        let fallback = self.build_icon_url(fallback_name).unwrap_or_default();
        for source_str in [explicit, fallback.as_str()] {
            if source_str.is_empty() {
                continue;
            }
            match IconSource::parse(source_str, base_path) {
                Ok(Some(source)) => match source.load(&self.client).await {
                    Ok(img) => return img,
                    Err(e) => {
                        tracing::warn!(source = %source, error = %e, "Failed to load icon, falling through");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Unusable icon source, falling through");
                }
            }
        }

        default_icon()
    }
}

/// Extracts the basename of a Docker image reference, without registry,
/// path, or tag: `neosmemo/memos:stable` becomes `memos`.
pub fn image_basename(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.split(':').next().unwrap_or(last).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbaImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgba([200, 30, 40, 255]);
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn ico_bytes(images: &[Vec<u8>], dims: &[(u8, u8)]) -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0];
        out.extend_from_slice(&(images.len() as u16).to_le_bytes());
        let mut offset = ICO_HEADER_LEN + images.len() * ICO_ENTRY_LEN;
        for (data, (w, h)) in images.iter().zip(dims) {
            out.extend_from_slice(&[*w, *h, 0, 0, 1, 0, 32, 0]);
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += data.len();
        }
        for data in images {
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_detect_format_by_magic() {
        assert_eq!(detect_format(&png_bytes(4, 4)), Some(IconFormat::Png));
        assert_eq!(detect_format(b"\xff\xd8\xff\xe0rest"), Some(IconFormat::Jpeg));
        assert_eq!(
            detect_format(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(IconFormat::WebP)
        );
        assert_eq!(detect_format(b"BM\x00\x00"), Some(IconFormat::Bmp));
        assert_eq!(
            detect_format(&[0x00, 0x00, 0x01, 0x00, 0x01, 0x00]),
            Some(IconFormat::Ico)
        );
        assert_eq!(detect_format(b"GIF89a"), None);
        assert_eq!(detect_format(b""), None);
    }

    #[test]
    fn test_decode_unsupported_format() {
        let err = decode_image_data(b"GIF89a not really").unwrap_err();
        assert!(err.to_string().contains("unsupported image format"));
    }

    #[test]
    fn test_ico_selects_largest_entry() {
        let small = png_bytes(32, 32);
        let large = png_bytes(64, 64);
        let ico = ico_bytes(&[small, large], &[(32, 32), (64, 64)]);

        let img = decode_image_data(&ico).unwrap();
        assert_eq!(img.dimensions(), (64, 64));

        // Both output sizes still come out of the pipeline
        assert_eq!(render_icon(&img, 64).dimensions(), (64, 64));
        assert_eq!(render_icon(&img, 256).dimensions(), (256, 256));
    }

    #[test]
    fn test_ico_zero_dimension_means_256() {
        let large = png_bytes(256, 256);
        let small = png_bytes(32, 32);
        // Zero directory bytes mean 256; that entry must win
        let ico = ico_bytes(&[large, small], &[(0, 0), (32, 32)]);
        let img = decode_image_data(&ico).unwrap();
        assert_eq!(img.dimensions(), (256, 256));
    }

    #[test]
    fn test_corrupted_ico_fails_cleanly() {
        // Truncated directory
        let err = decode_image_data(&[0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0xFF]).unwrap_err();
        assert!(err.to_string().contains("corrupted ICO header"));

        // Entry pointing past the end of the file
        let mut ico = ico_bytes(&[png_bytes(4, 4)], &[(4, 4)]);
        let len = ico.len();
        ico[14..18].copy_from_slice(&(len as u32 * 2).to_le_bytes());
        assert!(decode_image_data(&ico).is_err());
    }

    #[test]
    fn test_square_pad_centers_wide_image() {
        let img = DynamicImage::ImageRgba8({
            let mut i = RgbaImage::new(100, 50);
            for p in i.pixels_mut() {
                *p = image::Rgba([255, 255, 255, 255]);
            }
            i
        });

        let squared = square_pad(&img);
        assert_eq!(squared.dimensions(), (100, 100));
        // Transparent bands above and below, content in the middle
        assert_eq!(squared.get_pixel(50, 0)[3], 0);
        assert_eq!(squared.get_pixel(50, 99)[3], 0);
        assert_eq!(squared.get_pixel(50, 50)[3], 255);
        // Centering symmetry of the alpha channel
        for y in 0..50 {
            assert_eq!(
                squared.get_pixel(50, y)[3],
                squared.get_pixel(50, 99 - y)[3],
                "alpha not symmetric at row {}",
                y
            );
        }
    }

    #[test]
    fn test_render_icon_sizes_and_symmetry() {
        let img = decode_image_data(&png_bytes(100, 50)).unwrap();

        for size in [64u32, 256] {
            let out = render_icon(&img, size);
            assert_eq!(out.dimensions(), (size, size));
            // Padding survives the resize with its symmetry intact
            assert_eq!(out.get_pixel(size / 2, 0)[3], 0);
            assert_eq!(out.get_pixel(size / 2, size - 1)[3], 0);
            assert_eq!(out.get_pixel(size / 2, size / 2)[3], 255);
            for y in 0..size / 2 {
                assert_eq!(
                    out.get_pixel(size / 2, y)[3],
                    out.get_pixel(size / 2, size - 1 - y)[3]
                );
            }
        }
    }

    #[test]
    fn test_square_input_passthrough() {
        let img = decode_image_data(&png_bytes(64, 64)).unwrap();
        let squared = square_pad(&img);
        assert_eq!(squared.dimensions(), (64, 64));
        assert_eq!(squared.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn test_base64_padded_and_unpadded_decode_equal() {
        let data = png_bytes(8, 8);
        let padded = BASE64.encode(&data);
        let unpadded = padded.trim_end_matches('=').to_string();

        assert_eq!(decode_base64_tolerant(&padded).unwrap(), data);
        assert_eq!(decode_base64_tolerant(&unpadded).unwrap(), data);
    }

    #[test]
    fn test_parse_url_sources() {
        let source = IconSource::parse("https://example.com/icon.png", None)
            .unwrap()
            .unwrap();
        assert!(matches!(source, IconSource::Url { .. }));

        let source = IconSource::parse("file:///abs/icon.png", Some(Path::new("/base")))
            .unwrap()
            .unwrap();
        match source {
            IconSource::Url { url, base_path } => {
                assert_eq!(url, "file:///abs/icon.png");
                assert_eq!(base_path.as_deref(), Some(Path::new("/base")));
            }
            other => panic!("expected Url source, got {}", other),
        }
    }

    #[test]
    fn test_parse_base64_source() {
        let data = BASE64.encode(png_bytes(16, 16));
        assert!(data.len() >= BASE64_MIN_LEN);
        let source = IconSource::parse(&data, None).unwrap().unwrap();
        assert!(matches!(source, IconSource::Base64 { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(IconSource::parse("not an icon", None).is_err());
        // Long but not base64
        let junk = "!@#$".repeat(50);
        assert!(IconSource::parse(&junk, None).is_err());
    }

    #[test]
    fn test_parse_empty_is_none() {
        assert!(IconSource::parse("", None).unwrap().is_none());
    }

    #[test]
    fn test_resolve_file_path() {
        assert_eq!(
            resolve_file_path("/abs/icon.png", None).unwrap(),
            PathBuf::from("/abs/icon.png")
        );
        assert_eq!(
            resolve_file_path("./icon.png", Some(Path::new("/compose/dir"))).unwrap(),
            PathBuf::from("/compose/dir/./icon.png")
        );
        assert!(resolve_file_path("icon.png", None).is_err());
    }

    #[test]
    fn test_image_basename() {
        assert_eq!(image_basename("neosmemo/memos:stable"), "memos");
        assert_eq!(image_basename("nginx"), "nginx");
        assert_eq!(image_basename("ghcr.io/acme/app:v2"), "app");
    }

    #[test]
    fn test_build_icon_url_prefers_library() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("memos.png"), png_bytes(4, 4)).unwrap();

        let resolver = IconResolver::new(
            "https://cdn.example/%s.png".to_string(),
            Some(dir.path().to_path_buf()),
        );

        let url = resolver.build_icon_url("Memos").unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("memos.png"));

        let url = resolver.build_icon_url("other").unwrap();
        assert_eq!(url, "https://cdn.example/other.png");
    }

    #[test]
    fn test_default_icon_shape() {
        let icon = default_icon();
        assert_eq!(icon.dimensions(), (256, 256));
        let rgba = icon.to_rgba8();
        // Disc center differs from the canvas corner
        assert_ne!(rgba.get_pixel(128, 128), rgba.get_pixel(2, 2));
    }
}
