use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use moodboard_contracts::grid::ImageDimensions;
use moodboard_contracts::{MoodboardError, Result};

const TEMP_DIR_MARKERS: &[&str] = &["/tmp/", "/private/var/folders"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Generated,
    Edited,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Edited => "edited",
        }
    }
}

/// The directory every generated or edited board is written to.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// `{kind}_{YYYYmmdd_HHMMSS}_{8 hex}.png`
    pub fn unique_name(kind: AssetKind) -> String {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{timestamp}_{}.png", kind.as_str(), &id[..8])
    }

    pub fn next_path(&self, kind: AssetKind) -> PathBuf {
        self.dir.join(Self::unique_name(kind))
    }

    /// Maps a user-supplied image reference onto a file that exists.
    ///
    /// URLs point at something this store once served, so only their last
    /// segment is looked up here. Upload temp paths prefer the same-named
    /// file in the store and fall back to the temp file itself.
    pub fn resolve_reference(&self, raw: &str) -> Result<PathBuf> {
        let reference = raw.trim();
        if reference.starts_with("http") {
            let last_segment = reference.rsplit('/').next().unwrap_or(reference);
            let file_name = last_segment.rsplit('=').next().unwrap_or(last_segment);
            let candidate = self.dir.join(file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            return Err(MoodboardError::not_found(candidate));
        }

        let path = PathBuf::from(reference);
        if is_temp_like(reference) {
            if let Some(file_name) = path.file_name() {
                let candidate = self.dir.join(file_name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
                if path.is_file() {
                    return Ok(path);
                }
                return Err(MoodboardError::not_found(candidate));
            }
        }

        if path.is_file() {
            Ok(path)
        } else {
            Err(MoodboardError::not_found(path))
        }
    }

    /// Decodes model output and writes it to `target`, as PNG unless the
    /// target's extension names another format.
    pub fn persist(&self, bytes: &[u8], target: &Path) -> Result<PersistedImage> {
        let decoded = decode(bytes)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let format = ImageFormat::from_path(target).unwrap_or(ImageFormat::Png);
        decoded
            .save_with_format(target, format)
            .map_err(|err| {
                MoodboardError::Image(format!("failed to save {}: {err}", target.display()))
            })?;
        tracing::info!(path = %target.display(), "saved image");
        Ok(PersistedImage {
            png: encode_png(&decoded)?,
            dimensions: dimensions_of(&decoded)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PersistedImage {
    pub png: Vec<u8>,
    pub dimensions: ImageDimensions,
}

fn is_temp_like(reference: &str) -> bool {
    TEMP_DIR_MARKERS
        .iter()
        .any(|marker| reference.contains(marker))
        || reference.to_lowercase().contains("gradio")
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|err| MoodboardError::Image(format!("could not decode image data: {err}")))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| MoodboardError::Image(format!("could not encode PNG: {err}")))?;
    Ok(out.into_inner())
}

pub fn dimensions_of(image: &DynamicImage) -> Result<ImageDimensions> {
    ImageDimensions::new(image.width(), image.height())
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])));
        encode_png(&image).unwrap_or_default()
    }

    #[test]
    fn unique_names_follow_the_output_pattern() {
        let name = OutputStore::unique_name(AssetKind::Edited);
        let parts: Vec<&str> = name.trim_end_matches(".png").split('_').collect();
        assert_eq!(parts.len(), 4, "{name}");
        assert_eq!(parts[0], "edited");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(name, OutputStore::unique_name(AssetKind::Edited));
    }

    #[test]
    fn url_references_map_into_the_store() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = OutputStore::new(temp.path());
        fs::write(temp.path().join("generated_a.png"), png(2, 2))?;

        let found =
            store.resolve_reference("http://127.0.0.1:7860/file=/srv/outputs/generated_a.png")?;
        assert_eq!(found, temp.path().join("generated_a.png"));
        let found = store.resolve_reference("https://host/outputs/generated_a.png")?;
        assert_eq!(found, temp.path().join("generated_a.png"));

        let err = store
            .resolve_reference("https://host/outputs/missing.png")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Image file not found. Tried to locate: {}",
                temp.path().join("missing.png").display()
            )
        );
        Ok(())
    }

    #[test]
    fn temp_references_prefer_the_store_copy() -> anyhow::Result<()> {
        let outputs = tempfile::tempdir()?;
        let store = OutputStore::new(outputs.path());
        fs::write(outputs.path().join("generated_b.png"), png(2, 2))?;

        let found = store.resolve_reference("/tmp/gradio/abc123/generated_b.png")?;
        assert_eq!(found, outputs.path().join("generated_b.png"));

        assert!(matches!(
            store.resolve_reference("/tmp/gradio/abc123/nowhere.png"),
            Err(MoodboardError::ResourceNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn temp_references_fall_back_to_the_upload_itself() -> anyhow::Result<()> {
        let outputs = tempfile::tempdir()?;
        let store = OutputStore::new(outputs.path());
        let uploads = tempfile::tempdir()?;
        let upload_dir = uploads.path().join("gradio").join("f00d");
        fs::create_dir_all(&upload_dir)?;
        let upload = upload_dir.join("uploaded_board.png");
        fs::write(&upload, png(3, 3))?;

        let found = store.resolve_reference(&upload.to_string_lossy())?;
        assert_eq!(found, upload);
        assert!(!outputs.path().join("uploaded_board.png").exists());
        Ok(())
    }

    #[test]
    fn plain_paths_must_exist() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = OutputStore::new(temp.path().join("outputs"));
        let board = temp.path().join("board.png");
        fs::write(&board, png(2, 2))?;

        let reference = board.to_string_lossy().to_string();
        let resolved = store.resolve_reference(&reference)?;
        assert!(resolved.is_file());
        assert!(store
            .resolve_reference(&format!("{reference}.missing"))
            .is_err());
        Ok(())
    }

    #[test]
    fn persist_writes_png_and_reports_dimensions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = OutputStore::new(temp.path().join("outputs"));
        let target = store.next_path(AssetKind::Generated);

        let saved = store.persist(&png(12, 7), &target)?;
        assert!(target.is_file());
        assert_eq!(saved.dimensions, ImageDimensions::new(12, 7)?);
        let reread = image::open(&target)?;
        assert_eq!((reread.width(), reread.height()), (12, 7));

        assert!(matches!(
            store.persist(b"not an image", &target),
            Err(MoodboardError::Image(_))
        ));
        Ok(())
    }
}
