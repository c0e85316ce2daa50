//! Prompt assembly.
//!
//! Templates are plain text with `{NAME}` placeholders. Filling one is a
//! [`Substitution`]: optional section deletions, then a single pass that
//! swaps each known placeholder for its value. Values are never re-scanned,
//! so a subject or edit request that happens to contain `{X_TOP}` is sent
//! verbatim.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};

use indexmap::IndexMap;
use regex::{Captures, Regex};

use crate::error::{MoodboardError, Result};
use crate::grid::{locate, BoundingBox, ImageDimensions};

pub const NOT_AVAILABLE: &str = "N/A";

pub const SUBJECT: &str = "SUBJECT_PLACEHOLDER";
pub const EDIT_REQUEST: &str = "EDIT_REQUEST";
pub const IMAGE_WIDTH: &str = "IMAGE_WIDTH";
pub const IMAGE_HEIGHT: &str = "IMAGE_HEIGHT";

/// Absolute pixel placeholders, in `x_top, y_top, x_bottom, y_bottom, width, height` order.
pub const PIXEL_PLACEHOLDERS: [&str; 6] =
    ["X_TOP", "Y_TOP", "X_BOTTOM", "Y_BOTTOM", "WIDTH", "HEIGHT"];

pub const NORMALIZED_PLACEHOLDERS: [&str; 6] = [
    "X_TOP_NORM",
    "Y_TOP_NORM",
    "X_BOTTOM_NORM",
    "Y_BOTTOM_NORM",
    "WIDTH_NORM",
    "HEIGHT_NORM",
];

pub const GRID_PLACEHOLDERS: [&str; 6] = [
    "GRID_ROW",
    "GRID_ROW_NAME",
    "GRID_COLUMN",
    "GRID_CELL",
    "GRID_CELL_DESCRIPTION",
    "GRID_OVERLAPPING_CELLS",
];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Z0-9_]+)\}").expect("valid placeholder pattern"));
static GRID_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\*\*Grid Cell Location.*?Overlapping Cells:.*?\n")
        .expect("valid grid section pattern")
});
static TECHNICAL_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\*\*Technical Reference.*?Full image size:.*?pixels\n")
        .expect("valid technical section pattern")
});
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("valid blank line pattern"));

/// Template blocks that only make sense when an edit region is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    GridCellLocation,
    TechnicalReference,
}

impl Section {
    fn pattern(self) -> &'static Regex {
        match self {
            Self::GridCellLocation => &GRID_SECTION,
            Self::TechnicalReference => &TECHNICAL_SECTION,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Substitution {
    drop_sections: Vec<Section>,
    fills: IndexMap<&'static str, String>,
    collapse_blank_lines: bool,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(mut self, placeholder: &'static str, value: impl Into<String>) -> Self {
        self.fills.insert(placeholder, value.into());
        self
    }

    pub fn fill_all<'a>(
        mut self,
        placeholders: impl IntoIterator<Item = &'static str>,
        values: impl IntoIterator<Item = Cow<'a, str>>,
    ) -> Self {
        for (placeholder, value) in placeholders.into_iter().zip(values) {
            self.fills.insert(placeholder, value.into_owned());
        }
        self
    }

    pub fn drop_section(mut self, section: Section) -> Self {
        self.drop_sections.push(section);
        self
    }

    pub fn collapse_blank_lines(mut self) -> Self {
        self.collapse_blank_lines = true;
        self
    }

    pub fn value(&self, placeholder: &str) -> Option<&str> {
        self.fills.get(placeholder).map(String::as_str)
    }

    pub fn apply(&self, template: &str) -> String {
        let mut text = template.to_string();
        for section in &self.drop_sections {
            text = section.pattern().replace_all(&text, "").into_owned();
        }

        let filled = PLACEHOLDER.replace_all(&text, |caps: &Captures| {
            self.fills
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });

        if self.collapse_blank_lines {
            BLANK_RUNS.replace_all(&filled, "\n\n").into_owned()
        } else {
            filled.into_owned()
        }
    }
}

/// Generation prompt: the subject goes into every `{SUBJECT_PLACEHOLDER}`.
pub fn build(user_text: &str, template: &str) -> String {
    Substitution::new().fill(SUBJECT, user_text).apply(template)
}

/// Edit prompt for a region (`Some(bbox)`) or for the whole image (`None`).
pub fn build_edit(
    bbox: Option<&BoundingBox>,
    edit_request: &str,
    template: &str,
    dims: Option<ImageDimensions>,
) -> String {
    edit_substitution(bbox, edit_request, dims).apply(template)
}

pub fn edit_substitution(
    bbox: Option<&BoundingBox>,
    edit_request: &str,
    dims: Option<ImageDimensions>,
) -> Substitution {
    let (width, height) = match dims {
        Some(dims) => (dims.width().to_string(), dims.height().to_string()),
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
    };
    let plan = Substitution::new()
        .fill(IMAGE_WIDTH, width)
        .fill(IMAGE_HEIGHT, height)
        .fill(EDIT_REQUEST, edit_request);

    let plan = match bbox {
        Some(bbox) => region_fills(plan, bbox, dims),
        None => PIXEL_PLACEHOLDERS
            .into_iter()
            .chain(NORMALIZED_PLACEHOLDERS)
            .chain(GRID_PLACEHOLDERS)
            .fold(
                plan.drop_section(Section::GridCellLocation)
                    .drop_section(Section::TechnicalReference),
                |plan, placeholder| plan.fill(placeholder, ""),
            ),
    };
    plan.collapse_blank_lines()
}

fn region_fills(
    plan: Substitution,
    bbox: &BoundingBox,
    dims: Option<ImageDimensions>,
) -> Substitution {
    let pixels = [
        bbox.x_top,
        bbox.y_top,
        bbox.x_bottom,
        bbox.y_bottom,
        bbox.width(),
        bbox.height(),
    ];
    let plan = plan.fill_all(
        PIXEL_PLACEHOLDERS,
        pixels.iter().map(|value| Cow::Owned(value.to_string())),
    );

    let Some(dims) = dims else {
        return plan
            .fill_all(
                NORMALIZED_PLACEHOLDERS,
                std::iter::repeat(Cow::Borrowed(NOT_AVAILABLE)),
            )
            .fill_all(
                GRID_PLACEHOLDERS,
                std::iter::repeat(Cow::Borrowed(NOT_AVAILABLE)),
            );
    };

    let width = f64::from(dims.width());
    let height = f64::from(dims.height());
    let divisors = [width, height, width, height, width, height];
    let normalized = pixels
        .iter()
        .zip(divisors)
        .map(|(value, divisor)| Cow::Owned(format!("{:.4}", *value as f64 / divisor)));

    let grid = locate(bbox, dims);
    let grid_values = [
        grid.row.to_string(),
        grid.row_name.clone(),
        grid.column.to_string(),
        grid.cell.clone(),
        grid.cell_description.clone(),
        grid.overlapping_cells_text(),
    ];

    plan.fill_all(NORMALIZED_PLACEHOLDERS, normalized)
        .fill_all(GRID_PLACEHOLDERS, grid_values.into_iter().map(Cow::Owned))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Generation,
    Edit,
}

impl TemplateKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Generation => "prompt_template.txt",
            Self::Edit => "edit_template.txt",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Generation => "Prompt template",
            Self::Edit => "Edit template",
        }
    }
}

/// Default templates read from a directory on first use and kept for the
/// life of the process.
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    generation: OnceLock<String>,
    edit: OnceLock<String>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            generation: OnceLock::new(),
            edit: OnceLock::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: TemplateKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn load(&self, kind: TemplateKind) -> Result<&str> {
        let cell = match kind {
            TemplateKind::Generation => &self.generation,
            TemplateKind::Edit => &self.edit,
        };
        if let Some(text) = cell.get() {
            return Ok(text);
        }
        let path = self.path(kind);
        if !path.is_file() {
            return Err(MoodboardError::configuration(format!(
                "{} file not found: {}",
                kind.label(),
                path.display()
            )));
        }
        let text = fs::read_to_string(&path)?;
        tracing::debug!(path = %path.display(), "loaded template");
        Ok(cell.get_or_init(|| text))
    }

    /// A non-blank per-request override wins over the stored default.
    pub fn resolve<'a>(
        &'a self,
        kind: TemplateKind,
        override_text: Option<&'a str>,
    ) -> Result<&'a str> {
        match override_text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => self.load(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDIT_TEMPLATE: &str = include_str!("../../../prompt_templates/edit_template.txt");

    fn region() -> BoundingBox {
        BoundingBox {
            x_top: 10,
            y_top: 20,
            x_bottom: 300,
            y_bottom: 400,
        }
    }

    fn moodboard() -> Option<ImageDimensions> {
        ImageDimensions::new(1440, 1024).ok()
    }

    #[test]
    fn build_fills_every_subject_placeholder() {
        let template = "Subject: {SUBJECT_PLACEHOLDER}\nAgain: {SUBJECT_PLACEHOLDER} {OTHER}";
        let prompt = build("linen resort wear", template);
        assert_eq!(
            prompt,
            "Subject: linen resort wear\nAgain: linen resort wear {OTHER}"
        );
    }

    #[test]
    fn build_is_idempotent() {
        let template = include_str!("../../../prompt_templates/prompt_template.txt");
        let first = build("indigo batik tailoring", template);
        let second = build("indigo batik tailoring", template);
        assert_eq!(first, second);
        assert!(first.contains("indigo batik tailoring"));
        assert!(!first.contains("{SUBJECT_PLACEHOLDER}"));
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let prompt = build("{X_TOP} as a literal", "{SUBJECT_PLACEHOLDER} / {X_TOP}");
        assert_eq!(prompt, "{X_TOP} as a literal / {X_TOP}");

        let edit = build_edit(
            Some(&region()),
            "write {GRID_ROW} on the tag",
            "{EDIT_REQUEST} {GRID_ROW}",
            moodboard(),
        );
        assert_eq!(edit, "write {GRID_ROW} on the tag 1");
    }

    #[test]
    fn edit_with_region_fills_pixels_normalized_and_grid() {
        let prompt = build_edit(
            Some(&region()),
            "swap the bag for a raffia tote",
            EDIT_TEMPLATE,
            moodboard(),
        );

        assert!(prompt.contains("swap the bag for a raffia tote"));
        assert!(prompt.contains("(10, 20) to (300, 400), 290 x 380 pixels"));
        assert!(prompt.contains("(0.0069, 0.0195) to (0.2083, 0.3906), 0.2014 x 0.3711"));
        assert!(prompt.contains("Full image size: 1440 x 1024 pixels"));
        assert!(prompt.contains("Target: Top Row (The Look), Cell 1"));
        assert!(prompt
            .contains("Primary cell: Row 1, Cell 1 (row 1, column 1, Top Row (The Look))"));
        assert!(prompt.contains("Overlapping Cells: 1"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn edit_with_region_but_unknown_dimensions_marks_derived_fields() {
        let prompt = build_edit(Some(&region()), "brighten", EDIT_TEMPLATE, None);
        assert!(prompt.contains("(10, 20) to (300, 400), 290 x 380 pixels"));
        assert!(prompt.contains("(N/A, N/A) to (N/A, N/A), N/A x N/A"));
        assert!(prompt.contains("Overlapping Cells: N/A"));
        assert!(prompt.contains("Full image size: N/A x N/A pixels"));
    }

    #[test]
    fn edit_without_region_drops_location_sections() {
        let prompt = build_edit(None, "make the palette warmer", EDIT_TEMPLATE, moodboard());

        assert!(prompt.contains("make the palette warmer"));
        assert!(!prompt.contains("Grid Cell Location"));
        assert!(!prompt.contains("Technical Reference"));
        assert!(!prompt.contains("Overlapping Cells"));
        for placeholder in ["{X_TOP}", "{GRID_ROW}", "{IMAGE_WIDTH}", "{WIDTH_NORM}"] {
            assert!(!prompt.contains(placeholder), "{placeholder} left behind");
        }
        assert!(!prompt.contains("\n\n\n"));
        assert!(prompt.contains("**Scope:**"));
    }

    #[test]
    fn edit_without_region_blanks_stray_placeholders() {
        let template = "Move it near {X_TOP},{Y_TOP} in {GRID_CELL}.\n\n\n\n{EDIT_REQUEST}";
        let prompt = build_edit(None, "tilt the hat", template, moodboard());
        assert_eq!(prompt, "Move it near , in .\n\ntilt the hat");
    }

    #[test]
    fn edit_substitution_exposes_planned_values() {
        let plan = edit_substitution(Some(&region()), "crop", moodboard());
        assert_eq!(plan.value("X_TOP_NORM"), Some("0.0069"));
        assert_eq!(plan.value("GRID_OVERLAPPING_CELLS"), Some("1"));
        assert_eq!(plan.value("IMAGE_WIDTH"), Some("1440"));

        let whole = edit_substitution(None, "crop", None);
        assert_eq!(whole.value("GRID_CELL"), Some(""));
        assert_eq!(whole.value("IMAGE_HEIGHT"), Some(NOT_AVAILABLE));
    }

    #[test]
    fn store_loads_once_and_prefers_overrides() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(TemplateKind::Generation.file_name());
        fs::write(&path, "first {SUBJECT_PLACEHOLDER}")?;

        let store = TemplateStore::new(temp.path());
        assert_eq!(store.load(TemplateKind::Generation)?, "first {SUBJECT_PLACEHOLDER}");

        fs::write(&path, "second {SUBJECT_PLACEHOLDER}")?;
        assert_eq!(store.load(TemplateKind::Generation)?, "first {SUBJECT_PLACEHOLDER}");

        assert_eq!(
            store.resolve(TemplateKind::Generation, Some("custom {SUBJECT_PLACEHOLDER}"))?,
            "custom {SUBJECT_PLACEHOLDER}"
        );
        assert_eq!(
            store.resolve(TemplateKind::Generation, Some("   "))?,
            "first {SUBJECT_PLACEHOLDER}"
        );
        Ok(())
    }

    #[test]
    fn missing_template_is_a_configuration_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = TemplateStore::new(temp.path());
        let err = store.load(TemplateKind::Edit).unwrap_err();
        assert!(matches!(err, MoodboardError::Configuration(_)));
        assert!(err.to_string().contains("Edit template file not found"));
        Ok(())
    }
}
