//! Maps a pixel bounding box onto the fixed moodboard layout: a tall top row
//! of four portrait looks over a shorter bottom row of four detail shots.

use serde::Serialize;

use crate::error::{MoodboardError, Result};

/// Fraction of the image height taken by the top row.
pub const ROW_SPLIT: f64 = 0.6;
pub const COLUMNS: u32 = 4;
pub const TOP_ROW_NAME: &str = "Top Row (The Look)";
pub const BOTTOM_ROW_NAME: &str = "Bottom Row (The Details)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    width: u32,
    height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MoodboardError::validation(format!(
                "Image dimensions must be positive (got {width}x{height})."
            )));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Pixel rectangle with `x_top < x_bottom` and `y_top < y_bottom`.
///
/// Built through [`crate::bbox::resolve_bounding_box`], which also checks it
/// against the image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x_top: i64,
    pub y_top: i64,
    pub x_bottom: i64,
    pub y_bottom: i64,
}

impl BoundingBox {
    pub fn width(&self) -> i64 {
        self.x_bottom - self.x_top
    }

    pub fn height(&self) -> i64 {
        self.y_bottom - self.y_top
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridCellInfo {
    pub row: u32,
    pub row_name: String,
    pub column: u32,
    pub cell: String,
    pub cell_description: String,
    pub overlapping_cells: Vec<u32>,
}

impl GridCellInfo {
    pub fn overlapping_cells_text(&self) -> String {
        self.overlapping_cells
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn locate(bbox: &BoundingBox, dims: ImageDimensions) -> GridCellInfo {
    let width = f64::from(dims.width);
    let height = f64::from(dims.height);
    let center_x = (bbox.x_top + bbox.x_bottom) as f64 / 2.0 / width;
    let center_y = (bbox.y_top + bbox.y_bottom) as f64 / 2.0 / height;

    let (row, row_name) = if center_y < ROW_SPLIT {
        (1, TOP_ROW_NAME)
    } else {
        (2, BOTTOM_ROW_NAME)
    };

    let cell_width = 1.0 / f64::from(COLUMNS);
    let column = ((center_x / cell_width).floor().max(0.0) as u32 + 1).min(COLUMNS);

    // Touching a column edge counts as overlapping it.
    let left = bbox.x_top as f64 / width;
    let right = bbox.x_bottom as f64 / width;
    let overlapping_cells: Vec<u32> = (1..=COLUMNS)
        .filter(|col| {
            let col_left = f64::from(col - 1) * cell_width;
            let col_right = f64::from(*col) * cell_width;
            !(right < col_left || left > col_right)
        })
        .collect();

    let cells = match overlapping_cells.as_slice() {
        [only] => format!("Cell {only}"),
        [first, second] => format!("Cells {first} and {second}"),
        many => format!(
            "Cells {}",
            many.iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };

    GridCellInfo {
        row,
        row_name: row_name.to_string(),
        column,
        cell: format!("Row {row}, Cell {column}"),
        cell_description: format!("{row_name}, {cells}"),
        overlapping_cells,
    }
}
