//! Plate design input: well positions, formats and design validation.
//!
//! The kernel asserts position uniqueness per plate and treats the rest
//! of the design as given; layout generation lives outside the core.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Declared plate format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateFormat {
    Plate96,
    Plate384,
}

impl PlateFormat {
    /// Number of rows.
    pub fn rows(&self) -> u8 {
        match self {
            PlateFormat::Plate96 => 8,
            PlateFormat::Plate384 => 16,
        }
    }

    /// Number of columns.
    pub fn cols(&self) -> u8 {
        match self {
            PlateFormat::Plate96 => 12,
            PlateFormat::Plate384 => 24,
        }
    }
}

impl std::str::FromStr for PlateFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "96" | "plate96" => Ok(PlateFormat::Plate96),
            "384" | "plate384" => Ok(PlateFormat::Plate384),
            other => Err(format!("unknown plate format: {other}")),
        }
    }
}

/// Parsed well position, row and column both zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WellPos {
    pub row: u8,
    pub col: u8,
}

impl WellPos {
    /// Parse positions like `B7` or `B07`.
    pub fn parse(pos: &str, format: PlateFormat) -> Result<Self> {
        let mut chars = pos.chars();
        let row_char = chars.next().ok_or_else(|| {
            KernelError::Design(format!("empty well position '{pos}'"))
        })?;
        if !row_char.is_ascii_alphabetic() {
            return Err(KernelError::Design(format!(
                "well position '{pos}' must start with a row letter"
            )));
        }
        let row = (row_char.to_ascii_uppercase() as u8) - b'A';
        let col_str: String = chars.collect();
        let col_one_based: u8 = col_str.parse().map_err(|_| {
            KernelError::Design(format!("well position '{pos}' has a bad column"))
        })?;
        if col_one_based == 0 {
            return Err(KernelError::Design(format!(
                "well position '{pos}' column is one-based"
            )));
        }
        let col = col_one_based - 1;
        if row >= format.rows() || col >= format.cols() {
            return Err(KernelError::Design(format!(
                "well position '{pos}' outside {format:?}"
            )));
        }
        Ok(Self { row, col })
    }

    /// Whether this well sits on the outer ring of the plate.
    pub fn is_edge(&self, format: PlateFormat) -> bool {
        self.row == 0
            || self.col == 0
            || self.row == format.rows() - 1
            || self.col == format.cols() - 1
    }
}

/// One well of a consumed plate design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellRecord {
    pub plate_id: String,
    pub well_pos: String,
    pub cell_line: String,
    /// None for untreated / vehicle wells
    pub compound: Option<String>,
    #[serde(default)]
    pub dose_um: f64,
    #[serde(default)]
    pub is_sentinel: bool,
    #[serde(default)]
    pub sentinel_type: Option<String>,
    pub day: u32,
    pub operator: String,
    pub timepoint_h: f64,
}

/// Validate a consumed design: every position parses within the format
/// and is unique per plate.
pub fn validate_design(wells: &[WellRecord], format: PlateFormat) -> Result<()> {
    let mut seen: std::collections::HashSet<(&str, WellPos)> =
        std::collections::HashSet::new();
    for well in wells {
        let pos = WellPos::parse(&well.well_pos, format)?;
        if !seen.insert((well.plate_id.as_str(), pos)) {
            return Err(KernelError::Design(format!(
                "duplicate position {} on plate {}",
                well.well_pos, well.plate_id
            )));
        }
    }
    tracing::debug!(wells = wells.len(), "plate design validated");
    Ok(())
}
