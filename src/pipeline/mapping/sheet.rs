//! Minimal cell-level view of a worksheet used by the mapping engine.

/// 1-based cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Column letters for a 1-based column index (1 → A, 27 → AA).
pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

/// Font attributes relevant to marker detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontStyle {
    pub bold: bool,
    /// Hex color as stored in the document (`FFFF0000`, `FF0000`).
    pub color: Option<String>,
}

impl FontStyle {
    /// Bold and pure red.
    pub fn is_marker(&self) -> bool {
        self.bold
            && self
                .color
                .as_deref()
                .is_some_and(|c| c.to_ascii_uppercase().ends_with("FF0000"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    /// Display text; numbers and booleans rendered as written.
    pub text: String,
    /// The cell holds a string rather than a number, boolean or formula result.
    pub is_text: bool,
    pub font: FontStyle,
}

/// Literal value written into a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

pub trait Sheet {
    /// Last row holding any cell.
    fn max_row(&self) -> u32;

    /// Text, kind and font of a cell, `None` for empty cells.
    fn cell(&self, cell: CellRef) -> Option<CellView>;

    /// Replace the cell's value, keeping its style.
    fn set_value(&mut self, cell: CellRef, value: CellValue);
}
