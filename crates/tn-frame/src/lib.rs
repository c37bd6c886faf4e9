#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tn_columnar::{Column, ColumnError};
use tn_types::{DType, Scalar};

/// Name of the second column of every extraction result.
pub const ORIGINAL_ROW_INDICES: &str = "Original_Row_Indices";

/// Suffix given to a result's values column when the source column is itself
/// named [`ORIGINAL_ROW_INDICES`].
pub const COLLIDING_VALUES_SUFFIX: &str = "_values";

/// Distance from an integer below which a fractional row count snaps to it.
const COUNT_SNAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("column '{column}' has length {actual}, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name: '{0}'")]
    DuplicateColumn(String),
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("column index {index} out of bounds for frame with {num_columns} columns")]
    ColumnIndexOutOfBounds { index: usize, num_columns: usize },
    #[error("percent must be in (0, 100], got {0}")]
    InvalidPercent(f64),
    #[error("direction flag must be 0 (top) or 1 (bottom), got {0}")]
    InvalidDirectionFlag(i64),
    #[error("column '{column}' has non-numeric dtype {dtype:?}")]
    NonNumericColumn { column: String, dtype: DType },
    #[error("frame layout is inconsistent: {0}")]
    InconsistentLayout(String),
    #[error("row position {0} does not fit in an int64 row index")]
    RowIndexOverflow(usize),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Column reference by name or by position; both resolve to one position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelector {
    ByName(String),
    ByIndex(usize),
}

impl From<&str> for ColumnSelector {
    fn from(value: &str) -> Self {
        Self::ByName(value.to_owned())
    }
}

impl From<String> for ColumnSelector {
    fn from(value: String) -> Self {
        Self::ByName(value)
    }
}

impl From<usize> for ColumnSelector {
    fn from(value: usize) -> Self {
        Self::ByIndex(value)
    }
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "'{name}'"),
            Self::ByIndex(index) => write!(f, "#{index}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Largest values first.
    Top,
    /// Smallest values first.
    Bottom,
}

impl Direction {
    /// Decode the integer flag form: `0` is top, `1` is bottom.
    pub fn from_flag(flag: i64) -> Result<Self, FrameError> {
        match flag {
            0 => Ok(Self::Top),
            1 => Ok(Self::Bottom),
            other => Err(FrameError::InvalidDirectionFlag(other)),
        }
    }

    #[must_use]
    pub fn as_flag(self) -> i64 {
        match self {
            Self::Top => 0,
            Self::Bottom => 1,
        }
    }

    fn order(self, ascending: Ordering) -> Ordering {
        match self {
            Self::Top => ascending.reverse(),
            Self::Bottom => ascending,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => f.write_str("top"),
            Self::Bottom => f.write_str("bottom"),
        }
    }
}

fn validate_percent(percent: f64) -> Result<(), FrameError> {
    if percent.is_nan() || percent <= 0.0 || percent > 100.0 {
        return Err(FrameError::InvalidPercent(percent));
    }
    Ok(())
}

/// Number of rows a `percent` selection takes from `rows` rows.
///
/// `ceil(percent * rows / 100)`, except that a product within
/// `COUNT_SNAP_EPSILON` of an integer snaps to that integer so float noise
/// never adds a row. Clipped to `rows`.
pub fn selection_row_count(percent: f64, rows: usize) -> Result<usize, FrameError> {
    validate_percent(percent)?;
    let raw = percent * rows as f64 / 100.0;
    let nearest = raw.round();
    let count = if (raw - nearest).abs() < COUNT_SNAP_EPSILON {
        nearest
    } else {
        raw.ceil()
    };
    Ok((count as usize).min(rows))
}

/// Name of the values column in a result drawn from source column `source`.
#[must_use]
pub fn result_value_name(source: &str) -> String {
    if source == ORIGINAL_ROW_INDICES {
        format!("{source}{COLLIDING_VALUES_SUFFIX}")
    } else {
        source.to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr")]
pub struct DataFrame {
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
    row_count: usize,
}

#[derive(Deserialize)]
struct FrameRepr {
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
    row_count: usize,
}

impl TryFrom<FrameRepr> for DataFrame {
    type Error = FrameError;

    fn try_from(mut repr: FrameRepr) -> Result<Self, Self::Error> {
        let mut ordered = Vec::with_capacity(repr.column_order.len());
        for name in repr.column_order {
            let Some(column) = repr.columns.remove(&name) else {
                return Err(FrameError::InconsistentLayout(format!(
                    "column '{name}' is ordered but absent or repeated"
                )));
            };
            ordered.push((name, column));
        }
        if let Some(extra) = repr.columns.keys().next() {
            return Err(FrameError::InconsistentLayout(format!(
                "column '{extra}' is missing from the column order"
            )));
        }

        let frame = Self::new(ordered)?;
        if frame.row_count != repr.row_count {
            return Err(FrameError::InconsistentLayout(format!(
                "row count {} but columns hold {} rows",
                repr.row_count, frame.row_count
            )));
        }
        Ok(frame)
    }
}

impl DataFrame {
    /// Build a frame from named columns, keeping the given column order.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let row_count = columns.first().map_or(0, |(_, column)| column.len());
        let mut by_name = BTreeMap::new();
        let mut column_order = Vec::with_capacity(columns.len());

        for (name, column) in columns {
            if column.len() != row_count {
                return Err(FrameError::LengthMismatch {
                    column: name,
                    expected: row_count,
                    actual: column.len(),
                });
            }
            if by_name.contains_key(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            column_order.push(name.clone());
            by_name.insert(name, column);
        }

        Ok(Self {
            columns: by_name,
            column_order,
            row_count,
        })
    }

    /// Build a frame from raw scalar vectors, inferring each column's dtype.
    pub fn from_dict(columns: Vec<(&str, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let columns = columns
            .into_iter()
            .map(|(name, values)| Ok((name.to_owned(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_order.len()
    }

    /// Column names in positional order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn column_at(&self, position: usize) -> Option<(&str, &Column)> {
        let name = self.column_order.get(position)?;
        self.columns.get(name).map(|column| (name.as_str(), column))
    }

    /// Resolve a selector to its canonical column position.
    pub fn resolve_column(&self, selector: &ColumnSelector) -> Result<usize, FrameError> {
        match selector {
            ColumnSelector::ByName(name) => self
                .column_order
                .iter()
                .position(|candidate| candidate == name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone())),
            ColumnSelector::ByIndex(index) => {
                if *index < self.column_order.len() {
                    Ok(*index)
                } else {
                    Err(FrameError::ColumnIndexOutOfBounds {
                        index: *index,
                        num_columns: self.column_order.len(),
                    })
                }
            }
        }
    }

    /// Extract the top or bottom `percent` of rows by one numeric column.
    ///
    /// The result has two columns: the selected values (named after the
    /// source column by [`result_value_name`], same dtype) in `direction`
    /// order, then
    /// [`ORIGINAL_ROW_INDICES`] holding each value's source row. Ties are
    /// ordered by ascending source row. Missing values are never selected,
    /// so the result is shorter than the requested count when the column
    /// holds too few values.
    pub fn extract_extremum_fraction(
        &self,
        selector: &ColumnSelector,
        percent: f64,
        direction: Direction,
    ) -> Result<Self, FrameError> {
        let position = self.resolve_column(selector)?;
        let (name, column) = self
            .column_at(position)
            .ok_or(FrameError::ColumnIndexOutOfBounds {
                index: position,
                num_columns: self.num_columns(),
            })?;
        let count = selection_row_count(percent, self.row_count)?;

        if self.is_empty() {
            return Self::extraction_result(name, column, &[]);
        }
        if !column.dtype().is_numeric() {
            return Err(FrameError::NonNumericColumn {
                column: name.to_owned(),
                dtype: column.dtype(),
            });
        }

        let values = column.values();
        let compare = |left: &usize, right: &usize| {
            let ascending = values[*left]
                .numeric_cmp(&values[*right])
                .unwrap_or(Ordering::Equal);
            direction.order(ascending).then(left.cmp(right))
        };

        let mut selected: Vec<usize> = column.validity().valid_positions().collect();
        let take = count.min(selected.len());
        if take == 0 {
            return Self::extraction_result(name, column, &[]);
        }
        if take < selected.len() {
            selected.select_nth_unstable_by(take - 1, compare);
            selected.truncate(take);
        }
        selected.sort_unstable_by(compare);

        Self::extraction_result(name, column, &selected)
    }

    pub fn top_n(
        &self,
        selector: impl Into<ColumnSelector>,
        percent: f64,
    ) -> Result<Self, FrameError> {
        self.extract_extremum_fraction(&selector.into(), percent, Direction::Top)
    }

    pub fn bottom_n(
        &self,
        selector: impl Into<ColumnSelector>,
        percent: f64,
    ) -> Result<Self, FrameError> {
        self.extract_extremum_fraction(&selector.into(), percent, Direction::Bottom)
    }

    fn extraction_result(
        name: &str,
        column: &Column,
        positions: &[usize],
    ) -> Result<Self, FrameError> {
        let row_indices = positions
            .iter()
            .map(|&position| {
                i64::try_from(position).map_err(|_| FrameError::RowIndexOverflow(position))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(vec![
            (result_value_name(name), column.take(positions)?),
            (ORIGINAL_ROW_INDICES.to_owned(), Column::from_i64(&row_indices)),
        ])
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.row_count == other.row_count
            && self.column_order == other.column_order
            && self.column_order.iter().all(|name| {
                match (self.columns.get(name), other.columns.get(name)) {
                    (Some(left), Some(right)) => left.semantic_eq(right),
                    _ => false,
                }
            })
    }
}
