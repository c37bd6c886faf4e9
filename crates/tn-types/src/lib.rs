#![forbid(unsafe_code)]

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    /// True for dtypes with a natural numeric ordering.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            _ => self == other,
        }
    }

    /// Equality up to an absolute tolerance on the numeric value.
    ///
    /// Int64 pairs compare exactly so large integers never lose precision
    /// through an `f64` round trip. Missing values only match missing values.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        if self.is_missing() || other.is_missing() {
            return self.is_missing() && other.is_missing();
        }
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => match (self.to_f64(), other.to_f64()) {
                (Ok(a), Ok(b)) => a == b || (a - b).abs() <= tolerance,
                _ => false,
            },
        }
    }

    /// Natural numeric ordering for two non-missing numeric scalars.
    ///
    /// Returns `None` when either side is missing or non-numeric.
    #[must_use]
    pub fn numeric_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            _ if self.is_missing() || other.is_missing() => None,
            _ if self.dtype().is_numeric() && other.dtype().is_numeric() => {
                let a = self.to_f64().ok()?;
                let b = other.to_f64().ok()?;
                a.partial_cmp(&b)
            }
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool | Int64, Float64) | (Float64, Bool | Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

/// Cast a scalar to a target dtype, taking ownership so identity casts are free.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }
    if from == target {
        return Ok(value);
    }

    match (target, &value) {
        (DType::Null, _) => Ok(Scalar::Null(NullKind::Null)),
        (DType::Int64, Scalar::Bool(v)) => Ok(Scalar::Int64(i64::from(*v))),
        (DType::Int64, Scalar::Float64(v)) => {
            if !v.is_finite() || *v != v.trunc() || *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                return Err(TypeError::LossyFloatToInt { value: *v });
            }
            Ok(Scalar::Int64(*v as i64))
        }
        (DType::Float64, Scalar::Bool(v)) => Ok(Scalar::Float64(if *v { 1.0 } else { 0.0 })),
        (DType::Float64, Scalar::Int64(v)) => Ok(Scalar::Float64(*v as f64)),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{DType, NullKind, Scalar, cast_scalar, common_dtype, infer_dtype};

    #[test]
    fn dtype_inference_coerces_numeric_values() {
        let values = vec![Scalar::Bool(true), Scalar::Int64(7), Scalar::Float64(3.5)];
        assert_eq!(
            infer_dtype(&values).expect("dtype should infer"),
            DType::Float64
        );
    }

    #[test]
    fn missing_values_get_target_missing_marker() {
        let missing = Scalar::Null(NullKind::Null);
        let cast = cast_scalar(&missing, DType::Float64).expect("missing casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaN));
    }

    #[test]
    fn common_dtype_rejects_string_numeric_mix() {
        let err = common_dtype(DType::Utf8, DType::Int64).expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "dtype coercion from Utf8 to Int64 has no compatible common type"
        );
    }

    #[test]
    fn lossy_float_to_int_cast_is_rejected() {
        let err = cast_scalar(&Scalar::Float64(1.5), DType::Int64).expect_err("lossy");
        assert_eq!(err.to_string(), "cannot cast float 1.5 to int64 without loss");
    }

    #[test]
    fn only_int_and_float_are_numeric() {
        assert!(DType::Int64.is_numeric());
        assert!(DType::Float64.is_numeric());
        assert!(!DType::Bool.is_numeric());
        assert!(!DType::Utf8.is_numeric());
        assert!(!DType::Null.is_numeric());
    }

    #[test]
    fn approx_eq_respects_absolute_tolerance() {
        let a = Scalar::Float64(1.0);
        assert!(a.approx_eq(&Scalar::Float64(1.0 + 1e-13), 1e-12));
        assert!(!a.approx_eq(&Scalar::Float64(1.0 + 1e-11), 1e-12));
        assert!(a.approx_eq(&Scalar::Int64(1), 1e-12));
    }

    #[test]
    fn approx_eq_keeps_large_integers_exact() {
        let big = Scalar::Int64(i64::MAX);
        assert!(big.approx_eq(&Scalar::Int64(i64::MAX), 1e-12));
        assert!(!big.approx_eq(&Scalar::Int64(i64::MAX - 1), 1e-12));
    }

    #[test]
    fn approx_eq_matches_missing_only_to_missing() {
        let nan = Scalar::Float64(f64::NAN);
        assert!(nan.approx_eq(&Scalar::Null(NullKind::Null), 1e-12));
        assert!(!nan.approx_eq(&Scalar::Float64(0.0), 1e-12));
    }

    #[test]
    fn numeric_cmp_orders_mixed_numeric_and_skips_missing() {
        assert_eq!(
            Scalar::Int64(3).numeric_cmp(&Scalar::Float64(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Scalar::Float64(-0.0).numeric_cmp(&Scalar::Float64(0.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Scalar::Null(NullKind::Null).numeric_cmp(&Scalar::Int64(1)),
            None
        );
        assert_eq!(
            Scalar::Utf8("a".to_owned()).numeric_cmp(&Scalar::Int64(1)),
            None
        );
    }
}
