//! Tensor descriptors and the storage-layout algebra.
//!
//! Every data anchor on a node carries a [`TensorDescriptor`]: the
//! *storage* view (shape, format, dtype as laid out in memory) plus the
//! *origin* view (the logical, layout-independent shape the framework
//! declared). Layout passes rewrite the storage view; the origin view is
//! only changed by explicit origin setters and survives any number of
//! storage-format conversions.
//!
//! Correctness checks must compare origin shapes. Storage shapes of
//! blocked formats are zero-padded to the block size at the physical
//! level, so two tensors with equal origin shapes can have storage
//! shapes that disagree with the unpadded element count.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Row count of the inner tile in the fractal-NZ layout.
const FRACTAL_ROWS: u64 = 16;

/// Tensor element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean (1 byte).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 16-bit floating point (half precision).
    Float16,
    /// Brain floating point (bfloat16).
    BFloat16,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
}

impl DataType {
    /// Returns the size in bytes of this dtype.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns true if this is a floating-point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64
        )
    }

    /// Returns true if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }
}

/// A dimension size: statically known or unknown until runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    /// A statically known, non-negative dimension.
    Known(u64),
    /// A dimension determined at runtime (dynamic-shape graphs).
    Unknown,
}

impl Dim {
    /// Returns the static value if known.
    #[must_use]
    pub const fn known_value(self) -> Option<u64> {
        match self {
            Self::Known(n) => Some(n),
            Self::Unknown => None,
        }
    }

    /// Returns true if this dimension is statically known.
    #[must_use]
    pub const fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Ceiling-divides a known dimension by `block`; unknown stays unknown.
    #[must_use]
    const fn ceil_div(self, block: u64) -> Self {
        match self {
            Self::Known(n) => Self::Known(n.div_ceil(block)),
            Self::Unknown => Self::Unknown,
        }
    }

    /// Multiplies two dimensions; unknown is absorbing.
    #[must_use]
    const fn mul(self, other: Self) -> Self {
        match (self, other) {
            (Self::Known(a), Self::Known(b)) => Self::Known(a * b),
            _ => Self::Unknown,
        }
    }
}

/// Tensor shape (ordered dimension list).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(SmallVec<[Dim; 4]>);

impl Shape {
    /// Creates a new shape from dimensions.
    #[must_use]
    pub fn new(dims: impl IntoIterator<Item = Dim>) -> Self {
        Self(dims.into_iter().collect())
    }

    /// Creates a shape from statically known dimensions.
    #[must_use]
    pub fn from_static(dims: impl IntoIterator<Item = u64>) -> Self {
        Self(dims.into_iter().map(Dim::Known).collect())
    }

    /// Creates a scalar shape (rank 0).
    #[must_use]
    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    /// Returns the rank (number of dimensions).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the dimensions.
    #[must_use]
    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    /// Returns the total number of elements, if statically known.
    #[must_use]
    pub fn num_elements(&self) -> Option<u64> {
        self.0
            .iter()
            .try_fold(1u64, |acc, dim| dim.known_value().map(|n| acc * n))
    }

    /// Returns true if this is a scalar (rank 0).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if all dimensions are statically known.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.0.iter().all(|d| d.is_known())
    }
}

/// `(min, max)` bounds for one unknown dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimRange {
    /// Inclusive lower bound.
    pub min: u64,
    /// Inclusive upper bound.
    pub max: u64,
}

/// Storage format tags.
///
/// Plain formats (`Nd`, `Nchw`, `Nhwc`, `Hwcn`, `Ncdhw`, `Ndhwc`) store
/// the origin dimensions, possibly permuted. Blocked formats split the
/// channel dimension into block-count x block-size; `FractalNz` tiles the
/// two innermost dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Format-agnostic: dimensions as declared.
    Nd,
    /// Batch, channel, height, width.
    Nchw,
    /// Batch, height, width, channel.
    Nhwc,
    /// Height, width, channel, batch (filter layout).
    Hwcn,
    /// Batch, channel, depth, height, width.
    Ncdhw,
    /// Batch, depth, height, width, channel.
    Ndhwc,
    /// NCHW with the channel split into `C1 = ceil(C / c0)` blocks of `c0`.
    Nc1hwc0,
    /// NCDHW with the channel split, depth outermost of the spatial dims.
    Ndc1hwc0,
    /// Fractal-NZ tiling of the two innermost dimensions.
    FractalNz,
}

/// Errors raised by the tensor descriptor algebra.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TensorError {
    /// No derivation rule exists between the two formats.
    #[error("unsupported layout conversion: {from:?} -> {to:?}")]
    UnsupportedLayoutConversion {
        /// Source format.
        from: Format,
        /// Target format.
        to: Format,
    },

    /// The origin shape's rank does not fit the format's expansion rule.
    #[error("format {format:?} expects rank {expected}, got {got}")]
    RankMismatch {
        /// The format whose rule was applied.
        format: Format,
        /// Required rank.
        expected: usize,
        /// Actual rank.
        got: usize,
    },

    /// A block split was requested with a zero block size.
    #[error("block size must be positive")]
    InvalidBlockSize,
}

/// Derives the storage shape for `origin_shape` (laid out as
/// `origin_format`) when stored as `target_format`.
///
/// Pure and total over the supported format pairs; an unsupported pair
/// fails with [`TensorError::UnsupportedLayoutConversion`] rather than
/// returning the shape unmodified. Block splits use ceiling division:
/// the block count for channel `C` and block size `b` is `ceil(C / b)`,
/// and the remainder is zero-padded physically while the origin shape
/// keeps the unpadded value.
pub fn derive_storage_shape(
    origin_shape: &Shape,
    origin_format: Format,
    target_format: Format,
    block_size: u64,
) -> Result<Shape, TensorError> {
    use Format::*;

    if origin_format == target_format {
        return Ok(origin_shape.clone());
    }

    match (origin_format, target_format) {
        (Nd | Nchw, Nc1hwc0) => {
            let [n, c, h, w] = dims_array(origin_shape, target_format)?;
            check_block(block_size)?;
            Ok(Shape::new([
                n,
                c.ceil_div(block_size),
                h,
                w,
                Dim::Known(block_size),
            ]))
        }
        (Nc1hwc0, Nd | Nchw) => {
            let [n, c1, h, w, c0] = dims_array(origin_shape, origin_format)?;
            Ok(Shape::new([n, c1.mul(c0), h, w]))
        }
        (Nd | Ncdhw, Ndc1hwc0) => {
            let [n, c, d, h, w] = dims_array(origin_shape, target_format)?;
            check_block(block_size)?;
            Ok(Shape::new([
                n,
                d,
                c.ceil_div(block_size),
                h,
                w,
                Dim::Known(block_size),
            ]))
        }
        (Ndc1hwc0, Nd | Ncdhw) => {
            let [n, d, c1, h, w, c0] = dims_array(origin_shape, origin_format)?;
            Ok(Shape::new([n, c1.mul(c0), d, h, w]))
        }
        (Nd, FractalNz) => {
            check_block(block_size)?;
            let rank = origin_shape.rank();
            if rank < 2 {
                return Err(TensorError::RankMismatch {
                    format: target_format,
                    expected: 2,
                    got: rank,
                });
            }
            let dims = origin_shape.dims();
            let (batch, tail) = dims.split_at(rank - 2);
            let (a, b) = (tail[0], tail[1]);
            let mut out: SmallVec<[Dim; 4]> = batch.iter().copied().collect();
            out.push(b.ceil_div(block_size));
            out.push(a.ceil_div(FRACTAL_ROWS));
            out.push(Dim::Known(FRACTAL_ROWS));
            out.push(Dim::Known(block_size));
            Ok(Shape(out))
        }
        (FractalNz, Nd) => {
            let rank = origin_shape.rank();
            if rank < 4 {
                return Err(TensorError::RankMismatch {
                    format: origin_format,
                    expected: 4,
                    got: rank,
                });
            }
            let dims = origin_shape.dims();
            let (batch, tail) = dims.split_at(rank - 4);
            let (b1, a1, a0, b0) = (tail[0], tail[1], tail[2], tail[3]);
            let mut out: SmallVec<[Dim; 4]> = batch.iter().copied().collect();
            out.push(a1.mul(a0));
            out.push(b1.mul(b0));
            Ok(Shape(out))
        }
        (Nchw, Nhwc) => permute(origin_shape, origin_format, &[0, 2, 3, 1]),
        (Nhwc, Nchw) => permute(origin_shape, origin_format, &[0, 3, 1, 2]),
        (Nchw, Hwcn) => permute(origin_shape, origin_format, &[2, 3, 1, 0]),
        (Hwcn, Nchw) => permute(origin_shape, origin_format, &[3, 2, 0, 1]),
        (Ncdhw, Ndhwc) => permute(origin_shape, origin_format, &[0, 2, 3, 4, 1]),
        (Ndhwc, Ncdhw) => permute(origin_shape, origin_format, &[0, 4, 1, 2, 3]),
        (from, to) => Err(TensorError::UnsupportedLayoutConversion { from, to }),
    }
}

fn check_block(block_size: u64) -> Result<(), TensorError> {
    if block_size == 0 {
        Err(TensorError::InvalidBlockSize)
    } else {
        Ok(())
    }
}

fn dims_array<const N: usize>(shape: &Shape, format: Format) -> Result<[Dim; N], TensorError> {
    <[Dim; N]>::try_from(shape.dims()).map_err(|_| TensorError::RankMismatch {
        format,
        expected: N,
        got: shape.rank(),
    })
}

fn permute(shape: &Shape, format: Format, perm: &[usize]) -> Result<Shape, TensorError> {
    if shape.rank() != perm.len() {
        return Err(TensorError::RankMismatch {
            format,
            expected: perm.len(),
            got: shape.rank(),
        });
    }
    let dims = shape.dims();
    Ok(Shape::new(perm.iter().map(|&i| dims[i])))
}

/// Shape, format and dtype for one data anchor, in both storage and
/// origin views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    shape: Shape,
    format: Format,
    dtype: DataType,
    origin_shape: Shape,
    origin_format: Format,
    origin_dtype: DataType,
    shape_range: Option<Vec<DimRange>>,
}

impl TensorDescriptor {
    /// Creates a descriptor whose storage and origin views coincide.
    #[must_use]
    pub fn new(shape: Shape, format: Format, dtype: DataType) -> Self {
        Self {
            shape: shape.clone(),
            format,
            dtype,
            origin_shape: shape,
            origin_format: format,
            origin_dtype: dtype,
            shape_range: None,
        }
    }

    /// Creates a scalar descriptor in `Nd` format.
    #[must_use]
    pub fn scalar(dtype: DataType) -> Self {
        Self::new(Shape::scalar(), Format::Nd, dtype)
    }

    /// Storage shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Storage format.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Storage dtype.
    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Logical (pre-layout) shape.
    #[must_use]
    pub fn origin_shape(&self) -> &Shape {
        &self.origin_shape
    }

    /// Logical format.
    #[must_use]
    pub fn origin_format(&self) -> Format {
        self.origin_format
    }

    /// Logical dtype.
    #[must_use]
    pub fn origin_dtype(&self) -> DataType {
        self.origin_dtype
    }

    /// Per-dimension bounds for unknown dims, if declared.
    #[must_use]
    pub fn shape_range(&self) -> Option<&[DimRange]> {
        self.shape_range.as_deref()
    }

    /// Overwrites the storage shape.
    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    /// Overwrites the storage format without re-deriving the shape.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Overwrites the storage dtype.
    pub fn set_dtype(&mut self, dtype: DataType) {
        self.dtype = dtype;
    }

    /// Overwrites the origin shape.
    pub fn set_origin_shape(&mut self, shape: Shape) {
        self.origin_shape = shape;
    }

    /// Overwrites the origin format.
    pub fn set_origin_format(&mut self, format: Format) {
        self.origin_format = format;
    }

    /// Overwrites the origin dtype.
    pub fn set_origin_dtype(&mut self, dtype: DataType) {
        self.origin_dtype = dtype;
    }

    /// Declares bounds for unknown dimensions.
    pub fn set_shape_range(&mut self, range: Vec<DimRange>) {
        self.shape_range = Some(range);
    }

    /// Re-derives the storage shape from the (unchanged) origin view for
    /// a new storage format.
    pub fn update_storage(&mut self, target: Format, block_size: u64) -> Result<(), TensorError> {
        let shape =
            derive_storage_shape(&self.origin_shape, self.origin_format, target, block_size)?;
        self.shape = shape;
        self.format = target;
        Ok(())
    }
}
