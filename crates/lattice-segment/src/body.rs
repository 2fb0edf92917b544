//! Segment bodies and the wire codec.
//!
//! A body is the data half of a segment in interchange form: the axis
//! key arrays plus the dense or sparse cell payload. Headers and bodies
//! are encoded with bincode; every value passing through a cache `put`
//! must survive the round trip, which is the mechanism that catches
//! schema drift in the body format.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::types::{CellValue, DataValue};

use crate::header::SegmentHeader;

/// Cell payload of a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyCells {
    /// Row-major array over the full coordinate space.
    Dense(Vec<CellValue>),
    /// Populated coordinates only, sorted by ordinals.
    Sparse(Vec<(Vec<usize>, CellValue)>),
}

/// The data half of a segment in interchange form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBody {
    /// Sorted distinct keys per axis, in constrained-column bit order.
    pub axis_keys: Vec<Vec<DataValue>>,
    /// The cells.
    pub cells: BodyCells,
}

impl SegmentBody {
    /// Creates a body, sorting sparse entries so that encoding is
    /// deterministic.
    #[must_use]
    pub fn new(axis_keys: Vec<Vec<DataValue>>, cells: BodyCells) -> Self {
        let cells = match cells {
            BodyCells::Sparse(mut entries) => {
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                BodyCells::Sparse(entries)
            }
            dense => dense,
        };
        Self { axis_keys, cells }
    }

    /// Number of populated cells.
    #[must_use]
    pub fn populated_count(&self) -> usize {
        match &self.cells {
            BodyCells::Dense(cells) => cells.iter().filter(|v| !v.is_null()).count(),
            BodyCells::Sparse(entries) => entries.len(),
        }
    }
}

/// Encodes a header for interchange.
pub fn encode_header(header: &SegmentHeader) -> LatticeResult<Bytes> {
    bincode::serialize(header)
        .map(Bytes::from)
        .map_err(|e| LatticeError::NotSerializable {
            what: "header",
            reason: e.to_string(),
        })
}

/// Decodes a header from interchange form.
pub fn decode_header(bytes: &[u8]) -> LatticeResult<SegmentHeader> {
    bincode::deserialize(bytes).map_err(|e| LatticeError::NotSerializable {
        what: "header",
        reason: e.to_string(),
    })
}

/// Encodes a body for interchange.
pub fn encode_body(body: &SegmentBody) -> LatticeResult<Bytes> {
    bincode::serialize(body)
        .map(Bytes::from)
        .map_err(|e| LatticeError::NotSerializable {
            what: "body",
            reason: e.to_string(),
        })
}

/// Decodes a body from interchange form.
pub fn decode_body(bytes: &[u8]) -> LatticeResult<SegmentBody> {
    bincode::deserialize(bytes).map_err(|e| LatticeError::NotSerializable {
        what: "body",
        reason: e.to_string(),
    })
}
