use crate::driver::DeviceAddress;

/// Failures reported by a [`Driver`](crate::Driver) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("out of device memory allocating {size} bytes for {label}")]
    OutOfMemory { label: String, size: u64 },
    #[error("unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("{label} is not host visible")]
    NotHostVisible { label: String },
    #[error("address {address:#x} is not backed by any buffer")]
    UnmappedAddress { address: DeviceAddress },
    #[error("write of {len} bytes at offset {offset} exceeds {label} ({size} bytes)")]
    OutOfBounds {
        label: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("unknown submission {0}")]
    UnknownSubmission(u64),
    #[error("{0}")]
    Backend(String),
}

/// Violations of the triangle-piece invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("index count {0} is not a multiple of 3")]
    IndexCount(u32),
    #[error("{records} auxiliary records for {triangles} triangles")]
    RecordCount { records: u64, triangles: u32 },
    #[error("stride {stride} is smaller than {required} bytes")]
    Stride { stride: u64, required: u64 },
    #[error("index buffer holds {available} bytes, {required} needed")]
    IndexBufferSize { available: u64, required: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccelerationError {
    #[error("failed to allocate {size} bytes for {label}")]
    AccelerationAllocationFailed {
        label: String,
        size: u64,
        #[source]
        source: DriverError,
    },
    #[error("mesh {0} has no bottom-level acceleration structure")]
    MissingBottomLevelStructure(usize),
    #[error("mesh {mesh}, piece {piece}: {source}")]
    InvalidGeometry {
        mesh: usize,
        piece: usize,
        #[source]
        source: GeometryError,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackagingError {
    #[error("device refused a heap of {size} bytes")]
    HeapAllocationFailed {
        size: u64,
        #[source]
        source: DriverError,
    },
    #[error("heap overflow placing {label}: {size} bytes at offset {offset} exceeds capacity {capacity}")]
    HeapOverflow {
        label: String,
        offset: u64,
        size: u64,
        capacity: u64,
    },
    #[error("{label} is not available")]
    ResourceUnavailable { label: String },
    #[error("failed to allocate {label}")]
    BufferAllocationFailed {
        label: String,
        #[source]
        source: DriverError,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}
