//! Packaging of everything one frame's kernel reads into a tree of fixed-layout records.

mod layout;
mod placement;
mod resolve;

pub use layout::{
    AccelerationView, ArgsView, BackgroundView, EnvView, FrameView, MaterialView, MeshView,
    PieceView, PrimitiveInstance,
};

use serde::{Deserialize, Serialize};

use crate::accelerator::Acceleration;
use crate::command_recorder::CommandRecorder;
use crate::driver::DeviceAddress;
use crate::error::PackagingError;
use crate::resource_pool::ResourcePool;
use crate::scene::{Background, Env, Frame};
use crate::{Buffer, Device, Heap, Texture};

use placement::{HeapPlacement, Measure, StagingPlacement};
use resolve::Resolver;

/// Where the records and the resources they reference live during a frame.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Residency {
    /// Records in fresh host-visible buffers, resources used where they are.
    #[default]
    Staging,
    /// Records and per-frame resources copied into one heap sized up front.
    Heap,
}

/// Inputs of one packaging pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameArgs<'a> {
    pub target: &'a Texture,
    pub frame: Frame,
    pub seeds: &'a Texture,
    pub background: &'a Background,
    pub env: &'a Env,
    pub acceleration: &'a Acceleration,
}

/// The packaged frame. Holds everything created for it; drop it after the submission completed.
#[derive(Debug)]
pub struct ArgsHandle {
    address: DeviceAddress,
    residency: Residency,
    heap: Option<Heap>,
    measured: Option<u64>,
    buffers: Vec<Buffer>,
    textures: Vec<Texture>,
    substituted: usize,
}

impl ArgsHandle {
    /// Device address of the root [`ArgsView`].
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn heap(&self) -> Option<&Heap> {
        self.heap.as_ref()
    }

    /// Size the heap was allocated with, for heap residency.
    pub fn measured(&self) -> Option<u64> {
        self.measured
    }

    /// Buffers created for this frame: staged records, or heap-backed copies.
    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// Heap-backed texture copies.
    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// How many unavailable textures were replaced by the placeholder.
    pub fn substituted(&self) -> usize {
        self.substituted
    }
}

pub struct Packager {
    device: Device,
    residency: Residency,
    label_prefix: String,
    placeholder: Option<Texture>,
}

impl Packager {
    pub fn new(device: &Device, residency: Residency) -> Self {
        Self {
            device: device.clone(),
            residency,
            label_prefix: "Args".to_owned(),
            placeholder: None,
        }
    }

    pub fn with_label_prefix(mut self, prefix: &str) -> Self {
        self.label_prefix = prefix.to_owned();
        self
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn set_residency(&mut self, residency: Residency) {
        self.residency = residency;
    }

    pub fn label_prefix(&self) -> &str {
        &self.label_prefix
    }

    pub fn placeholder(&self) -> Option<&Texture> {
        self.placeholder.as_ref()
    }

    /// With a placeholder set, unavailable textures are replaced instead of failing the frame.
    pub fn set_placeholder(&mut self, placeholder: Option<Texture>) {
        self.placeholder = placeholder;
    }

    /// Bytes a heap needs to hold the frame's records and resources.
    pub fn measure(
        &self,
        pool: &mut ResourcePool,
        args: &FrameArgs,
    ) -> Result<u64, PackagingError> {
        let mut resolver = Resolver::new(
            Measure::new(&self.device),
            pool,
            self.placeholder.as_ref(),
            &self.label_prefix,
        );
        resolver.resolve_args(args)?;
        let size = resolver.into_placement().size();
        log::debug!("measured {} bytes of frame {}", size, args.frame.id);
        Ok(size)
    }

    /// Records the copies and residency marks of one frame on `recorder` and returns its root.
    pub fn package_frame(
        &self,
        recorder: &mut CommandRecorder,
        pool: &mut ResourcePool,
        args: &FrameArgs,
    ) -> Result<ArgsHandle, PackagingError> {
        match self.residency {
            Residency::Staging => self.package_staged(recorder, pool, args),
            Residency::Heap => self.package_on_heap(recorder, pool, args),
        }
    }

    fn package_staged(
        &self,
        recorder: &mut CommandRecorder,
        pool: &mut ResourcePool,
        args: &FrameArgs,
    ) -> Result<ArgsHandle, PackagingError> {
        let mut resolver = Resolver::new(
            StagingPlacement::new(recorder),
            pool,
            self.placeholder.as_ref(),
            &self.label_prefix,
        );
        let address = resolver.resolve_args(args)?;
        let substituted = resolver.substituted();
        let placement = resolver.into_placement();
        log::trace!(
            "staged frame {} in {} buffers",
            args.frame.id,
            placement.views.len()
        );
        Ok(ArgsHandle {
            address,
            residency: Residency::Staging,
            heap: None,
            measured: None,
            buffers: placement.views,
            textures: Vec::new(),
            substituted,
        })
    }

    fn package_on_heap(
        &self,
        recorder: &mut CommandRecorder,
        pool: &mut ResourcePool,
        args: &FrameArgs,
    ) -> Result<ArgsHandle, PackagingError> {
        let size = self.measure(pool, args)?;
        let name = format!("{} heap", self.label_prefix);
        let heap = self
            .device
            .create_heap(Some(&name), size)
            .map_err(|source| PackagingError::HeapAllocationFailed { size, source })?;
        recorder.use_heap(&heap);

        let mut resolver = Resolver::new(
            HeapPlacement::new(&heap, recorder),
            pool,
            self.placeholder.as_ref(),
            &self.label_prefix,
        );
        let address = resolver.resolve_args(args)?;
        let substituted = resolver.substituted();
        let placement = resolver.into_placement();
        log::debug!(
            "placed frame {} into {}: {} of {} bytes",
            args.frame.id,
            name,
            heap.used(),
            size
        );
        Ok(ArgsHandle {
            address,
            residency: Residency::Heap,
            heap: Some(heap),
            measured: Some(size),
            buffers: placement.placed_buffers,
            textures: placement.placed_textures,
            substituted,
        })
    }
}
