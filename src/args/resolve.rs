//! One `resolve_*` per entity, turning host descriptions into the records of
//! [`layout`](super::layout). The same walk measures, places into a heap or stages.

use bytemuck::{bytes_of, cast_slice};

use super::layout::{
    AccelerationView, ArgsView, BackgroundView, EnvView, FrameView, MaterialView, MeshView,
    PieceView,
};
use super::placement::Placement;
use super::FrameArgs;
use crate::accelerator::Acceleration;
use crate::driver::{DeviceAddress, ResourceId, ResourceUsage};
use crate::error::PackagingError;
use crate::resource_pool::ResourcePool;
use crate::scene::{Background, Env, Frame, Material, Mesh, Piece};
use crate::Texture;

pub(crate) struct Resolver<'a, P> {
    placement: P,
    pool: &'a mut ResourcePool,
    placeholder: Option<&'a Texture>,
    prefix: &'a str,
    substituted: usize,
}

impl<'a, P: Placement> Resolver<'a, P> {
    pub(crate) fn new(
        placement: P,
        pool: &'a mut ResourcePool,
        placeholder: Option<&'a Texture>,
        prefix: &'a str,
    ) -> Self {
        Self {
            placement,
            pool,
            placeholder,
            prefix,
            substituted: 0,
        }
    }

    /// Number of textures replaced by the placeholder so far.
    pub(crate) fn substituted(&self) -> usize {
        self.substituted
    }

    pub(crate) fn into_placement(self) -> P {
        self.placement
    }

    fn label(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    /// `texture` if its contents exist, otherwise the placeholder when one is set.
    fn available(&mut self, texture: &Texture, label: &str) -> Result<Texture, PackagingError> {
        if texture.is_ready() {
            return Ok(texture.clone());
        }
        match self.placeholder {
            Some(placeholder) => {
                log::warn!("{} is not uploaded yet, using a placeholder", label);
                self.substituted += 1;
                Ok(placeholder.clone())
            }
            None => Err(PackagingError::ResourceUnavailable {
                label: label.to_owned(),
            }),
        }
    }

    fn texture(
        &mut self,
        texture: &Texture,
        label: &str,
        usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError> {
        let texture = self.available(texture, label)?;
        self.placement.texture(&texture, label, usage)
    }

    fn texture_in_place(
        &mut self,
        texture: &Texture,
        label: &str,
        usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError> {
        let texture = self.available(texture, label)?;
        Ok(self.placement.texture_in_place(&texture, usage))
    }

    /// Pooled records must not capture a placeholder, so those are written as plain views.
    fn pooled_or_view(
        &mut self,
        label: &str,
        bytes: &[u8],
        substituted_before: usize,
    ) -> Result<DeviceAddress, PackagingError> {
        if self.substituted > substituted_before {
            self.placement.view(bytes, label)
        } else {
            self.placement.pooled_view(self.pool, label, bytes, false)
        }
    }

    pub(crate) fn resolve_args(&mut self, args: &FrameArgs) -> Result<DeviceAddress, PackagingError> {
        let target = self.texture_in_place(args.target, &self.label("Target"), ResourceUsage::Write)?;
        let seeds =
            self.texture_in_place(args.seeds, &self.label("Seeds"), ResourceUsage::ReadWrite)?;
        let view = ArgsView {
            target,
            seeds,
            frame: self.resolve_frame(args.frame)?,
            background: self.resolve_background(args.background)?,
            env: self.resolve_env(args.env)?,
            acceleration: self.resolve_acceleration(args.acceleration)?,
        };
        let label = self.prefix.to_owned();
        self.placement.view(bytes_of(&view), &label)
    }

    /// The frame record is pooled and rewritten from the host every frame. Frames still in flight
    /// read the same buffer, so a frame submitted before the previous one completed can observe
    /// the newer id.
    pub(crate) fn resolve_frame(&mut self, frame: Frame) -> Result<DeviceAddress, PackagingError> {
        let view = FrameView { id: frame.id };
        let label = self.label("Frame");
        self.placement
            .pooled_view(self.pool, &label, bytes_of(&view), true)
    }

    pub(crate) fn resolve_background(
        &mut self,
        background: &Background,
    ) -> Result<DeviceAddress, PackagingError> {
        let label = self.label("Background");
        let before = self.substituted;
        let view = BackgroundView {
            source: self.texture_in_place(
                &background.source,
                &self.label("Background/Source"),
                ResourceUsage::Read,
            )?,
        };
        self.pooled_or_view(&label, bytes_of(&view), before)
    }

    pub(crate) fn resolve_env(&mut self, env: &Env) -> Result<DeviceAddress, PackagingError> {
        let label = self.label("Env");
        let before = self.substituted;
        let view = EnvView {
            diffuse: self.texture_in_place(
                &env.diffuse,
                &self.label("Env/Diffuse"),
                ResourceUsage::Read,
            )?,
            specular: self.texture_in_place(
                &env.specular,
                &self.label("Env/Specular"),
                ResourceUsage::Read,
            )?,
            lut: self.texture_in_place(&env.lut, &self.label("Env/Lut"), ResourceUsage::Read)?,
        };
        self.pooled_or_view(&label, bytes_of(&view), before)
    }

    pub(crate) fn resolve_acceleration(
        &mut self,
        acceleration: &Acceleration,
    ) -> Result<DeviceAddress, PackagingError> {
        let top = acceleration.structure();
        let structure = self
            .placement
            .acceleration_structure(top.acceleration_structure());
        for bottom in top.bottom_level_structures() {
            self.placement
                .acceleration_structure(bottom.acceleration_structure());
        }

        let meshes = acceleration
            .meshes()
            .iter()
            .enumerate()
            .map(|(index, mesh)| self.resolve_mesh(mesh, index))
            .collect::<Result<Vec<_>, _>>()?;
        let meshes_label = self.label(&format!("Meshes?Count={}", meshes.len()));
        let meshes = self.placement.view(cast_slice(&meshes), &meshes_label)?;

        let instances_label =
            self.label(&format!("Instances?Count={}", acceleration.instances().len()));
        let instances = self
            .placement
            .view(cast_slice(acceleration.instances()), &instances_label)?;

        let view = AccelerationView {
            structure,
            meshes,
            instances,
        };
        let label = self.label("Acceleration");
        self.placement.view(bytes_of(&view), &label)
    }

    pub(crate) fn resolve_mesh(
        &mut self,
        mesh: &Mesh,
        mesh_index: usize,
    ) -> Result<MeshView, PackagingError> {
        let pieces = mesh
            .pieces()
            .iter()
            .enumerate()
            .map(|(piece_index, piece)| self.resolve_piece(piece, mesh_index, piece_index))
            .collect::<Result<Vec<_>, _>>()?;
        let label = self.label(&format!("Pieces?Mesh={}&Count={}", mesh_index, pieces.len()));
        Ok(MeshView {
            pieces: self.placement.view(cast_slice(&pieces), &label)?,
        })
    }

    pub(crate) fn resolve_piece(
        &mut self,
        piece: &Piece,
        mesh_index: usize,
        piece_index: usize,
    ) -> Result<PieceView, PackagingError> {
        let query = format!("Mesh={}&Piece={}", mesh_index, piece_index);
        let material = self.resolve_material(piece.material.as_ref(), &query)?;
        let label = self.label(&format!("Primitives?{}", query));
        let primitive_data = self.placement.buffer(&piece.data().buffer, &label)?;
        Ok(PieceView {
            material,
            primitive_data,
        })
    }

    /// Absent materials and absent textures resolve to null handles; the record is written anyway.
    pub(crate) fn resolve_material(
        &mut self,
        material: Option<&Material>,
        query: &str,
    ) -> Result<DeviceAddress, PackagingError> {
        let mut view = MaterialView::default();
        if let Some(material) = material {
            if let Some(albedo) = &material.albedo {
                let label = self.label(&format!("Albedo?{}", query));
                view.albedo = self.texture(albedo, &label, ResourceUsage::Read)?;
            }
            if let Some(metal_roughness) = &material.metal_roughness {
                let label = self.label(&format!("MetalRoughness?{}", query));
                view.metal_roughness = self.texture(metal_roughness, &label, ResourceUsage::Read)?;
            }
        }
        let label = self.label(&format!("Material?{}", query));
        self.placement.view(bytes_of(&view), &label)
    }
}
