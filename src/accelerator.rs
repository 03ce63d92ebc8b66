use crate::acceleration_structure::{
    BottomAccelerationStructure, InstanceDescriptor, TopAccelerationStructure, TriangleGeometry,
};
use crate::args::PrimitiveInstance;
use crate::command_recorder::CommandRecorder;
use crate::error::AccelerationError;
use crate::scene::Mesh;
use crate::Device;

/// The traceable scene: the top-level structure, the meshes it was built from and the
/// instance → mesh lookup kernels use to find a hit's data.
#[derive(Debug, Clone)]
pub struct Acceleration {
    structure: TopAccelerationStructure,
    meshes: Vec<Mesh>,
    instances: Vec<PrimitiveInstance>,
}

impl Acceleration {
    pub fn structure(&self) -> &TopAccelerationStructure {
        &self.structure
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// One entry per instance descriptor, in descriptor order.
    pub fn instances(&self) -> &[PrimitiveInstance] {
        &self.instances
    }
}

/// Result of [`Accelerator::rebuild`].
#[derive(Debug)]
pub struct SceneBuild {
    pub acceleration: Acceleration,
    /// For each mesh of the acceleration, its index in the list passed to `rebuild`.
    pub mesh_indices: Vec<usize>,
    /// Meshes left out because their bottom-level structure could not be built.
    pub dropped: Vec<(usize, AccelerationError)>,
}

#[derive(Clone)]
pub struct Accelerator {
    device: Device,
}

impl Accelerator {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// Records the bottom-level build of `mesh`, one triangle geometry per piece. The returned
    /// structure is usable once the command buffer has completed.
    pub fn encode_geometry(
        &self,
        recorder: &mut CommandRecorder,
        mesh: &Mesh,
        mesh_index: usize,
    ) -> Result<BottomAccelerationStructure, AccelerationError> {
        let geometries = mesh
            .pieces()
            .iter()
            .enumerate()
            .map(|(piece_index, piece)| {
                TriangleGeometry::new(mesh.positions(), piece.indices(), piece.data()).map_err(
                    |source| AccelerationError::InvalidGeometry {
                        mesh: mesh_index,
                        piece: piece_index,
                        source,
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let name = match mesh.name() {
            Some(name) => format!("{} acceleration structure", name),
            None => format!("Primitive?Mesh={}", mesh_index),
        };
        BottomAccelerationStructure::encode(&name, recorder, geometries)
    }

    /// Records the top-level build over `meshes`: one instance descriptor per (mesh, instance) in
    /// mesh-then-instance order, indexing the mesh's position in `meshes`.
    pub fn encode_scene(
        &self,
        recorder: &mut CommandRecorder,
        meshes: &[Mesh],
    ) -> Result<Acceleration, AccelerationError> {
        let structures = meshes
            .iter()
            .enumerate()
            .map(|(index, mesh)| {
                mesh.acceleration_structure()
                    .cloned()
                    .ok_or(AccelerationError::MissingBottomLevelStructure(index))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut descriptors = Vec::new();
        let mut instances = Vec::new();
        for (index, mesh) in meshes.iter().enumerate() {
            for instance in mesh.instances() {
                descriptors.push(InstanceDescriptor::opaque(
                    instance.packed_transform(),
                    index as u32,
                ));
                instances.push(PrimitiveInstance::new(index as u32));
            }
        }
        log::debug!(
            "encoding scene of {} meshes and {} instances",
            meshes.len(),
            descriptors.len()
        );

        let structure = TopAccelerationStructure::encode(
            "Instanced acceleration structure",
            recorder,
            &descriptors,
            &structures,
        )?;
        Ok(Acceleration {
            structure,
            meshes: meshes.to_vec(),
            instances,
        })
    }

    /// Builds the bottom-level structure of `mesh`, the `mesh_index`th of its scene, and attaches it.
    pub fn build_geometry(&self, mesh: &mut Mesh, mesh_index: usize) -> Result<(), AccelerationError> {
        let mut cmd_buf = self.device.create_command_buffer(Some("Build geometry"));
        let structure =
            cmd_buf.encode(|recorder| self.encode_geometry(recorder, mesh, mesh_index))?;
        self.device.queue().submit_blocking(&[cmd_buf])?;
        mesh.attach_acceleration_structure(structure);
        Ok(())
    }

    pub fn build_scene(&self, meshes: &[Mesh]) -> Result<Acceleration, AccelerationError> {
        let mut cmd_buf = self.device.create_command_buffer(Some("Build scene"));
        let acceleration = cmd_buf.encode(|recorder| self.encode_scene(recorder, meshes))?;
        self.device.queue().submit_blocking(&[cmd_buf])?;
        Ok(acceleration)
    }

    /// Rebuilds every mesh without a bottom-level structure, then the top-level structure, in one
    /// submission that is waited on. Meshes whose own build fails are left out of the scene.
    pub fn rebuild(&self, meshes: &mut [Mesh]) -> Result<SceneBuild, AccelerationError> {
        let mut cmd_buf = self.device.create_command_buffer(Some("Acceleration"));
        let (acceleration, built, mesh_indices, dropped) = cmd_buf.encode(|recorder| {
            let mut built = Vec::new();
            let mut dropped = Vec::new();
            for (index, mesh) in meshes.iter().enumerate() {
                if !mesh.needs_build() {
                    continue;
                }
                match self.encode_geometry(recorder, mesh, index) {
                    Ok(structure) => built.push((index, structure)),
                    Err(
                        err @ (AccelerationError::AccelerationAllocationFailed { .. }
                        | AccelerationError::InvalidGeometry { .. }),
                    ) => {
                        log::warn!("dropping mesh {} from the scene: {}", index, err);
                        dropped.push((index, err));
                    }
                    Err(err) => return Err(err),
                }
            }

            let mut renderable = Vec::new();
            let mut mesh_indices = Vec::new();
            for (index, mesh) in meshes.iter().enumerate() {
                if dropped.iter().any(|(i, _)| *i == index) {
                    continue;
                }
                let mut mesh = mesh.clone();
                if let Some((_, structure)) = built.iter().find(|(i, _)| *i == index) {
                    mesh.attach_acceleration_structure(structure.clone());
                }
                renderable.push(mesh);
                mesh_indices.push(index);
            }
            let acceleration = self.encode_scene(recorder, &renderable)?;
            Ok((acceleration, built, mesh_indices, dropped))
        })?;

        self.device.queue().submit_blocking(&[cmd_buf])?;
        for (index, structure) in built {
            meshes[index].attach_acceleration_structure(structure);
        }
        log::info!(
            "rebuilt scene: {} meshes, {} instances, {} dropped",
            acceleration.meshes().len(),
            acceleration.instances().len(),
            dropped.len()
        );
        Ok(SceneBuild {
            acceleration,
            mesh_indices,
            dropped,
        })
    }
}
