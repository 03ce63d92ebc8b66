use rand::Rng;

use crate::accelerator::{Acceleration, Accelerator, SceneBuild};
use crate::args::{ArgsHandle, FrameArgs, Packager};
use crate::command_recorder::CommandRecorder;
use crate::config::RendererConfig;
use crate::driver::{align_up, MemoryLocation, PixelFormat, SubmissionId, TextureDescriptor, TextureUsage};
use crate::error::{AccelerationError, DriverError, PackagingError};
use crate::resource_pool::ResourcePool;
use crate::scene::{Background, Env, Frame, Mesh};
use crate::{ComputeKernel, Device, Texture};

#[derive(Debug)]
pub enum FrameOutcome {
    /// The frame was dispatched; `frame` is the counter value it was packaged with.
    Submitted {
        frame: Frame,
        submission: SubmissionId,
    },
    /// Packaging failed. Nothing was dispatched and the target keeps the previous image.
    Skipped(PackagingError),
    /// No scene was built yet.
    NoScene,
}

/// Drives one ray-generation kernel over one packaged scene per frame.
pub struct Raytracer {
    device: Device,
    config: RendererConfig,
    accelerator: Accelerator,
    packager: Packager,
    pool: ResourcePool,
    kernel: ComputeKernel,
    target: Texture,
    seeds: Texture,
    placeholder: Texture,
    frame: Frame,
    acceleration: Option<Acceleration>,
}

impl Raytracer {
    pub fn new<P>(device: &Device, config: RendererConfig, kernel_code: P) -> anyhow::Result<Self>
    where
        P: AsRef<[u8]>,
    {
        config.validate()?;
        let kernel = device.create_compute_kernel(Some("Raytrace"), kernel_code)?;
        let target = create_target(device, &config)?;
        let seeds = create_seeds(device, config.resolution)?;
        let placeholder = Texture::fill(device, config.placeholder_color)?;
        let packager =
            Packager::new(device, config.residency).with_label_prefix(&config.label_prefix);
        log::info!(
            "raytracer on {}: {}x{}, {:?} residency",
            device.name(),
            config.resolution[0],
            config.resolution[1],
            config.residency
        );
        Ok(Self {
            device: device.clone(),
            accelerator: Accelerator::new(device),
            packager,
            pool: ResourcePool::new(),
            kernel,
            target,
            seeds,
            placeholder,
            frame: Frame::default(),
            acceleration: None,
            config,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn target(&self) -> &Texture {
        &self.target
    }

    pub fn seeds(&self) -> &Texture {
        &self.seeds
    }

    /// Counter value the next frame is packaged with.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn acceleration(&self) -> Option<&Acceleration> {
        self.acceleration.as_ref()
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ResourcePool {
        &mut self.pool
    }

    pub fn packager(&self) -> &Packager {
        &self.packager
    }

    /// Rebuilds stale bottom-level structures and the top-level structure, waiting for the build.
    pub fn update_scene(&mut self, meshes: &mut [Mesh]) -> Result<SceneBuild, AccelerationError> {
        let build = self.accelerator.rebuild(meshes)?;
        self.acceleration = Some(build.acceleration.clone());
        Ok(build)
    }

    /// Packages and dispatches one frame, then records `present` on the same command buffer and
    /// submits without waiting. `on_completed` runs from a later [`poll`](Self::poll).
    pub fn render_frame<P, F>(
        &mut self,
        background: &Background,
        env: &Env,
        present: P,
        on_completed: F,
    ) -> Result<FrameOutcome, DriverError>
    where
        P: FnOnce(&mut CommandRecorder, &Texture),
        F: FnOnce() + Send + 'static,
    {
        self.poll()?;
        let acceleration = match &self.acceleration {
            Some(acceleration) => acceleration,
            None => return Ok(FrameOutcome::NoScene),
        };
        let frame = self.frame;
        let args = FrameArgs {
            target: &self.target,
            frame,
            seeds: &self.seeds,
            background,
            env,
            acceleration,
        };

        let mut cmd_buf = self.device.create_command_buffer(Some("Render"));
        let packager = &self.packager;
        let pool = &mut self.pool;
        let packaged = cmd_buf.encode(|recorder| packager.package_frame(recorder, pool, &args));
        let handle = match packaged {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("skipping frame {}: {}", frame.id, err);
                if self.packager.placeholder().is_none() {
                    self.packager.set_placeholder(Some(self.placeholder.clone()));
                }
                return Ok(FrameOutcome::Skipped(err));
            }
        };
        if handle.substituted() == 0 && self.packager.placeholder().is_some() {
            log::debug!("every texture is available again, dropping the placeholder");
            self.packager.set_placeholder(None);
        }

        let size = self.config.resolution;
        cmd_buf.encode(|recorder| {
            self.dispatch(recorder, &handle, size);
            present(recorder, &self.target);
        });
        let submission = self.device.queue().submit(cmd_buf, move || {
            drop(handle);
            on_completed();
        })?;
        self.frame.advance();
        Ok(FrameOutcome::Submitted { frame, submission })
    }

    /// Records the kernel over an image of `size` pixels.
    pub fn dispatch(&self, recorder: &mut CommandRecorder, args: &ArgsHandle, size: [u32; 2]) {
        let threadgroups = self.threadgroups(size);
        let [x, y] = self.config.threads_per_group;
        log::trace!("dispatching {:?} groups of {}x{}", threadgroups, x, y);
        recorder.dispatch(&self.kernel, args.address(), threadgroups, [x, y, 1]);
    }

    /// Groups needed to cover `size`, rounding partial blocks up.
    pub fn threadgroups(&self, size: [u32; 2]) -> [u32; 3] {
        let [x, y] = self.config.threads_per_group;
        [align_up(size[0], x) / x, align_up(size[1], y) / y, 1]
    }

    pub fn resize(&mut self, size: [u32; 2]) -> Result<(), DriverError> {
        if size == self.config.resolution {
            return Ok(());
        }
        log::debug!("resizing target to {}x{}", size[0], size[1]);
        let mut config = self.config.clone();
        config.resolution = size;
        self.target = create_target(&self.device, &config)?;
        self.seeds = create_seeds(&self.device, size)?;
        self.config = config;
        Ok(())
    }

    /// Runs completion callbacks of finished frames.
    pub fn poll(&self) -> Result<usize, DriverError> {
        self.device.queue().poll()
    }

    pub fn wait_idle(&self) -> Result<(), DriverError> {
        self.device.queue().wait_idle()
    }
}

fn create_target(device: &Device, config: &RendererConfig) -> Result<Texture, DriverError> {
    let [width, height] = config.resolution;
    device.create_texture(
        Some("Target"),
        &TextureDescriptor::new_2d(config.target_format, width, height, TextureUsage::Storage),
        MemoryLocation::GpuOnly,
    )
}

/// One random `u32` per pixel.
fn create_seeds(device: &Device, size: [u32; 2]) -> Result<Texture, DriverError> {
    let [width, height] = size;
    let mut rng = rand::rng();
    let seeds = (0..width as usize * height as usize)
        .map(|_| rng.random::<u32>())
        .collect::<Vec<_>>();
    device.create_texture_init(
        Some("Seeds"),
        &TextureDescriptor::new_2d(PixelFormat::R32Uint, width, height, TextureUsage::Storage),
        bytemuck::cast_slice(&seeds),
    )
}
