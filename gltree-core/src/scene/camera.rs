use glam::{Mat4, Vec3, Vec4};

use super::{FrameContext, NodeTransform, RenderFlags, Renderable};

/// A perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// World to view space.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed perspective projection.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.aspect, self.near, self.far)
    }

    /// `projection * view`.
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Places a camera in the scene.
///
/// Before its children the node moves the camera to its world position as
/// seen through the cascade transform and makes it the active camera; after
/// its children the previous camera is restored.
#[derive(Debug, Clone)]
pub struct CameraNode {
    camera: Camera,
    world_position: Vec3,
}

impl CameraNode {
    /// Places the camera at `camera.position` in the node's local space.
    pub fn new(camera: Camera) -> Self {
        Self {
            world_position: camera.position,
            camera,
        }
    }

    /// The camera as of the last traversal.
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Sets the local-space position transformed by the cascade each frame.
    pub fn set_world_position(&mut self, position: Vec3) {
        self.world_position = position;
    }
}

impl<E> Renderable<E> for CameraNode {
    fn render_flags(&self) -> RenderFlags {
        RenderFlags::all()
    }

    fn before_children(&mut self, transform: &NodeTransform, ctx: &mut FrameContext) -> Result<(), E> {
        let position = transform.cascade * self.world_position.extend(1.0);
        let position = if position.w != 0.0 {
            position / position.w
        } else {
            position
        };
        self.camera.position = Vec4::truncate(position);
        ctx.push_camera(self.camera);
        Ok(())
    }

    fn after_children(&mut self, _transform: &NodeTransform, ctx: &mut FrameContext) -> Result<(), E> {
        ctx.pop_camera();
        Ok(())
    }
}
