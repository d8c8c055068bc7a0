//! Orbit camera and world-to-screen projection

use glam::{Mat4, Vec3, Vec4Swizzles};
use serde::{Deserialize, Serialize};

/// A point in client (screen) pixels, origin top-left, y down
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// A rectangle of the render target, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Camera orbiting a target point, y-up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Rotation around the up axis, radians
    pub azimuth: f32,
    /// Angle above the horizon, radians
    pub elevation: f32,
    /// Vertical field of view, radians
    #[serde(default = "default_fov")]
    pub fov_y: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    pub viewport: Viewport,
}

fn default_fov() -> f32 {
    45f32.to_radians()
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    10_000.0
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 50.0,
            azimuth: 0.8,
            elevation: 0.5,
            fov_y: default_fov(),
            near: default_near(),
            far: default_far(),
            viewport: Viewport::new(0, 0, 1280, 720),
        }
    }
}

impl OrbitCamera {
    /// Eye position derived from the orbit parameters
    pub fn eye(&self) -> Vec3 {
        let (sin_el, cos_el) = self.elevation.sin_cos();
        let (sin_az, cos_az) = self.azimuth.sin_cos();
        self.target + self.distance * Vec3::new(cos_el * cos_az, sin_el, cos_el * sin_az)
    }

    pub fn view_projection(&self) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye(), self.target, Vec3::Y);
        let projection =
            Mat4::perspective_rh(self.fov_y, self.viewport.aspect(), self.near, self.far);
        projection * view
    }

    /// Project a world point to client pixels
    ///
    /// Points behind the eye are mirrored through it by the perspective
    /// divide. [`OrbitCamera::project`] rejects them instead.
    pub fn world_to_screen(&self, world: Vec3) -> ScreenPoint {
        let clip = self.view_projection() * world.extend(1.0);
        let w = if clip.w.abs() < f32::EPSILON { f32::EPSILON } else { clip.w };
        let ndc = clip.xyz() / w;
        let vp = self.viewport;
        ScreenPoint::new(
            vp.x as f32 + (ndc.x * 0.5 + 0.5) * vp.width as f32,
            vp.y as f32 + (1.0 - (ndc.y * 0.5 + 0.5)) * vp.height as f32,
        )
    }

    pub fn is_in_front(&self, world: Vec3) -> bool {
        let forward = (self.target - self.eye()).normalize_or_zero();
        (world - self.eye()).dot(forward) > 0.0
    }

    /// Client pixels of a world point, `None` when it is behind the camera
    pub fn project(&self, world: Vec3) -> Option<ScreenPoint> {
        self.is_in_front(world).then(|| self.world_to_screen(world))
    }
}
