//! Table definitions loaded from RON files under `<asset_dir>/tables/`.
//!
//! A table file names its ruleset, its pockets, the cue ball placement area
//! and the collision file holding the cushion layout. Positions are given on
//! the x/z plane of the playing surface.

use crate::error::TableError;
use billiards_shared::{Vec3, BALL_RADIUS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_POCKET_RADIUS: f32 = 0.06;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Ruleset {
    Eightball,
    Nineball,
    BarBilliards,
    Snooker,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PocketData {
    pub position: (f32, f32),
    #[serde(default)]
    pub radius: f32,
}

impl PocketData {
    /// Radius with the table default applied to unset entries.
    pub fn effective_radius(&self) -> f32 {
        if self.radius <= 0.0 {
            DEFAULT_POCKET_RADIUS
        } else {
            self.radius
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SpawnData {
    pub position: (f32, f32),
    /// Half extents of the area.
    pub size: (f32, f32),
}

/// Axis aligned rectangle on the x/z plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.left
            && x <= self.left + self.width
            && z >= self.bottom
            && z <= self.bottom + self.height
    }

    pub fn centre(&self) -> (f32, f32) {
        (
            self.left + self.width * 0.5,
            self.bottom + self.height * 0.5,
        )
    }

    /// Moves `position` onto the nearest point inside the rectangle, keeping its height.
    /// A non-finite coordinate is replaced by the centre's.
    pub fn clamp(&self, position: Vec3) -> Vec3 {
        let (cx, cz) = self.centre();
        let x = if position.x.is_finite() {
            position.x.clamp(self.left, self.left + self.width)
        } else {
            cx
        };
        let z = if position.z.is_finite() {
            position.z.clamp(self.bottom, self.bottom + self.height)
        } else {
            cz
        };
        Vec3::new(x, position.y, z)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.left, self.bottom, self.width, self.height]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableData {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    pub collision: String,
    pub ruleset: Ruleset,
    pub pockets: Vec<PocketData>,
    pub spawn: SpawnData,
}

impl TableData {
    pub fn load(asset_dir: &Path, name: &str) -> Result<Self, TableError> {
        let path = table_path(asset_dir, &format!("{}.table.ron", name));
        let mut data: TableData = read_ron(&path)?;
        data.name = name.to_string();
        Ok(data)
    }

    pub fn spawn_area(&self) -> Rect {
        let (x, z) = self.spawn.position;
        let (w, h) = self.spawn.size;
        Rect {
            left: x - w,
            bottom: z - h,
            width: w * 2.0,
            height: h * 2.0,
        }
    }

    pub fn validate(&self) -> Result<(), TableError> {
        if self.collision.is_empty() {
            return Err(TableError::Invalid(format!("{}: no collision file", self.name)));
        }
        if self.pockets.is_empty() {
            return Err(TableError::Invalid(format!("{}: no pockets", self.name)));
        }
        if self.ruleset == Ruleset::Void {
            return Err(TableError::Invalid(format!("{}: no valid ruleset", self.name)));
        }
        let area = self.spawn_area();
        if area.width <= 0.0 || area.height <= 0.0 {
            return Err(TableError::Invalid(format!("{}: empty spawn area", self.name)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Segment {
    pub start: (f32, f32),
    pub end: (f32, f32),
}

/// Cushion layout and playing surface extents.
#[derive(Debug, Clone, Deserialize)]
pub struct CollisionMesh {
    /// Half extents of the playing surface on x and z.
    pub half_extents: (f32, f32),
    #[serde(default = "default_cushion_height")]
    pub cushion_height: f32,
    pub cushions: Vec<Segment>,
}

fn default_cushion_height() -> f32 {
    BALL_RADIUS * 1.6
}

impl CollisionMesh {
    pub fn load(asset_dir: &Path, file: &str) -> Result<Self, TableError> {
        let path = table_path(asset_dir, file);
        let mesh: CollisionMesh = read_ron(&path)?;
        mesh.validate(&path)?;
        Ok(mesh)
    }

    fn validate(&self, path: &Path) -> Result<(), TableError> {
        let (hx, hz) = self.half_extents;
        if hx <= 0.0 || hz <= 0.0 {
            return Err(TableError::Invalid(format!(
                "{}: surface has no area",
                path.display()
            )));
        }
        if self.cushions.is_empty() {
            return Err(TableError::Invalid(format!(
                "{}: no cushions",
                path.display()
            )));
        }
        Ok(())
    }
}

fn table_path(asset_dir: &Path, file: &str) -> PathBuf {
    asset_dir.join("tables").join(file)
}

fn read_ron<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TableError> {
    let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&text).map_err(|source| TableError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
